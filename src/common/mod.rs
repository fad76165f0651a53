//! Common functionality.

use byte_unit::Byte;
use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};

/// Commonly used command line arguments.
#[derive(Parser, Debug)]
pub struct Args {
    /// Verbosity of the program
    #[clap(flatten)]
    pub verbose: Verbosity<InfoLevel>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            verbose: Verbosity::new(0, 0),
        }
    }
}

/// Helper to print the current memory resident set size via `tracing`.
pub fn trace_rss_now() {
    if let Ok(me) = procfs::process::Process::myself() {
        let page_size = procfs::page_size();
        if let Ok(stat) = me.stat() {
            tracing::debug!(
                "RSS now: {}",
                Byte::from_u64(stat.rss * page_size)
                    .get_appropriate_unit(byte_unit::UnitType::Binary)
            );
        }
    }
}

/// Select the genome release to use.
#[derive(
    clap::ValueEnum,
    Clone,
    Copy,
    Debug,
    strum::Display,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum GenomeRelease {
    /// GRCh37 / hg19
    #[strum(serialize = "grch37")]
    Grch37,
    /// GRCh38 / hg38
    #[strum(serialize = "grch38")]
    Grch38,
}

impl GenomeRelease {
    /// The assembly name as it appears on the wire (`GRCh37` / `GRCh38`).
    pub fn name(&self) -> String {
        match self {
            GenomeRelease::Grch37 => String::from("GRCh37"),
            GenomeRelease::Grch38 => String::from("GRCh38"),
        }
    }

    /// The opposite assembly, used as the liftover target.
    pub fn other(&self) -> Self {
        match self {
            GenomeRelease::Grch37 => GenomeRelease::Grch38,
            GenomeRelease::Grch38 => GenomeRelease::Grch37,
        }
    }

    /// Strict parsing of the wire form, matching `^(GRCh38|GRCh37)$`.
    ///
    /// Requests carrying any other assembly name must be rejected before
    /// any work starts.
    pub fn from_wire(s: &str) -> Result<Self, anyhow::Error> {
        match s {
            "GRCh37" => Ok(GenomeRelease::Grch37),
            "GRCh38" => Ok(GenomeRelease::Grch38),
            _ => Err(anyhow::anyhow!("Unsupported reference assembly: {}", s)),
        }
    }
}

impl std::str::FromStr for GenomeRelease {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.to_ascii_lowercase();
        if s.starts_with("grch37") {
            Ok(GenomeRelease::Grch37)
        } else if s.starts_with("grch38") {
            Ok(GenomeRelease::Grch38)
        } else {
            Err(anyhow::anyhow!("Unknown genome release: {}", s))
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use super::GenomeRelease;

    #[test]
    fn trace_rss_now_smoke() {
        super::trace_rss_now();
    }

    #[rstest::rstest]
    #[case(GenomeRelease::Grch37, "GRCh37")]
    #[case(GenomeRelease::Grch38, "GRCh38")]
    fn genome_release_name(#[case] release: GenomeRelease, #[case] expected: &str) {
        assert_eq!(expected, release.name());
    }

    #[rstest::rstest]
    #[case(GenomeRelease::Grch37, GenomeRelease::Grch38)]
    #[case(GenomeRelease::Grch38, GenomeRelease::Grch37)]
    fn genome_release_other(
        #[case] release: GenomeRelease,
        #[case] expected: GenomeRelease,
    ) {
        assert_eq!(expected, release.other());
    }

    #[rstest::rstest]
    #[case("GRCh37", true)]
    #[case("GRCh38", true)]
    #[case("grch38", false)]
    #[case("GRCh36", false)]
    #[case("NCBI36", false)]
    fn genome_release_from_wire(#[case] s: &str, #[case] ok: bool) {
        assert_eq!(ok, GenomeRelease::from_wire(s).is_ok());
    }

    #[rstest::rstest]
    #[case(GenomeRelease::Grch37, "grch37")]
    #[case(GenomeRelease::Grch38, "grch38")]
    fn genome_release_from_str(
        #[case] release: GenomeRelease,
        #[case] s: &str,
    ) -> Result<(), anyhow::Error> {
        let res: GenomeRelease = s.parse()?;

        assert_eq!(res, release);

        Ok(())
    }
}
