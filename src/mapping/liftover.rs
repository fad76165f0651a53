//! Liftover of variations between GRCh37 and GRCh38.
//!
//! The façade resolves which assembly a variation sits on from its refget
//! accession aliases, converts the location endpoint by endpoint through
//! a [`CoordinateConverter`], and rebuilds the variation on the target
//! assembly with freshly computed identifiers.  Raw chain-file
//! coordinate conversion is an external collaborator.

use std::collections::HashMap;

use crate::common::GenomeRelease;
use crate::storage::Storage;
use crate::translate::Translator;
use crate::vrs::{
    digest, Coordinate, SequenceReference, Variation, VariationMapping, VariationMappingType,
    VrsObject,
};

/// Classified liftover failures.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LiftoverError {
    #[error("Unable to complete liftover: malformed variant input")]
    MalformedInput,
    #[error(
        "Unable to complete liftover: liftover is unsupported for variants without refget \
         accession, start position, and end position"
    )]
    UnsupportedVariantLocationType,
    #[error(
        "Unable to complete liftover: could not resolve reference assembly - accession not \
         found in any supported assembly"
    )]
    UnsupportedReferenceAssembly,
    #[error(
        "Unable to complete liftover: could not resolve reference assembly - accession found \
         in multiple supported assemblies"
    )]
    AmbiguousReferenceAssembly,
    #[error("Unable to complete liftover: unable to resolve variant's chromosome")]
    ChromosomeResolution,
    #[error("Unable to complete liftover: could not convert start and/or end position(s)")]
    CoordinateConversion,
    #[error("Unable to complete liftover: could not convert refget accession")]
    AccessionConversion,
}

/// Single-coordinate conversion between one assembly pair, typically
/// backed by a chain file.
pub trait CoordinateConverter: Send + Sync {
    /// Convert one interresidue coordinate on `chromosome` (prefixed
    /// form, e.g. `chr7`).
    fn convert_coordinate(&self, chromosome: &str, position: i64)
        -> Result<i64, LiftoverError>;
}

/// Converters for both liftover directions, keyed by
/// `<from>_to_<to>` in lowercase assembly names.
pub struct LiftoverConverters {
    converters: HashMap<String, Box<dyn CoordinateConverter>>,
}

impl LiftoverConverters {
    pub fn new() -> Self {
        Self {
            converters: HashMap::new(),
        }
    }

    pub fn insert(
        &mut self,
        from: GenomeRelease,
        to: GenomeRelease,
        converter: Box<dyn CoordinateConverter>,
    ) {
        self.converters.insert(converter_key(from, to), converter);
    }

    fn get(&self, from: GenomeRelease, to: GenomeRelease) -> Option<&dyn CoordinateConverter> {
        self.converters
            .get(&converter_key(from, to))
            .map(|c| c.as_ref())
    }
}

impl Default for LiftoverConverters {
    fn default() -> Self {
        Self::new()
    }
}

fn converter_key(from: GenomeRelease, to: GenomeRelease) -> String {
    format!("{}_to_{}", from, to)
}

/// Extract a `chr`-prefixed chromosome name from a refget accession's
/// assembly aliases, e.g. `GRCh38:chr10` yields `chr10`.
pub fn chromosome_from_aliases(aliases: &[String]) -> Option<String> {
    let reference_alias = aliases.iter().find(|alias| alias.contains("GRCh"))?;
    let re = regex::Regex::new(r":(?:chr)?(\d+|[XY])$").expect("static regex is valid");
    let chromosome_number = re.captures(reference_alias)?.get(1)?.as_str();
    Some(format!("chr{}", chromosome_number))
}

/// Determine the source and target assemblies from the alias sets of both
/// supported assemblies.
///
/// An accession present in exactly one assembly lifts to the other; an
/// accession in both is ambiguous; an accession in neither is
/// unsupported.
pub fn resolve_assemblies(
    grch37_aliases: &[String],
    grch38_aliases: &[String],
) -> Result<(GenomeRelease, GenomeRelease), LiftoverError> {
    match (grch37_aliases.is_empty(), grch38_aliases.is_empty()) {
        (false, true) => Ok((GenomeRelease::Grch37, GenomeRelease::Grch38)),
        (true, false) => Ok((GenomeRelease::Grch38, GenomeRelease::Grch37)),
        (true, true) => Err(LiftoverError::UnsupportedReferenceAssembly),
        (false, false) => Err(LiftoverError::AmbiguousReferenceAssembly),
    }
}

/// Convert one coordinate, preserving the int/range shape.  Range
/// endpoints convert independently; an absent endpoint stays absent and
/// an unconvertible one propagates [`LiftoverError::CoordinateConversion`].
pub fn convert_position(
    converter: &dyn CoordinateConverter,
    chromosome: &str,
    position: &Coordinate,
) -> Result<Coordinate, LiftoverError> {
    match position {
        Coordinate::Value(value) => Ok(Coordinate::Value(
            converter.convert_coordinate(chromosome, *value)?,
        )),
        Coordinate::Range([lo, hi]) => {
            let lo = lo
                .map(|value| converter.convert_coordinate(chromosome, value))
                .transpose()?;
            let hi = hi
                .map(|value| converter.convert_coordinate(chromosome, value))
                .transpose()?;
            Ok(Coordinate::Range([lo, hi]))
        }
    }
}

/// Produce the lifted-over counterpart of `variation` on the opposite
/// assembly, identified with freshly computed digests.
pub fn lift_variation(
    variation: &Variation,
    translator: &dyn Translator,
    converters: &LiftoverConverters,
) -> Result<Variation, LiftoverError> {
    let location = variation.location();
    let refget_accession = location.sequence_reference.refget_accession.as_str();
    if refget_accession.is_empty() {
        return Err(LiftoverError::MalformedInput);
    }
    let (start, end) = match (&location.start, &location.end) {
        (Some(start), Some(end)) => (start, end),
        _ => return Err(LiftoverError::UnsupportedVariantLocationType),
    };

    let prefixed_accession = format!("ga4gh:{}", refget_accession);
    let grch37_aliases = translator
        .translate_sequence_identifier(&prefixed_accession, "GRCh37")
        .map_err(|_| LiftoverError::UnsupportedReferenceAssembly)?;
    let grch38_aliases = translator
        .translate_sequence_identifier(&prefixed_accession, "GRCh38")
        .map_err(|_| LiftoverError::UnsupportedReferenceAssembly)?;

    let (from_assembly, to_assembly) = resolve_assemblies(&grch37_aliases, &grch38_aliases)?;
    let from_aliases = match from_assembly {
        GenomeRelease::Grch37 => &grch37_aliases,
        GenomeRelease::Grch38 => &grch38_aliases,
    };
    let chromosome =
        chromosome_from_aliases(from_aliases).ok_or(LiftoverError::ChromosomeResolution)?;

    let converter = converters
        .get(from_assembly, to_assembly)
        .ok_or(LiftoverError::CoordinateConversion)?;
    let converted_start = convert_position(converter, &chromosome, start)?;
    let converted_end = convert_position(converter, &chromosome, end)?;

    let target_alias = format!("{}:{}", to_assembly.name(), chromosome);
    let converted_accession = translator
        .get_sequence_id(&target_alias)
        .map_err(|_| LiftoverError::AccessionConversion)?;
    let converted_accession = converted_accession
        .strip_prefix("ga4gh:")
        .unwrap_or(&converted_accession)
        .to_string();
    if converted_accession.is_empty() {
        return Err(LiftoverError::AccessionConversion);
    }

    let mut lifted = variation.clone();
    {
        let location = lifted.location_mut();
        location.id = None;
        location.digest = None;
        location.sequence_reference = SequenceReference::new(converted_accession);
        location.start = Some(converted_start);
        location.end = Some(converted_end);
    }
    digest::recursive_identify(&mut lifted);
    Ok(lifted)
}

/// Registration side effect: compute the liftover of a freshly registered
/// variation, store the lifted variant, and record a `liftover` mapping.
///
/// Any failure is reported as a message; it never aborts registration of
/// the source variant.
pub fn add_liftover_mapping(
    variation: &Variation,
    storage: &dyn Storage,
    translator: &dyn Translator,
    converters: &LiftoverConverters,
) -> Vec<String> {
    let lifted = match lift_variation(variation, translator, converters) {
        Ok(lifted) => lifted,
        Err(e) => return vec![e.to_string()],
    };

    let source_id = match variation.id() {
        Some(id) => id.to_string(),
        None => return vec![LiftoverError::MalformedInput.to_string()],
    };
    let dest_id = lifted
        .id()
        .expect("recursive_identify fills the id")
        .to_string();

    if let Err(e) = storage.add_objects(&[VrsObject::from(lifted)]) {
        return vec![format!("Unable to store liftover variant: {}", e)];
    }
    let mapping = VariationMapping {
        source_id,
        dest_id,
        mapping_type: VariationMappingType::Liftover,
    };
    if let Err(e) = storage.add_mapping(&mapping) {
        return vec![format!("Unable to store liftover mapping: {}", e)];
    }
    vec![]
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::common::GenomeRelease;
    use crate::translate::{TranslateError, TranslateOptions, Translator};
    use crate::vrs::{
        digest, Allele, AlleleState, Coordinate, SequenceLocation, SequenceReference, Variation,
    };

    use super::{CoordinateConverter, LiftoverConverters, LiftoverError};

    /// Shifts every coordinate by a fixed offset; positions at or above
    /// `fail_at` are unconvertible.
    struct OffsetConverter {
        offset: i64,
        fail_at: i64,
    }

    impl CoordinateConverter for OffsetConverter {
        fn convert_coordinate(
            &self,
            _chromosome: &str,
            position: i64,
        ) -> Result<i64, LiftoverError> {
            if position >= self.fail_at {
                Err(LiftoverError::CoordinateConversion)
            } else {
                Ok(position + self.offset)
            }
        }
    }

    /// Canned alias tables keyed by queried namespace.
    struct StaticAliases {
        grch37: Vec<String>,
        grch38: Vec<String>,
    }

    impl Translator for StaticAliases {
        fn translate_variation(
            &self,
            definition: &str,
            _options: &TranslateOptions,
        ) -> Result<Variation, TranslateError> {
            Err(TranslateError::Translation(definition.to_string()))
        }

        fn translate_vcf_row(
            &self,
            coords: &str,
            _assembly: GenomeRelease,
        ) -> Result<Variation, TranslateError> {
            Err(TranslateError::Translation(coords.to_string()))
        }

        fn get_sequence_id(&self, accession: &str) -> Result<String, TranslateError> {
            if accession.starts_with("GRCh37:") {
                Ok("ga4gh:SQ.lifted37".to_string())
            } else if accession.starts_with("GRCh38:") {
                Ok("ga4gh:SQ.lifted38".to_string())
            } else {
                Err(TranslateError::UnknownSequence(accession.to_string()))
            }
        }

        fn translate_sequence_identifier(
            &self,
            _accession: &str,
            namespace: &str,
        ) -> Result<Vec<String>, TranslateError> {
            Ok(match namespace {
                "GRCh37" => self.grch37.clone(),
                "GRCh38" => self.grch38.clone(),
                _ => vec![],
            })
        }
    }

    fn converters() -> LiftoverConverters {
        let mut converters = LiftoverConverters::new();
        converters.insert(
            GenomeRelease::Grch37,
            GenomeRelease::Grch38,
            Box::new(OffsetConverter {
                offset: 1000,
                fail_at: 1_000_000_000,
            }),
        );
        converters.insert(
            GenomeRelease::Grch38,
            GenomeRelease::Grch37,
            Box::new(OffsetConverter {
                offset: -1000,
                fail_at: 1_000_000_000,
            }),
        );
        converters
    }

    fn allele(start: Coordinate, end: Coordinate) -> Variation {
        let mut variation = Variation::Allele(Allele {
            id: None,
            digest: None,
            location: SequenceLocation {
                id: None,
                digest: None,
                sequence_reference: SequenceReference::new("SQ.source"),
                start: Some(start),
                end: Some(end),
            },
            state: AlleleState::literal("T"),
        });
        digest::recursive_identify(&mut variation);
        variation
    }

    #[test]
    fn unsupported_assembly() {
        let translator = StaticAliases {
            grch37: vec![],
            grch38: vec![],
        };
        let result = super::lift_variation(
            &allele(Coordinate::Value(10), Coordinate::Value(11)),
            &translator,
            &converters(),
        );
        assert_eq!(result, Err(LiftoverError::UnsupportedReferenceAssembly));
    }

    #[test]
    fn ambiguous_assembly() {
        let translator = StaticAliases {
            grch37: vec!["GRCh37:chr7".to_string()],
            grch38: vec!["GRCh38:chr7".to_string()],
        };
        let result = super::lift_variation(
            &allele(Coordinate::Value(10), Coordinate::Value(11)),
            &translator,
            &converters(),
        );
        assert_eq!(result, Err(LiftoverError::AmbiguousReferenceAssembly));
    }

    #[test]
    fn ranged_positions_lift_endpoint_wise() {
        let translator = StaticAliases {
            grch37: vec!["GRCh37:chr7".to_string()],
            grch38: vec![],
        };
        let source = allele(
            Coordinate::Range([Some(100), Some(200)]),
            Coordinate::Value(300),
        );
        let lifted = super::lift_variation(&source, &translator, &converters()).unwrap();
        let location = lifted.location();
        assert_eq!(
            location.start,
            Some(Coordinate::Range([Some(1100), Some(1200)]))
        );
        assert_eq!(location.end, Some(Coordinate::Value(1300)));
        assert_eq!(location.sequence_reference.refget_accession, "SQ.lifted38");
        assert!(lifted.id().unwrap().starts_with("ga4gh:VA."));
        assert_ne!(lifted.id(), source.id());
    }

    #[test]
    fn integer_positions_lift_back_to_grch37() {
        let translator = StaticAliases {
            grch37: vec![],
            grch38: vec!["GRCh38:chrX".to_string()],
        };
        let lifted = super::lift_variation(
            &allele(Coordinate::Value(5000), Coordinate::Value(5001)),
            &translator,
            &converters(),
        )
        .unwrap();
        let location = lifted.location();
        assert_eq!(location.start, Some(Coordinate::Value(4000)));
        assert_eq!(location.end, Some(Coordinate::Value(4001)));
        assert_eq!(location.sequence_reference.refget_accession, "SQ.lifted37");
    }

    #[test]
    fn unconvertible_coordinate() {
        let translator = StaticAliases {
            grch37: vec!["GRCh37:chr7".to_string()],
            grch38: vec![],
        };
        let result = super::lift_variation(
            &allele(
                Coordinate::Value(1_500_000_000),
                Coordinate::Value(1_500_000_001),
            ),
            &translator,
            &converters(),
        );
        assert_eq!(result, Err(LiftoverError::CoordinateConversion));
    }

    #[test]
    fn missing_coordinates_are_unsupported() {
        let mut variation = allele(Coordinate::Value(10), Coordinate::Value(11));
        variation.location_mut().end = None;
        let translator = StaticAliases {
            grch37: vec!["GRCh37:chr7".to_string()],
            grch38: vec![],
        };
        let result = super::lift_variation(&variation, &translator, &converters());
        assert_eq!(result, Err(LiftoverError::UnsupportedVariantLocationType));
    }

    #[rstest::rstest]
    #[case(&["GRCh38:chr10"], Some("chr10"))]
    #[case(&["GRCh38:chrX"], Some("chrX"))]
    #[case(&["GRCh37:7"], Some("chr7"))]
    #[case(&["refseq:NC_000007.14"], None)]
    #[case(&[], None)]
    fn chromosome_extraction(#[case] aliases: &[&str], #[case] expected: Option<&str>) {
        let aliases: Vec<String> = aliases.iter().map(|s| s.to_string()).collect();
        assert_eq!(
            super::chromosome_from_aliases(&aliases).as_deref(),
            expected
        );
    }
}
