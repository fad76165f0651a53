//! Ingestion of VCF files that already carry VRS annotations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use noodles_vcf as vcf;

use crate::anyvar::AnyVar;
use crate::common::GenomeRelease;
use crate::storage::{BatchScope, Storage as _};
use crate::translate::Translator as _;
use crate::vrs::{digest, Allele, AlleleState, SequenceLocation, SequenceReference, Variation};

use super::{
    info_integers, info_strings, VcfError, VRS_ALLELE_IDS, VRS_ENDS, VRS_LENGTHS,
    VRS_REPEAT_SUBUNIT_LENGTHS, VRS_STARTS, VRS_STATES,
};

/// Options for [`ingest_annotated_vcf`].
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub assembly: GenomeRelease,
    /// Recompute each object's digest and report identifier mismatches.
    pub require_validation: bool,
    /// Skip the flush barrier before returning.
    pub allow_async_write: bool,
}

/// Counters reported after a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestSummary {
    pub sites: u64,
    pub alleles: u64,
    /// Identifier mismatches written to the validation report.
    pub conflicts: u64,
}

/// Register the VRS objects carried by a pre-annotated VCF.
///
/// The header must define `VRS_Allele_IDs`, `VRS_Starts`, `VRS_Ends`,
/// and `VRS_States`; otherwise [`VcfError::RequiredAnnotations`] is
/// returned before any work starts.  With `require_validation`, each
/// reconstructed object's digest is recomputed and mismatches are
/// written to `report_path` as `(chrom, pos, annotated_id, computed_id)`
/// CSV rows; the computed identifier is authoritative either way.
pub fn ingest_annotated_vcf(
    av: &AnyVar,
    path_in: &Path,
    report_path: Option<&Path>,
    options: &IngestOptions,
    deadline: Option<std::time::Instant>,
) -> Result<IngestSummary, VcfError> {
    let mut reader = vcf::io::reader::Builder::default()
        .build_from_path(path_in)
        .map_err(VcfError::Io)?;
    let header = reader.read_header().map_err(VcfError::Io)?;

    for required in [VRS_ALLELE_IDS, VRS_STARTS, VRS_ENDS, VRS_STATES] {
        if !header.infos().contains_key(required) {
            return Err(VcfError::RequiredAnnotations);
        }
    }

    let mut report = match (options.require_validation, report_path) {
        (true, Some(path)) => Some(
            csv::WriterBuilder::new()
                .has_headers(false)
                .from_path(path)
                .map_err(|e| VcfError::Other(format!("could not open report file: {}", e)))?,
        ),
        (true, None) => {
            return Err(VcfError::Other(
                "validation requested without a report path".to_string(),
            ))
        }
        _ => None,
    };

    // Refget accessions per chromosome resolve through the translator
    // once and are cached for the rest of the run.
    let mut accessions: HashMap<String, String> = HashMap::new();
    let mut summary = IngestSummary::default();
    let scope = BatchScope::new(av.storage.as_ref());

    let mut record = vcf::variant::RecordBuf::default();
    let mut row_count: u64 = 0;
    loop {
        let bytes_read = reader
            .read_record_buf(&header, &mut record)
            .map_err(VcfError::Io)?;
        if bytes_read == 0 {
            break;
        }
        row_count += 1;
        if row_count % 1024 == 0 {
            if let Some(deadline) = deadline {
                if std::time::Instant::now() >= deadline {
                    return Err(VcfError::TimeLimitExceeded);
                }
            }
        }

        let Some(ids) = info_strings(&record, VRS_ALLELE_IDS) else {
            continue;
        };
        let starts = info_integers(&record, VRS_STARTS).unwrap_or_default();
        let ends = info_integers(&record, VRS_ENDS).unwrap_or_default();
        let states = info_strings(&record, VRS_STATES).unwrap_or_default();
        let lengths = info_integers(&record, VRS_LENGTHS).unwrap_or_default();
        let repeat_subunit_lengths =
            info_integers(&record, VRS_REPEAT_SUBUNIT_LENGTHS).unwrap_or_default();

        let chrom = record.reference_sequence_name().to_string();
        let pos = record.variant_start().map(usize::from).unwrap_or_default();
        summary.sites += 1;

        for (slot, annotated_id) in ids.iter().enumerate() {
            let Some(annotated_id) = annotated_id.as_ref().filter(|id| !id.is_empty()) else {
                continue;
            };
            let (Some(&Some(start)), Some(&Some(end))) = (starts.get(slot), ends.get(slot))
            else {
                continue;
            };
            let Some(Some(state)) = states.get(slot) else {
                continue;
            };

            let accession = match accessions.get(&chrom) {
                Some(accession) => accession.clone(),
                None => {
                    let alias = format!("{}:{}", options.assembly.name(), chrom);
                    let accession = av
                        .translator
                        .get_sequence_id(&alias)
                        .map_err(|e| VcfError::TranslatorConnection(e.to_string()))?;
                    let accession = accession
                        .strip_prefix("ga4gh:")
                        .unwrap_or(&accession)
                        .to_string();
                    accessions.insert(chrom.clone(), accession.clone());
                    accession
                }
            };

            let state = allele_state(
                state,
                lengths.get(slot).copied().flatten(),
                repeat_subunit_lengths.get(slot).copied().flatten(),
            );
            let mut variation = Variation::Allele(Allele {
                id: None,
                digest: None,
                location: SequenceLocation::new(
                    SequenceReference::new(accession),
                    start as i64,
                    end as i64,
                ),
                state,
            });
            digest::recursive_identify(&mut variation);
            let computed_id = variation
                .id()
                .expect("recursive_identify fills the id")
                .to_string();

            if options.require_validation && computed_id != *annotated_id {
                summary.conflicts += 1;
                if let Some(report) = report.as_mut() {
                    report
                        .write_record([
                            chrom.as_str(),
                            &pos.to_string(),
                            annotated_id.as_str(),
                            computed_id.as_str(),
                        ])
                        .map_err(|e| {
                            VcfError::Other(format!("could not write report row: {}", e))
                        })?;
                }
            }

            // The recomputed identifier wins regardless of validation.
            av.storage.add_objects(&[variation.into()])?;
            summary.alleles += 1;
        }
    }

    drop(scope);
    if let Some(report) = report.as_mut() {
        report
            .flush()
            .map_err(|e| VcfError::Other(format!("could not flush report file: {}", e)))?;
    }
    if !options.allow_async_write {
        tracing::debug!("waiting for object store writes");
        av.storage.wait_for_writes();
    }
    Ok(summary)
}

/// Rebuild the allele state from the annotation fields: a repeat subunit
/// length marks a reference length expression, otherwise the state is a
/// literal sequence.
fn allele_state(
    state: &str,
    length: Option<i32>,
    repeat_subunit_length: Option<i32>,
) -> AlleleState {
    match (length, repeat_subunit_length) {
        (Some(length), Some(repeat_subunit_length)) => AlleleState::ReferenceLengthExpression {
            length: length as i64,
            repeat_subunit_length: repeat_subunit_length as i64,
            sequence: Some(state.to_string()),
        },
        _ => AlleleState::literal(state),
    }
}

/// The ingest result artifact: the validation report when it has rows.
pub fn report_artifact(report_path: &Path, summary: &IngestSummary) -> Option<PathBuf> {
    if summary.conflicts > 0 {
        Some(report_path.to_path_buf())
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::storage::{Storage as _, MAX_ROWS};
    use crate::vcf::annotate::test::runtime;
    use crate::vrs::StoredObjectType;

    const ANNOTATED_HEADER: &str = "\
##fileformat=VCFv4.2\n\
##contig=<ID=chr1>\n\
##INFO=<ID=VRS_Allele_IDs,Number=R,Type=String,Description=\"The computed identifiers for the GA4GH VRS Alleles corresponding to the GT indexes of the REF and ALT alleles\">\n\
##INFO=<ID=VRS_Starts,Number=R,Type=Integer,Description=\"Interresidue coordinates used as the location starts for the GA4GH VRS Alleles corresponding to the GT indexes of the REF and ALT alleles\">\n\
##INFO=<ID=VRS_Ends,Number=R,Type=Integer,Description=\"Interresidue coordinates used as the location ends for the GA4GH VRS Alleles corresponding to the GT indexes of the REF and ALT alleles\">\n\
##INFO=<ID=VRS_States,Number=R,Type=String,Description=\"The literal sequence states used for the GA4GH VRS Alleles corresponding to the GT indexes of the REF and ALT alleles\">\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n";

    fn annotated_vcf(ids: (&str, &str)) -> String {
        format!(
            "{}chr1\t10330\t.\tCCCCTAACC\tC\t.\tPASS\t\
             VRS_Allele_IDs={},{};VRS_Starts=10329,10330;VRS_Ends=10338,10392;\
             VRS_States=CCCCTAACC,CCCTAACCC\n",
            ANNOTATED_HEADER,
            ids.0,
            ids.1
        )
    }

    fn computed_ids() -> (String, String) {
        // Identifiers the ingest recomputes for the fixture row above,
        // on the test translator's `SQ.test-chr1` reference.
        let allele = |start: i64, end: i64, state: &str| {
            let mut variation = crate::vrs::Variation::Allele(crate::vrs::Allele {
                id: None,
                digest: None,
                location: crate::vrs::SequenceLocation::new(
                    crate::vrs::SequenceReference::new("SQ.test-chr1"),
                    start,
                    end,
                ),
                state: crate::vrs::AlleleState::literal(state),
            });
            crate::vrs::digest::recursive_identify(&mut variation);
            variation.id().unwrap().to_string()
        };
        (
            allele(10329, 10338, "CCCCTAACC"),
            allele(10330, 10392, "CCCTAACCC"),
        )
    }

    #[test]
    fn missing_required_fields_is_an_error() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path_in = tmp_dir.path().join("in.vcf");
        std::fs::write(
            &path_in,
            "##fileformat=VCFv4.2\n\
             ##contig=<ID=chr1>\n\
             #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
             chr1\t10330\t.\tC\tA\t.\tPASS\t.\n",
        )
        .unwrap();

        let av = runtime();
        let options = super::IngestOptions {
            assembly: crate::common::GenomeRelease::Grch38,
            require_validation: false,
            allow_async_write: false,
        };
        let result = super::ingest_annotated_vcf(&av, &path_in, None, &options, None);
        assert!(matches!(
            result,
            Err(super::VcfError::RequiredAnnotations)
        ));
    }

    #[test]
    fn ingest_registers_objects_without_validation() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path_in = tmp_dir.path().join("in.vcf");
        let (ref_id, alt_id) = computed_ids();
        std::fs::write(&path_in, annotated_vcf((&ref_id, &alt_id))).unwrap();

        let av = runtime();
        let options = super::IngestOptions {
            assembly: crate::common::GenomeRelease::Grch38,
            require_validation: false,
            allow_async_write: false,
        };
        let summary = super::ingest_annotated_vcf(&av, &path_in, None, &options, None).unwrap();
        assert_eq!(summary.sites, 1);
        assert_eq!(summary.alleles, 2);
        assert_eq!(summary.conflicts, 0);

        let stored = av
            .storage
            .get_objects(StoredObjectType::Allele, &[ref_id, alt_id])
            .unwrap();
        assert_eq!(stored.len(), 2);
    }

    #[test]
    fn validation_reports_mismatch_and_stores_computed_id() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path_in = tmp_dir.path().join("in.vcf");
        let (ref_id, alt_id) = computed_ids();
        // Corrupt the ALT identifier with a trailing character.
        let bogus_alt = format!("{}z", alt_id);
        std::fs::write(&path_in, annotated_vcf((&ref_id, &bogus_alt))).unwrap();
        let report_path = tmp_dir.path().join("conflicts.csv");

        let av = runtime();
        let options = super::IngestOptions {
            assembly: crate::common::GenomeRelease::Grch38,
            require_validation: true,
            allow_async_write: false,
        };
        let summary =
            super::ingest_annotated_vcf(&av, &path_in, Some(&report_path), &options, None)
                .unwrap();
        assert_eq!(summary.conflicts, 1);
        assert!(super::report_artifact(&report_path, &summary).is_some());

        let report = std::fs::read_to_string(&report_path).unwrap();
        let fields: Vec<&str> = report.trim().split(',').collect();
        assert_eq!(fields[0], "chr1");
        assert_eq!(fields[1], "10330");
        assert_eq!(fields[2], bogus_alt);
        assert_eq!(fields[3], alt_id);

        // The object is stored under the recomputed identifier, not the
        // annotated one.
        let stored = av
            .storage
            .get_objects(StoredObjectType::Allele, &[alt_id.clone()])
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert!(av
            .storage
            .get_objects(StoredObjectType::Allele, &[bogus_alt])
            .unwrap()
            .is_empty());
        assert!(summary.alleles <= MAX_ROWS as u64);
    }
}
