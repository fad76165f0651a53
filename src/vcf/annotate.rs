//! Streaming annotation of raw VCF sites with VRS identifiers.

use std::path::Path;

use noodles_vcf as vcf;
use noodles_vcf::variant::io::Write as _;
use rayon::prelude::*;

use crate::anyvar::AnyVar;
use crate::common::GenomeRelease;
use crate::storage::{BatchScope, Storage as _};
use crate::translate::{TranslateError, Translator as _};
use crate::vrs::{AlleleState, Variation, VrsObject};

use super::{
    add_vrs_info_fields, set_info_integers, set_info_strings, VcfError, VRS_ALLELE_IDS, VRS_ENDS,
    VRS_ERROR, VRS_LENGTHS, VRS_REPEAT_SUBUNIT_LENGTHS, VRS_STARTS, VRS_STATES,
};

/// Records translated per worker-pool round.
const CHUNK_SIZE: usize = 1024;

/// Options for [`annotate_vcf`].
#[derive(Debug, Clone)]
pub struct AnnotateOptions {
    pub assembly: GenomeRelease,
    /// Also compute identifiers for REF alleles (slot 0).
    pub compute_for_ref: bool,
    /// Emit `VRS_Starts`/`VRS_Ends`/`VRS_States`/length fields in
    /// addition to identifiers.
    pub vrs_attributes: bool,
    /// Skip the flush barrier before returning.
    pub allow_async_write: bool,
}

impl Default for AnnotateOptions {
    fn default() -> Self {
        Self {
            assembly: GenomeRelease::Grch38,
            compute_for_ref: true,
            vrs_attributes: false,
            allow_async_write: false,
        }
    }
}

/// Counters reported after a run.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnnotateSummary {
    pub sites: u64,
    pub alleles: u64,
    pub errors: u64,
}

/// Per-allele translation outcome for one record.
enum SlotOutcome {
    Registered(Variation),
    Failed(String),
}

/// Annotate `path_in` into `path_out`, registering every translated
/// allele with the store.  Translation runs on the rayon worker pool in
/// record chunks so output order matches input order.  Unless
/// `allow_async_write` is set, the flush barrier runs before returning.
pub fn annotate_vcf(
    av: &AnyVar,
    path_in: &Path,
    path_out: &Path,
    options: &AnnotateOptions,
    deadline: Option<std::time::Instant>,
) -> Result<AnnotateSummary, VcfError> {
    let mut reader = vcf::io::reader::Builder::default()
        .build_from_path(path_in)
        .map_err(VcfError::Io)?;
    let input_header = reader.read_header().map_err(VcfError::Io)?;

    let mut output_header = input_header.clone();
    add_vrs_info_fields(&mut output_header, options.vrs_attributes)?;

    let writer = std::fs::File::create(path_out).map_err(VcfError::Io)?;
    let mut writer = vcf::io::Writer::new(std::io::BufWriter::new(writer));
    writer.write_header(&output_header).map_err(VcfError::Io)?;

    let mut summary = AnnotateSummary::default();
    let _scope = BatchScope::new(av.storage.as_ref());

    let mut records = Vec::with_capacity(CHUNK_SIZE);
    loop {
        records.clear();
        let mut record = vcf::variant::RecordBuf::default();
        while records.len() < CHUNK_SIZE {
            let bytes_read = reader
                .read_record_buf(&input_header, &mut record)
                .map_err(VcfError::Io)?;
            if bytes_read == 0 {
                break;
            }
            records.push(record.clone());
        }
        if records.is_empty() {
            break;
        }
        if let Some(deadline) = deadline {
            if std::time::Instant::now() >= deadline {
                return Err(VcfError::TimeLimitExceeded);
            }
        }
        annotate_chunk(av, options, &mut records, &mut summary)?;
        for record in &records {
            writer
                .write_variant_record(&output_header, record)
                .map_err(VcfError::Io)?;
        }
    }

    drop(_scope);
    if !options.allow_async_write {
        tracing::debug!("waiting for object store writes");
        av.storage.wait_for_writes();
    }
    Ok(summary)
}

/// The `<chr>-<pos>-<ref>-<alt>` coordinate strings of one record, REF
/// first when computed.
fn allele_coordinates(
    record: &vcf::variant::RecordBuf,
    compute_for_ref: bool,
) -> Result<Vec<String>, VcfError> {
    let chrom = record.reference_sequence_name();
    let pos = record
        .variant_start()
        .map(usize::from)
        .ok_or_else(|| VcfError::Other(format!("record on {} lacks a position", chrom)))?;
    let reference = record.reference_bases();

    let mut coordinates = Vec::new();
    if compute_for_ref {
        coordinates.push(format!("{}-{}-{}-{}", chrom, pos, reference, reference));
    }
    for alt in record.alternate_bases().as_ref() {
        coordinates.push(format!("{}-{}-{}-{}", chrom, pos, reference, alt));
    }
    Ok(coordinates)
}

fn annotate_chunk(
    av: &AnyVar,
    options: &AnnotateOptions,
    records: &mut [vcf::variant::RecordBuf],
    summary: &mut AnnotateSummary,
) -> Result<(), VcfError> {
    // Collect every allele slot of the chunk, then translate them on the
    // worker pool; results come back in submission order.
    let mut slots = Vec::new();
    for (record_index, record) in records.iter().enumerate() {
        for coords in allele_coordinates(record, options.compute_for_ref)? {
            slots.push((record_index, coords));
        }
    }

    let translated: Vec<Result<Variation, TranslateError>> = slots
        .par_iter()
        .map(|(_, coords)| av.translator.translate_vcf_row(coords, options.assembly))
        .collect();

    let mut outcomes: Vec<Vec<SlotOutcome>> = records.iter().map(|_| Vec::new()).collect();
    for ((record_index, coords), result) in itertools::izip!(slots, translated) {
        match result {
            Ok(variation) => {
                av.storage.add_objects(&[VrsObject::from(variation.clone())])?;
                outcomes[record_index].push(SlotOutcome::Registered(variation));
            }
            Err(TranslateError::Connection(message)) => {
                return Err(VcfError::TranslatorConnection(message));
            }
            Err(e) => {
                tracing::debug!("could not translate {}: {}", coords, e);
                outcomes[record_index].push(SlotOutcome::Failed(e.to_string()));
            }
        }
    }

    for (record, slot_outcomes) in records.iter_mut().zip(outcomes) {
        summary.sites += 1;
        summary.alleles += slot_outcomes.len() as u64;
        apply_annotations(record, &slot_outcomes, options.vrs_attributes);
        summary.errors += slot_outcomes
            .iter()
            .filter(|o| matches!(o, SlotOutcome::Failed(_)))
            .count() as u64;
    }
    Ok(())
}

/// Write the per-allele INFO fields onto a record.
fn apply_annotations(
    record: &mut vcf::variant::RecordBuf,
    outcomes: &[SlotOutcome],
    vrs_attributes: bool,
) {
    let mut ids = Vec::with_capacity(outcomes.len());
    let mut starts = Vec::with_capacity(outcomes.len());
    let mut ends = Vec::with_capacity(outcomes.len());
    let mut states = Vec::with_capacity(outcomes.len());
    let mut lengths = Vec::with_capacity(outcomes.len());
    let mut repeat_subunit_lengths = Vec::with_capacity(outcomes.len());
    let mut errors = Vec::new();

    for outcome in outcomes {
        match outcome {
            SlotOutcome::Registered(variation) => {
                ids.push(variation.id().map(|id| id.to_string()));
                let location = variation.location();
                starts.push(
                    location
                        .start
                        .as_ref()
                        .and_then(|c| c.as_value())
                        .map(|v| v as i32),
                );
                ends.push(
                    location
                        .end
                        .as_ref()
                        .and_then(|c| c.as_value())
                        .map(|v| v as i32),
                );
                match variation {
                    Variation::Allele(allele) => match &allele.state {
                        AlleleState::LiteralSequenceExpression { sequence } => {
                            states.push(Some(sequence.clone()));
                            lengths.push(None);
                            repeat_subunit_lengths.push(None);
                        }
                        AlleleState::ReferenceLengthExpression {
                            length,
                            repeat_subunit_length,
                            sequence,
                        } => {
                            states.push(sequence.clone());
                            lengths.push(Some(*length as i32));
                            repeat_subunit_lengths.push(Some(*repeat_subunit_length as i32));
                        }
                        AlleleState::LengthExpression { length } => {
                            states.push(None);
                            lengths.push(length.map(|l| l as i32));
                            repeat_subunit_lengths.push(None);
                        }
                    },
                    _ => {
                        states.push(None);
                        lengths.push(None);
                        repeat_subunit_lengths.push(None);
                    }
                }
            }
            SlotOutcome::Failed(message) => {
                ids.push(Some(String::new()));
                starts.push(None);
                ends.push(None);
                states.push(None);
                lengths.push(None);
                repeat_subunit_lengths.push(None);
                errors.push(Some(message.clone()));
            }
        }
    }

    set_info_strings(record, VRS_ALLELE_IDS, ids);
    if vrs_attributes {
        set_info_integers(record, VRS_STARTS, starts);
        set_info_integers(record, VRS_ENDS, ends);
        set_info_strings(record, VRS_STATES, states);
        set_info_integers(record, VRS_LENGTHS, lengths);
        set_info_integers(record, VRS_REPEAT_SUBUNIT_LENGTHS, repeat_subunit_lengths);
    }
    if !errors.is_empty() {
        set_info_strings(record, VRS_ERROR, errors);
    }
}

#[cfg(test)]
pub(crate) mod test {
    use std::io::Write as _;
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use crate::anyvar::AnyVar;
    use crate::common::GenomeRelease;
    use crate::mapping::liftover::LiftoverConverters;
    use crate::storage::memory::InMemoryStore;
    use crate::storage::Storage as _;
    use crate::translate::{TranslateError, TranslateOptions, Translator};
    use crate::vrs::{
        digest, Allele, AlleleState, SequenceLocation, SequenceReference, StoredObjectType,
        Variation,
    };

    /// Translator double that derives alleles mechanically from the
    /// VCF coordinate string; the accession is `SQ.test-<chrom>`.
    pub(crate) struct CoordinateTranslator;

    impl CoordinateTranslator {
        fn allele_from_coords(coords: &str) -> Option<Variation> {
            let mut parts = coords.split('-');
            let chrom = parts.next()?;
            let pos: i64 = parts.next()?.parse().ok()?;
            let reference = parts.next()?;
            let alt = parts.next()?;
            if alt.contains('<') {
                return None;
            }
            let mut variation = Variation::Allele(Allele {
                id: None,
                digest: None,
                location: SequenceLocation::new(
                    SequenceReference::new(format!("SQ.test-{}", chrom)),
                    pos - 1,
                    pos - 1 + reference.len() as i64,
                ),
                state: AlleleState::literal(alt),
            });
            digest::recursive_identify(&mut variation);
            Some(variation)
        }
    }

    impl Translator for CoordinateTranslator {
        fn translate_variation(
            &self,
            definition: &str,
            _options: &TranslateOptions,
        ) -> Result<Variation, TranslateError> {
            Self::allele_from_coords(definition)
                .ok_or_else(|| TranslateError::Translation(definition.to_string()))
        }

        fn translate_vcf_row(
            &self,
            coords: &str,
            _assembly: GenomeRelease,
        ) -> Result<Variation, TranslateError> {
            Self::allele_from_coords(coords)
                .ok_or_else(|| TranslateError::Translation(coords.to_string()))
        }

        fn get_sequence_id(&self, accession: &str) -> Result<String, TranslateError> {
            let chrom = accession
                .rsplit(':')
                .next()
                .ok_or_else(|| TranslateError::UnknownSequence(accession.to_string()))?;
            Ok(format!("ga4gh:SQ.test-{}", chrom))
        }

        fn translate_sequence_identifier(
            &self,
            _accession: &str,
            _namespace: &str,
        ) -> Result<Vec<String>, TranslateError> {
            Ok(vec![])
        }
    }

    pub(crate) fn runtime() -> AnyVar {
        AnyVar::new(
            Arc::new(InMemoryStore::default()),
            Arc::new(CoordinateTranslator),
            Arc::new(LiftoverConverters::new()),
        )
    }

    pub(crate) const SAMPLE_VCF: &str = "\
##fileformat=VCFv4.2\n\
##contig=<ID=chr1>\n\
#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
chr1\t10330\t.\tCCCCTAACC\tC\t.\tPASS\t.\n\
chr1\t20000\t.\tA\tT,G\t.\tPASS\t.\n";

    pub(crate) fn write_sample_vcf(dir: &std::path::Path) -> std::path::PathBuf {
        let path = dir.join("in.vcf");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(SAMPLE_VCF.as_bytes()).unwrap();
        path
    }

    #[test]
    fn annotate_emits_ids_and_registers_objects() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path_in = write_sample_vcf(tmp_dir.path());
        let path_out = tmp_dir.path().join("out.vcf");

        let av = runtime();
        let options = super::AnnotateOptions {
            compute_for_ref: true,
            ..Default::default()
        };
        let summary =
            super::annotate_vcf(&av, &path_in, &path_out, &options, None).unwrap();
        assert_eq!(summary.sites, 2);
        assert_eq!(summary.alleles, 5);
        assert_eq!(summary.errors, 0);

        // Five distinct alleles must have been registered.
        assert_eq!(
            av.storage
                .get_object_count(StoredObjectType::Allele)
                .unwrap(),
            5
        );

        let output = std::fs::read_to_string(&path_out).unwrap();
        assert!(output.contains("##INFO=<ID=VRS_Allele_IDs"));
        let data_line = output
            .lines()
            .find(|line| line.starts_with("chr1\t10330"))
            .unwrap();
        let ids_field = data_line
            .split('\t')
            .nth(7)
            .and_then(|info| {
                info.split(';')
                    .find(|field| field.starts_with("VRS_Allele_IDs="))
            })
            .unwrap();
        let ids: Vec<&str> = ids_field
            .trim_start_matches("VRS_Allele_IDs=")
            .split(',')
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.iter().all(|id| id.starts_with("ga4gh:VA.")));
    }

    #[test]
    fn annotate_without_ref_only_covers_alts() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path_in = write_sample_vcf(tmp_dir.path());
        let path_out = tmp_dir.path().join("out.vcf");

        let av = runtime();
        let options = super::AnnotateOptions {
            compute_for_ref: false,
            ..Default::default()
        };
        let summary =
            super::annotate_vcf(&av, &path_in, &path_out, &options, None).unwrap();
        assert_eq!(summary.alleles, 3);
    }

    #[test]
    fn translation_failures_become_error_slots() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path_in = tmp_dir.path().join("in.vcf");
        std::fs::write(
            &path_in,
            "##fileformat=VCFv4.2\n\
             ##contig=<ID=chr1>\n\
             #CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\n\
             chr1\t500\t.\tA\t<DEL>\t.\tPASS\t.\n",
        )
        .unwrap();
        let path_out = tmp_dir.path().join("out.vcf");

        let av = runtime();
        let options = super::AnnotateOptions {
            compute_for_ref: false,
            ..Default::default()
        };
        let summary =
            super::annotate_vcf(&av, &path_in, &path_out, &options, None).unwrap();
        assert_eq!(summary.errors, 1);

        let output = std::fs::read_to_string(&path_out).unwrap();
        assert!(output.contains("VRS_Error="));
    }

    #[test]
    fn expired_deadline_aborts() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path_in = write_sample_vcf(tmp_dir.path());
        let path_out = tmp_dir.path().join("out.vcf");

        let av = runtime();
        let deadline = std::time::Instant::now() - std::time::Duration::from_secs(1);
        let result = super::annotate_vcf(
            &av,
            &path_in,
            &path_out,
            &super::AnnotateOptions::default(),
            Some(deadline),
        );
        assert!(matches!(result, Err(super::VcfError::TimeLimitExceeded)));
    }

    #[test]
    fn vrs_attributes_fields_are_written() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path_in = write_sample_vcf(tmp_dir.path());
        let path_out = tmp_dir.path().join("out.vcf");

        let av = runtime();
        let options = super::AnnotateOptions {
            vrs_attributes: true,
            ..Default::default()
        };
        super::annotate_vcf(&av, &path_in, &path_out, &options, None).unwrap();
        let output = std::fs::read_to_string(&path_out).unwrap();
        assert!(output.contains("VRS_Starts="));
        assert!(output.contains("VRS_Ends="));
        assert!(output.contains("VRS_States="));
    }
}
