//! VCF annotation and ingestion pipeline.
//!
//! Two entry points share the streaming machinery: [`annotate`] computes
//! VRS identifiers for raw VCF sites and emits an enriched VCF, while
//! [`ingest`] registers objects reconstructed from a pre-annotated VCF,
//! optionally validating the carried identifiers.

pub mod annotate;
pub mod ingest;

use noodles_vcf as vcf;
use vcf::header::record::value::map::Info;

use crate::common::GenomeRelease;
use crate::storage::{Storage as _, StorageError};

/// INFO field carrying one VRS identifier per allele slot.
pub const VRS_ALLELE_IDS: &str = "VRS_Allele_IDs";
/// INFO field carrying the interresidue location starts.
pub const VRS_STARTS: &str = "VRS_Starts";
/// INFO field carrying the interresidue location ends.
pub const VRS_ENDS: &str = "VRS_Ends";
/// INFO field carrying the literal sequence states.
pub const VRS_STATES: &str = "VRS_States";
/// INFO field carrying reference-length-expression lengths.
pub const VRS_LENGTHS: &str = "VRS_Lengths";
/// INFO field carrying reference-length-expression repeat subunit lengths.
pub const VRS_REPEAT_SUBUNIT_LENGTHS: &str = "VRS_RepeatSubunitLengths";
/// INFO field carrying per-site translation error messages.
pub const VRS_ERROR: &str = "VRS_Error";

/// Errors raised by the VCF pipeline.
#[derive(thiserror::Error, Debug)]
pub enum VcfError {
    /// A pre-annotated input lacks the mandatory VRS INFO fields.
    #[error(
        "required VRS annotations are missing -- ensure the INFO field has VRS_Allele_IDs, \
         VRS_Starts, VRS_Ends, and VRS_States"
    )]
    RequiredAnnotations,
    /// The cooperative soft time limit was exceeded.
    #[error("soft time limit exceeded")]
    TimeLimitExceeded,
    /// The external translator endpoint is unreachable.
    #[error("translator connection error: {0}")]
    TranslatorConnection(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

/// Add the VRS INFO field definitions to an output header.
pub fn add_vrs_info_fields(
    header: &mut vcf::Header,
    vrs_attributes: bool,
) -> Result<(), VcfError> {
    use vcf::header::record::value::map::info::{Number, Type};
    use vcf::header::record::value::Map;

    let mut fields = vec![
        (
            VRS_ALLELE_IDS,
            Type::String,
            "The computed identifiers for the GA4GH VRS Alleles corresponding to the GT \
             indexes of the REF and ALT alleles",
        ),
        (
            VRS_ERROR,
            Type::String,
            "If an error occurred computing a VRS Identifier, the error message",
        ),
    ];
    if vrs_attributes {
        fields.extend([
            (
                VRS_STARTS,
                Type::Integer,
                "Interresidue coordinates used as the location starts for the GA4GH VRS \
                 Alleles corresponding to the GT indexes of the REF and ALT alleles",
            ),
            (
                VRS_ENDS,
                Type::Integer,
                "Interresidue coordinates used as the location ends for the GA4GH VRS \
                 Alleles corresponding to the GT indexes of the REF and ALT alleles",
            ),
            (
                VRS_STATES,
                Type::String,
                "The literal sequence states used for the GA4GH VRS Alleles corresponding \
                 to the GT indexes of the REF and ALT alleles",
            ),
            (
                VRS_LENGTHS,
                Type::Integer,
                "The lengths of the GA4GH VRS Alleles with reference length expression \
                 states corresponding to the GT indexes of the REF and ALT alleles",
            ),
            (
                VRS_REPEAT_SUBUNIT_LENGTHS,
                Type::Integer,
                "The repeat subunit lengths of the GA4GH VRS Alleles with reference length \
                 expression states corresponding to the GT indexes of the REF and ALT alleles",
            ),
        ]);
    }

    for (key, ty, description) in fields.drain(..) {
        header.infos_mut().insert(
            key.to_string(),
            Map::<Info>::new(Number::Unknown, ty, description),
        );
    }
    Ok(())
}

/// Read an INFO field as one string per allele slot.
pub(crate) fn info_strings(
    record: &vcf::variant::RecordBuf,
    key: &str,
) -> Option<Vec<Option<String>>> {
    use vcf::variant::record_buf::info::field::{value::Array, Value};
    match record.info().get(key) {
        Some(Some(Value::Array(Array::String(values)))) => Some(values.clone()),
        Some(Some(Value::String(value))) => Some(vec![Some(value.clone())]),
        _ => None,
    }
}

/// Read an INFO field as one integer per allele slot.
pub(crate) fn info_integers(
    record: &vcf::variant::RecordBuf,
    key: &str,
) -> Option<Vec<Option<i32>>> {
    use vcf::variant::record_buf::info::field::{value::Array, Value};
    match record.info().get(key) {
        Some(Some(Value::Array(Array::Integer(values)))) => Some(values.clone()),
        Some(Some(Value::Integer(value))) => Some(vec![Some(*value)]),
        // Some writers emit numeric lists as strings.
        Some(Some(Value::Array(Array::String(values)))) => Some(
            values
                .iter()
                .map(|v| v.as_ref().and_then(|v| v.parse().ok()))
                .collect(),
        ),
        Some(Some(Value::String(value))) => Some(vec![value.parse().ok()]),
        _ => None,
    }
}

/// Write a string-array INFO field.
pub(crate) fn set_info_strings(
    record: &mut vcf::variant::RecordBuf,
    key: &str,
    values: Vec<Option<String>>,
) {
    use vcf::variant::record_buf::info::field::{value::Array, Value};
    record
        .info_mut()
        .insert(key.to_string(), Some(Value::Array(Array::String(values))));
}

/// Write an integer-array INFO field.
pub(crate) fn set_info_integers(
    record: &mut vcf::variant::RecordBuf,
    key: &str,
    values: Vec<Option<i32>>,
) {
    use vcf::variant::record_buf::info::field::{value::Array, Value};
    record
        .info_mut()
        .insert(key.to_string(), Some(Value::Array(Array::Integer(values))));
}

/// Command line arguments for `vcf annotate` subcommand.
#[derive(Debug, clap::Parser)]
#[command(author, version, about = "annotate VCF with VRS identifiers", long_about = None)]
pub struct AnnotateArgs {
    /// The assumed genome build.
    #[clap(long)]
    pub genomebuild: GenomeRelease,
    /// Path to input VCF file.
    #[clap(long)]
    pub path_in: String,
    /// Path to output VCF file.
    #[clap(long)]
    pub path_out: String,
    /// Base URI of the variation translator service.
    #[clap(long)]
    pub translator_uri: String,
    /// Skip computing VRS identifiers for REF alleles.
    #[clap(long)]
    pub skip_ref: bool,
    /// Annotate with VRS attribute fields in addition to identifiers.
    #[clap(long)]
    pub add_vrs_attributes: bool,
    /// Return before background database writes have completed.
    #[clap(long)]
    pub allow_async_write: bool,
}

/// Main entry point for `vcf annotate` sub command.
pub fn run_annotate(
    args_common: &crate::common::Args,
    args: &AnnotateArgs,
) -> Result<(), anyhow::Error> {
    let before_anything = std::time::Instant::now();
    tracing::info!("args_common = {:#?}", &args_common);
    tracing::info!("args = {:#?}", &args);

    crate::common::trace_rss_now();

    let av = build_runtime(&args.translator_uri)?;
    let options = annotate::AnnotateOptions {
        assembly: args.genomebuild,
        compute_for_ref: !args.skip_ref,
        vrs_attributes: args.add_vrs_attributes,
        allow_async_write: args.allow_async_write,
    };
    let summary = annotate::annotate_vcf(
        &av,
        std::path::Path::new(&args.path_in),
        std::path::Path::new(&args.path_out),
        &options,
        None,
    )
    .map_err(|e| anyhow::anyhow!("problem annotating VCF file {}: {}", &args.path_in, e))?;
    av.storage.close();

    tracing::info!(
        "annotated {} sites ({} alleles, {} errors)",
        summary.sites,
        summary.alleles,
        summary.errors
    );
    tracing::info!(
        "All of `vcf annotate` completed in {:?}",
        before_anything.elapsed()
    );
    Ok(())
}

/// Command line arguments for `vcf ingest-annotated` subcommand.
#[derive(Debug, clap::Parser)]
#[command(author, version, about = "ingest pre-annotated VCF", long_about = None)]
pub struct IngestArgs {
    /// The assumed genome build.
    #[clap(long)]
    pub genomebuild: GenomeRelease,
    /// Path to input VCF file.
    #[clap(long)]
    pub path_in: String,
    /// Base URI of the variation translator service.
    #[clap(long)]
    pub translator_uri: String,
    /// Re-validate the carried identifiers and write mismatches to this
    /// CSV file.
    #[clap(long)]
    pub path_validation_report: Option<String>,
    /// Return before background database writes have completed.
    #[clap(long)]
    pub allow_async_write: bool,
}

/// Main entry point for `vcf ingest-annotated` sub command.
pub fn run_ingest(
    args_common: &crate::common::Args,
    args: &IngestArgs,
) -> Result<(), anyhow::Error> {
    let before_anything = std::time::Instant::now();
    tracing::info!("args_common = {:#?}", &args_common);
    tracing::info!("args = {:#?}", &args);

    crate::common::trace_rss_now();

    let av = build_runtime(&args.translator_uri)?;
    let options = ingest::IngestOptions {
        assembly: args.genomebuild,
        require_validation: args.path_validation_report.is_some(),
        allow_async_write: args.allow_async_write,
    };
    let summary = ingest::ingest_annotated_vcf(
        &av,
        std::path::Path::new(&args.path_in),
        args.path_validation_report
            .as_ref()
            .map(std::path::Path::new),
        &options,
        None,
    )
    .map_err(|e| anyhow::anyhow!("problem ingesting VCF file {}: {}", &args.path_in, e))?;
    av.storage.close();

    tracing::info!(
        "ingested {} sites ({} alleles, {} identifier conflicts)",
        summary.sites,
        summary.alleles,
        summary.conflicts
    );
    tracing::info!(
        "All of `vcf ingest-annotated` completed in {:?}",
        before_anything.elapsed()
    );
    Ok(())
}

fn build_runtime(translator_uri: &str) -> Result<crate::anyvar::AnyVar, anyhow::Error> {
    let storage_config = crate::config::StorageConfig::from_env()
        .map_err(|e| anyhow::anyhow!("invalid storage configuration: {}", e))?;
    let storage = crate::storage::create_storage(&storage_config.uri, storage_config.options)
        .map_err(|e| anyhow::anyhow!("could not create storage: {}", e))?;
    let translator = crate::translate::rest::RestTranslator::new(translator_uri)
        .map_err(|e| anyhow::anyhow!("could not reach translator: {}", e))?;
    Ok(crate::anyvar::AnyVar::new(
        storage,
        std::sync::Arc::new(translator),
        std::sync::Arc::new(crate::mapping::liftover::LiftoverConverters::new()),
    ))
}
