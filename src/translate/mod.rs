//! Variation translation seam.
//!
//! Translation of free-text variant descriptions (HGVS/SPDI/gnomAD/VCF
//! coordinates) into VRS objects, together with sequence-identifier alias
//! lookup, is an external service.  This module defines the contract the
//! rest of the worker programs against; [`rest`] provides the client for
//! a variation-normalizer style endpoint.

pub mod rest;

use crate::common::GenomeRelease;
use crate::vrs::Variation;

/// Errors surfaced from the external translator.
#[derive(thiserror::Error, Debug)]
pub enum TranslateError {
    /// The description could not be translated into a known structure.
    #[error("unable to translate {0:?}")]
    Translation(String),
    /// A reference base or sequence failed data-proxy validation.
    #[error("data proxy validation failed: {0}")]
    DataProxyValidation(String),
    /// An HGVS expression failed to parse.
    #[error("unable to parse HGVS expression {0:?}")]
    HgvsParse(String),
    /// The variation class of the input is not supported.
    #[error("variation class for {0:?} is currently unsupported")]
    NotImplemented(String),
    /// The translator endpoint could not be reached.
    #[error("translator connection error: {0}")]
    Connection(String),
    /// No sequence identifier alias was found.
    #[error("unable to find sequence identifier for {0:?}")]
    UnknownSequence(String),
}

/// Options accompanying a free-text translation request.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TranslateOptions {
    /// Expected output representation (`Allele`, `CopyNumberCount`, …).
    pub input_type: Option<String>,
    /// Copy count for copy-number inputs.
    pub copies: Option<i64>,
    /// Copy-change term for copy-number-change inputs.
    pub copy_change: Option<String>,
    /// Reference assembly name (`GRCh37` / `GRCh38`).
    pub assembly_name: Option<String>,
}

/// External variation translator and sequence data proxy.
///
/// Implementations are stateless RPC clients and safe to share across
/// worker threads.
pub trait Translator: Send + Sync {
    /// Translate a free-text variation definition into a normalized,
    /// fully identified VRS variation.
    fn translate_variation(
        &self,
        definition: &str,
        options: &TranslateOptions,
    ) -> Result<Variation, TranslateError>;

    /// Translate `<chr>-<pos>-<ref>-<alt>` VCF coordinates into a
    /// normalized VRS variation.
    fn translate_vcf_row(
        &self,
        coords: &str,
        assembly: GenomeRelease,
    ) -> Result<Variation, TranslateError>;

    /// Resolve an accession (e.g. `NC_000007.14` or `GRCh38:chr7`) to its
    /// GA4GH sequence identifier.
    fn get_sequence_id(&self, accession: &str) -> Result<String, TranslateError>;

    /// List aliases of a sequence identifier within a namespace, e.g.
    /// `ga4gh:SQ.…` within `GRCh38`.  Returns an empty list when the
    /// identifier has no alias there.
    fn translate_sequence_identifier(
        &self,
        accession: &str,
        namespace: &str,
    ) -> Result<Vec<String>, TranslateError>;
}
