//! GA4GH VRS object model.
//!
//! Typed representations of the VRS entities handled by the registry
//! (`Allele`, `CopyNumberCount`, `CopyNumberChange`, `SequenceLocation`,
//! `SequenceReference`) together with the registry-local `Annotation` and
//! `VariationMapping` records.  Wire names follow the VRS JSON schema
//! (camelCase); `id`/`digest` fields are optional until filled in by
//! [`digest::recursive_identify`].

pub mod decompose;
pub mod digest;

use serde::{Deserialize, Serialize};

/// A reference to a sequence, identified by its refget accession.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceReference {
    /// GA4GH refget accession, e.g. `SQ.F-LrLMe1SRpfUZHkQmvkVKFEGaoDeHul`.
    #[serde(rename = "refgetAccession")]
    pub refget_accession: String,
    /// Molecule type, e.g. `genomic`.
    #[serde(rename = "moleculeType", skip_serializing_if = "Option::is_none")]
    pub molecule_type: Option<String>,
}

impl SequenceReference {
    pub fn new(refget_accession: impl Into<String>) -> Self {
        Self {
            refget_accession: refget_accession.into(),
            molecule_type: None,
        }
    }
}

/// An interresidue coordinate: either a definite value or a half-bounded
/// `[lo, hi]` range where one side may be absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Coordinate {
    Value(i64),
    Range([Option<i64>; 2]),
}

impl Coordinate {
    /// The definite value, if this is not a range.
    pub fn as_value(&self) -> Option<i64> {
        match self {
            Coordinate::Value(value) => Some(*value),
            Coordinate::Range(_) => None,
        }
    }

    /// The loosest lower bound usable for containment comparison.
    pub fn lower_bound(&self) -> Option<i64> {
        match self {
            Coordinate::Value(value) => Some(*value),
            Coordinate::Range([lo, _]) => *lo,
        }
    }

    /// The loosest upper bound usable for containment comparison.
    pub fn upper_bound(&self) -> Option<i64> {
        match self {
            Coordinate::Value(value) => Some(*value),
            Coordinate::Range([_, hi]) => *hi,
        }
    }
}

impl From<i64> for Coordinate {
    fn from(value: i64) -> Self {
        Coordinate::Value(value)
    }
}

impl From<i32> for Coordinate {
    fn from(value: i32) -> Self {
        Coordinate::Value(i64::from(value))
    }
}

/// A location on a sequence, bounded by interresidue coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceLocation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(rename = "sequenceReference")]
    pub sequence_reference: SequenceReference,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<Coordinate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<Coordinate>,
}

impl SequenceLocation {
    pub fn new(
        sequence_reference: SequenceReference,
        start: impl Into<Coordinate>,
        end: impl Into<Coordinate>,
    ) -> Self {
        Self {
            id: None,
            digest: None,
            sequence_reference,
            start: Some(start.into()),
            end: Some(end.into()),
        }
    }
}

/// The state of an Allele.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AlleleState {
    /// A literal sequence.
    LiteralSequenceExpression { sequence: String },
    /// A reference-derived length expression, e.g. for repeats.
    ReferenceLengthExpression {
        length: i64,
        #[serde(rename = "repeatSubunitLength")]
        repeat_subunit_length: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        sequence: Option<String>,
    },
    /// A bare length expression.
    LengthExpression {
        #[serde(skip_serializing_if = "Option::is_none")]
        length: Option<i64>,
    },
}

impl AlleleState {
    pub fn literal(sequence: impl Into<String>) -> Self {
        AlleleState::LiteralSequenceExpression {
            sequence: sequence.into(),
        }
    }
}

/// An Allele: a state at a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allele {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    pub location: SequenceLocation,
    pub state: AlleleState,
}

/// The absolute count of copies of a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyNumberCount {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    pub location: SequenceLocation,
    pub copies: i64,
}

/// A relative change in the number of copies of a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyNumberChange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    pub location: SequenceLocation,
    #[serde(rename = "copyChange")]
    pub copy_change: String,
}

/// Any of the supported variation kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Variation {
    Allele(Allele),
    CopyNumberCount(CopyNumberCount),
    CopyNumberChange(CopyNumberChange),
}

impl Variation {
    pub fn id(&self) -> Option<&str> {
        match self {
            Variation::Allele(v) => v.id.as_deref(),
            Variation::CopyNumberCount(v) => v.id.as_deref(),
            Variation::CopyNumberChange(v) => v.id.as_deref(),
        }
    }

    pub fn digest(&self) -> Option<&str> {
        match self {
            Variation::Allele(v) => v.digest.as_deref(),
            Variation::CopyNumberCount(v) => v.digest.as_deref(),
            Variation::CopyNumberChange(v) => v.digest.as_deref(),
        }
    }

    pub fn location(&self) -> &SequenceLocation {
        match self {
            Variation::Allele(v) => &v.location,
            Variation::CopyNumberCount(v) => &v.location,
            Variation::CopyNumberChange(v) => &v.location,
        }
    }

    pub fn location_mut(&mut self) -> &mut SequenceLocation {
        match self {
            Variation::Allele(v) => &mut v.location,
            Variation::CopyNumberCount(v) => &mut v.location,
            Variation::CopyNumberChange(v) => &mut v.location,
        }
    }

    /// The `type` tag as stored in the database discriminator column.
    pub fn type_tag(&self) -> StoredObjectType {
        match self {
            Variation::Allele(_) => StoredObjectType::Allele,
            Variation::CopyNumberCount(_) => StoredObjectType::CopyNumberCount,
            Variation::CopyNumberChange(_) => StoredObjectType::CopyNumberChange,
        }
    }
}

/// Any object the store accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum VrsObject {
    Allele(Allele),
    CopyNumberCount(CopyNumberCount),
    CopyNumberChange(CopyNumberChange),
    SequenceLocation(SequenceLocation),
    SequenceReference(SequenceReference),
}

impl VrsObject {
    pub fn id(&self) -> Option<&str> {
        match self {
            VrsObject::Allele(v) => v.id.as_deref(),
            VrsObject::CopyNumberCount(v) => v.id.as_deref(),
            VrsObject::CopyNumberChange(v) => v.id.as_deref(),
            VrsObject::SequenceLocation(l) => l.id.as_deref(),
            VrsObject::SequenceReference(r) => Some(&r.refget_accession),
        }
    }

    pub fn as_variation(&self) -> Option<Variation> {
        match self {
            VrsObject::Allele(v) => Some(Variation::Allele(v.clone())),
            VrsObject::CopyNumberCount(v) => Some(Variation::CopyNumberCount(v.clone())),
            VrsObject::CopyNumberChange(v) => Some(Variation::CopyNumberChange(v.clone())),
            _ => None,
        }
    }
}

impl From<Variation> for VrsObject {
    fn from(value: Variation) -> Self {
        match value {
            Variation::Allele(v) => VrsObject::Allele(v),
            Variation::CopyNumberCount(v) => VrsObject::CopyNumberCount(v),
            Variation::CopyNumberChange(v) => VrsObject::CopyNumberChange(v),
        }
    }
}

/// Supported VRS object types in storage.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    Serialize,
    Deserialize,
)]
pub enum StoredObjectType {
    Allele,
    CopyNumberCount,
    CopyNumberChange,
    SequenceLocation,
    SequenceReference,
}

impl StoredObjectType {
    /// Whether this type is one of the variation kinds.
    pub fn is_variation(&self) -> bool {
        matches!(
            self,
            StoredObjectType::Allele
                | StoredObjectType::CopyNumberCount
                | StoredObjectType::CopyNumberChange
        )
    }
}

/// Supported mapping types between variations.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum VariationMappingType {
    Liftover,
    Transcription,
    Translation,
}

/// A directed mapping between two stored variations.
///
/// Identity is the full `(source_id, dest_id, mapping_type)` tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariationMapping {
    pub source_id: String,
    pub dest_id: String,
    pub mapping_type: VariationMappingType,
}

/// A free-form annotation attached to a stored object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Synthetic row id, assigned by the store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub object_id: String,
    pub annotation_type: String,
    pub annotation_value: serde_json::Value,
}

impl Annotation {
    pub fn new(
        object_id: impl Into<String>,
        annotation_type: impl Into<String>,
        annotation_value: serde_json::Value,
    ) -> Self {
        Self {
            id: None,
            object_id: object_id.into(),
            annotation_type: annotation_type.into(),
            annotation_value,
        }
    }
}

/// Commonly used annotation types.
pub const ANNOTATION_TYPE_CREATION_TIMESTAMP: &str = "creation_timestamp";
