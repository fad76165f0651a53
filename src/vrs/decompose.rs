//! Decomposition of variations into their relational parts.
//!
//! The store persists a variation as three linked rows (sequence
//! reference, location, variation).  `decompose`/`compose` convert between
//! the nested object form and that ordered tuple; the coordinate helpers
//! flatten VRS coordinates into the `(simple, outer, inner)` column triple
//! used by the SQL schema.

use super::{Coordinate, SequenceLocation, SequenceReference, Variation};

/// The ordered relational parts of a variation.
#[derive(Debug, Clone, PartialEq)]
pub struct DecomposedVariation {
    pub sequence_reference: SequenceReference,
    pub location: SequenceLocation,
    pub variation: Variation,
}

/// Split a variation into `(SequenceReference, SequenceLocation, Variation)`.
pub fn decompose(variation: &Variation) -> DecomposedVariation {
    let location = variation.location().clone();
    DecomposedVariation {
        sequence_reference: location.sequence_reference.clone(),
        location,
        variation: variation.clone(),
    }
}

/// Rebuild a variation from its relational parts.
///
/// The location (with the given sequence reference embedded) replaces
/// whatever location stub the variation row carries.
pub fn compose(parts: DecomposedVariation) -> Variation {
    let DecomposedVariation {
        sequence_reference,
        mut location,
        mut variation,
    } = parts;
    location.sequence_reference = sequence_reference;
    *variation.location_mut() = location;
    variation
}

/// Flatten a coordinate into the `(simple, outer, inner)` column triple.
pub fn flatten_coordinate(
    coordinate: Option<&Coordinate>,
) -> (Option<i64>, Option<i64>, Option<i64>) {
    match coordinate {
        None => (None, None, None),
        Some(Coordinate::Value(value)) => (Some(*value), None, None),
        Some(Coordinate::Range([lo, hi])) => (None, *lo, *hi),
    }
}

/// Rebuild a coordinate from the `(simple, outer, inner)` column triple.
pub fn resolve_coordinate(
    simple: Option<i64>,
    outer: Option<i64>,
    inner: Option<i64>,
) -> Option<Coordinate> {
    if let Some(value) = simple {
        Some(Coordinate::Value(value))
    } else if outer.is_some() || inner.is_some() {
        Some(Coordinate::Range([outer, inner]))
    } else {
        None
    }
}
