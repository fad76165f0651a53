//! VRS digest computation and object identification.
//!
//! Digests are `base64url(sha512(canonical_json)[..24])` without padding.
//! The canonical JSON form sorts keys, omits `id`/`digest` and null-valued
//! fields, and collapses nested identifiable objects to their digest
//! string.  Identifiers are `ga4gh:<prefix>.<digest>` with a type-specific
//! prefix.

use base64::Engine as _;
use sha2::{Digest as _, Sha512};

use super::{
    Allele, AlleleState, Coordinate, CopyNumberChange, CopyNumberCount, SequenceLocation,
    Variation, VrsObject,
};

/// Number of digest bytes kept from the SHA-512 output.
const DIGEST_LENGTH: usize = 24;

/// SHA-512 truncated to 24 bytes, base64url-encoded without padding.
pub fn sha512t24u(data: &[u8]) -> String {
    let mut hasher = Sha512::new();
    hasher.update(data);
    let hash = hasher.finalize();
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&hash[..DIGEST_LENGTH])
}

/// Serialize a JSON value in canonical form: object keys sorted, compact
/// separators.  Key order is enforced here rather than relying on the
/// serializer's map ordering.
pub fn canonical_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys = map.keys().collect::<Vec<_>>();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        serde_json::Value::Array(values) => {
            out.push('[');
            for (i, item) in values.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

fn coordinate_json(coordinate: &Coordinate) -> serde_json::Value {
    match coordinate {
        Coordinate::Value(value) => serde_json::json!(value),
        Coordinate::Range([lo, hi]) => serde_json::json!([lo, hi]),
    }
}

/// Compute the digest of a `SequenceLocation`.
pub fn location_digest(location: &SequenceLocation) -> String {
    let mut obj = serde_json::json!({
        "sequenceReference": {
            "refgetAccession": location.sequence_reference.refget_accession,
            "type": "SequenceReference",
        },
        "type": "SequenceLocation",
    });
    if let Some(start) = &location.start {
        obj["start"] = coordinate_json(start);
    }
    if let Some(end) = &location.end {
        obj["end"] = coordinate_json(end);
    }
    sha512t24u(canonical_json(&obj).as_bytes())
}

fn state_json(state: &AlleleState) -> serde_json::Value {
    match state {
        AlleleState::LiteralSequenceExpression { sequence } => serde_json::json!({
            "sequence": sequence,
            "type": "LiteralSequenceExpression",
        }),
        AlleleState::ReferenceLengthExpression {
            length,
            repeat_subunit_length,
            sequence,
        } => {
            let mut obj = serde_json::json!({
                "length": length,
                "repeatSubunitLength": repeat_subunit_length,
                "type": "ReferenceLengthExpression",
            });
            if let Some(sequence) = sequence {
                obj["sequence"] = serde_json::json!(sequence);
            }
            obj
        }
        AlleleState::LengthExpression { length } => {
            let mut obj = serde_json::json!({
                "type": "LengthExpression",
            });
            if let Some(length) = length {
                obj["length"] = serde_json::json!(length);
            }
            obj
        }
    }
}

/// Compute the digest of a variation.  The contained location is collapsed
/// to its own digest, which is recomputed here so the result does not
/// depend on any previously stored value.
pub fn variation_digest(variation: &Variation) -> String {
    let loc_digest = location_digest(variation.location());
    let obj = match variation {
        Variation::Allele(allele) => serde_json::json!({
            "location": loc_digest,
            "state": state_json(&allele.state),
            "type": "Allele",
        }),
        Variation::CopyNumberCount(cnc) => serde_json::json!({
            "copies": cnc.copies,
            "location": loc_digest,
            "type": "CopyNumberCount",
        }),
        Variation::CopyNumberChange(cnc) => serde_json::json!({
            "copyChange": cnc.copy_change,
            "location": loc_digest,
            "type": "CopyNumberChange",
        }),
    };
    sha512t24u(canonical_json(&obj).as_bytes())
}

/// The identifier prefix for a variation kind.
pub fn variation_prefix(variation: &Variation) -> &'static str {
    match variation {
        Variation::Allele(_) => "VA",
        Variation::CopyNumberCount(_) => "CN",
        Variation::CopyNumberChange(_) => "CX",
    }
}

fn ga4gh_id(prefix: &str, digest: &str) -> String {
    format!("ga4gh:{}.{}", prefix, digest)
}

/// Fill in the `id`/`digest` fields of a location.  Any previously present
/// values are recomputed, so the operation is idempotent.
pub fn identify_location(location: &mut SequenceLocation) {
    let digest = location_digest(location);
    location.id = Some(ga4gh_id("SL", &digest));
    location.digest = Some(digest);
}

/// Fill in the `id`/`digest` fields of a variation and of its contained
/// location.
pub fn recursive_identify(variation: &mut Variation) {
    identify_location(variation.location_mut());
    let digest = variation_digest(variation);
    let id = ga4gh_id(variation_prefix(variation), &digest);
    match variation {
        Variation::Allele(v) => {
            v.id = Some(id);
            v.digest = Some(digest);
        }
        Variation::CopyNumberCount(v) => {
            v.id = Some(id);
            v.digest = Some(digest);
        }
        Variation::CopyNumberChange(v) => {
            v.id = Some(id);
            v.digest = Some(digest);
        }
    }
}

/// Fill in identifiers on any storable object.
///
/// `SequenceReference`s carry no separate digest; the refget accession is
/// already content-derived and serves as the identity.
pub fn identify_object(object: &mut VrsObject) {
    match object {
        VrsObject::Allele(allele) => {
            let mut variation = Variation::Allele(allele.clone());
            recursive_identify(&mut variation);
            if let Variation::Allele(v) = variation {
                *allele = v;
            }
        }
        VrsObject::CopyNumberCount(cnc) => {
            let mut variation = Variation::CopyNumberCount(cnc.clone());
            recursive_identify(&mut variation);
            if let Variation::CopyNumberCount(v) = variation {
                *cnc = v;
            }
        }
        VrsObject::CopyNumberChange(cnc) => {
            let mut variation = Variation::CopyNumberChange(cnc.clone());
            recursive_identify(&mut variation);
            if let Variation::CopyNumberChange(v) = variation {
                *cnc = v;
            }
        }
        VrsObject::SequenceLocation(location) => identify_location(location),
        VrsObject::SequenceReference(_) => {}
    }
}
