//! In-memory storage backend.
//!
//! A trivial collection-backed implementation of the storage contract,
//! used for tests and small interactive deployments.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::vrs::{
    Annotation, SequenceLocation, SequenceReference, StoredObjectType, Variation,
    VariationMapping, VariationMappingType, VrsObject,
};

use super::{check_search_params, normalize_accession, Storage, StorageError, MAX_ROWS};

#[derive(Default)]
struct MemoryInner {
    sequence_references: HashMap<String, SequenceReference>,
    locations: HashMap<String, SequenceLocation>,
    variations: HashMap<String, Variation>,
    annotations: Vec<Annotation>,
    next_annotation_id: i64,
    mappings: Vec<VariationMapping>,
}

/// Collection-backed store.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<MemoryInner>,
}

impl InMemoryStore {
    fn inner(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().expect("memory store lock poisoned")
    }
}

fn require_location_parts(location: &SequenceLocation) -> Result<(String, String), StorageError> {
    let id = location
        .id
        .clone()
        .ok_or_else(|| StorageError::IncompleteObject("sequence location lacks an id".into()))?;
    let digest = location.digest.clone().ok_or_else(|| {
        StorageError::IncompleteObject(format!("sequence location {} lacks a digest", id))
    })?;
    if location.sequence_reference.refget_accession.is_empty() {
        return Err(StorageError::IncompleteObject(format!(
            "sequence location {} lacks a refget accession",
            id
        )));
    }
    let _ = digest;
    Ok((id, location.sequence_reference.refget_accession.clone()))
}

impl Storage for InMemoryStore {
    fn setup(&self) -> Result<(), StorageError> {
        Ok(())
    }

    fn close(&self) {}

    fn wait_for_writes(&self) {}

    fn wipe_db(&self) -> Result<(), StorageError> {
        let mut inner = self.inner();
        *inner = MemoryInner::default();
        Ok(())
    }

    fn add_objects(&self, objects: &[VrsObject]) -> Result<(), StorageError> {
        let mut inner = self.inner();
        for object in objects {
            match object {
                VrsObject::SequenceReference(sr) => {
                    if sr.refget_accession.is_empty() {
                        return Err(StorageError::IncompleteObject(
                            "sequence reference lacks a refget accession".into(),
                        ));
                    }
                    inner
                        .sequence_references
                        .entry(sr.refget_accession.clone())
                        .or_insert_with(|| sr.clone());
                }
                VrsObject::SequenceLocation(location) => {
                    let (id, accession) = require_location_parts(location)?;
                    inner
                        .sequence_references
                        .entry(accession)
                        .or_insert_with(|| location.sequence_reference.clone());
                    inner.locations.entry(id).or_insert_with(|| location.clone());
                }
                VrsObject::Allele(_)
                | VrsObject::CopyNumberCount(_)
                | VrsObject::CopyNumberChange(_) => {
                    let variation = object
                        .as_variation()
                        .expect("variant objects convert to variations");
                    let id = variation
                        .id()
                        .ok_or_else(|| {
                            StorageError::IncompleteObject("variation lacks an id".into())
                        })?
                        .to_string();
                    if variation.digest().is_none() {
                        return Err(StorageError::IncompleteObject(format!(
                            "variation {} lacks a digest",
                            id
                        )));
                    }
                    let location = variation.location().clone();
                    let (location_id, accession) = require_location_parts(&location)?;
                    inner
                        .sequence_references
                        .entry(accession)
                        .or_insert_with(|| location.sequence_reference.clone());
                    inner
                        .locations
                        .entry(location_id)
                        .or_insert_with(|| location.clone());
                    inner.variations.entry(id).or_insert(variation);
                }
            }
        }
        Ok(())
    }

    fn get_objects(
        &self,
        object_type: StoredObjectType,
        object_ids: &[String],
    ) -> Result<Vec<VrsObject>, StorageError> {
        let inner = self.inner();
        let mut out = Vec::new();
        for id in object_ids {
            if out.len() >= MAX_ROWS {
                break;
            }
            match object_type {
                StoredObjectType::SequenceReference => {
                    if let Some(sr) = inner.sequence_references.get(id) {
                        out.push(VrsObject::SequenceReference(sr.clone()));
                    }
                }
                StoredObjectType::SequenceLocation => {
                    if let Some(location) = inner.locations.get(id) {
                        out.push(VrsObject::SequenceLocation(location.clone()));
                    }
                }
                variation_type => {
                    if let Some(variation) = inner.variations.get(id) {
                        if variation.type_tag() == variation_type {
                            out.push(VrsObject::from(variation.clone()));
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    fn get_all_object_ids(&self) -> Result<Box<dyn Iterator<Item = String> + Send>, StorageError> {
        let inner = self.inner();
        let ids = inner
            .variations
            .keys()
            .chain(inner.locations.keys())
            .chain(inner.sequence_references.keys())
            .cloned()
            .collect::<Vec<_>>();
        Ok(Box::new(ids.into_iter()))
    }

    fn get_object_count(&self, object_type: StoredObjectType) -> Result<u64, StorageError> {
        let inner = self.inner();
        let count = match object_type {
            StoredObjectType::SequenceReference => inner.sequence_references.len(),
            StoredObjectType::SequenceLocation => inner.locations.len(),
            variation_type => inner
                .variations
                .values()
                .filter(|v| v.type_tag() == variation_type)
                .count(),
        };
        Ok(count as u64)
    }

    fn delete_objects(
        &self,
        object_type: StoredObjectType,
        object_ids: &[String],
    ) -> Result<(), StorageError> {
        let mut inner = self.inner();
        if object_type.is_variation() {
            for id in object_ids {
                if inner.annotations.iter().any(|a| &a.object_id == id) {
                    return Err(StorageError::DataIntegrity(format!(
                        "annotations still reference {}",
                        id
                    )));
                }
                if inner
                    .mappings
                    .iter()
                    .any(|m| &m.source_id == id || &m.dest_id == id)
                {
                    return Err(StorageError::DataIntegrity(format!(
                        "mappings still reference {}",
                        id
                    )));
                }
            }
            for id in object_ids {
                let type_matches = inner
                    .variations
                    .get(id)
                    .map(|variation| variation.type_tag() == object_type)
                    .unwrap_or(false);
                if type_matches {
                    inner.variations.remove(id);
                }
            }
        } else if object_type == StoredObjectType::SequenceLocation {
            for id in object_ids {
                if inner
                    .variations
                    .values()
                    .any(|v| v.location().id.as_deref() == Some(id.as_str()))
                {
                    return Err(StorageError::DataIntegrity(format!(
                        "variations still reference location {}",
                        id
                    )));
                }
            }
            for id in object_ids {
                inner.locations.remove(id);
            }
        } else {
            for id in object_ids {
                if inner
                    .locations
                    .values()
                    .any(|l| &l.sequence_reference.refget_accession == id)
                {
                    return Err(StorageError::DataIntegrity(format!(
                        "locations still reference sequence reference {}",
                        id
                    )));
                }
            }
            for id in object_ids {
                inner.sequence_references.remove(id);
            }
        }
        Ok(())
    }

    fn add_mapping(&self, mapping: &VariationMapping) -> Result<(), StorageError> {
        if mapping.source_id == mapping.dest_id {
            return Err(StorageError::InvalidMapping(format!(
                "mapping source and destination are both {}",
                mapping.source_id
            )));
        }
        let mut inner = self.inner();
        for id in [&mapping.source_id, &mapping.dest_id] {
            if !inner.variations.contains_key(id) {
                return Err(StorageError::MissingReference(format!(
                    "mapping endpoint {} is not stored",
                    id
                )));
            }
        }
        if !inner.mappings.contains(mapping) {
            inner.mappings.push(mapping.clone());
        }
        Ok(())
    }

    fn delete_mapping(&self, mapping: &VariationMapping) -> Result<(), StorageError> {
        self.inner().mappings.retain(|m| m != mapping);
        Ok(())
    }

    fn get_mappings(
        &self,
        source_object_id: &str,
        mapping_type: Option<VariationMappingType>,
    ) -> Result<Vec<VariationMapping>, StorageError> {
        Ok(self
            .inner()
            .mappings
            .iter()
            .filter(|m| m.source_id == source_object_id)
            .filter(|m| mapping_type.map_or(true, |t| m.mapping_type == t))
            .take(MAX_ROWS)
            .cloned()
            .collect())
    }

    fn add_annotation(&self, annotation: &Annotation) -> Result<(), StorageError> {
        let mut inner = self.inner();
        if !inner.variations.contains_key(&annotation.object_id) {
            return Err(StorageError::MissingReference(format!(
                "annotation target {} is not stored",
                annotation.object_id
            )));
        }
        inner.next_annotation_id += 1;
        let mut stored = annotation.clone();
        stored.id = Some(inner.next_annotation_id);
        inner.annotations.push(stored);
        Ok(())
    }

    fn delete_annotation(&self, annotation: &Annotation) -> Result<(), StorageError> {
        let mut inner = self.inner();
        if let Some(id) = annotation.id {
            inner.annotations.retain(|a| a.id != Some(id));
        } else if let Some(pos) = inner.annotations.iter().position(|a| {
            a.object_id == annotation.object_id
                && a.annotation_type == annotation.annotation_type
                && a.annotation_value == annotation.annotation_value
        }) {
            inner.annotations.remove(pos);
        }
        Ok(())
    }

    fn get_annotations(
        &self,
        object_id: &str,
        annotation_type: Option<&str>,
    ) -> Result<Vec<Annotation>, StorageError> {
        Ok(self
            .inner()
            .annotations
            .iter()
            .filter(|a| a.object_id == object_id)
            .filter(|a| annotation_type.map_or(true, |t| a.annotation_type == t))
            .take(MAX_ROWS)
            .cloned()
            .collect())
    }

    fn search_alleles(
        &self,
        refget_accession: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<Variation>, StorageError> {
        check_search_params(start, end)?;
        let accession = normalize_accession(refget_accession);
        let inner = self.inner();
        Ok(inner
            .variations
            .values()
            .filter(|v| matches!(v, Variation::Allele(_)))
            .filter(|v| {
                let location = v.location();
                if location.sequence_reference.refget_accession != accession {
                    return false;
                }
                // Ranges compare by their loosest bound; a missing bound
                // on the queried side excludes the location.
                let loc_start = location.start.as_ref().and_then(|c| c.lower_bound());
                let loc_end = location.end.as_ref().and_then(|c| c.upper_bound());
                match (loc_start, loc_end) {
                    (Some(loc_start), Some(loc_end)) => start <= loc_start && loc_end <= end,
                    _ => false,
                }
            })
            .take(MAX_ROWS)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::storage::{Storage, StorageError};
    use crate::vrs::{
        digest, Allele, AlleleState, Annotation, SequenceLocation, SequenceReference,
        StoredObjectType, Variation, VariationMapping, VariationMappingType, VrsObject,
    };

    fn identified_allele(start: i64, end: i64, sequence: &str) -> VrsObject {
        let mut variation = Variation::Allele(Allele {
            id: None,
            digest: None,
            location: SequenceLocation::new(
                SequenceReference::new("SQ.F-LrLMe1SRpfUZHkQmvkVKFEGaoDeHul"),
                start,
                end,
            ),
            state: AlleleState::literal(sequence),
        });
        digest::recursive_identify(&mut variation);
        variation.into()
    }

    #[test]
    fn round_trip_and_counts() {
        let store = super::InMemoryStore::default();
        let object = identified_allele(140753335, 140753336, "T");
        store.add_objects(std::slice::from_ref(&object)).unwrap();
        store.add_objects(std::slice::from_ref(&object)).unwrap();

        let fetched = store
            .get_objects(
                StoredObjectType::Allele,
                &[object.id().unwrap().to_string()],
            )
            .unwrap();
        assert_eq!(fetched, vec![object]);
        assert_eq!(store.get_object_count(StoredObjectType::Allele).unwrap(), 1);
        assert_eq!(
            store
                .get_object_count(StoredObjectType::SequenceReference)
                .unwrap(),
            1
        );
    }

    #[test]
    fn range_search_containment() {
        let store = super::InMemoryStore::default();
        let a = identified_allele(140753335, 140753336, "T");
        let b = identified_allele(55174010, 55174011, "G");
        store.add_objects(&[a.clone(), b.clone()]).unwrap();

        let both = store
            .search_alleles("SQ.F-LrLMe1SRpfUZHkQmvkVKFEGaoDeHul", 55174000, 140753340)
            .unwrap();
        let mut ids: Vec<_> = both.iter().map(|v| v.id().unwrap().to_string()).collect();
        ids.sort();
        let mut expected = vec![
            a.id().unwrap().to_string(),
            b.id().unwrap().to_string(),
        ];
        expected.sort();
        assert_eq!(ids, expected);

        let only_a = store
            .search_alleles("SQ.F-LrLMe1SRpfUZHkQmvkVKFEGaoDeHul", 140753335, 140753336)
            .unwrap();
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].id(), a.id());

        assert!(matches!(
            store.search_alleles("SQ.F-LrLMe1SRpfUZHkQmvkVKFEGaoDeHul", 7, 3),
            Err(StorageError::InvalidSearchParams(_))
        ));
    }

    #[test]
    fn mapping_and_annotation_contract() {
        let store = super::InMemoryStore::default();
        let a = identified_allele(1, 2, "T");
        let b = identified_allele(3, 4, "G");
        store.add_objects(&[a.clone(), b.clone()]).unwrap();

        let mapping = VariationMapping {
            source_id: a.id().unwrap().to_string(),
            dest_id: b.id().unwrap().to_string(),
            mapping_type: VariationMappingType::Transcription,
        };
        store.add_mapping(&mapping).unwrap();
        store.add_mapping(&mapping).unwrap();
        assert_eq!(
            store.get_mappings(a.id().unwrap(), None).unwrap().len(),
            1
        );

        let annotation =
            Annotation::new(a.id().unwrap(), "note", serde_json::json!("hello"));
        store.add_annotation(&annotation).unwrap();
        store.add_annotation(&annotation).unwrap();
        assert_eq!(
            store
                .get_annotations(a.id().unwrap(), Some("note"))
                .unwrap()
                .len(),
            2
        );

        assert!(matches!(
            store.delete_objects(
                StoredObjectType::Allele,
                &[a.id().unwrap().to_string()]
            ),
            Err(StorageError::DataIntegrity(_))
        ));
    }
}
