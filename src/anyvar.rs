//! Process-wide runtime: storage, translator, and liftover converters
//! wired together at startup and passed as a dependency.

use std::sync::Arc;

use crate::mapping::liftover::{add_liftover_mapping, LiftoverConverters};
use crate::storage::{Storage, StorageError};
use crate::translate::Translator;
use crate::vrs::{
    digest, Annotation, StoredObjectType, Variation, VrsObject, ANNOTATION_TYPE_CREATION_TIMESTAMP,
};

/// The assembled service runtime.
pub struct AnyVar {
    pub storage: Arc<dyn Storage>,
    pub translator: Arc<dyn Translator>,
    pub converters: Arc<LiftoverConverters>,
}

/// Flags controlling the side effects of [`AnyVar::register_with_extras`].
#[derive(Debug, Clone, Copy)]
pub struct RegistrationExtras {
    /// Attach a creation-timestamp annotation when none exists yet.
    pub add_timestamp: bool,
    /// Compute the liftover and record the mapping plus target variant.
    pub add_liftover: bool,
}

impl Default for RegistrationExtras {
    fn default() -> Self {
        Self {
            add_timestamp: true,
            add_liftover: false,
        }
    }
}

/// Outcome of a registration.
#[derive(Debug, Clone)]
pub struct RegisterOutcome {
    pub object_id: String,
    /// Non-fatal messages (e.g. liftover failures).
    pub messages: Vec<String>,
}

impl AnyVar {
    pub fn new(
        storage: Arc<dyn Storage>,
        translator: Arc<dyn Translator>,
        converters: Arc<LiftoverConverters>,
    ) -> Self {
        Self {
            storage,
            translator,
            converters,
        }
    }

    /// Register a variation, filling in identifiers first.  Returns the
    /// object id.
    pub fn put_object(&self, variation: &Variation) -> Result<String, StorageError> {
        let mut variation = variation.clone();
        digest::recursive_identify(&mut variation);
        let id = variation
            .id()
            .expect("recursive_identify fills the id")
            .to_string();
        self.storage.add_objects(&[VrsObject::from(variation)])?;
        Ok(id)
    }

    /// Fetch a stored object by id.
    pub fn get_object(
        &self,
        object_type: StoredObjectType,
        object_id: &str,
    ) -> Result<Option<VrsObject>, StorageError> {
        Ok(self
            .storage
            .get_objects(object_type, &[object_id.to_string()])?
            .into_iter()
            .next())
    }

    /// Register a variation and apply the configured side effects:
    /// creation-timestamp annotation and optional liftover mapping.
    /// Side-effect failures are reported as messages and never abort the
    /// registration itself.
    pub fn register_with_extras(
        &self,
        variation: &Variation,
        extras: RegistrationExtras,
    ) -> Result<RegisterOutcome, StorageError> {
        let mut identified = variation.clone();
        digest::recursive_identify(&mut identified);
        let object_id = self.put_object(&identified)?;

        let mut messages = Vec::new();
        if extras.add_timestamp {
            if let Err(e) = self.create_timestamp_annotation_if_missing(&object_id) {
                messages.push(format!("Unable to record creation timestamp: {}", e));
            }
        }
        if extras.add_liftover {
            messages.extend(add_liftover_mapping(
                &identified,
                self.storage.as_ref(),
                self.translator.as_ref(),
                &self.converters,
            ));
        }
        Ok(RegisterOutcome {
            object_id,
            messages,
        })
    }

    /// Attach a creation-timestamp annotation unless one already exists
    /// for the object.
    pub fn create_timestamp_annotation_if_missing(
        &self,
        object_id: &str,
    ) -> Result<(), StorageError> {
        let existing = self
            .storage
            .get_annotations(object_id, Some(ANNOTATION_TYPE_CREATION_TIMESTAMP))?;
        if !existing.is_empty() {
            return Ok(());
        }
        let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        self.storage.add_annotation(&Annotation::new(
            object_id,
            ANNOTATION_TYPE_CREATION_TIMESTAMP,
            serde_json::json!(timestamp),
        ))
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use crate::common::GenomeRelease;
    use crate::mapping::liftover::LiftoverConverters;
    use crate::storage::memory::InMemoryStore;
    use crate::storage::Storage as _;
    use crate::translate::{TranslateError, TranslateOptions, Translator};
    use crate::vrs::{
        Allele, AlleleState, SequenceLocation, SequenceReference, StoredObjectType, Variation,
        ANNOTATION_TYPE_CREATION_TIMESTAMP,
    };

    struct NoTranslator;

    impl Translator for NoTranslator {
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
            Err(TranslateError::UnknownSequence(accession.to_string()))
        }

        fn translate_sequence_identifier(
            &self,
            _accession: &str,
            _namespace: &str,
        ) -> Result<Vec<String>, TranslateError> {
            Ok(vec![])
        }
    }

    fn runtime() -> super::AnyVar {
        super::AnyVar::new(
            Arc::new(InMemoryStore::default()),
            Arc::new(NoTranslator),
            Arc::new(LiftoverConverters::new()),
        )
    }

    fn braf_v600e() -> Variation {
        Variation::Allele(Allele {
            id: None,
            digest: None,
            location: SequenceLocation::new(
                SequenceReference::new("SQ.F-LrLMe1SRpfUZHkQmvkVKFEGaoDeHul"),
                140753335,
                140753336,
            ),
            state: AlleleState::literal("T"),
        })
    }

    #[test]
    fn put_object_is_digest_stable() {
        let av = runtime();
        let first = av.put_object(&braf_v600e()).unwrap();
        let second = av.put_object(&braf_v600e()).unwrap();
        assert_eq!(first, "ga4gh:VA.Otc5ovrw906Ack087o1fhegB4jDRqCAe");
        assert_eq!(first, second);
        assert_eq!(
            av.storage.get_object_count(StoredObjectType::Allele).unwrap(),
            1
        );
    }

    #[test]
    fn timestamp_annotation_added_once() {
        let av = runtime();
        let outcome = av
            .register_with_extras(&braf_v600e(), super::RegistrationExtras::default())
            .unwrap();
        assert!(outcome.messages.is_empty());

        // A second registration must not add another timestamp row.
        av.register_with_extras(&braf_v600e(), super::RegistrationExtras::default())
            .unwrap();
        let annotations = av
            .storage
            .get_annotations(&outcome.object_id, Some(ANNOTATION_TYPE_CREATION_TIMESTAMP))
            .unwrap();
        assert_eq!(annotations.len(), 1);
    }

    #[test]
    fn liftover_failure_is_a_message() {
        let av = runtime();
        let outcome = av
            .register_with_extras(
                &braf_v600e(),
                super::RegistrationExtras {
                    add_timestamp: false,
                    add_liftover: true,
                },
            )
            .unwrap();
        assert_eq!(outcome.object_id, "ga4gh:VA.Otc5ovrw906Ack087o1fhegB4jDRqCAe");
        assert_eq!(outcome.messages.len(), 1);
        assert!(outcome.messages[0].contains("Unable to complete liftover"));
    }
}
