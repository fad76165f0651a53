//! Batched background write engine for the SQL stores.
//!
//! Writes accepted under a batch scope accumulate in a [`RowBatch`] and
//! are handed to a single dedicated writer thread through a
//! condition-variable guarded FIFO.  The queue is capped; producers block
//! when it is full.  An empty sentinel batch doubles as the flush
//! barrier: `wait_for_writes` enqueues one and blocks until it has left
//! the queue and nothing is mid-transaction.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::vrs::{decompose, digest, Annotation, VariationMapping, VrsObject};

use super::StorageError;

/// Merge statement shape used to land staged rows, all equivalent to
/// "insert if not exists".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStyle {
    /// `INSERT … ON CONFLICT DO NOTHING`
    #[default]
    OnConflictDoNothing,
    /// `MERGE … WHEN NOT MATCHED THEN INSERT`
    MergeWhenNotMatched,
    /// `INSERT … SELECT … LEFT OUTER JOIN … WHERE … IS NULL`
    InsertLeftJoin,
}

/// Row form of a sequence reference.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceReferenceRow {
    pub id: String,
    pub molecule_type: Option<String>,
}

/// Row form of a sequence location; range coordinates are flattened into
/// the outer/inner column pairs.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationRow {
    pub id: String,
    pub digest: String,
    pub sequence_reference_id: String,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub start_outer: Option<i64>,
    pub start_inner: Option<i64>,
    pub end_outer: Option<i64>,
    pub end_inner: Option<i64>,
}

/// Row form of a variation; the kind-specific payload is stored as
/// structured JSON under the `state` column with a `type` discriminator
/// column alongside.
#[derive(Debug, Clone, PartialEq)]
pub struct VariationRow {
    pub id: String,
    pub digest: String,
    pub type_tag: String,
    pub location_id: String,
    pub state: serde_json::Value,
}

/// Row form of an annotation (synthetic id assigned by the database).
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationRow {
    pub object_id: String,
    pub annotation_type: String,
    pub annotation_value: serde_json::Value,
}

impl From<&Annotation> for AnnotationRow {
    fn from(annotation: &Annotation) -> Self {
        Self {
            object_id: annotation.object_id.clone(),
            annotation_type: annotation.annotation_type.clone(),
            annotation_value: annotation.annotation_value.clone(),
        }
    }
}

/// Row form of a mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct MappingRow {
    pub source_id: String,
    pub dest_id: String,
    pub mapping_type: String,
}

impl From<&VariationMapping> for MappingRow {
    fn from(mapping: &VariationMapping) -> Self {
        Self {
            source_id: mapping.source_id.clone(),
            dest_id: mapping.dest_id.clone(),
            mapping_type: mapping.mapping_type.to_string(),
        }
    }
}

/// One unit of work for the background writer.  Within a batch, rows are
/// inserted in dependency order: sequence references, then locations,
/// then variations, then annotations and mappings.
#[derive(Debug, Default)]
pub struct RowBatch {
    /// Queue bookkeeping id; assigned when the batch is enqueued.
    pub(crate) batch_id: u64,
    pub sequence_references: Vec<SequenceReferenceRow>,
    pub locations: Vec<LocationRow>,
    pub variations: Vec<VariationRow>,
    pub annotations: Vec<AnnotationRow>,
    pub mappings: Vec<MappingRow>,
}

impl RowBatch {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.sequence_references.len()
            + self.locations.len()
            + self.variations.len()
            + self.annotations.len()
            + self.mappings.len()
    }

    /// Whether an object with the given id is pending in this batch.
    pub fn contains_object(&self, id: &str) -> bool {
        self.variations.iter().any(|row| row.id == id)
            || self.locations.iter().any(|row| row.id == id)
            || self.sequence_references.iter().any(|row| row.id == id)
    }

    /// Decompose one object into rows and append them.
    ///
    /// Objects must arrive fully identified: a missing id/digest or an
    /// unresolved nested reference is an [`StorageError::IncompleteObject`].
    pub fn push_object(&mut self, object: &VrsObject) -> Result<(), StorageError> {
        match object {
            VrsObject::SequenceReference(sr) => {
                if sr.refget_accession.is_empty() {
                    return Err(StorageError::IncompleteObject(
                        "sequence reference lacks a refget accession".to_string(),
                    ));
                }
                self.sequence_references.push(SequenceReferenceRow {
                    id: sr.refget_accession.clone(),
                    molecule_type: sr.molecule_type.clone(),
                });
            }
            VrsObject::SequenceLocation(location) => {
                self.push_location_rows(location)?;
            }
            VrsObject::Allele(_) | VrsObject::CopyNumberCount(_) | VrsObject::CopyNumberChange(_) => {
                let variation = object
                    .as_variation()
                    .expect("variant objects convert to variations");
                let id = variation.id().ok_or_else(|| {
                    StorageError::IncompleteObject("variation lacks an id".to_string())
                })?;
                let var_digest = variation.digest().ok_or_else(|| {
                    StorageError::IncompleteObject(format!("variation {} lacks a digest", id))
                })?;
                let parts = decompose::decompose(&variation);
                let location_id = self.push_location_rows(&parts.location)?;
                let state = variation_state_json(&variation);
                self.variations.push(VariationRow {
                    id: id.to_string(),
                    digest: var_digest.to_string(),
                    type_tag: variation.type_tag().to_string(),
                    location_id,
                    state,
                });
            }
        }
        Ok(())
    }

    fn push_location_rows(
        &mut self,
        location: &crate::vrs::SequenceLocation,
    ) -> Result<String, StorageError> {
        let id = location.id.clone().ok_or_else(|| {
            StorageError::IncompleteObject("sequence location lacks an id".to_string())
        })?;
        let loc_digest = location.digest.clone().ok_or_else(|| {
            StorageError::IncompleteObject(format!("sequence location {} lacks a digest", id))
        })?;
        if location.sequence_reference.refget_accession.is_empty() {
            return Err(StorageError::IncompleteObject(format!(
                "sequence location {} lacks a refget accession",
                id
            )));
        }
        self.sequence_references.push(SequenceReferenceRow {
            id: location.sequence_reference.refget_accession.clone(),
            molecule_type: location.sequence_reference.molecule_type.clone(),
        });
        let (start, start_outer, start_inner) =
            decompose::flatten_coordinate(location.start.as_ref());
        let (end, end_outer, end_inner) = decompose::flatten_coordinate(location.end.as_ref());
        self.locations.push(LocationRow {
            id: id.clone(),
            digest: loc_digest,
            sequence_reference_id: location.sequence_reference.refget_accession.clone(),
            start,
            end,
            start_outer,
            start_inner,
            end_outer,
            end_inner,
        });
        Ok(id)
    }
}

/// JSON payload stored in the variation `state` column.
pub fn variation_state_json(variation: &crate::vrs::Variation) -> serde_json::Value {
    match variation {
        crate::vrs::Variation::Allele(allele) => {
            serde_json::to_value(&allele.state).expect("allele state serializes")
        }
        crate::vrs::Variation::CopyNumberCount(cnc) => serde_json::json!({"copies": cnc.copies}),
        crate::vrs::Variation::CopyNumberChange(cnc) => {
            serde_json::json!({"copyChange": cnc.copy_change})
        }
    }
}

/// Rebuild a variation from its row and resolved location.
pub fn variation_from_row(
    row: &VariationRow,
    location: crate::vrs::SequenceLocation,
) -> Result<crate::vrs::Variation, StorageError> {
    let variation = match row.type_tag.as_str() {
        "Allele" => {
            let state: crate::vrs::AlleleState = serde_json::from_value(row.state.clone())
                .map_err(|e| {
                    StorageError::Backend(format!("invalid allele state for {}: {}", row.id, e))
                })?;
            crate::vrs::Variation::Allele(crate::vrs::Allele {
                id: Some(row.id.clone()),
                digest: Some(row.digest.clone()),
                location,
                state,
            })
        }
        "CopyNumberCount" => {
            let copies = row.state["copies"].as_i64().ok_or_else(|| {
                StorageError::Backend(format!("missing copies for {}", row.id))
            })?;
            crate::vrs::Variation::CopyNumberCount(crate::vrs::CopyNumberCount {
                id: Some(row.id.clone()),
                digest: Some(row.digest.clone()),
                location,
                copies,
            })
        }
        "CopyNumberChange" => {
            let copy_change = row.state["copyChange"]
                .as_str()
                .ok_or_else(|| {
                    StorageError::Backend(format!("missing copyChange for {}", row.id))
                })?
                .to_string();
            crate::vrs::Variation::CopyNumberChange(crate::vrs::CopyNumberChange {
                id: Some(row.id.clone()),
                digest: Some(row.digest.clone()),
                location,
                copy_change,
            })
        }
        other => {
            return Err(StorageError::Backend(format!(
                "unknown variation type tag {:?} for {}",
                other, row.id
            )))
        }
    };
    // Digest columns are authoritative at write time; the composed object
    // must agree with them.
    debug_assert_eq!(
        digest::variation_digest(&variation),
        row.digest,
        "stored digest disagrees with recomputed digest"
    );
    Ok(variation)
}

struct WriterState {
    pending: VecDeque<RowBatch>,
    in_flight: bool,
    stop: bool,
    next_batch_id: u64,
    dropped_batches: u64,
}

struct WriterShared {
    state: Mutex<WriterState>,
    cond: Condvar,
    max_pending: usize,
}

/// Handle to the background writer thread of one store instance.
pub struct BatchWriter {
    shared: Arc<WriterShared>,
    handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl BatchWriter {
    /// Spawn the writer thread.  `write_batch` runs one staged-merge
    /// transaction; failures are logged and the batch is dropped.
    pub fn start<F>(max_pending: usize, mut write_batch: F) -> Self
    where
        F: FnMut(&RowBatch) -> Result<(), StorageError> + Send + 'static,
    {
        let shared = Arc::new(WriterShared {
            state: Mutex::new(WriterState {
                pending: VecDeque::new(),
                in_flight: false,
                stop: false,
                next_batch_id: 1,
                dropped_batches: 0,
            }),
            cond: Condvar::new(),
            max_pending: max_pending.max(1),
        });

        let thread_shared = shared.clone();
        let handle = std::thread::Builder::new()
            .name("anyvar-batch-writer".to_string())
            .spawn(move || {
                let mut state = thread_shared.state.lock().expect("writer lock poisoned");
                loop {
                    if let Some(current) = state.pending.pop_front() {
                        if current.is_empty() {
                            // Sentinel batch: its removal is the barrier signal.
                            thread_shared.cond.notify_all();
                            continue;
                        }
                        state.in_flight = true;
                        thread_shared.cond.notify_all();
                        drop(state);

                        if let Err(e) = write_batch(&current) {
                            tracing::error!(
                                "dropping batch of {} rows after merge failure: {}",
                                current.len(),
                                e
                            );
                            state = thread_shared.state.lock().expect("writer lock poisoned");
                            state.dropped_batches += 1;
                        } else {
                            tracing::debug!("merged batch of {} rows", current.len());
                            state = thread_shared.state.lock().expect("writer lock poisoned");
                        }
                        state.in_flight = false;
                        thread_shared.cond.notify_all();
                    } else if state.stop {
                        // Pending batches are drained before the stop flag
                        // takes effect.
                        break;
                    } else {
                        state = thread_shared
                            .cond
                            .wait(state)
                            .expect("writer lock poisoned");
                    }
                }
                thread_shared.cond.notify_all();
            })
            .expect("failed to spawn batch writer thread");

        Self {
            shared,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Enqueue a batch, blocking while the queue is at capacity.
    pub fn queue_batch(&self, mut batch: RowBatch) {
        let mut state = self.shared.state.lock().expect("writer lock poisoned");
        while state.pending.len() >= self.shared.max_pending {
            tracing::debug!("pending batch queue is full, waiting for space");
            state = self.shared.cond.wait(state).expect("writer lock poisoned");
        }
        batch.batch_id = state.next_batch_id;
        state.next_batch_id += 1;
        if !batch.is_empty() {
            tracing::debug!("queueing batch of {} rows", batch.len());
        }
        state.pending.push_back(batch);
        self.shared.cond.notify_all();
    }

    /// Flush barrier: returns only once every batch enqueued before the
    /// call has been committed (or dropped with an error record).
    pub fn wait_for_writes(&self) {
        let mut state = self.shared.state.lock().expect("writer lock poisoned");
        if state.pending.is_empty() && !state.in_flight {
            return;
        }

        // Queue an empty sentinel and wait for it to leave the queue.
        while state.pending.len() >= self.shared.max_pending {
            state = self.shared.cond.wait(state).expect("writer lock poisoned");
        }
        let sentinel_id = state.next_batch_id;
        state.next_batch_id += 1;
        state.pending.push_back(RowBatch {
            batch_id: sentinel_id,
            ..Default::default()
        });
        self.shared.cond.notify_all();

        while state
            .pending
            .iter()
            .any(|batch| batch.batch_id == sentinel_id)
            || state.in_flight
        {
            state = self.shared.cond.wait(state).expect("writer lock poisoned");
        }
    }

    /// Number of batches dropped after merge failures.
    pub fn dropped_batches(&self) -> u64 {
        self.shared
            .state
            .lock()
            .expect("writer lock poisoned")
            .dropped_batches
    }

    /// Set the stop flag, wake the writer, and join it.  Pending batches
    /// are processed before the thread exits.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock().expect("writer lock poisoned");
            state.stop = true;
            self.shared.cond.notify_all();
        }
        if let Some(handle) = self
            .handle
            .lock()
            .expect("writer handle lock poisoned")
            .take()
        {
            let _ = handle.join();
        }
    }
}

impl Drop for BatchWriter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use crate::vrs::{
        digest, Allele, AlleleState, SequenceLocation, SequenceReference, Variation, VrsObject,
    };

    use super::{BatchWriter, RowBatch};

    fn identified_allele(sequence: &str) -> VrsObject {
        let mut variation = Variation::Allele(Allele {
            id: None,
            digest: None,
            location: SequenceLocation::new(
                SequenceReference::new("SQ.F-LrLMe1SRpfUZHkQmvkVKFEGaoDeHul"),
                140753335,
                140753336,
            ),
            state: AlleleState::literal(sequence),
        });
        digest::recursive_identify(&mut variation);
        variation.into()
    }

    #[test]
    fn push_object_decomposes_in_dependency_order() {
        let mut batch = RowBatch::default();
        batch.push_object(&identified_allele("T")).unwrap();

        assert_eq!(batch.sequence_references.len(), 1);
        assert_eq!(batch.locations.len(), 1);
        assert_eq!(batch.variations.len(), 1);
        assert_eq!(
            batch.variations[0].location_id,
            batch.locations[0].id
        );
        assert_eq!(
            batch.locations[0].sequence_reference_id,
            batch.sequence_references[0].id
        );
    }

    #[test]
    fn push_object_rejects_unidentified_variation() {
        let mut batch = RowBatch::default();
        let object = VrsObject::Allele(Allele {
            id: None,
            digest: None,
            location: SequenceLocation::new(
                SequenceReference::new("SQ.F-LrLMe1SRpfUZHkQmvkVKFEGaoDeHul"),
                1,
                2,
            ),
            state: AlleleState::literal("T"),
        });
        assert!(batch.push_object(&object).is_err());
    }

    #[test]
    fn writer_processes_all_batches_before_barrier() {
        let written = Arc::new(AtomicUsize::new(0));
        let written_in_thread = written.clone();
        let writer = BatchWriter::start(4, move |batch| {
            written_in_thread.fetch_add(batch.len(), Ordering::SeqCst);
            Ok(())
        });

        for i in 0..10 {
            let mut batch = RowBatch::default();
            batch
                .push_object(&identified_allele(if i % 2 == 0 { "T" } else { "G" }))
                .unwrap();
            writer.queue_batch(batch);
        }
        writer.wait_for_writes();
        assert_eq!(written.load(Ordering::SeqCst), 30);
        writer.stop();
    }

    #[test]
    fn writer_backpressure_with_single_slot_queue() {
        let written = Arc::new(AtomicUsize::new(0));
        let written_in_thread = written.clone();
        let writer = BatchWriter::start(1, move |batch| {
            std::thread::sleep(std::time::Duration::from_millis(1));
            written_in_thread.fetch_add(batch.len(), Ordering::SeqCst);
            Ok(())
        });

        for _ in 0..100 {
            let mut batch = RowBatch::default();
            batch.push_object(&identified_allele("T")).unwrap();
            writer.queue_batch(batch);
        }
        writer.wait_for_writes();
        assert_eq!(written.load(Ordering::SeqCst), 300);
        writer.stop();
    }

    #[test]
    fn writer_logs_and_drops_failed_batches() {
        let writer = BatchWriter::start(4, |_| {
            Err(super::StorageError::Backend("boom".to_string()))
        });

        let mut batch = RowBatch::default();
        batch.push_object(&identified_allele("T")).unwrap();
        writer.queue_batch(batch);
        writer.wait_for_writes();
        assert_eq!(writer.dropped_batches(), 1);

        // Subsequent batches continue to be processed.
        let mut batch = RowBatch::default();
        batch.push_object(&identified_allele("G")).unwrap();
        writer.queue_batch(batch);
        writer.wait_for_writes();
        assert_eq!(writer.dropped_batches(), 2);
        writer.stop();
    }

    #[test]
    fn pending_batches_drain_on_stop() {
        let written = Arc::new(AtomicUsize::new(0));
        let written_in_thread = written.clone();
        let writer = BatchWriter::start(8, move |batch| {
            written_in_thread.fetch_add(batch.len(), Ordering::SeqCst);
            Ok(())
        });

        for _ in 0..5 {
            let mut batch = RowBatch::default();
            batch.push_object(&identified_allele("T")).unwrap();
            writer.queue_batch(batch);
        }
        writer.stop();
        assert_eq!(written.load(Ordering::SeqCst), 15);
    }
}
