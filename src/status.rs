//! Status tracking: the single point of truth for where a document is.
//!
//! Every write merges metadata rather than overwriting it, so a concurrent
//! reader never loses previously recorded stage history.

use serde_json::{json, Value};
use std::sync::Arc;

use crate::document::DocumentStatus;
use crate::error::{epoch_ms, ErrorReport};
use crate::progress::{ProgressSink, Stage};
use crate::store::{DocumentPatch, DocumentStore, StoreError};

/// Records stage transitions, progress percentages, and structured errors
/// on the document record after every pipeline step.
pub struct StatusTracker {
    documents: Arc<dyn DocumentStore>,
}

impl StatusTracker {
    /// Builds a tracker over the given document store.
    pub fn new(documents: Arc<dyn DocumentStore>) -> Self {
        Self { documents }
    }

    /// Marks a stage as started, stamping the stage name and its floor
    /// percentage. Stages that map onto a document status pass it here;
    /// stages that only refine progress (embedding, section summaries)
    /// pass `None` and leave the status alone.
    pub fn begin_stage(
        &self,
        document_id: &str,
        stage: Stage,
        status: Option<DocumentStatus>,
    ) -> Result<(), StoreError> {
        let (floor, _) = stage.weight_range();
        let mut patch = DocumentPatch::new()
            .with_meta("stage", json!(stage.name()))
            .with_meta("progress_percent", json!(floor));
        patch.status = status;
        self.documents.update(document_id, patch)?;
        self.append_history(document_id, stage, "started", None)
    }

    /// Records stage-local progress as an overall percentage.
    pub fn progress(
        &self,
        document_id: &str,
        stage: Stage,
        current: usize,
        total: usize,
    ) -> Result<(), StoreError> {
        let patch = DocumentPatch::new()
            .with_meta("stage", json!(stage.name()))
            .with_meta("progress_percent", json!(stage.percent(current, total)));
        self.documents.update(document_id, patch)
    }

    /// Marks a stage as finished with a short note.
    pub fn complete_stage(
        &self,
        document_id: &str,
        stage: Stage,
        note: &str,
    ) -> Result<(), StoreError> {
        let (_, ceiling) = stage.weight_range();
        let patch = DocumentPatch::new()
            .with_meta("progress_percent", json!(ceiling));
        self.documents.update(document_id, patch)?;
        self.append_history(document_id, stage, "completed", Some(note))
    }

    /// Sets a terminal or intermediate status without touching progress.
    pub fn set_status(
        &self,
        document_id: &str,
        status: DocumentStatus,
    ) -> Result<(), StoreError> {
        self.documents
            .update(document_id, DocumentPatch::new().with_status(status))
    }

    /// Writes a structured error report and moves the document to the
    /// given failure status. Best effort: a store failure here is logged
    /// rather than propagated, since the caller is already on an error
    /// path.
    pub fn record_error(&self, document_id: &str, report: &ErrorReport, status: DocumentStatus) {
        let report_value = match serde_json::to_value(report) {
            Ok(value) => value,
            Err(err) => {
                tracing::error!(document_id, error = %err, "failed to serialize error report");
                json!({ "message": report.message.clone() })
            }
        };
        let mut history = self.error_history(document_id);
        history.push(report_value.clone());

        let patch = DocumentPatch::new()
            .with_status(status)
            .with_meta("last_error", report_value)
            .with_meta("error_history", Value::Array(history));
        if let Err(err) = self.documents.update(document_id, patch) {
            tracing::error!(document_id, error = %err, "failed to record error on document");
        }
    }

    fn error_history(&self, document_id: &str) -> Vec<Value> {
        self.documents
            .get(document_id)
            .ok()
            .and_then(|doc| doc.metadata.get("error_history").cloned())
            .and_then(|value| match value {
                Value::Array(items) => Some(items),
                _ => None,
            })
            .unwrap_or_default()
    }

    fn append_history(
        &self,
        document_id: &str,
        stage: Stage,
        event: &str,
        note: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut history = self
            .documents
            .get(document_id)?
            .metadata
            .get("stage_history")
            .cloned()
            .and_then(|value| match value {
                Value::Array(items) => Some(items),
                _ => None,
            })
            .unwrap_or_default();
        let mut entry = json!({
            "stage": stage.name(),
            "event": event,
            "at_epoch_ms": epoch_ms(),
        });
        if let (Some(note), Some(map)) = (note, entry.as_object_mut()) {
            map.insert("note".to_string(), json!(note));
        }
        history.push(entry);
        self.documents.update(
            document_id,
            DocumentPatch::new().with_meta("stage_history", Value::Array(history)),
        )
    }

    /// Binds this tracker to one document as a [`ProgressSink`] for the
    /// stage work loops.
    pub fn sink_for<'a>(&'a self, document_id: &'a str) -> TrackerSink<'a> {
        TrackerSink {
            tracker: self,
            document_id,
        }
    }
}

/// A [`ProgressSink`] writing through a [`StatusTracker`] for one document.
pub struct TrackerSink<'a> {
    tracker: &'a StatusTracker,
    document_id: &'a str,
}

impl ProgressSink for TrackerSink<'_> {
    fn report(&self, stage: Stage, current: usize, total: usize) {
        if let Err(err) = self.tracker.progress(self.document_id, stage, current, total) {
            tracing::warn!(
                document_id = self.document_id,
                error = %err,
                "progress write failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::error::PipelineError;
    use crate::store::memory::MemoryStores;

    fn tracker_with_doc() -> (Arc<MemoryStores>, StatusTracker) {
        let stores = Arc::new(MemoryStores::new());
        stores
            .insert_document(Document::new("d1", "org", "text/plain"))
            .expect("insert");
        let tracker = StatusTracker::new(stores.clone());
        (stores, tracker)
    }

    #[test]
    fn history_accumulates_across_stages() {
        let (stores, tracker) = tracker_with_doc();
        tracker
            .begin_stage("d1", Stage::Extraction, Some(DocumentStatus::Processing))
            .expect("begin");
        tracker
            .complete_stage("d1", Stage::Extraction, "4000 chars")
            .expect("complete");
        tracker
            .begin_stage("d1", Stage::Chunking, Some(DocumentStatus::Chunking))
            .expect("begin chunking");

        let doc = DocumentStore::get(stores.as_ref(), "d1").expect("get");
        let history = doc.metadata["stage_history"].as_array().expect("array");
        assert_eq!(history.len(), 3);
        assert_eq!(history[0]["stage"], "extraction");
        assert_eq!(history[2]["stage"], "chunking");
        assert_eq!(doc.status, DocumentStatus::Chunking);
    }

    #[test]
    fn error_report_lands_in_metadata() {
        let (stores, tracker) = tracker_with_doc();
        let report = PipelineError::NoChunks.to_report();
        tracker.record_error("d1", &report, DocumentStatus::Error);

        let doc = DocumentStore::get(stores.as_ref(), "d1").expect("get");
        assert_eq!(doc.status, DocumentStatus::Error);
        assert_eq!(doc.metadata["last_error"]["code"], "no_chunks");
        assert_eq!(doc.metadata["error_history"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn progress_is_stage_weighted() {
        let (stores, tracker) = tracker_with_doc();
        tracker
            .begin_stage("d1", Stage::Extraction, Some(DocumentStatus::Processing))
            .expect("begin");
        tracker.progress("d1", Stage::Extraction, 5, 10).expect("progress");

        let doc = DocumentStore::get(stores.as_ref(), "d1").expect("get");
        assert_eq!(doc.metadata["progress_percent"], serde_json::json!(20));
    }
}
