//! In-memory store implementations backing tests and the CLI harness.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::chunk::Chunk;
use crate::document::Document;
use crate::store::{
    BlobStore, ChunkPatch, ChunkStore, DocumentPatch, DocumentStore, StoreError, SummaryLevel,
    SummaryRecord, SummaryStore,
};

/// All four collaborator stores over process-local maps.
#[derive(Default)]
pub struct MemoryStores {
    documents: Mutex<HashMap<String, Document>>,
    chunks: Mutex<Vec<Chunk>>,
    summaries: Mutex<HashMap<(String, SummaryLevel), SummaryRecord>>,
    blobs: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemoryStores {
    /// Creates an empty store set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a document row.
    pub fn insert_document(&self, document: Document) -> Result<(), StoreError> {
        let mut documents = lock(&self.documents)?;
        documents.insert(document.id.clone(), document);
        Ok(())
    }

    /// Stores a blob under (bucket, path).
    pub fn put_blob(&self, bucket: &str, path: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        let mut blobs = lock(&self.blobs)?;
        blobs.insert((bucket.to_string(), path.to_string()), bytes);
        Ok(())
    }
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> Result<std::sync::MutexGuard<'a, T>, StoreError> {
    mutex.lock().map_err(|_| StoreError::Backend {
        detail: "store mutex poisoned".to_string(),
    })
}

impl BlobStore for MemoryStores {
    fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>, StoreError> {
        let blobs = lock(&self.blobs)?;
        blobs
            .get(&(bucket.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                what: format!("blob {bucket}/{path}"),
            })
    }
}

impl DocumentStore for MemoryStores {
    fn get(&self, id: &str) -> Result<Document, StoreError> {
        let documents = lock(&self.documents)?;
        documents.get(id).cloned().ok_or_else(|| StoreError::NotFound {
            what: format!("document {id}"),
        })
    }

    fn update(&self, id: &str, patch: DocumentPatch) -> Result<(), StoreError> {
        let mut documents = lock(&self.documents)?;
        let document = documents.get_mut(id).ok_or_else(|| StoreError::NotFound {
            what: format!("document {id}"),
        })?;
        if let Some(status) = patch.status {
            if !document.status.can_transition_to(status) {
                return Err(StoreError::Conflict {
                    detail: format!(
                        "document {id}: {} -> {} not allowed",
                        document.status.as_str(),
                        status.as_str()
                    ),
                });
            }
            document.status = status;
        }
        for (key, value) in patch.metadata {
            document.metadata.insert(key, value);
        }
        Ok(())
    }
}

impl ChunkStore for MemoryStores {
    fn insert_many(&self, mut inserted: Vec<Chunk>) -> Result<(), StoreError> {
        let mut chunks = lock(&self.chunks)?;
        chunks.append(&mut inserted);
        Ok(())
    }

    fn for_document(&self, document_id: &str) -> Result<Vec<Chunk>, StoreError> {
        let chunks = lock(&self.chunks)?;
        let mut rows: Vec<Chunk> = chunks
            .iter()
            .filter(|chunk| chunk.document_id == document_id)
            .cloned()
            .collect();
        rows.sort_by_key(|chunk| chunk.index);
        Ok(rows)
    }

    fn update_many(&self, ids: &[String], patch: &ChunkPatch) -> Result<(), StoreError> {
        let mut chunks = lock(&self.chunks)?;
        for chunk in chunks.iter_mut() {
            if ids.contains(&chunk.id) {
                patch.apply(chunk);
            }
        }
        Ok(())
    }
}

impl SummaryStore for MemoryStores {
    fn upsert(
        &self,
        document_id: &str,
        level: SummaryLevel,
        record: SummaryRecord,
    ) -> Result<(), StoreError> {
        let mut summaries = lock(&self.summaries)?;
        summaries.insert((document_id.to_string(), level), record);
        Ok(())
    }

    fn get(
        &self,
        document_id: &str,
        level: SummaryLevel,
    ) -> Result<Option<SummaryRecord>, StoreError> {
        let summaries = lock(&self.summaries)?;
        Ok(summaries.get(&(document_id.to_string(), level)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::SummaryStatus;
    use crate::document::DocumentStatus;
    use serde_json::json;

    #[test]
    fn metadata_merges_instead_of_replacing() {
        let stores = MemoryStores::new();
        stores
            .insert_document(Document::new("d1", "org", "text/plain"))
            .expect("insert");

        stores
            .update("d1", DocumentPatch::new().with_meta("stage", json!("extraction")))
            .expect("first write");
        stores
            .update("d1", DocumentPatch::new().with_meta("progress_percent", json!(30)))
            .expect("second write");

        let doc = DocumentStore::get(&stores, "d1").expect("get");
        assert_eq!(doc.metadata["stage"], json!("extraction"));
        assert_eq!(doc.metadata["progress_percent"], json!(30));
    }

    #[test]
    fn illegal_transition_is_a_conflict() {
        let stores = MemoryStores::new();
        let mut doc = Document::new("d1", "org", "text/plain");
        doc.status = DocumentStatus::Chunking;
        stores.insert_document(doc).expect("insert");

        let result = stores.update(
            "d1",
            DocumentPatch::new().with_status(DocumentStatus::Processing),
        );
        assert!(matches!(result, Err(StoreError::Conflict { .. })));
    }

    #[test]
    fn chunk_patch_targets_only_listed_ids() {
        let stores = MemoryStores::new();
        let chunks = vec![
            Chunk::new("d1", 0, "a".into(), 1, None),
            Chunk::new("d1", 1, "b".into(), 1, None),
        ];
        stores.insert_many(chunks).expect("insert");

        stores
            .update_many(
                &["d1:0".to_string()],
                &ChunkPatch::summary_completed("done".into()),
            )
            .expect("update");

        let rows = stores.for_document("d1").expect("select");
        assert_eq!(rows[0].summary_status, SummaryStatus::Completed);
        assert_eq!(rows[1].summary_status, SummaryStatus::Pending);
    }
}
