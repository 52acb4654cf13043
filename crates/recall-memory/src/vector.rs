use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recall_core::{MemoryError, MemoryResult, Permalink};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use crate::metadata::ItemCounts;

/// Metadata attached to a vector record.
///
/// The well-known fields are typed; anything else a producer wants to carry
/// goes into `extra` so newer writers do not break older readers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorMetadata {
    /// Human title.
    pub title: String,
    /// Overwritten with the collection name when the record is stored.
    #[serde(default)]
    pub folder: String,
    /// Tags copied from the metadata row.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Extraction counters.
    #[serde(default)]
    pub counts: ItemCounts,
    /// Requested document id. A fresh one is generated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    /// Producer-specific fields.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

impl VectorMetadata {
    /// Metadata with just a title.
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Pin the document id. Chainable builder method.
    pub fn with_doc_id(mut self, doc_id: impl Into<String>) -> Self {
        self.doc_id = Some(doc_id.into());
        self
    }
}

/// One entry in a folder-scoped collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Document id, unique within the collection.
    pub doc_id: String,
    /// Collection name; always the normalized folder.
    pub folder: String,
    /// Embedding of `content`.
    pub embedding: Vec<f32>,
    /// Text as indexed, including any enrichment header.
    pub content: String,
    /// Typed metadata.
    pub metadata: VectorMetadata,
    /// First write time.
    pub created_at: DateTime<Utc>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

impl VectorRecord {
    /// The permalink joining this record to its metadata row.
    pub fn permalink(&self) -> MemoryResult<Permalink> {
        Permalink::new(&self.folder, &self.doc_id)
    }

    /// Approximate payload size: content bytes plus four bytes per dimension.
    pub fn size_bytes(&self) -> u64 {
        (self.content.len() + self.embedding.len() * std::mem::size_of::<f32>()) as u64
    }
}

/// A record with its cosine distance to a query vector.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    /// The matched record.
    pub record: VectorRecord,
    /// `1 - cosine_similarity`, in [0, 2].
    pub distance: f32,
}

impl ScoredRecord {
    /// Similarity score in [0, 1]: `1 - min(distance, 1)`.
    pub fn score(&self) -> f32 {
        distance_to_score(self.distance)
    }
}

/// Convert a cosine distance into a [0, 1] similarity score.
pub fn distance_to_score(distance: f32) -> f32 {
    if distance.is_nan() {
        return 0.0;
    }
    (1.0 - distance.clamp(0.0, 1.0)).clamp(0.0, 1.0)
}

/// Concrete similarity backend. Owns storage of records per collection;
/// folder mapping, embedding and batching live in
/// [`VectorIndex`](crate::index::VectorIndex).
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Create a collection if it does not exist yet.
    async fn create_collection(&self, name: &str) -> MemoryResult<()>;

    /// Names of all collections.
    async fn list_collections(&self) -> MemoryResult<Vec<String>>;

    /// Insert or replace records. A batch either lands completely or not at all.
    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> MemoryResult<()>;

    /// Fetch one record.
    async fn get(&self, collection: &str, doc_id: &str) -> MemoryResult<Option<VectorRecord>>;

    /// Remove one record. Returns whether it existed.
    async fn delete(&self, collection: &str, doc_id: &str) -> MemoryResult<bool>;

    /// The `top_k` records closest to `embedding`, nearest first.
    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> MemoryResult<Vec<ScoredRecord>>;

    /// Every record in a collection.
    async fn scan(&self, collection: &str) -> MemoryResult<Vec<VectorRecord>>;

    /// Remove a collection and everything in it. Returns whether it existed.
    async fn drop_collection(&self, name: &str) -> MemoryResult<bool>;
}

type Collections = HashMap<String, BTreeMap<String, VectorRecord>>;

fn missing_collection(name: &str) -> MemoryError {
    MemoryError::NotFound(format!("collection '{name}'"))
}

/// In-memory backend using brute-force cosine distance.
/// Suitable for tests and small corpora.
pub struct InMemoryVectorBackend {
    collections: RwLock<Collections>,
}

impl InMemoryVectorBackend {
    /// Empty backend.
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryVectorBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorBackend for InMemoryVectorBackend {
    async fn create_collection(&self, name: &str) -> MemoryResult<()> {
        self.collections
            .write()
            .await
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn list_collections(&self) -> MemoryResult<Vec<String>> {
        let mut names: Vec<String> = self.collections.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> MemoryResult<()> {
        let mut collections = self.collections.write().await;
        let entries = collections
            .get_mut(collection)
            .ok_or_else(|| missing_collection(collection))?;
        for record in records {
            entries.insert(record.doc_id.clone(), record);
        }
        Ok(())
    }

    async fn get(&self, collection: &str, doc_id: &str) -> MemoryResult<Option<VectorRecord>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|entries| entries.get(doc_id))
            .cloned())
    }

    async fn delete(&self, collection: &str, doc_id: &str) -> MemoryResult<bool> {
        let mut collections = self.collections.write().await;
        Ok(collections
            .get_mut(collection)
            .is_some_and(|entries| entries.remove(doc_id).is_some()))
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> MemoryResult<Vec<ScoredRecord>> {
        if embedding.is_empty() {
            return Err(MemoryError::Validation("empty query embedding".to_string()));
        }

        let collections = self.collections.read().await;
        let Some(entries) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<ScoredRecord> = entries
            .values()
            .map(|record| ScoredRecord {
                distance: cosine_distance(embedding, &record.embedding),
                record: record.clone(),
            })
            .collect();

        scored.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.record.doc_id.cmp(&b.record.doc_id))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn scan(&self, collection: &str) -> MemoryResult<Vec<VectorRecord>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn drop_collection(&self, name: &str) -> MemoryResult<bool> {
        Ok(self.collections.write().await.remove(name).is_some())
    }
}

/// File-backed backend persisting each collection as a JSONL file.
///
/// Loads everything into memory on open. Inserting only new documents
/// appends; replacing or deleting rewrites the collection file. The on-disk
/// write happens before the in-memory state changes, so a failed write leaves
/// both untouched.
pub struct FileVectorBackend {
    dir: PathBuf,
    inner: InMemoryVectorBackend,
}

impl FileVectorBackend {
    /// Open the store rooted at `dir`, loading every `*.jsonl` collection.
    pub async fn open(dir: PathBuf) -> MemoryResult<Self> {
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| MemoryError::store("vector.open", e))?;

        let inner = InMemoryVectorBackend::new();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| MemoryError::store("vector.open", e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MemoryError::store("vector.open", e))?
        {
            let Some(name) = entry
                .file_name()
                .to_str()
                .and_then(|n| n.strip_suffix(".jsonl"))
                .map(decode_collection)
            else {
                continue;
            };

            let data = tokio::fs::read_to_string(entry.path())
                .await
                .map_err(|e| MemoryError::store("vector.open", e))?;
            let mut records = Vec::new();
            for line in data.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let record: VectorRecord = serde_json::from_str(line)
                    .map_err(|e| MemoryError::store("vector.open", e))?;
                records.push(record);
            }
            inner.create_collection(&name).await?;
            debug!(collection = %name, count = records.len(), "Loaded vector collection");
            inner.upsert(&name, records).await?;
        }

        Ok(Self { dir, inner })
    }

    fn collection_path(&self, name: &str) -> PathBuf {
        collection_file(&self.dir, name)
    }

    async fn append(&self, collection: &str, records: &[VectorRecord]) -> MemoryResult<()> {
        use tokio::io::AsyncWriteExt;

        let mut data = String::new();
        for record in records {
            data.push_str(
                &serde_json::to_string(record)
                    .map_err(|e| MemoryError::store("vector.append", e))?,
            );
            data.push('\n');
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.collection_path(collection))
            .await
            .map_err(|e| MemoryError::store("vector.append", e))?;
        file.write_all(data.as_bytes())
            .await
            .map_err(|e| MemoryError::store("vector.append", e))?;
        file.flush()
            .await
            .map_err(|e| MemoryError::store("vector.append", e))
    }

    async fn rewrite(&self, collection: &str, records: &[VectorRecord]) -> MemoryResult<()> {
        let mut data = String::new();
        for record in records {
            data.push_str(
                &serde_json::to_string(record)
                    .map_err(|e| MemoryError::store("vector.rewrite", e))?,
            );
            data.push('\n');
        }
        tokio::fs::write(self.collection_path(collection), data.as_bytes())
            .await
            .map_err(|e| MemoryError::store("vector.rewrite", e))
    }
}

#[async_trait]
impl VectorBackend for FileVectorBackend {
    async fn create_collection(&self, name: &str) -> MemoryResult<()> {
        let path = self.collection_path(name);
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| MemoryError::store("vector.create_collection", e))?;
        if !exists {
            tokio::fs::write(&path, b"")
                .await
                .map_err(|e| MemoryError::store("vector.create_collection", e))?;
        }
        self.inner.create_collection(name).await
    }

    async fn list_collections(&self) -> MemoryResult<Vec<String>> {
        self.inner.list_collections().await
    }

    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> MemoryResult<()> {
        if !self.inner.list_collections().await?.iter().any(|c| c == collection) {
            return Err(missing_collection(collection));
        }

        let existing = self.inner.scan(collection).await?;
        let replaces = records
            .iter()
            .any(|r| existing.iter().any(|e| e.doc_id == r.doc_id));

        if replaces {
            let mut merged: BTreeMap<String, VectorRecord> = existing
                .into_iter()
                .map(|r| (r.doc_id.clone(), r))
                .collect();
            for record in &records {
                merged.insert(record.doc_id.clone(), record.clone());
            }
            let merged: Vec<VectorRecord> = merged.into_values().collect();
            self.rewrite(collection, &merged).await?;
        } else {
            self.append(collection, &records).await?;
        }

        self.inner.upsert(collection, records).await
    }

    async fn get(&self, collection: &str, doc_id: &str) -> MemoryResult<Option<VectorRecord>> {
        self.inner.get(collection, doc_id).await
    }

    async fn delete(&self, collection: &str, doc_id: &str) -> MemoryResult<bool> {
        let existing = self.inner.scan(collection).await?;
        if !existing.iter().any(|r| r.doc_id == doc_id) {
            return Ok(false);
        }
        let remaining: Vec<VectorRecord> = existing
            .into_iter()
            .filter(|r| r.doc_id != doc_id)
            .collect();
        self.rewrite(collection, &remaining).await?;
        self.inner.delete(collection, doc_id).await
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> MemoryResult<Vec<ScoredRecord>> {
        self.inner.query(collection, embedding, top_k).await
    }

    async fn scan(&self, collection: &str) -> MemoryResult<Vec<VectorRecord>> {
        self.inner.scan(collection).await
    }

    async fn drop_collection(&self, name: &str) -> MemoryResult<bool> {
        let path = self.collection_path(name);
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| MemoryError::store("vector.drop_collection", e))?;
        if exists {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| MemoryError::store("vector.drop_collection", e))?;
        }
        self.inner.drop_collection(name).await
    }
}

/// File holding `collection` under `dir`. `/` and `%` are percent-encoded so
/// nested folders map to flat file names.
fn collection_file(dir: &Path, collection: &str) -> PathBuf {
    let encoded = collection.replace('%', "%25").replace('/', "%2F");
    dir.join(format!("{encoded}.jsonl"))
}

fn decode_collection(encoded: &str) -> String {
    encoded.replace("%2F", "/").replace("%25", "%")
}

/// Cosine similarity between two vectors. Mismatched or zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

/// Cosine distance `1 - cosine_similarity`.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn record(folder: &str, doc_id: &str, content: &str, embedding: Vec<f32>) -> VectorRecord {
        let now = Utc::now();
        VectorRecord {
            doc_id: doc_id.to_string(),
            folder: folder.to_string(),
            embedding,
            content: content.to_string(),
            metadata: VectorMetadata::titled(content),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_upsert_requires_collection() {
        let backend = InMemoryVectorBackend::new();
        let err = backend
            .upsert("x", vec![record("x", "1", "a", vec![1.0])])
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        backend.create_collection("x").await.unwrap();
        backend
            .upsert("x", vec![record("x", "1", "a", vec![1.0])])
            .await
            .unwrap();
        assert_eq!(backend.scan("x").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_query_orders_by_distance() {
        let backend = InMemoryVectorBackend::new();
        backend.create_collection("c").await.unwrap();
        backend
            .upsert(
                "c",
                vec![
                    record("c", "far", "far", vec![0.0, 0.0, 1.0]),
                    record("c", "near", "near", vec![0.9, 0.1, 0.0]),
                ],
            )
            .await
            .unwrap();

        let hits = backend.query("c", &[1.0, 0.0, 0.0], 5).await.unwrap();
        assert_eq!(hits[0].record.doc_id, "near");
        assert!(hits[0].score() > 0.9);
        assert!((hits[1].score() - 0.0).abs() < 1e-6);

        assert!(backend.query("c", &[], 5).await.is_err());
        assert!(backend.query("missing", &[1.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let backend = InMemoryVectorBackend::new();
        backend.create_collection("c").await.unwrap();
        backend
            .upsert("c", vec![record("c", "1", "a", vec![1.0])])
            .await
            .unwrap();
        assert!(backend.delete("c", "1").await.unwrap());
        assert!(!backend.delete("c", "1").await.unwrap());
        assert!(!backend.delete("nope", "1").await.unwrap());
    }

    #[test]
    fn test_distance_to_score_clamps() {
        assert!((distance_to_score(0.0) - 1.0).abs() < 1e-6);
        assert!((distance_to_score(0.25) - 0.75).abs() < 1e-6);
        assert_eq!(distance_to_score(1.7), 0.0);
        assert_eq!(distance_to_score(-0.1), 1.0);
        assert_eq!(distance_to_score(f32::NAN), 0.0);
    }

    #[test]
    fn test_cosine() {
        let v = vec![1.0, 0.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_distance(&[1.0, 0.0], &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_collection_file_encoding() {
        let path = collection_file(Path::new("/d"), "work/50%");
        assert_eq!(path, PathBuf::from("/d/work%2F50%25.jsonl"));
        assert_eq!(decode_collection("work%2F50%25"), "work/50%");
    }

    #[tokio::test]
    async fn test_file_backend_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("vectors");

        {
            let backend = FileVectorBackend::open(dir.clone()).await.unwrap();
            backend.create_collection("notes/daily").await.unwrap();
            backend
                .upsert(
                    "notes/daily",
                    vec![
                        record("notes/daily", "1", "hello", vec![1.0, 0.0]),
                        record("notes/daily", "2", "world", vec![0.0, 1.0]),
                    ],
                )
                .await
                .unwrap();
            // Replacement forces a rewrite.
            backend
                .upsert(
                    "notes/daily",
                    vec![record("notes/daily", "1", "hello again", vec![1.0, 0.0])],
                )
                .await
                .unwrap();
            assert!(backend.delete("notes/daily", "2").await.unwrap());

            backend.create_collection("scratch").await.unwrap();
            assert!(backend.drop_collection("scratch").await.unwrap());
            assert!(!backend.drop_collection("scratch").await.unwrap());
        }

        let reopened = FileVectorBackend::open(dir).await.unwrap();
        assert_eq!(reopened.list_collections().await.unwrap(), vec!["notes/daily"]);
        let all = reopened.scan("notes/daily").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].content, "hello again");
    }

    #[tokio::test]
    async fn test_file_backend_empty_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = FileVectorBackend::open(tmp.path().to_path_buf()).await.unwrap();
        assert!(backend.list_collections().await.unwrap().is_empty());
    }
}
