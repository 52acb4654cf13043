use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use recall_core::{resolve_folder, MemoryError, MemoryResult, Permalink};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::embedding::EmbeddingProvider;
use crate::extraction::strip_enrichment;
use crate::metadata::ItemCounts;
use crate::vector::{ScoredRecord, VectorBackend, VectorMetadata, VectorRecord};

/// Default number of records written per backend call in [`VectorIndex::batch_store`].
pub const DEFAULT_BATCH_SIZE: usize = 100;

const PREVIEW_CHARS: usize = 200;

/// Listing entry for one vector record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSummary {
    /// Record permalink.
    pub permalink: Permalink,
    /// Record title.
    pub title: String,
    /// Collection the record lives in.
    pub folder: String,
    /// Record tags.
    pub tags: Vec<String>,
    /// Extraction counters carried by the record.
    pub counts: ItemCounts,
    /// Start of the raw content.
    pub preview: String,
    /// Approximate stored size.
    pub size_bytes: u64,
    /// First write time.
    pub created_at: DateTime<Utc>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
}

/// Aggregate figures over a folder or the whole index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Number of records.
    pub count: usize,
    /// Sum of [`VectorRecord::size_bytes`].
    pub size_bytes: u64,
    /// Most recent `updated_at`, if any record exists.
    pub last_updated: Option<DateTime<Utc>>,
}

/// First [`PREVIEW_CHARS`] characters of the raw (un-enriched) content.
pub fn preview(content: &str) -> String {
    strip_enrichment(content)
        .trim()
        .chars()
        .take(PREVIEW_CHARS)
        .collect()
}

/// Folder-scoped similarity index over an injected [`VectorBackend`].
///
/// Each folder maps to one backend collection, created lazily the first time
/// something is written to it. Every record is addressed by its permalink.
pub struct VectorIndex {
    backend: Arc<dyn VectorBackend>,
    embedder: Arc<dyn EmbeddingProvider>,
    known_collections: RwLock<HashSet<String>>,
    batch_size: usize,
}

impl VectorIndex {
    /// Index over `backend` with the default batch size.
    pub fn new(backend: Arc<dyn VectorBackend>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            backend,
            embedder,
            known_collections: RwLock::new(HashSet::new()),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Override the default chunk size used by [`Self::batch_store`].
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// The configured chunk size.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// The embedding provider, shared with search.
    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    async fn ensure_collection(&self, folder: &str) -> MemoryResult<()> {
        if self.known_collections.read().await.contains(folder) {
            return Ok(());
        }
        let mut known = self.known_collections.write().await;
        if known.contains(folder) {
            return Ok(());
        }
        self.backend.create_collection(folder).await?;
        known.insert(folder.to_string());
        debug!(collection = %folder, "Vector collection ready");
        Ok(())
    }

    /// Collections to read for an optional folder filter.
    async fn collections_for(&self, folder: Option<&str>) -> MemoryResult<Vec<String>> {
        match folder {
            Some(folder) => Ok(vec![resolve_folder(folder)]),
            None => self.backend.list_collections().await,
        }
    }

    /// Validate inputs and assign doc ids. Touches no store.
    fn plan(
        texts: &[String],
        metadata: Vec<VectorMetadata>,
        folder: &str,
    ) -> MemoryResult<Vec<(Permalink, String, VectorMetadata)>> {
        if texts.len() != metadata.len() {
            return Err(MemoryError::Validation(format!(
                "got {} texts but {} metadata entries",
                texts.len(),
                metadata.len()
            )));
        }

        let mut seen = HashSet::new();
        let mut planned = Vec::with_capacity(texts.len());
        for (text, mut meta) in texts.iter().zip(metadata) {
            if text.trim().is_empty() {
                return Err(MemoryError::Validation(
                    "cannot index empty text".to_string(),
                ));
            }
            let doc_id = meta
                .doc_id
                .take()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let permalink = Permalink::new(folder, &doc_id)?;
            if !seen.insert(permalink.doc_id().to_string()) {
                return Err(MemoryError::Validation(format!(
                    "duplicate document id '{}' in one write",
                    permalink.doc_id()
                )));
            }
            meta.folder = permalink.folder().to_string();
            planned.push((permalink, text.clone(), meta));
        }
        Ok(planned)
    }

    /// Embed and write one group of planned records in a single backend call.
    async fn write_group(
        &self,
        group: &[(Permalink, String, VectorMetadata)],
    ) -> MemoryResult<Vec<Permalink>> {
        let Some((first, _, _)) = group.first() else {
            return Ok(Vec::new());
        };
        let folder = first.folder().to_string();

        let texts: Vec<&str> = group.iter().map(|(_, text, _)| text.as_str()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;

        let now = Utc::now();
        let mut records = Vec::with_capacity(group.len());
        for ((permalink, text, meta), embedding) in group.iter().zip(embeddings) {
            let created_at = match self.backend.get(&folder, permalink.doc_id()).await? {
                Some(existing) => existing.created_at,
                None => now,
            };
            records.push(VectorRecord {
                doc_id: permalink.doc_id().to_string(),
                folder: folder.clone(),
                embedding,
                content: text.clone(),
                metadata: meta.clone(),
                created_at,
                updated_at: now,
            });
        }

        self.backend.upsert(&folder, records).await?;
        Ok(group.iter().map(|(p, _, _)| p.clone()).collect())
    }

    /// Store `texts` in `folder`, all in one backend write.
    ///
    /// `metadata[i].doc_id` pins the document id of `texts[i]`; otherwise a
    /// fresh one is generated. Returns permalinks in input order.
    pub async fn store(
        &self,
        texts: &[String],
        metadata: Vec<VectorMetadata>,
        folder: &str,
    ) -> MemoryResult<Vec<Permalink>> {
        let planned = Self::plan(texts, metadata, folder)?;
        if planned.is_empty() {
            return Ok(Vec::new());
        }
        let folder = resolve_folder(folder);
        self.ensure_collection(&folder).await?;
        let permalinks = self.write_group(&planned).await?;
        debug!(folder = %folder, count = permalinks.len(), "Stored vector records");
        Ok(permalinks)
    }

    /// Store many texts in chunks of `batch_size` (the configured size when
    /// `None`).
    ///
    /// A failing chunk is retried one record at a time; records that still
    /// fail are skipped with a warning. Chunks already written stay written.
    pub async fn batch_store(
        &self,
        texts: &[String],
        metadata: Vec<VectorMetadata>,
        folder: &str,
        batch_size: Option<usize>,
    ) -> MemoryResult<Vec<Permalink>> {
        let planned = Self::plan(texts, metadata, folder)?;
        if planned.is_empty() {
            return Ok(Vec::new());
        }
        let folder = resolve_folder(folder);
        self.ensure_collection(&folder).await?;

        let batch_size = batch_size.unwrap_or(self.batch_size).max(1);
        let mut stored = Vec::with_capacity(planned.len());
        let mut skipped = 0usize;

        for (chunk_no, chunk) in planned.chunks(batch_size).enumerate() {
            match self.write_group(chunk).await {
                Ok(permalinks) => stored.extend(permalinks),
                Err(e) => {
                    warn!(
                        folder = %folder,
                        chunk = chunk_no,
                        size = chunk.len(),
                        error = %e,
                        "Batch chunk failed, falling back to single inserts"
                    );
                    for single in chunk {
                        match self.write_group(std::slice::from_ref(single)).await {
                            Ok(permalinks) => stored.extend(permalinks),
                            Err(e) => {
                                skipped += 1;
                                warn!(permalink = %single.0, error = %e, "Skipping record");
                            }
                        }
                    }
                }
            }
        }

        info!(
            folder = %folder,
            stored = stored.len(),
            skipped,
            batch_size,
            "Batch store finished"
        );
        Ok(stored)
    }

    /// Fetch the record behind `permalink`.
    pub async fn get(&self, permalink: &Permalink) -> MemoryResult<VectorRecord> {
        self.backend
            .get(permalink.folder(), permalink.doc_id())
            .await?
            .ok_or_else(|| MemoryError::NotFound(permalink.to_string()))
    }

    /// Replace the content (re-embedding it) and metadata of an existing
    /// record. Returns `false` when there is no such record.
    pub async fn update(
        &self,
        permalink: &Permalink,
        content: &str,
        mut metadata: VectorMetadata,
    ) -> MemoryResult<bool> {
        if content.trim().is_empty() {
            return Err(MemoryError::Validation(
                "cannot index empty text".to_string(),
            ));
        }
        let Some(existing) = self
            .backend
            .get(permalink.folder(), permalink.doc_id())
            .await?
        else {
            return Ok(false);
        };

        metadata.doc_id = None;
        metadata.folder = permalink.folder().to_string();
        let embedding = self.embedder.embed(content).await?;
        let record = VectorRecord {
            embedding,
            content: content.to_string(),
            metadata,
            updated_at: Utc::now().max(existing.updated_at),
            ..existing
        };
        self.backend.upsert(permalink.folder(), vec![record]).await?;
        debug!(permalink = %permalink, "Updated vector record");
        Ok(true)
    }

    /// Remove one record. Returns whether it existed.
    pub async fn remove(&self, permalink: &Permalink) -> MemoryResult<bool> {
        self.backend
            .delete(permalink.folder(), permalink.doc_id())
            .await
    }

    /// Best-effort removal of several records.
    ///
    /// Absent records count as removed. Returns `false` if any backend delete
    /// failed; the rest are still attempted.
    pub async fn delete(&self, permalinks: &[Permalink]) -> bool {
        let mut all_ok = true;
        for permalink in permalinks {
            if let Err(e) = self.remove(permalink).await {
                warn!(permalink = %permalink, error = %e, "Vector delete failed");
                all_ok = false;
            }
        }
        all_ok
    }

    /// Drop the collection behind `folder` with every record in it.
    pub async fn drop_folder(&self, folder: &str) -> MemoryResult<bool> {
        let folder = resolve_folder(folder);
        self.known_collections.write().await.remove(&folder);
        let existed = self.backend.drop_collection(&folder).await?;
        if existed {
            info!(folder = %folder, "Dropped vector collection");
        }
        Ok(existed)
    }

    /// All records, optionally restricted to one folder.
    pub async fn records(&self, folder: Option<&str>) -> MemoryResult<Vec<VectorRecord>> {
        let mut out = Vec::new();
        for collection in self.collections_for(folder).await? {
            out.extend(self.backend.scan(&collection).await?);
        }
        Ok(out)
    }

    /// Record summaries, most recently updated first.
    pub async fn list(&self, folder: Option<&str>) -> MemoryResult<Vec<RecordSummary>> {
        let mut records = self.records(folder).await?;
        records.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.folder.cmp(&b.folder))
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });

        let mut out = Vec::with_capacity(records.len());
        for record in records {
            out.push(RecordSummary {
                permalink: record.permalink()?,
                size_bytes: record.size_bytes(),
                preview: preview(&record.content),
                title: record.metadata.title,
                folder: record.folder,
                tags: record.metadata.tags,
                counts: record.metadata.counts,
                created_at: record.created_at,
                updated_at: record.updated_at,
            });
        }
        Ok(out)
    }

    /// Count, approximate size and latest update time.
    pub async fn stats(&self, folder: Option<&str>) -> MemoryResult<IndexStats> {
        let records = self.records(folder).await?;
        Ok(IndexStats {
            count: records.len(),
            size_bytes: records.iter().map(VectorRecord::size_bytes).sum(),
            last_updated: records.iter().map(|r| r.updated_at).max(),
        })
    }

    /// The `top_k` records nearest to `query` across the selected folders.
    pub async fn query(
        &self,
        query: &str,
        top_k: usize,
        folder: Option<&str>,
    ) -> MemoryResult<Vec<ScoredRecord>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed(query).await?;
        let mut hits = Vec::new();
        for collection in self.collections_for(folder).await? {
            hits.extend(self.backend.query(&collection, &embedding, top_k).await?);
        }
        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.record.folder.cmp(&b.record.folder))
                .then_with(|| a.record.doc_id.cmp(&b.record.doc_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}
