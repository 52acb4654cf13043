use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use recall_core::{
    resolve_folder, FailureStage, MemoryError, MemoryResult, MetadataBackendKind,
    PartialFailure, Permalink, RecallConfig, VectorBackendKind,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::embedding::LocalEmbedding;
use crate::extraction::{enrich, strip_enrichment, ContentExtractor, HeuristicExtractor};
use crate::hybrid::{HybridSearcher, SearchRequest, SearchResult, SearchWeights};
use crate::index::{IndexStats, VectorIndex};
use crate::metadata::{
    normalize_tags, summarize, InMemoryMetadataStore, ItemCounts, ItemFilter, ItemSource,
    LifecycleState, MemoryItem, MemoryPatch, MetadataStore, NewMemoryItem, SyncStatus,
};
use crate::reconcile::{Reconciler, SweepReport};
use crate::sqlite::SqliteMetadataStore;
use crate::vector::{FileVectorBackend, InMemoryVectorBackend, VectorBackend, VectorMetadata};

/// Input to [`MemoryFacade::create`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewMemory {
    /// Raw text to remember.
    pub content: String,
    /// Short human title; must not be empty.
    pub title: String,
    /// Target folder; empty means the default folder.
    pub folder: String,
    /// Free-form labels.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NewMemory {
    /// Memory without tags.
    pub fn new(
        content: impl Into<String>,
        title: impl Into<String>,
        folder: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            title: title.into(),
            folder: folder.into(),
            tags: Vec::new(),
        }
    }

    /// Set tags. Chainable builder method.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// Result of [`MemoryFacade::create`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOutcome {
    /// Where the memory can be read back.
    pub permalink: Permalink,
    /// Id of the metadata row.
    pub metadata_id: Uuid,
    /// Entities found by extraction.
    pub entity_count: u32,
    /// Relations found by extraction.
    pub relation_count: u32,
    /// Observations found by extraction.
    pub observation_count: u32,
    /// Set when the record is searchable but the metadata row was not linked.
    pub warning: Option<PartialFailure>,
}

/// Result of [`MemoryFacade::read`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadOutcome {
    /// The permalink that was read.
    pub permalink: Permalink,
    /// Raw content with the enrichment header removed.
    pub content: String,
    /// The metadata row, derived if it was missing.
    pub metadata: MemoryItem,
}

/// Changes for [`MemoryFacade::update`]. `None` keeps the current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryUpdate {
    /// New raw content.
    pub content: Option<String>,
    /// Replacement tag set.
    pub tags: Option<Vec<String>>,
}

/// Result of [`MemoryFacade::update`] and [`MemoryFacade::restore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateOutcome {
    /// Unchanged permalink.
    pub permalink: Permalink,
    /// Id of the metadata row.
    pub metadata_id: Uuid,
    /// Set when the record was written but the metadata row was not.
    pub warning: Option<PartialFailure>,
}

/// What a delete found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteStatus {
    /// The memory was active and has been removed.
    Deleted,
    /// Nothing active was left to delete.
    AlreadyDeleted,
}

/// Result of [`MemoryFacade::delete`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteOutcome {
    /// The permalink that was deleted.
    pub permalink: Permalink,
    /// Whether anything was left to delete.
    pub status: DeleteStatus,
    /// Set when the record is gone but the metadata row is still active.
    pub warning: Option<PartialFailure>,
}

/// Listing entry returned by [`MemoryFacade::list`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySummary {
    /// Metadata row id.
    pub id: Uuid,
    /// `None` while the row is not yet linked.
    pub permalink: Option<Permalink>,
    /// Item title.
    pub title: String,
    /// Normalized folder.
    pub folder: String,
    /// Normalized tags.
    pub tags: Vec<String>,
    /// Short summary.
    pub summary: String,
    /// Native or derived.
    pub source: ItemSource,
    /// Whether the vector side has confirmed the row.
    pub sync_status: SyncStatus,
    /// Extraction counters.
    pub counts: ItemCounts,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl From<MemoryItem> for MemorySummary {
    fn from(item: MemoryItem) -> Self {
        Self {
            id: item.id,
            counts: item.counts(),
            permalink: item.permalink,
            title: item.title,
            folder: item.folder,
            tags: item.tags,
            summary: item.summary,
            source: item.source,
            sync_status: item.sync_status,
            updated_at: item.updated_at,
        }
    }
}

/// Keep backend failures as they are; anything else is wrapped so a failed
/// first half always reports as a store failure.
fn store_failure(operation: &str, error: MemoryError) -> MemoryError {
    match error {
        MemoryError::Store { .. } => error,
        other => MemoryError::store(operation, other),
    }
}

/// Entry point for callers: coordinates the metadata store, the vector index,
/// extraction, hybrid search and reconciliation.
///
/// Writes touch both stores without a shared transaction. The first half of
/// a composite write aborts the operation on failure; a failed second half
/// is reported as a [`PartialFailure`] on an otherwise successful outcome and
/// left for [`Reconciler`] to repair.
pub struct MemoryFacade {
    metadata: Arc<dyn MetadataStore>,
    index: Arc<VectorIndex>,
    extractor: Arc<dyn ContentExtractor>,
    searcher: HybridSearcher,
    reconciler: Reconciler,
}

impl MemoryFacade {
    /// Facade over injected stores and extractor, with default search settings.
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        index: Arc<VectorIndex>,
        extractor: Arc<dyn ContentExtractor>,
    ) -> Self {
        Self {
            searcher: HybridSearcher::new(index.clone()),
            reconciler: Reconciler::new(metadata.clone(), index.clone()),
            metadata,
            index,
            extractor,
        }
    }

    /// Replace the searcher's defaults. Chainable builder method.
    pub fn with_search_defaults(
        mut self,
        weights: SearchWeights,
        limit: usize,
        overfetch: usize,
    ) -> MemoryResult<Self> {
        weights.normalized()?;
        if limit == 0 {
            return Err(MemoryError::Validation(
                "default search limit must be > 0".to_string(),
            ));
        }
        self.searcher = HybridSearcher::new(self.index.clone())
            .with_default_weights(weights)
            .with_default_limit(limit)
            .with_overfetch(overfetch);
        Ok(self)
    }

    /// Build a facade with the backends named in `config`.
    pub async fn from_config(config: &RecallConfig) -> MemoryResult<Self> {
        config.validate()?;

        let metadata: Arc<dyn MetadataStore> = match config.metadata.backend {
            MetadataBackendKind::Memory => Arc::new(InMemoryMetadataStore::new()),
            MetadataBackendKind::Sqlite => {
                Arc::new(SqliteMetadataStore::open(&config.metadata_path())?)
            }
        };
        let backend: Arc<dyn VectorBackend> = match config.index.backend {
            VectorBackendKind::Memory => Arc::new(InMemoryVectorBackend::new()),
            VectorBackendKind::File => {
                Arc::new(FileVectorBackend::open(config.vectors_dir()).await?)
            }
        };
        let embedder = Arc::new(LocalEmbedding::new(config.index.embedding_dimension));
        let index = Arc::new(
            VectorIndex::new(backend, embedder).with_batch_size(config.index.batch_size),
        );

        let search = &config.search;
        let facade = Self::new(metadata, index, Arc::new(HeuristicExtractor::new()))
            .with_search_defaults(
                SearchWeights::new(search.semantic_weight, search.keyword_weight),
                search.default_limit,
                search.overfetch_factor,
            )?;

        info!(
            metadata = ?config.metadata.backend,
            vectors = ?config.index.backend,
            data_dir = %config.data_dir.display(),
            "Memory facade ready"
        );
        Ok(facade)
    }

    /// The metadata store in use.
    pub fn metadata(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata
    }

    /// The vector index in use.
    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Store a new memory.
    ///
    /// Creates the metadata row first, extracts structure, writes the
    /// enriched text to the index and finally links the row to the new
    /// permalink. A failed index write leaves the row unsynced and fails the
    /// call; a failed link still succeeds with a warning.
    pub async fn create(&self, memory: NewMemory) -> MemoryResult<CreateOutcome> {
        if memory.title.trim().is_empty() {
            return Err(MemoryError::Validation("title must not be empty".to_string()));
        }
        if memory.content.trim().is_empty() {
            return Err(MemoryError::Validation("content must not be empty".to_string()));
        }
        let folder = resolve_folder(&memory.folder);
        let tags = normalize_tags(&memory.tags);

        let item = self
            .metadata
            .create(
                NewMemoryItem::new(memory.title.clone(), memory.content.clone(), folder.clone())
                    .with_tags(tags.clone()),
            )
            .await?;
        let mut state = item.lifecycle();
        info!(id = %item.id, folder = %folder, "Memory item created");

        let extraction = self
            .extractor
            .extract(&memory.title, &memory.content)
            .await?;
        let counts = ItemCounts::from_triple(extraction.counts());
        let enriched = enrich(&memory.title, &extraction, &memory.content);

        let vector_meta = VectorMetadata {
            title: memory.title.clone(),
            folder: folder.clone(),
            tags,
            counts,
            doc_id: Some(item.id.to_string()),
            extra: HashMap::new(),
        };
        let permalink = match self.index.store(&[enriched], vec![vector_meta], &folder).await {
            Ok(mut permalinks) => permalinks.pop().ok_or_else(|| {
                MemoryError::store("vector.store", "index returned no permalink")
            })?,
            Err(e) => {
                warn!(id = %item.id, error = %e, "Vector write failed, memory item left unsynced");
                return Err(store_failure("vector.store", e));
            }
        };
        state = state.advance(LifecycleState::VectorStored)?;

        let link = MemoryPatch {
            permalink: Some(permalink.clone()),
            counts: Some(counts),
            sync_status: Some(SyncStatus::Synced),
            ..MemoryPatch::default()
        };
        let warning = match self.metadata.update(item.id, link).await {
            Ok(_) => {
                state = state.advance(LifecycleState::Linked)?;
                None
            }
            Err(e) => {
                warn!(permalink = %permalink, id = %item.id, error = %e, "Memory stored but metadata link failed");
                Some(PartialFailure::new(FailureStage::Metadata, &e))
            }
        };
        info!(permalink = %permalink, id = %item.id, state = ?state, "Memory stored");

        Ok(CreateOutcome {
            permalink,
            metadata_id: item.id,
            entity_count: counts.entities,
            relation_count: counts.relations,
            observation_count: counts.observations,
            warning,
        })
    }

    /// Fetch content and metadata.
    ///
    /// A record without a metadata row gets a derived one. A row without a
    /// record is reported as `NotFound`; the vector is never rebuilt here.
    pub async fn read(&self, permalink: &str) -> MemoryResult<ReadOutcome> {
        let permalink: Permalink = permalink.parse()?;

        let record = match self.index.get(&permalink).await {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                if let Some(item) = self.metadata.find_by_permalink(&permalink, false).await? {
                    warn!(permalink = %permalink, id = %item.id, "Memory item has no vector record");
                    return Err(MemoryError::NotFound(format!(
                        "content unavailable for {permalink}"
                    )));
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let (item, _) = self.reconciler.adopt(&record).await?;
        Ok(ReadOutcome {
            content: strip_enrichment(&record.content).to_string(),
            metadata: item,
            permalink,
        })
    }

    /// Replace content and/or tags. The permalink never changes.
    ///
    /// Writes the index first, then the metadata row. A soft-deleted item is
    /// revived. A missing record is written again under the same permalink
    /// only when new content is given; otherwise the call is `NotFound`.
    pub async fn update(&self, permalink: &str, changes: MemoryUpdate) -> MemoryResult<UpdateOutcome> {
        let permalink: Permalink = permalink.parse()?;
        if changes
            .content
            .as_deref()
            .is_some_and(|c| c.trim().is_empty())
        {
            return Err(MemoryError::Validation("content must not be empty".to_string()));
        }

        let record = match self.index.get(&permalink).await {
            Ok(record) => Some(record),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        let item = match self.find_item(&permalink, true).await? {
            Some(item) => item,
            None => match &record {
                Some(record) => self.reconciler.adopt(record).await?.0,
                None => return Err(MemoryError::NotFound(permalink.to_string())),
            },
        };

        // Without a record only caller-supplied content may be indexed again.
        let content = match (&changes.content, &record) {
            (Some(content), _) => content.clone(),
            (None, Some(record)) => strip_enrichment(&record.content).to_string(),
            (None, None) => {
                warn!(permalink = %permalink, id = %item.id, "Memory item has no vector record");
                return Err(MemoryError::NotFound(format!(
                    "content unavailable for {permalink}"
                )));
            }
        };
        let tags = changes
            .tags
            .as_deref()
            .map(normalize_tags)
            .unwrap_or_else(|| item.tags.clone());

        let extraction = self.extractor.extract(&item.title, &content).await?;
        let counts = ItemCounts::from_triple(extraction.counts());
        let enriched = enrich(&item.title, &extraction, &content);
        let vector_meta = VectorMetadata {
            title: item.title.clone(),
            folder: permalink.folder().to_string(),
            tags: tags.clone(),
            counts,
            doc_id: None,
            extra: record.map(|r| r.metadata.extra).unwrap_or_default(),
        };

        self.write_vector(&permalink, enriched, vector_meta)
            .await
            .map_err(|e| {
                warn!(permalink = %permalink, error = %e, "Vector update failed");
                store_failure("vector.update", e)
            })?;

        let patch = MemoryPatch {
            summary: Some(summarize(&content, &item.title)),
            content: Some(content),
            tags: Some(tags),
            permalink: Some(permalink.clone()),
            counts: Some(counts),
            sync_status: Some(SyncStatus::Synced),
            ..MemoryPatch::default()
        };
        let warning = match self.relink(&item, patch).await {
            Ok(_) => None,
            Err(e) => {
                warn!(permalink = %permalink, id = %item.id, error = %e, "Vector updated but metadata write failed");
                Some(PartialFailure::new(FailureStage::Metadata, &e))
            }
        };
        info!(permalink = %permalink, id = %item.id, "Memory updated");

        Ok(UpdateOutcome {
            permalink,
            metadata_id: item.id,
            warning,
        })
    }

    /// Update the record in place, or write it again if it has gone missing.
    async fn write_vector(
        &self,
        permalink: &Permalink,
        enriched: String,
        metadata: VectorMetadata,
    ) -> MemoryResult<()> {
        if self.index.update(permalink, &enriched, metadata.clone()).await? {
            return Ok(());
        }
        self.index
            .store(
                &[enriched],
                vec![metadata.with_doc_id(permalink.doc_id())],
                permalink.folder(),
            )
            .await?;
        Ok(())
    }

    /// Revive `item` if needed and apply `patch`.
    async fn relink(&self, item: &MemoryItem, patch: MemoryPatch) -> MemoryResult<MemoryItem> {
        if item.is_deleted {
            self.metadata.restore(item.id).await?;
            info!(id = %item.id, "Memory item revived");
        }
        self.metadata.update(item.id, patch).await
    }

    /// Remove a memory from retrieval. Idempotent.
    ///
    /// The record is deleted first and a failure there aborts the call. The
    /// metadata row is then soft-deleted; if that fails the call still
    /// succeeds, with a warning.
    pub async fn delete(&self, permalink: &str) -> MemoryResult<DeleteOutcome> {
        let permalink: Permalink = permalink.parse()?;

        let removed = self.index.remove(&permalink).await.map_err(|e| {
            warn!(permalink = %permalink, error = %e, "Vector delete failed");
            store_failure("vector.delete", e)
        })?;

        let (status, warning) = match self.soft_delete_item(&permalink).await {
            Ok(was_active) if removed || was_active => (DeleteStatus::Deleted, None),
            Ok(_) => (DeleteStatus::AlreadyDeleted, None),
            Err(e) => {
                warn!(permalink = %permalink, error = %e, "Vector deleted but metadata soft-delete failed");
                (
                    DeleteStatus::Deleted,
                    Some(PartialFailure::new(FailureStage::Metadata, &e)),
                )
            }
        };
        match status {
            DeleteStatus::Deleted => info!(permalink = %permalink, "Memory deleted"),
            DeleteStatus::AlreadyDeleted => debug!(permalink = %permalink, "Memory already deleted"),
        }

        Ok(DeleteOutcome {
            permalink,
            status,
            warning,
        })
    }

    async fn soft_delete_item(&self, permalink: &Permalink) -> MemoryResult<bool> {
        match self.find_item(permalink, false).await? {
            Some(item) => {
                self.metadata.soft_delete(item.id).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The row behind `permalink`, including one whose link patch never
    /// landed: such a row has no permalink but its id is the doc id.
    async fn find_item(
        &self,
        permalink: &Permalink,
        include_deleted: bool,
    ) -> MemoryResult<Option<MemoryItem>> {
        if let Some(item) = self
            .metadata
            .find_by_permalink(permalink, include_deleted)
            .await?
        {
            return Ok(Some(item));
        }
        let Ok(id) = Uuid::parse_str(permalink.doc_id()) else {
            return Ok(None);
        };
        Ok(self
            .metadata
            .find_by_id(id, include_deleted)
            .await?
            .filter(|item| item.permalink.is_none() && item.folder == permalink.folder()))
    }

    /// Bring a soft-deleted memory back at the same permalink.
    ///
    /// Re-indexes the content held by the metadata row when the record is
    /// gone, then clears the deleted mark.
    pub async fn restore(&self, permalink: &str) -> MemoryResult<UpdateOutcome> {
        let permalink: Permalink = permalink.parse()?;
        let item = self
            .find_item(&permalink, true)
            .await?
            .ok_or_else(|| MemoryError::NotFound(permalink.to_string()))?;

        let has_vector = match self.index.get(&permalink).await {
            Ok(_) => true,
            Err(e) if e.is_not_found() => false,
            Err(e) => return Err(e),
        };
        if has_vector && !item.is_deleted {
            return Ok(UpdateOutcome {
                permalink,
                metadata_id: item.id,
                warning: None,
            });
        }

        let mut patch = MemoryPatch {
            permalink: Some(permalink.clone()),
            sync_status: Some(SyncStatus::Synced),
            ..MemoryPatch::default()
        };
        if !has_vector {
            let extraction = self.extractor.extract(&item.title, &item.content).await?;
            let counts = ItemCounts::from_triple(extraction.counts());
            let vector_meta = VectorMetadata {
                title: item.title.clone(),
                folder: permalink.folder().to_string(),
                tags: item.tags.clone(),
                counts,
                doc_id: Some(permalink.doc_id().to_string()),
                extra: HashMap::new(),
            };
            self.index
                .store(
                    &[enrich(&item.title, &extraction, &item.content)],
                    vec![vector_meta],
                    permalink.folder(),
                )
                .await
                .map_err(|e| {
                    warn!(permalink = %permalink, error = %e, "Re-index on restore failed");
                    store_failure("vector.store", e)
                })?;
            patch.counts = Some(counts);
        }

        let warning = match self.relink(&item, patch).await {
            Ok(_) => None,
            Err(e) => {
                warn!(permalink = %permalink, id = %item.id, error = %e, "Re-indexed but metadata restore failed");
                Some(PartialFailure::new(FailureStage::Metadata, &e))
            }
        };
        info!(permalink = %permalink, id = %item.id, "Memory restored");

        Ok(UpdateOutcome {
            permalink,
            metadata_id: item.id,
            warning,
        })
    }

    /// Hybrid search. Hits without a metadata row get a derived one.
    pub async fn search(&self, request: SearchRequest) -> MemoryResult<Vec<SearchResult>> {
        let ranked = self.searcher.rank(&request).await?;
        let mut results = Vec::with_capacity(ranked.len());
        for hit in ranked {
            if let Err(e) = self.reconciler.adopt(&hit.record).await {
                warn!(permalink = %hit.result.permalink, error = %e, "Could not reconcile search hit");
            }
            results.push(hit.result);
        }
        Ok(results)
    }

    /// Active memories, most recently updated first.
    ///
    /// Records in scope without a metadata row are adopted before listing.
    pub async fn list(&self, folder: Option<&str>) -> MemoryResult<Vec<MemorySummary>> {
        let filter = folder.map(ItemFilter::folder).unwrap_or_default();

        let known: HashSet<Permalink> = self
            .metadata
            .list(&filter)
            .await?
            .into_iter()
            .filter_map(|item| item.permalink)
            .collect();
        for record in self.index.records(folder).await? {
            let linked = record.permalink().is_ok_and(|p| known.contains(&p));
            if linked {
                continue;
            }
            if let Err(e) = self.reconciler.adopt(&record).await {
                warn!(folder = %record.folder, doc_id = %record.doc_id, error = %e, "Could not reconcile vector record");
            }
        }

        Ok(self
            .metadata
            .list(&filter)
            .await?
            .into_iter()
            .map(MemorySummary::from)
            .collect())
    }

    /// Distinct folders holding active memories.
    pub async fn folders(&self) -> MemoryResult<Vec<String>> {
        self.metadata.list_folders(false).await
    }

    /// Index statistics for one folder or everything.
    pub async fn stats(&self, folder: Option<&str>) -> MemoryResult<IndexStats> {
        self.index.stats(folder).await
    }

    /// Run a full reconciliation sweep.
    pub async fn reconcile(&self, folder: Option<&str>) -> MemoryResult<SweepReport> {
        self.reconciler.sweep(folder).await
    }
}
