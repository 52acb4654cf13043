#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Integration tests for the recall-memory crate.
//!
//! Covers the facade end to end: round trips, permalink stability, soft
//! delete, hybrid ranking, batch chunking, reconciliation of drift between
//! the two stores, partial-failure reporting and on-disk persistence.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use recall_core::{ErrorKind, FailureStage, MemoryError, MemoryResult, Permalink, RecallConfig};
use recall_memory::{
    DeleteStatus, HeuristicExtractor, InMemoryMetadataStore, InMemoryVectorBackend, ItemFilter,
    ItemSource, LifecycleState, LocalEmbedding, MemoryFacade, MemoryItem, MemoryPatch,
    MemoryUpdate, MetadataStore, NewMemory, NewMemoryItem, ScoredRecord, SearchRequest,
    SearchWeights, SyncStatus, VectorBackend, VectorIndex, VectorMetadata, VectorRecord,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Metadata store that can be told to fail updates or soft-deletes.
#[derive(Default)]
struct FlakyMetadata {
    inner: InMemoryMetadataStore,
    fail_update: AtomicBool,
    fail_soft_delete: AtomicBool,
}

fn injected(op: &str) -> MemoryError {
    MemoryError::store(op, "injected failure")
}

#[async_trait]
impl MetadataStore for FlakyMetadata {
    async fn create(&self, data: NewMemoryItem) -> MemoryResult<MemoryItem> {
        self.inner.create(data).await
    }
    async fn find_by_id(&self, id: Uuid, include_deleted: bool) -> MemoryResult<Option<MemoryItem>> {
        self.inner.find_by_id(id, include_deleted).await
    }
    async fn find_by_permalink(
        &self,
        permalink: &Permalink,
        include_deleted: bool,
    ) -> MemoryResult<Option<MemoryItem>> {
        self.inner.find_by_permalink(permalink, include_deleted).await
    }
    async fn update(&self, id: Uuid, patch: MemoryPatch) -> MemoryResult<MemoryItem> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(injected("metadata.update"));
        }
        self.inner.update(id, patch).await
    }
    async fn soft_delete(&self, id: Uuid) -> MemoryResult<bool> {
        if self.fail_soft_delete.load(Ordering::SeqCst) {
            return Err(injected("metadata.soft_delete"));
        }
        self.inner.soft_delete(id).await
    }
    async fn restore(&self, id: Uuid) -> MemoryResult<bool> {
        self.inner.restore(id).await
    }
    async fn hard_delete(&self, id: Uuid) -> MemoryResult<bool> {
        self.inner.hard_delete(id).await
    }
    async fn search_text(&self, query: &str, filter: &ItemFilter) -> MemoryResult<Vec<MemoryItem>> {
        self.inner.search_text(query, filter).await
    }
    async fn list_folders(&self, include_deleted: bool) -> MemoryResult<Vec<String>> {
        self.inner.list_folders(include_deleted).await
    }
}

/// Vector backend that records upsert sizes and can be told to fail writes.
#[derive(Default)]
struct FlakyVectors {
    inner: InMemoryVectorBackend,
    upserts: Mutex<Vec<usize>>,
    fail_upsert: AtomicBool,
    fail_delete: AtomicBool,
}

#[async_trait]
impl VectorBackend for FlakyVectors {
    async fn create_collection(&self, name: &str) -> MemoryResult<()> {
        self.inner.create_collection(name).await
    }
    async fn list_collections(&self) -> MemoryResult<Vec<String>> {
        self.inner.list_collections().await
    }
    async fn upsert(&self, collection: &str, records: Vec<VectorRecord>) -> MemoryResult<()> {
        if self.fail_upsert.load(Ordering::SeqCst) {
            return Err(injected("vector.upsert"));
        }
        self.upserts.lock().push(records.len());
        self.inner.upsert(collection, records).await
    }
    async fn get(&self, collection: &str, doc_id: &str) -> MemoryResult<Option<VectorRecord>> {
        self.inner.get(collection, doc_id).await
    }
    async fn delete(&self, collection: &str, doc_id: &str) -> MemoryResult<bool> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(injected("vector.delete"));
        }
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
        self.inner.drop_collection(name).await
    }
}

struct Harness {
    facade: MemoryFacade,
    metadata: Arc<FlakyMetadata>,
    vectors: Arc<FlakyVectors>,
    index: Arc<VectorIndex>,
}

fn harness() -> Harness {
    let metadata = Arc::new(FlakyMetadata::default());
    let vectors = Arc::new(FlakyVectors::default());
    let index = Arc::new(VectorIndex::new(
        vectors.clone(),
        Arc::new(LocalEmbedding::default()),
    ));
    let facade = MemoryFacade::new(
        metadata.clone(),
        index.clone(),
        Arc::new(HeuristicExtractor::new()),
    );
    Harness {
        facade,
        metadata,
        vectors,
        index,
    }
}

fn facade() -> MemoryFacade {
    harness().facade
}

// ---------------------------------------------------------------------------
// 1. Round trip and permalink stability
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_then_read_returns_raw_content() {
    let f = facade();
    let content = "Grace Hopper wrote the first compiler. It changed everything.";
    let out = f
        .create(NewMemory::new(content, "Compilers", "history/computing"))
        .await
        .unwrap();

    assert!(out
        .permalink
        .to_string()
        .starts_with("memory://history/computing/"));
    let read = f.read(&out.permalink.to_string()).await.unwrap();
    assert_eq!(read.content, content);
    assert_eq!(read.metadata.title, "Compilers");
    assert_eq!(read.metadata.source, ItemSource::Native);
    assert_eq!(read.metadata.lifecycle(), LifecycleState::Linked);
}

#[tokio::test]
async fn update_never_changes_permalink() {
    let f = facade();
    let out = f.create(NewMemory::new("version one", "Doc", "docs")).await.unwrap();
    let p = out.permalink.to_string();

    for (i, text) in ["version two", "version three", "Version Four With Entities"]
        .into_iter()
        .enumerate()
    {
        let upd = f
            .update(
                &p,
                MemoryUpdate {
                    content: Some(text.to_string()),
                    tags: Some(vec![format!("rev{i}")]),
                },
            )
            .await
            .unwrap();
        assert_eq!(upd.permalink, out.permalink);
        assert_eq!(f.read(&p).await.unwrap().content, text);
    }

    let listed = f.list(Some("docs")).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].permalink.as_ref(), Some(&out.permalink));
    assert_eq!(listed[0].tags, vec!["rev2"]);
    assert_eq!(listed[0].counts.entities, 4);
}

#[tokio::test]
async fn tags_only_update_keeps_content() {
    let f = facade();
    let out = f.create(NewMemory::new("keep me", "K", "k")).await.unwrap();
    let p = out.permalink.to_string();
    f.update(
        &p,
        MemoryUpdate {
            content: None,
            tags: Some(vec!["x".into(), " x ".into(), "y".into()]),
        },
    )
    .await
    .unwrap();
    let read = f.read(&p).await.unwrap();
    assert_eq!(read.content, "keep me");
    assert_eq!(read.metadata.tags, vec!["x", "y"]);
}

#[tokio::test]
async fn malformed_permalinks_are_rejected() {
    let f = facade();
    for bad in ["", "nature/1", "memory://", "memory:///1", "memory://nature/"] {
        let err = f.read(bad).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidIdentifier, "{bad}");
    }
    let err = f.delete("http://x/1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidIdentifier);
}

// ---------------------------------------------------------------------------
// 2. Soft delete
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delete_hides_from_read_and_list() {
    let f = facade();
    let fox = f
        .create(NewMemory::new("The quick brown fox jumps", "Fox", "nature"))
        .await
        .unwrap();
    let owl = f
        .create(NewMemory::new("An owl hoots at night", "Owl", "nature"))
        .await
        .unwrap();
    let p = fox.permalink.to_string();

    let out = f.delete(&p).await.unwrap();
    assert_eq!(out.status, DeleteStatus::Deleted);
    assert!(out.warning.is_none());

    assert!(f.read(&p).await.unwrap_err().is_not_found());
    let listed = f.list(Some("nature")).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, owl.metadata_id);

    // Deleting again succeeds.
    assert_eq!(
        f.delete(&p).await.unwrap().status,
        DeleteStatus::AlreadyDeleted
    );
    assert_eq!(
        f.delete("memory://nature/never-existed").await.unwrap().status,
        DeleteStatus::AlreadyDeleted
    );

    // The row is kept, only flagged.
    let row = f
        .metadata()
        .find_by_id(fox.metadata_id, true)
        .await
        .unwrap()
        .unwrap();
    assert!(row.is_deleted);
    assert_eq!(row.lifecycle(), LifecycleState::Deleted);
}

#[tokio::test]
async fn restore_brings_item_back() {
    let f = facade();
    let out = f
        .create(NewMemory::new("restorable thoughts", "R", "r"))
        .await
        .unwrap();
    let p = out.permalink.to_string();
    f.delete(&p).await.unwrap();

    let restored = f.restore(&p).await.unwrap();
    assert!(restored.warning.is_none());
    assert_eq!(restored.permalink, out.permalink);
    assert_eq!(f.read(&p).await.unwrap().content, "restorable thoughts");
    assert_eq!(f.list(Some("r")).await.unwrap().len(), 1);

    // Restoring an active item is a no-op.
    assert!(f.restore(&p).await.unwrap().warning.is_none());
}

// ---------------------------------------------------------------------------
// 3. Hybrid search
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fox_is_top_result_with_keyword_score() {
    let f = facade();
    let fox = f
        .create(NewMemory::new("The quick brown fox jumps", "Fox", "nature"))
        .await
        .unwrap();
    f.create(NewMemory::new("Bears sleep through the winter", "Bear", "nature"))
        .await
        .unwrap();
    f.create(NewMemory::new("Borrow checker rules in Rust", "Rust", "dev"))
        .await
        .unwrap();

    let results = f
        .search(SearchRequest::new("fox").with_limit(5))
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].permalink, fox.permalink);
    assert!(results[0].keyword_score > 0.0);
    assert!(results.len() <= 5);
}

#[tokio::test]
async fn combined_score_matches_weighted_sum() {
    let f = facade();
    for (text, title) in [
        ("memory sync between stores", "Sync"),
        ("hybrid retrieval with memory", "Hybrid"),
        ("memory memory memory", "Triple"),
        ("nothing relevant at all", "Other"),
    ] {
        f.create(NewMemory::new(text, title, "m")).await.unwrap();
    }

    let results = f
        .search(SearchRequest::new("memory").with_weights(SearchWeights::new(0.7, 0.3)))
        .await
        .unwrap();
    for r in &results {
        let expected = 0.7 * r.semantic_score + 0.3 * r.keyword_score;
        assert!((r.combined_score - expected).abs() < 1e-5);
    }
    for pair in results.windows(2) {
        assert!(pair[0].combined_score >= pair[1].combined_score);
    }
}

#[tokio::test]
async fn unnormalized_weights_equal_normalized() {
    let f = facade();
    for (text, title) in [
        ("alpha beta gamma", "A"),
        ("beta gamma delta", "B"),
        ("gamma delta epsilon", "C"),
    ] {
        f.create(NewMemory::new(text, title, "greek")).await.unwrap();
    }

    let big = f
        .search(SearchRequest::new("gamma beta").with_weights(SearchWeights::new(0.9, 0.9)))
        .await
        .unwrap();
    let half = f
        .search(SearchRequest::new("gamma beta").with_weights(SearchWeights::new(0.5, 0.5)))
        .await
        .unwrap();
    assert_eq!(big, half);
}

#[tokio::test]
async fn search_is_deterministic_and_scoped() {
    let f = facade();
    f.create(NewMemory::new("shared topic one", "One", "a")).await.unwrap();
    f.create(NewMemory::new("shared topic two", "Two", "b")).await.unwrap();

    let first = f.search(SearchRequest::new("shared topic")).await.unwrap();
    let second = f.search(SearchRequest::new("shared topic")).await.unwrap();
    assert_eq!(first, second);

    let scoped = f
        .search(SearchRequest::new("shared topic").in_folder("b"))
        .await
        .unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].title, "Two");
}

#[tokio::test]
async fn invalid_weights_are_validation_errors() {
    let f = facade();
    let err = f
        .search(SearchRequest::new("x").with_weights(SearchWeights::new(-1.0, 0.5)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

// ---------------------------------------------------------------------------
// 4. Batch store
// ---------------------------------------------------------------------------

#[tokio::test]
async fn batch_store_250_in_three_chunks() {
    let h = harness();
    let texts: Vec<String> = (0..250).map(|i| format!("bulk entry {i}")).collect();
    let metadata: Vec<VectorMetadata> = (0..250)
        .map(|i| VectorMetadata::titled(format!("entry {i}")))
        .collect();

    let permalinks = h
        .index
        .batch_store(&texts, metadata, "bulk", Some(100))
        .await
        .unwrap();

    assert_eq!(permalinks.len(), 250);
    let distinct: HashSet<&Permalink> = permalinks.iter().collect();
    assert_eq!(distinct.len(), 250);
    assert!(permalinks.iter().all(|p| p.folder() == "bulk"));
    assert_eq!(*h.vectors.upserts.lock(), vec![100, 100, 50]);

    let stats = h.facade.stats(Some("bulk")).await.unwrap();
    assert_eq!(stats.count, 250);
}

#[tokio::test]
async fn batch_store_rejects_mismatched_lengths() {
    let h = harness();
    let err = h
        .index
        .batch_store(
            &["a b".to_string(), "c d".to_string()],
            vec![VectorMetadata::titled("only one")],
            "bulk",
            None,
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(h.vectors.upserts.lock().is_empty());
}

// ---------------------------------------------------------------------------
// 5. Reconciliation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn read_derives_item_for_orphan_record() {
    let h = harness();
    h.index
        .store(
            &["written by another process".to_string()],
            vec![VectorMetadata::titled("Foreign").with_doc_id("1")],
            "x",
        )
        .await
        .unwrap();

    let read = h.facade.read("memory://x/1").await.unwrap();
    assert_eq!(read.content, "written by another process");
    assert_eq!(read.metadata.source, ItemSource::Derived);

    let listed = h.facade.list(Some("x")).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].source, ItemSource::Derived);
    assert_eq!(listed[0].sync_status, SyncStatus::Synced);
    assert_eq!(listed[0].title, "Foreign");
}

#[tokio::test]
async fn list_and_search_adopt_orphans() {
    let h = harness();
    h.index
        .store(
            &["orphaned penguin facts".to_string()],
            vec![VectorMetadata::titled("Penguin").with_doc_id("p1")],
            "birds",
        )
        .await
        .unwrap();
    h.index
        .store(
            &["orphaned puffin facts".to_string()],
            vec![VectorMetadata::titled("Puffin").with_doc_id("p2")],
            "birds",
        )
        .await
        .unwrap();

    let results = h
        .facade
        .search(SearchRequest::new("penguin").with_limit(1))
        .await
        .unwrap();
    assert_eq!(results[0].title, "Penguin");
    assert_eq!(
        h.metadata.count(&ItemFilter::folder("birds")).await.unwrap(),
        1
    );

    let listed = h.facade.list(Some("birds")).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|s| s.source == ItemSource::Derived));
}

#[tokio::test]
async fn sweep_reports_orphaned_rows() {
    let h = harness();
    let out = h
        .facade
        .create(NewMemory::new("row with a vector", "Kept", "s"))
        .await
        .unwrap();
    let lost = h
        .metadata
        .create(NewMemoryItem {
            permalink: Some("memory://s/lost".parse().unwrap()),
            sync_status: SyncStatus::Synced,
            ..NewMemoryItem::new("Lost", "vector went missing", "s")
        })
        .await
        .unwrap();

    let report = h.facade.reconcile(Some("s")).await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.orphaned, vec![lost.id]);

    // No vector is fabricated for the orphan.
    assert!(h.facade.read("memory://s/lost").await.unwrap_err().is_not_found());
    assert_eq!(h.facade.stats(Some("s")).await.unwrap().count, 1);
    assert!(h.facade.read(&out.permalink.to_string()).await.is_ok());
}

// ---------------------------------------------------------------------------
// 6. Failure handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn vector_failure_on_create_leaves_item_unsynced() {
    let h = harness();
    h.vectors.fail_upsert.store(true, Ordering::SeqCst);

    let err = h
        .facade
        .create(NewMemory::new("never indexed", "Nope", "f"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreFailure);

    let rows = h.metadata.list(&ItemFilter::folder("f")).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].lifecycle(), LifecycleState::Created);
    assert_eq!(rows[0].sync_status, SyncStatus::Pending);
    assert!(rows[0].permalink.is_none());
}

#[tokio::test]
async fn metadata_failure_on_create_is_partial_and_sweep_links() {
    let h = harness();
    h.metadata.fail_update.store(true, Ordering::SeqCst);

    let out = h
        .facade
        .create(NewMemory::new("half written memory", "Half", "f"))
        .await
        .unwrap();
    let warning = out.warning.clone().unwrap();
    assert_eq!(warning.stage, FailureStage::Metadata);

    // Content is already searchable.
    let results = h
        .facade
        .search(SearchRequest::new("half written"))
        .await
        .unwrap();
    assert_eq!(results[0].permalink, out.permalink);

    h.metadata.fail_update.store(false, Ordering::SeqCst);
    let report = h.facade.reconcile(Some("f")).await.unwrap();
    assert_eq!(report.linked, 1);
    assert_eq!(report.derived, 0);

    let row = h
        .metadata
        .find_by_id(out.metadata_id, false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.lifecycle(), LifecycleState::Linked);
    assert_eq!(row.permalink, Some(out.permalink));
    assert_eq!(h.metadata.count(&ItemFilter::default()).await.unwrap(), 1);
}

#[tokio::test]
async fn delete_after_unlinked_create_soft_deletes_the_row() {
    let h = harness();
    h.metadata.fail_update.store(true, Ordering::SeqCst);
    let out = h
        .facade
        .create(NewMemory::new("half written memory", "Half", "f"))
        .await
        .unwrap();
    assert!(out.warning.is_some());
    h.metadata.fail_update.store(false, Ordering::SeqCst);

    let deleted = h.facade.delete(&out.permalink.to_string()).await.unwrap();
    assert_eq!(deleted.status, DeleteStatus::Deleted);
    assert!(deleted.warning.is_none());

    let row = h
        .metadata
        .find_by_id(out.metadata_id, true)
        .await
        .unwrap()
        .unwrap();
    assert!(row.is_deleted);
    assert!(h.facade.list(Some("f")).await.unwrap().is_empty());
    assert!(h.facade.reconcile(Some("f")).await.unwrap().orphaned.is_empty());

    // The row is still reachable for an explicit restore.
    h.facade.restore(&out.permalink.to_string()).await.unwrap();
    let row = h
        .metadata
        .find_by_id(out.metadata_id, false)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.permalink, Some(out.permalink.clone()));
    assert_eq!(
        h.facade.read(&out.permalink.to_string()).await.unwrap().content,
        "half written memory"
    );
}

#[tokio::test]
async fn tags_only_update_does_not_reindex_deleted_content() {
    let h = harness();
    let out = h
        .facade
        .create(NewMemory::new("secret to forget", "Secret", "f"))
        .await
        .unwrap();
    let p = out.permalink.to_string();
    h.metadata.fail_soft_delete.store(true, Ordering::SeqCst);
    let deleted = h.facade.delete(&p).await.unwrap();
    assert_eq!(deleted.warning.unwrap().stage, FailureStage::Metadata);
    h.metadata.fail_soft_delete.store(false, Ordering::SeqCst);

    let err = h
        .facade
        .update(
            &p,
            MemoryUpdate {
                content: None,
                tags: Some(vec!["x".into()]),
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert!(err.to_string().contains("content unavailable"));
    assert!(h.facade.read(&p).await.unwrap_err().is_not_found());
    assert_eq!(h.facade.stats(Some("f")).await.unwrap().count, 0);

    // Supplying content is an explicit rewrite and indexes it again.
    h.facade
        .update(
            &p,
            MemoryUpdate {
                content: Some("a fresh start".into()),
                tags: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(h.facade.read(&p).await.unwrap().content, "a fresh start");
}

#[tokio::test]
async fn vector_failure_on_delete_aborts() {
    let h = harness();
    let out = h
        .facade
        .create(NewMemory::new("sticky memory", "Sticky", "f"))
        .await
        .unwrap();
    h.vectors.fail_delete.store(true, Ordering::SeqCst);

    let err = h.facade.delete(&out.permalink.to_string()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreFailure);

    let row = h
        .metadata
        .find_by_id(out.metadata_id, false)
        .await
        .unwrap()
        .unwrap();
    assert!(!row.is_deleted);
    assert!(h.facade.read(&out.permalink.to_string()).await.is_ok());
}

#[tokio::test]
async fn metadata_failure_on_delete_is_partial() {
    let h = harness();
    let out = h
        .facade
        .create(NewMemory::new("going away", "Gone", "f"))
        .await
        .unwrap();
    h.metadata.fail_soft_delete.store(true, Ordering::SeqCst);

    let deleted = h.facade.delete(&out.permalink.to_string()).await.unwrap();
    assert_eq!(deleted.status, DeleteStatus::Deleted);
    let warning = deleted.warning.unwrap();
    assert_eq!(warning.stage, FailureStage::Metadata);
    assert!(warning.to_string().contains("injected failure"));

    // The user-visible effect holds: the content is unreachable.
    assert!(h
        .facade
        .read(&out.permalink.to_string())
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn metadata_failure_on_update_is_partial() {
    let h = harness();
    let out = h
        .facade
        .create(NewMemory::new("first draft", "Draft", "f"))
        .await
        .unwrap();
    let p = out.permalink.to_string();
    h.metadata.fail_update.store(true, Ordering::SeqCst);

    let upd = h
        .facade
        .update(
            &p,
            MemoryUpdate {
                content: Some("second draft".into()),
                tags: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(upd.warning.unwrap().stage, FailureStage::Metadata);
    assert_eq!(h.facade.read(&p).await.unwrap().content, "second draft");
}

// ---------------------------------------------------------------------------
// 7. Persistence through configuration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn file_and_sqlite_backends_survive_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let toml = format!(
        "data_dir = {:?}\n[index]\nembedding_dimension = 64\n",
        tmp.path().display().to_string()
    );
    let config = RecallConfig::from_toml_str(&toml).unwrap();

    let permalink = {
        let f = MemoryFacade::from_config(&config).await.unwrap();
        let out = f
            .create(NewMemory::new("Persisted across restarts", "Disk", "persist/sub"))
            .await
            .unwrap();
        assert!(out.warning.is_none());
        out.permalink
    };

    assert!(config.metadata_path().exists());
    assert!(config.vectors_dir().exists());

    let f = MemoryFacade::from_config(&config).await.unwrap();
    let read = f.read(&permalink.to_string()).await.unwrap();
    assert_eq!(read.content, "Persisted across restarts");
    assert_eq!(read.metadata.source, ItemSource::Native);

    let results = f.search(SearchRequest::new("restarts")).await.unwrap();
    assert_eq!(results[0].permalink, permalink);
    assert_eq!(f.folders().await.unwrap(), vec!["persist/sub"]);
}
