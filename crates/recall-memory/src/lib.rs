//! Memory synchronization and hybrid retrieval for Recall.
//!
//! Keeps a durable metadata store and a folder-partitioned vector index in
//! step, joined by permalinks. Writes go to both stores without a shared
//! transaction; half-applied writes are reported as warnings and repaired by
//! reconciliation. Retrieval blends embedding similarity with literal keyword
//! occurrences.
//!
//! # Main types
//!
//! - [`MemoryFacade`]: create, read, update, delete, restore, search and list.
//! - [`MetadataStore`]: soft-deleting record keeper, with
//!   [`InMemoryMetadataStore`] and [`SqliteMetadataStore`].
//! - [`VectorIndex`]: folder-scoped index over a [`VectorBackend`]
//!   ([`InMemoryVectorBackend`], [`FileVectorBackend`]).
//! - [`HybridSearcher`]: weighted semantic + keyword ranking.
//! - [`Reconciler`]: derives, revives and links rows from vector records.
//! - [`EmbeddingProvider`] / [`ContentExtractor`]: injected collaborators,
//!   with [`LocalEmbedding`] and [`HeuristicExtractor`] as local defaults.

/// Embedding provider trait and local implementation.
pub mod embedding;
/// Content extraction and the enrichment wrapper.
pub mod extraction;
/// The memory facade.
pub mod facade;
/// Weighted hybrid search.
pub mod hybrid;
/// Folder-scoped vector index.
pub mod index;
/// Keyword occurrence scoring.
pub mod keyword;
/// Metadata store trait, row types and in-memory implementation.
pub mod metadata;
/// Reconciliation between the two stores.
pub mod reconcile;
/// SQLite-backed metadata store.
pub mod sqlite;
/// Vector records and backends.
pub mod vector;

pub use embedding::{EmbeddingProvider, LocalEmbedding};
pub use extraction::{
    enrich, strip_enrichment, ContentExtractor, Extraction, HeuristicExtractor, Relation,
    CONTENT_DELIMITER,
};
pub use facade::{
    CreateOutcome, DeleteOutcome, DeleteStatus, MemoryFacade, MemorySummary, MemoryUpdate,
    NewMemory, ReadOutcome, UpdateOutcome,
};
pub use hybrid::{HybridSearcher, RankedRecord, SearchRequest, SearchResult, SearchWeights};
pub use index::{IndexStats, RecordSummary, VectorIndex, DEFAULT_BATCH_SIZE};
pub use keyword::KeywordScanner;
pub use metadata::{
    InMemoryMetadataStore, ItemCounts, ItemFilter, ItemSource, LifecycleState, MemoryItem,
    MemoryPatch, MetadataStore, NewMemoryItem, SyncStatus,
};
pub use reconcile::{Adoption, Reconciler, SweepReport};
pub use sqlite::SqliteMetadataStore;
pub use vector::{
    cosine_distance, cosine_similarity, FileVectorBackend, InMemoryVectorBackend, ScoredRecord,
    VectorBackend, VectorMetadata, VectorRecord,
};
