use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recall_core::{resolve_folder, MemoryError, MemoryResult, Permalink};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Maximum length, in characters, of a generated summary.
pub const SUMMARY_CHARS: usize = 150;

/// Whether the vector side has confirmed this row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncStatus {
    /// Not yet confirmed by a vector record.
    #[default]
    Pending,
    /// Linked to an existing vector record.
    Synced,
}

impl SyncStatus {
    /// Stable storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Synced => "SYNCED",
        }
    }
}

impl FromStr for SyncStatus {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "SYNCED" => Ok(Self::Synced),
            other => Err(MemoryError::Validation(format!("unknown sync status '{other}'"))),
        }
    }
}

/// Who produced the row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemSource {
    /// Written through the facade.
    #[default]
    Native,
    /// Synthesized by reconciliation from an orphan vector record.
    Derived,
}

impl ItemSource {
    /// Stable storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Derived => "derived",
        }
    }
}

impl FromStr for ItemSource {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" => Ok(Self::Native),
            "derived" => Ok(Self::Derived),
            other => Err(MemoryError::Validation(format!("unknown item source '{other}'"))),
        }
    }
}

impl fmt::Display for ItemSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extraction-derived counters mirrored between both stores.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemCounts {
    /// Entity count.
    pub entities: u32,
    /// Relation count.
    pub relations: u32,
    /// Observation count.
    pub observations: u32,
}

impl ItemCounts {
    /// Build from an `(entities, relations, observations)` triple.
    pub fn from_triple((entities, relations, observations): (u32, u32, u32)) -> Self {
        Self {
            entities,
            relations,
            observations,
        }
    }
}

/// Per-item lifecycle.
///
/// ```text
/// Created ──> VectorStored ──> Linked ──> Deleted
///    │             │             ^  │        │
///    └─────────────┴──> Deleted  │  └─(update)
///                                └─── restore/revive
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Row exists, vector side not written yet.
    Created,
    /// Vector record exists, row not yet linked to it.
    VectorStored,
    /// Both stores agree.
    Linked,
    /// Soft-deleted.
    Deleted,
}

impl LifecycleState {
    /// Whether moving from `self` to `next` is a legal step.
    pub fn can_transition_to(self, next: Self) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Created, VectorStored)
                | (Created, Deleted)
                | (VectorStored, Linked)
                | (VectorStored, Deleted)
                | (Linked, Linked)
                | (Linked, Deleted)
                | (Deleted, Deleted)
                | (Deleted, Linked)
        )
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn advance(self, next: Self) -> MemoryResult<Self> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(MemoryError::Validation(format!(
                "illegal lifecycle transition {self:?} -> {next:?}"
            )))
        }
    }
}

/// A metadata store row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Stable internal id.
    pub id: Uuid,
    /// Human title.
    pub title: String,
    /// Normalized folder.
    pub folder: String,
    /// Normalized, de-duplicated tags.
    pub tags: Vec<String>,
    /// Short summary for listings.
    pub summary: String,
    /// Raw content as last written through the facade.
    pub content: String,
    /// Join key to the vector record, once linked.
    pub permalink: Option<Permalink>,
    /// Whether the vector side has confirmed this row.
    pub sync_status: SyncStatus,
    /// Native or derived.
    pub source: ItemSource,
    /// Soft-delete flag.
    pub is_deleted: bool,
    /// Entities found by extraction.
    pub entity_count: u32,
    /// Relations found by extraction.
    pub relation_count: u32,
    /// Observations found by extraction.
    pub observation_count: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

impl MemoryItem {
    /// Current lifecycle state derived from the row's flags.
    pub fn lifecycle(&self) -> LifecycleState {
        if self.is_deleted {
            LifecycleState::Deleted
        } else {
            match (&self.permalink, self.sync_status) {
                (None, _) => LifecycleState::Created,
                (Some(_), SyncStatus::Pending) => LifecycleState::VectorStored,
                (Some(_), SyncStatus::Synced) => LifecycleState::Linked,
            }
        }
    }

    /// Extraction counters as one value.
    pub fn counts(&self) -> ItemCounts {
        ItemCounts {
            entities: self.entity_count,
            relations: self.relation_count,
            observations: self.observation_count,
        }
    }

    /// Apply the fields of `patch` that differ. Returns `true` (and bumps
    /// `updated_at`) only when something actually changed.
    pub fn apply(&mut self, patch: &MemoryPatch) -> bool {
        let mut changed = false;

        if let Some(title) = &patch.title {
            changed |= replace_if_different(&mut self.title, title.clone());
        }
        if let Some(folder) = &patch.folder {
            changed |= replace_if_different(&mut self.folder, resolve_folder(folder));
        }
        if let Some(tags) = &patch.tags {
            changed |= replace_if_different(&mut self.tags, normalize_tags(tags));
        }
        if let Some(summary) = &patch.summary {
            changed |= replace_if_different(&mut self.summary, summary.clone());
        }
        if let Some(content) = &patch.content {
            changed |= replace_if_different(&mut self.content, content.clone());
        }
        if let Some(permalink) = &patch.permalink {
            changed |= replace_if_different(&mut self.permalink, Some(permalink.clone()));
        }
        if let Some(status) = patch.sync_status {
            changed |= replace_if_different(&mut self.sync_status, status);
        }
        if let Some(source) = patch.source {
            changed |= replace_if_different(&mut self.source, source);
        }
        if let Some(counts) = patch.counts {
            changed |= replace_if_different(&mut self.entity_count, counts.entities);
            changed |= replace_if_different(&mut self.relation_count, counts.relations);
            changed |= replace_if_different(&mut self.observation_count, counts.observations);
        }

        if changed {
            self.touch();
        }
        changed
    }

    /// Flip the soft-delete flag. Returns `true` if the flag changed.
    pub fn set_deleted(&mut self, deleted: bool) -> bool {
        if self.is_deleted == deleted {
            return false;
        }
        self.is_deleted = deleted;
        self.touch();
        true
    }

    fn touch(&mut self) {
        let now = Utc::now();
        // Keep updated_at monotonic even if the clock has not advanced.
        self.updated_at = if now > self.updated_at {
            now
        } else {
            self.updated_at + chrono::Duration::microseconds(1)
        };
    }
}

fn replace_if_different<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

/// Input for [`MetadataStore::create`].
#[derive(Debug, Clone, Default)]
pub struct NewMemoryItem {
    /// Human title; required.
    pub title: String,
    /// Raw content; required.
    pub content: String,
    /// Folder, normalized on insert.
    pub folder: String,
    /// Tags, normalized on insert.
    pub tags: Vec<String>,
    /// Defaults to the first [`SUMMARY_CHARS`] characters of content (or title).
    pub summary: Option<String>,
    /// Set when the record already exists.
    pub permalink: Option<Permalink>,
    /// Initial sync status.
    pub sync_status: SyncStatus,
    /// Native or derived.
    pub source: ItemSource,
    /// Initial extraction counters.
    pub counts: ItemCounts,
}

impl NewMemoryItem {
    /// A native, pending item.
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        folder: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            folder: folder.into(),
            ..Self::default()
        }
    }

    /// Set tags. Chainable builder method.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Validate and materialize into a row with a fresh id.
    pub fn into_item(self) -> MemoryResult<MemoryItem> {
        if self.title.trim().is_empty() {
            return Err(MemoryError::Validation("title must not be empty".to_string()));
        }
        if self.content.trim().is_empty() {
            return Err(MemoryError::Validation("content must not be empty".to_string()));
        }

        let summary = self
            .summary
            .unwrap_or_else(|| summarize(&self.content, &self.title));
        let now = Utc::now();
        Ok(MemoryItem {
            id: Uuid::new_v4(),
            title: self.title,
            folder: resolve_folder(&self.folder),
            tags: normalize_tags(&self.tags),
            summary,
            content: self.content,
            permalink: self.permalink,
            sync_status: self.sync_status,
            source: self.source,
            is_deleted: false,
            entity_count: self.counts.entities,
            relation_count: self.counts.relations,
            observation_count: self.counts.observations,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Sparse update for [`MetadataStore::update`]. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct MemoryPatch {
    /// New title.
    pub title: Option<String>,
    /// New folder.
    pub folder: Option<String>,
    /// Replacement tag set.
    pub tags: Option<Vec<String>>,
    /// New summary.
    pub summary: Option<String>,
    /// New content.
    pub content: Option<String>,
    /// Link to a vector record.
    pub permalink: Option<Permalink>,
    /// New sync status.
    pub sync_status: Option<SyncStatus>,
    /// New source.
    pub source: Option<ItemSource>,
    /// New extraction counters.
    pub counts: Option<ItemCounts>,
}

impl MemoryPatch {
    /// `true` if the patch sets nothing.
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.folder.is_none()
            && self.tags.is_none()
            && self.summary.is_none()
            && self.content.is_none()
            && self.permalink.is_none()
            && self.sync_status.is_none()
            && self.source.is_none()
            && self.counts.is_none()
    }
}

/// Row filter shared by listing, counting and text search.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    /// Exact folder match after normalization.
    pub folder: Option<String>,
    /// Every listed tag must be present.
    pub tags: Vec<String>,
    /// Also match soft-deleted rows.
    pub include_deleted: bool,
}

impl ItemFilter {
    /// Active items in `folder`.
    pub fn folder(folder: &str) -> Self {
        Self {
            folder: Some(resolve_folder(folder)),
            ..Self::default()
        }
    }

    /// Whether `item` passes the folder, tag and deletion filters.
    pub fn matches(&self, item: &MemoryItem) -> bool {
        if item.is_deleted && !self.include_deleted {
            return false;
        }
        if let Some(folder) = &self.folder {
            if item.folder != resolve_folder(folder) {
                return false;
            }
        }
        self.tags.iter().all(|tag| item.tags.iter().any(|t| t == tag.trim()))
    }
}

/// Case-insensitive substring match over title, summary and tags.
pub fn matches_text(item: &MemoryItem, query: &str) -> bool {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return true;
    }
    item.title.to_lowercase().contains(&needle)
        || item.summary.to_lowercase().contains(&needle)
        || item.tags.iter().any(|t| t.to_lowercase().contains(&needle))
}

/// Trim, drop empties and de-duplicate tags while keeping first-seen order.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

/// Summary used when none is supplied: content if present, else title,
/// truncated to [`SUMMARY_CHARS`] characters.
pub fn summarize(content: &str, title: &str) -> String {
    let source = if content.trim().is_empty() { title } else { content };
    source.trim().chars().take(SUMMARY_CHARS).collect()
}

/// Most recently updated first; ties by newest creation, then id.
pub(crate) fn sort_by_recency(items: &mut [MemoryItem]) {
    items.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Durable structured record keeper with soft-delete.
///
/// Writes against an unknown id fail with [`MemoryError::NotFound`]; they
/// never create a row. Backend errors surface as [`MemoryError::Store`].
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert a new row.
    async fn create(&self, data: NewMemoryItem) -> MemoryResult<MemoryItem>;

    /// Look up by internal id.
    async fn find_by_id(&self, id: Uuid, include_deleted: bool)
        -> MemoryResult<Option<MemoryItem>>;

    /// Look up by permalink. The most recently updated match wins.
    async fn find_by_permalink(
        &self,
        permalink: &Permalink,
        include_deleted: bool,
    ) -> MemoryResult<Option<MemoryItem>>;

    /// Apply `patch`. Succeeds without touching `updated_at` if nothing differs.
    async fn update(&self, id: Uuid, patch: MemoryPatch) -> MemoryResult<MemoryItem>;

    /// Mark deleted. Idempotent.
    async fn soft_delete(&self, id: Uuid) -> MemoryResult<bool>;

    /// Clear the deleted mark. Idempotent.
    async fn restore(&self, id: Uuid) -> MemoryResult<bool>;

    /// Physically remove a row. Not used by the default flows.
    async fn hard_delete(&self, id: Uuid) -> MemoryResult<bool>;

    /// Substring search over title, summary and tags, newest first.
    async fn search_text(&self, query: &str, filter: &ItemFilter)
        -> MemoryResult<Vec<MemoryItem>>;

    /// Every row passing `filter`, newest first.
    async fn list(&self, filter: &ItemFilter) -> MemoryResult<Vec<MemoryItem>> {
        self.search_text("", filter).await
    }

    /// Number of rows passing `filter`.
    async fn count(&self, filter: &ItemFilter) -> MemoryResult<usize> {
        Ok(self.list(filter).await?.len())
    }

    /// Distinct folders, sorted.
    async fn list_folders(&self, include_deleted: bool) -> MemoryResult<Vec<String>>;
}

/// Metadata store held entirely in memory.
pub struct InMemoryMetadataStore {
    items: RwLock<HashMap<Uuid, MemoryItem>>,
}

impl InMemoryMetadataStore {
    /// Empty store.
    pub fn new() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(id: Uuid) -> MemoryError {
    MemoryError::NotFound(format!("memory item {id}"))
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn create(&self, data: NewMemoryItem) -> MemoryResult<MemoryItem> {
        let item = data.into_item()?;
        self.items.write().await.insert(item.id, item.clone());
        Ok(item)
    }

    async fn find_by_id(
        &self,
        id: Uuid,
        include_deleted: bool,
    ) -> MemoryResult<Option<MemoryItem>> {
        let items = self.items.read().await;
        Ok(items
            .get(&id)
            .filter(|item| include_deleted || !item.is_deleted)
            .cloned())
    }

    async fn find_by_permalink(
        &self,
        permalink: &Permalink,
        include_deleted: bool,
    ) -> MemoryResult<Option<MemoryItem>> {
        let items = self.items.read().await;
        let mut matches: Vec<MemoryItem> = items
            .values()
            .filter(|item| item.permalink.as_ref() == Some(permalink))
            .filter(|item| include_deleted || !item.is_deleted)
            .cloned()
            .collect();
        sort_by_recency(&mut matches);
        Ok(matches.into_iter().next())
    }

    async fn update(&self, id: Uuid, patch: MemoryPatch) -> MemoryResult<MemoryItem> {
        let mut items = self.items.write().await;
        let item = items.get_mut(&id).ok_or_else(|| not_found(id))?;
        item.apply(&patch);
        Ok(item.clone())
    }

    async fn soft_delete(&self, id: Uuid) -> MemoryResult<bool> {
        let mut items = self.items.write().await;
        let item = items.get_mut(&id).ok_or_else(|| not_found(id))?;
        item.set_deleted(true);
        Ok(true)
    }

    async fn restore(&self, id: Uuid) -> MemoryResult<bool> {
        let mut items = self.items.write().await;
        let item = items.get_mut(&id).ok_or_else(|| not_found(id))?;
        item.set_deleted(false);
        Ok(true)
    }

    async fn hard_delete(&self, id: Uuid) -> MemoryResult<bool> {
        Ok(self.items.write().await.remove(&id).is_some())
    }

    async fn search_text(
        &self,
        query: &str,
        filter: &ItemFilter,
    ) -> MemoryResult<Vec<MemoryItem>> {
        let items = self.items.read().await;
        let mut found: Vec<MemoryItem> = items
            .values()
            .filter(|item| filter.matches(item) && matches_text(item, query))
            .cloned()
            .collect();
        sort_by_recency(&mut found);
        Ok(found)
    }

    async fn list_folders(&self, include_deleted: bool) -> MemoryResult<Vec<String>> {
        let items = self.items.read().await;
        let folders: BTreeSet<String> = items
            .values()
            .filter(|item| include_deleted || !item.is_deleted)
            .map(|item| item.folder.clone())
            .collect();
        Ok(folders.into_iter().collect())
    }
}
