use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use recall_core::{resolve_folder, MemoryError, MemoryResult, Permalink};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;
use uuid::Uuid;

use crate::metadata::{
    matches_text, ItemFilter, MemoryItem, MemoryPatch, MetadataStore, NewMemoryItem,
};

const COLUMNS: &str = "id, title, folder, tags, summary, content, permalink, sync_status, \
                       source, is_deleted, entity_count, relation_count, observation_count, \
                       created_at, updated_at";

/// Metadata store backed by a single SQLite database file.
///
/// One connection guarded by a mutex; every public call is one short
/// critical section on the blocking thread pool, so single-row updates are
/// atomic and the async executor never waits on disk.
pub struct SqliteMetadataStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMetadataStore {
    /// Open (or create) the database at `path` and ensure the schema exists.
    pub fn open(path: &Path) -> MemoryResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| MemoryError::store("metadata.open", e))?;
            }
        }
        let conn = Connection::open(path).map_err(|e| MemoryError::store("metadata.open", e))?;
        let store = Self::from_connection(conn)?;
        info!(path = %path.display(), "Metadata store opened");
        Ok(store)
    }

    /// Private in-memory database, mostly for tests.
    pub fn open_in_memory() -> MemoryResult<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| MemoryError::store("metadata.open", e))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> MemoryResult<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS memory_items (
                 id TEXT PRIMARY KEY,
                 title TEXT NOT NULL,
                 folder TEXT NOT NULL,
                 tags TEXT NOT NULL DEFAULT '[]',
                 summary TEXT NOT NULL,
                 content TEXT NOT NULL,
                 permalink TEXT,
                 sync_status TEXT NOT NULL,
                 source TEXT NOT NULL DEFAULT 'native',
                 is_deleted INTEGER NOT NULL DEFAULT 0,
                 entity_count INTEGER NOT NULL DEFAULT 0,
                 relation_count INTEGER NOT NULL DEFAULT 0,
                 observation_count INTEGER NOT NULL DEFAULT 0,
                 created_at TEXT NOT NULL,
                 updated_at TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_memory_items_permalink
                 ON memory_items(permalink);
             CREATE INDEX IF NOT EXISTS idx_memory_items_folder
                 ON memory_items(folder, is_deleted, updated_at);",
        )
        .map_err(|e| MemoryError::store("metadata.migrate", e))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, operation: &'static str, f: F) -> MemoryResult<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await
        .map_err(|e| MemoryError::store(operation, e))?
        .map_err(|e| MemoryError::store(operation, e))
    }

    fn load(conn: &Connection, id: Uuid) -> rusqlite::Result<Option<MemoryItem>> {
        conn.query_row(
            &format!("SELECT {COLUMNS} FROM memory_items WHERE id = ?1"),
            params![id.to_string()],
            row_to_item,
        )
        .optional()
    }

    fn write(conn: &Connection, item: &MemoryItem) -> rusqlite::Result<usize> {
        conn.execute(
            "UPDATE memory_items SET title = ?2, folder = ?3, tags = ?4, summary = ?5,
                 content = ?6, permalink = ?7, sync_status = ?8, source = ?9,
                 is_deleted = ?10, entity_count = ?11, relation_count = ?12,
                 observation_count = ?13, updated_at = ?14
             WHERE id = ?1",
            params![
                item.id.to_string(),
                item.title,
                item.folder,
                tags_json(&item.tags),
                item.summary,
                item.content,
                item.permalink.as_ref().map(ToString::to_string),
                item.sync_status.as_str(),
                item.source.as_str(),
                item.is_deleted,
                item.entity_count,
                item.relation_count,
                item.observation_count,
                timestamp(&item.updated_at),
            ],
        )
    }

    async fn set_deleted(
        &self,
        id: Uuid,
        deleted: bool,
        operation: &'static str,
    ) -> MemoryResult<bool> {
        let found = self
            .with_conn(operation, move |conn| {
                let Some(mut item) = Self::load(conn, id)? else {
                    return Ok(false);
                };
                if item.set_deleted(deleted) {
                    Self::write(conn, &item)?;
                }
                Ok(true)
            })
            .await?;
        if found {
            Ok(true)
        } else {
            Err(MemoryError::NotFound(format!("memory item {id}")))
        }
    }
}

fn tags_json(tags: &[String]) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_string())
}

/// Fixed-width RFC 3339 so that lexical order equals time order.
fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn row_to_item(row: &Row<'_>) -> rusqlite::Result<MemoryItem> {
    let id: String = row.get(0)?;
    let tags: String = row.get(3)?;
    let permalink: Option<String> = row.get(6)?;
    let sync_status: String = row.get(7)?;
    let source: String = row.get(8)?;

    Ok(MemoryItem {
        id: Uuid::parse_str(&id).map_err(|e| conversion_error(0, e))?,
        title: row.get(1)?,
        folder: row.get(2)?,
        tags: serde_json::from_str(&tags).map_err(|e| conversion_error(3, e))?,
        summary: row.get(4)?,
        content: row.get(5)?,
        permalink: permalink
            .map(|p| p.parse::<Permalink>())
            .transpose()
            .map_err(|e| conversion_error(6, e))?,
        sync_status: sync_status.parse().map_err(|e| conversion_error(7, e))?,
        source: source.parse().map_err(|e| conversion_error(8, e))?,
        is_deleted: row.get(9)?,
        entity_count: row.get(10)?,
        relation_count: row.get(11)?,
        observation_count: row.get(12)?,
        created_at: parse_time(row, 13)?,
        updated_at: parse_time(row, 14)?,
    })
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn create(&self, data: NewMemoryItem) -> MemoryResult<MemoryItem> {
        let item = data.into_item()?;
        let row = item.clone();
        self.with_conn("metadata.create", move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO memory_items ({COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
                ),
                params![
                    row.id.to_string(),
                    row.title,
                    row.folder,
                    tags_json(&row.tags),
                    row.summary,
                    row.content,
                    row.permalink.as_ref().map(ToString::to_string),
                    row.sync_status.as_str(),
                    row.source.as_str(),
                    row.is_deleted,
                    row.entity_count,
                    row.relation_count,
                    row.observation_count,
                    timestamp(&row.created_at),
                    timestamp(&row.updated_at),
                ],
            )
        })
        .await?;
        Ok(item)
    }

    async fn find_by_id(
        &self,
        id: Uuid,
        include_deleted: bool,
    ) -> MemoryResult<Option<MemoryItem>> {
        let item = self
            .with_conn("metadata.find_by_id", move |conn| Self::load(conn, id))
            .await?;
        Ok(item.filter(|item| include_deleted || !item.is_deleted))
    }

    async fn find_by_permalink(
        &self,
        permalink: &Permalink,
        include_deleted: bool,
    ) -> MemoryResult<Option<MemoryItem>> {
        let permalink = permalink.to_string();
        self.with_conn("metadata.find_by_permalink", move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {COLUMNS} FROM memory_items
                     WHERE permalink = ?1 AND (?2 OR is_deleted = 0)
                     ORDER BY updated_at DESC, created_at DESC, id ASC
                     LIMIT 1"
                ),
                params![permalink, include_deleted],
                row_to_item,
            )
            .optional()
        })
        .await
    }

    async fn update(&self, id: Uuid, patch: MemoryPatch) -> MemoryResult<MemoryItem> {
        let item = self
            .with_conn("metadata.update", move |conn| {
                let Some(mut item) = Self::load(conn, id)? else {
                    return Ok(None);
                };
                if item.apply(&patch) {
                    Self::write(conn, &item)?;
                }
                Ok(Some(item))
            })
            .await?;
        item.ok_or_else(|| MemoryError::NotFound(format!("memory item {id}")))
    }

    async fn soft_delete(&self, id: Uuid) -> MemoryResult<bool> {
        self.set_deleted(id, true, "metadata.soft_delete").await
    }

    async fn restore(&self, id: Uuid) -> MemoryResult<bool> {
        self.set_deleted(id, false, "metadata.restore").await
    }

    async fn hard_delete(&self, id: Uuid) -> MemoryResult<bool> {
        let removed = self
            .with_conn("metadata.hard_delete", move |conn| {
                conn.execute(
                    "DELETE FROM memory_items WHERE id = ?1",
                    params![id.to_string()],
                )
            })
            .await?;
        Ok(removed > 0)
    }

    async fn search_text(
        &self,
        query: &str,
        filter: &ItemFilter,
    ) -> MemoryResult<Vec<MemoryItem>> {
        let folder = filter.folder.as_deref().map(resolve_folder);
        let include_deleted = filter.include_deleted;
        let rows = self
            .with_conn("metadata.search_text", move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM memory_items
                     WHERE (?1 OR is_deleted = 0) AND (?2 IS NULL OR folder = ?2)
                     ORDER BY updated_at DESC, created_at DESC, id ASC"
                ))?;
                let rows = stmt
                    .query_map(params![include_deleted, folder], row_to_item)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        Ok(rows
            .into_iter()
            .filter(|item| filter.matches(item) && matches_text(item, query))
            .collect())
    }

    async fn count(&self, filter: &ItemFilter) -> MemoryResult<usize> {
        if !filter.tags.is_empty() {
            return Ok(self.list(filter).await?.len());
        }
        let folder = filter.folder.as_deref().map(resolve_folder);
        let include_deleted = filter.include_deleted;
        let n: i64 = self
            .with_conn("metadata.count", move |conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM memory_items
                     WHERE (?1 OR is_deleted = 0) AND (?2 IS NULL OR folder = ?2)",
                    params![include_deleted, folder],
                    |row| row.get(0),
                )
            })
            .await?;
        Ok(usize::try_from(n).unwrap_or(0))
    }

    async fn list_folders(&self, include_deleted: bool) -> MemoryResult<Vec<String>> {
        self.with_conn("metadata.list_folders", move |conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT folder FROM memory_items
                 WHERE (?1 OR is_deleted = 0)
                 ORDER BY folder ASC",
            )?;
            let folders = stmt
                .query_map(params![include_deleted], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(folders)
        })
        .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::metadata::{ItemCounts, ItemSource, SyncStatus};

    fn permalink(s: &str) -> Permalink {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_roundtrip_all_columns() {
        let store = SqliteMetadataStore::open_in_memory().unwrap();
        let created = store
            .create(NewMemoryItem {
                permalink: Some(permalink("memory://notes/abc")),
                sync_status: SyncStatus::Synced,
                source: ItemSource::Derived,
                counts: ItemCounts {
                    entities: 3,
                    relations: 2,
                    observations: 1,
                },
                ..NewMemoryItem::new("Title", "Body text", "notes")
                    .with_tags(vec!["x".into(), "y".into()])
            })
            .await
            .unwrap();

        let loaded = store.find_by_id(created.id, false).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Title");
        assert_eq!(loaded.tags, vec!["x", "y"]);
        assert_eq!(loaded.permalink, Some(permalink("memory://notes/abc")));
        assert_eq!(loaded.sync_status, SyncStatus::Synced);
        assert_eq!(loaded.source, ItemSource::Derived);
        assert_eq!(loaded.counts().entities, 3);
        assert_eq!(
            loaded.created_at.timestamp_micros(),
            created.created_at.timestamp_micros()
        );
    }

    #[tokio::test]
    async fn test_update_soft_delete_restore() {
        let store = SqliteMetadataStore::open_in_memory().unwrap();
        let item = store
            .create(NewMemoryItem::new("t", "body", "f"))
            .await
            .unwrap();

        let updated = store
            .update(
                item.id,
                MemoryPatch {
                    permalink: Some(permalink("memory://f/1")),
                    sync_status: Some(SyncStatus::Synced),
                    ..MemoryPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.sync_status, SyncStatus::Synced);

        assert!(store.soft_delete(item.id).await.unwrap());
        assert!(store.soft_delete(item.id).await.unwrap());
        assert!(store
            .find_by_permalink(&permalink("memory://f/1"), false)
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.count(&ItemFilter::default()).await.unwrap(), 0);

        assert!(store.restore(item.id).await.unwrap());
        let back = store
            .find_by_permalink(&permalink("memory://f/1"), false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(back.id, item.id);
        assert!(!back.is_deleted);
    }

    #[tokio::test]
    async fn test_missing_id_is_not_found() {
        let store = SqliteMetadataStore::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        assert!(store
            .update(id, MemoryPatch::default())
            .await
            .unwrap_err()
            .is_not_found());
        assert!(store.soft_delete(id).await.unwrap_err().is_not_found());
        assert!(!store.hard_delete(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_search_count_folders() {
        let store = SqliteMetadataStore::open_in_memory().unwrap();
        store
            .create(NewMemoryItem::new("Fox", "quick brown fox", "nature"))
            .await
            .unwrap();
        let dog = store
            .create(
                NewMemoryItem::new("Dog", "lazy dog", "nature").with_tags(vec!["pets".into()]),
            )
            .await
            .unwrap();
        store
            .create(NewMemoryItem::new("Fox trot", "dance", "music"))
            .await
            .unwrap();

        let hits = store.search_text("fox", &ItemFilter::default()).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Fox trot");

        assert_eq!(store.count(&ItemFilter::folder("nature")).await.unwrap(), 2);
        let pets = ItemFilter {
            tags: vec!["pets".into()],
            ..ItemFilter::default()
        };
        assert_eq!(store.count(&pets).await.unwrap(), 1);

        store.soft_delete(dog.id).await.unwrap();
        assert_eq!(store.count(&ItemFilter::folder("nature")).await.unwrap(), 1);
        assert_eq!(store.list_folders(false).await.unwrap(), vec!["music", "nature"]);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("db").join("metadata.db");
        let id = {
            let store = SqliteMetadataStore::open(&path).unwrap();
            store
                .create(NewMemoryItem::new("kept", "content", "f"))
                .await
                .unwrap()
                .id
        };
        let reopened = SqliteMetadataStore::open(&path).unwrap();
        assert_eq!(
            reopened.find_by_id(id, false).await.unwrap().unwrap().title,
            "kept"
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_writers_share_one_connection() {
        let store = Arc::new(SqliteMetadataStore::open_in_memory().unwrap());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
                    let item = store
                        .create(NewMemoryItem::new(format!("t{i}"), "body", "f"))
                        .await
                        .unwrap();
                    store.soft_delete(item.id).await.unwrap();
                    store.restore(item.id).await.unwrap()
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(store.count(&ItemFilter::folder("f")).await.unwrap(), 16);
    }
}
