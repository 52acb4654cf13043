use std::collections::HashSet;
use std::sync::Arc;

use recall_core::{MemoryResult, Permalink};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::extraction::strip_enrichment;
use crate::index::VectorIndex;
use crate::metadata::{
    ItemFilter, ItemSource, MemoryItem, MemoryPatch, MetadataStore, NewMemoryItem, SyncStatus,
};
use crate::vector::VectorRecord;

/// How [`Reconciler::adopt`] matched a vector record to a metadata row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Adoption {
    /// An active row already pointed at the record.
    Existing,
    /// A soft-deleted row pointed at the record and was revived.
    Revived,
    /// An unlinked row whose id equals the record's doc id was linked.
    Linked,
    /// No row existed; a derived one was synthesized.
    Derived,
}

/// Outcome of a [`Reconciler::sweep`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Vector records examined.
    pub scanned: usize,
    /// Rows created for records that had none.
    pub derived: usize,
    /// Soft-deleted rows brought back.
    pub revived: usize,
    /// Unlinked rows given their permalink.
    pub linked: usize,
    /// Rows whose extraction counts disagreed with their record.
    pub counts_repaired: usize,
    /// Rows moved from `PENDING` to `SYNCED`.
    pub marked_synced: usize,
    /// Active rows with no vector record behind them. Reported, not repaired.
    pub orphaned: Vec<Uuid>,
}

impl SweepReport {
    /// `true` if the sweep found nothing to do.
    pub fn is_clean(&self) -> bool {
        self.derived == 0
            && self.revived == 0
            && self.linked == 0
            && self.counts_repaired == 0
            && self.marked_synced == 0
            && self.orphaned.is_empty()
    }
}

/// Eventual-consistency backstop between the metadata store and the vector
/// index.
///
/// Repairs only ever flow from the vector side to the metadata side: a row
/// can be derived from a record, never the other way round, because the
/// metadata layer cannot vouch for its copy of the content being current.
pub struct Reconciler {
    metadata: Arc<dyn MetadataStore>,
    index: Arc<VectorIndex>,
}

impl Reconciler {
    /// Reconciler over the two stores.
    pub fn new(metadata: Arc<dyn MetadataStore>, index: Arc<VectorIndex>) -> Self {
        Self { metadata, index }
    }

    /// Make sure an active metadata row exists for `record` and return it.
    pub async fn adopt(&self, record: &VectorRecord) -> MemoryResult<(MemoryItem, Adoption)> {
        let permalink = record.permalink()?;

        if let Some(item) = self.metadata.find_by_permalink(&permalink, true).await? {
            if !item.is_deleted {
                return Ok((item, Adoption::Existing));
            }
            self.metadata.restore(item.id).await?;
            let item = self
                .metadata
                .update(
                    item.id,
                    MemoryPatch {
                        sync_status: Some(SyncStatus::Synced),
                        ..MemoryPatch::default()
                    },
                )
                .await?;
            info!(permalink = %permalink, id = %item.id, "Revived soft-deleted memory item");
            return Ok((item, Adoption::Revived));
        }

        // A store whose final metadata patch failed leaves a row with no
        // permalink; its id doubles as the record's doc id.
        if let Ok(id) = Uuid::parse_str(&record.doc_id) {
            if let Some(item) = self.metadata.find_by_id(id, true).await? {
                if item.permalink.is_none() {
                    let item = self.link(item, &permalink, record).await?;
                    info!(permalink = %permalink, id = %item.id, "Linked memory item to its vector record");
                    return Ok((item, Adoption::Linked));
                }
            }
        }

        let item = self.derive(record, permalink.clone()).await?;
        info!(permalink = %permalink, id = %item.id, "Derived memory item from vector record");
        Ok((item, Adoption::Derived))
    }

    async fn link(
        &self,
        item: MemoryItem,
        permalink: &Permalink,
        record: &VectorRecord,
    ) -> MemoryResult<MemoryItem> {
        if item.is_deleted {
            self.metadata.restore(item.id).await?;
        }
        self.metadata
            .update(
                item.id,
                MemoryPatch {
                    permalink: Some(permalink.clone()),
                    sync_status: Some(SyncStatus::Synced),
                    counts: Some(record.metadata.counts),
                    ..MemoryPatch::default()
                },
            )
            .await
    }

    async fn derive(&self, record: &VectorRecord, permalink: Permalink) -> MemoryResult<MemoryItem> {
        let raw = strip_enrichment(&record.content);
        let content = if raw.trim().is_empty() {
            record.content.clone()
        } else {
            raw.to_string()
        };
        let title = if record.metadata.title.trim().is_empty() {
            record.doc_id.clone()
        } else {
            record.metadata.title.clone()
        };

        self.metadata
            .create(NewMemoryItem {
                permalink: Some(permalink),
                sync_status: SyncStatus::Synced,
                source: ItemSource::Derived,
                counts: record.metadata.counts,
                ..NewMemoryItem::new(title, content, record.folder.clone())
                    .with_tags(record.metadata.tags.clone())
            })
            .await
    }

    /// Walk every vector record (optionally in one folder) and repair the
    /// metadata side to match.
    pub async fn sweep(&self, folder: Option<&str>) -> MemoryResult<SweepReport> {
        let records = self.index.records(folder).await?;
        let mut report = SweepReport {
            scanned: records.len(),
            ..SweepReport::default()
        };
        let mut present: HashSet<Permalink> = HashSet::with_capacity(records.len());

        for record in &records {
            let (item, adoption) = self.adopt(record).await?;
            match adoption {
                Adoption::Existing => {}
                Adoption::Revived => report.revived += 1,
                Adoption::Linked => report.linked += 1,
                Adoption::Derived => report.derived += 1,
            }
            present.insert(record.permalink()?);

            let mut patch = MemoryPatch::default();
            if item.counts() != record.metadata.counts {
                patch.counts = Some(record.metadata.counts);
                report.counts_repaired += 1;
            }
            if item.sync_status == SyncStatus::Pending {
                patch.sync_status = Some(SyncStatus::Synced);
                report.marked_synced += 1;
            }
            if !patch.is_empty() {
                self.metadata.update(item.id, patch).await?;
            }
        }

        let filter = match folder {
            Some(folder) => ItemFilter::folder(folder),
            None => ItemFilter::default(),
        };
        for item in self.metadata.list(&filter).await? {
            let backed = item
                .permalink
                .as_ref()
                .is_some_and(|p| present.contains(p));
            if !backed {
                warn!(
                    id = %item.id,
                    permalink = ?item.permalink.as_ref().map(ToString::to_string),
                    "Memory item has no vector record"
                );
                report.orphaned.push(item.id);
            }
        }

        info!(
            folder = ?folder,
            scanned = report.scanned,
            derived = report.derived,
            revived = report.revived,
            linked = report.linked,
            counts_repaired = report.counts_repaired,
            orphaned = report.orphaned.len(),
            "Reconciliation sweep finished"
        );
        Ok(report)
    }
}
