//! Best-effort history sink
//!
//! After a fresh upstream fetch the client records the entity's current alias
//! (nickname, clan tag) so renames can be traced. The sink is an external
//! collaborator; failures are logged and never reach the caller.

use crate::region::Region;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Player,
    Clan,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub kind: EntityKind,
    pub region: Region,
    pub id: String,
    pub alias: String,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Archive unavailable: {0}")]
    Unavailable(String),

    #[error("Archive rejected record: {0}")]
    Rejected(String),
}

/// Payloads that carry an archivable identity.
pub trait Archivable {
    /// Kind, id and alias, when the payload names a single entity.
    fn archive_entry(&self) -> Option<(EntityKind, String, String)> {
        None
    }
}

#[async_trait]
pub trait ArchiveSink: Debug + Send + Sync {
    async fn record(&self, record: ArchiveRecord) -> Result<(), ArchiveError>;
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopArchive;

#[async_trait]
impl ArchiveSink for NoopArchive {
    async fn record(&self, _record: ArchiveRecord) -> Result<(), ArchiveError> {
        Ok(())
    }
}

/// Keeps alias history in memory; a new row is added only when an entity's
/// alias differs from its latest recorded one.
#[derive(Debug, Default)]
pub struct MemoryArchive {
    records: Mutex<Vec<ArchiveRecord>>,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ArchiveRecord> {
        self.records.lock().clone()
    }

    /// Aliases of one entity, oldest first.
    pub fn history(&self, kind: EntityKind, region: Region, id: &str) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter(|r| r.kind == kind && r.region == region && r.id == id)
            .map(|r| r.alias.clone())
            .collect()
    }
}

#[async_trait]
impl ArchiveSink for MemoryArchive {
    async fn record(&self, record: ArchiveRecord) -> Result<(), ArchiveError> {
        let mut records = self.records.lock();
        let latest = records
            .iter()
            .rev()
            .find(|r| r.kind == record.kind && r.region == record.region && r.id == record.id);

        if latest.is_none_or(|r| r.alias != record.alias) {
            records.push(record);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn record(alias: &str) -> ArchiveRecord {
        ArchiveRecord {
            kind: EntityKind::Player,
            region: Region::Eu,
            id: "12345".to_string(),
            alias: alias.to_string(),
            observed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_memory_archive_records_alias_changes_only() {
        let archive = MemoryArchive::new();
        archive.record(record("Tanker")).await.unwrap();
        archive.record(record("Tanker")).await.unwrap();
        archive.record(record("TankerPro")).await.unwrap();

        assert_eq!(
            archive.history(EntityKind::Player, Region::Eu, "12345"),
            vec!["Tanker".to_string(), "TankerPro".to_string()]
        );
        assert!(archive.history(EntityKind::Clan, Region::Eu, "12345").is_empty());
    }
}
