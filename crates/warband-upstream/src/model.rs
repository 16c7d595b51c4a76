//! Upstream payload shapes
//!
//! Unknown fields are ignored so additive upstream changes still decode
//! strictly. Missing or retyped fields fall back to lenient decoding.

use crate::archive::{Archivable, EntityKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub account_id: u64,
    pub nickname: String,
    #[serde(default)]
    pub clan_id: Option<u64>,
    #[serde(default)]
    pub last_battle_at: Option<DateTime<Utc>>,
    pub statistics: PlayerStatistics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlayerStatistics {
    pub battles: u64,
    pub wins: u64,
    #[serde(default)]
    pub damage_dealt: u64,
}

impl PlayerStatistics {
    #[allow(clippy::cast_precision_loss)]
    pub fn win_rate(&self) -> Option<f64> {
        (self.battles > 0).then(|| self.wins as f64 / self.battles as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clan {
    pub clan_id: u64,
    pub tag: String,
    pub name: String,
    pub members_count: u32,
    #[serde(default)]
    pub leader_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingPage {
    pub page: u32,
    pub total: u64,
    pub entries: Vec<RankingEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub rank: u32,
    pub account_id: u64,
    pub nickname: String,
    pub rating: f64,
}

impl Archivable for Player {
    fn archive_entry(&self) -> Option<(EntityKind, String, String)> {
        Some((
            EntityKind::Player,
            self.account_id.to_string(),
            self.nickname.clone(),
        ))
    }
}

impl Archivable for Clan {
    fn archive_entry(&self) -> Option<(EntityKind, String, String)> {
        Some((EntityKind::Clan, self.clan_id.to_string(), self.tag.clone()))
    }
}

impl Archivable for RankingPage {}
