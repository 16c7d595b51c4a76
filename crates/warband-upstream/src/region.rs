//! Upstream realms.
//!
//! Each region is served by its own upstream cluster and keeps separate
//! account and clan id spaces, so the region is part of every cache key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Game server region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    /// Europe
    Eu,
    /// North America
    Na,
    /// Asia-Pacific
    Asia,
}

impl Region {
    pub const ALL: [Self; 3] = [Self::Eu, Self::Na, Self::Asia];

    /// Path segment used by the upstream API and in cache keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eu => "eu",
            Self::Na => "na",
            Self::Asia => "asia",
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown region name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown region: {0}")]
pub struct UnknownRegion(pub String);

impl FromStr for Region {
    type Err = UnknownRegion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eu" => Ok(Self::Eu),
            "na" | "us" => Ok(Self::Na),
            "asia" | "sea" => Ok(Self::Asia),
            _ => Err(UnknownRegion(s.to_string())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("EU".parse::<Region>().unwrap(), Region::Eu);
        assert_eq!(" na ".parse::<Region>().unwrap(), Region::Na);
        assert_eq!("us".parse::<Region>().unwrap(), Region::Na);
        assert!("mars".parse::<Region>().is_err());
    }

    #[test]
    fn test_display_round_trips() {
        for region in Region::ALL {
            assert_eq!(region.to_string().parse::<Region>().unwrap(), region);
        }
    }
}
