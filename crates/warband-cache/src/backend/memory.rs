//! In-process backend
//!
//! Expiry uses tokio's clock so tests can drive it with a paused runtime.

use super::{KvBackend, ttl_secs};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Map-backed store with the same TTL semantics as the Redis backend.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self, key: &str) -> Option<MemoryEntry> {
        let now = Instant::now();
        let entry = self.entries.get(key)?.clone();
        if entry.is_live(now) {
            Some(entry)
        } else {
            self.entries.remove_if(key, |_, e| !e.is_live(now));
            None
        }
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.live(key).map(|e| e.value))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let expires_at = Instant::now() + Duration::from_secs(ttl_secs(ttl));
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        let now = Instant::now();
        let removed = keys
            .iter()
            .filter_map(|k| self.entries.remove(k))
            .filter(|(_, e)| e.is_live(now))
            .count();
        Ok(removed as u64)
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        Ok(self
            .entries
            .iter()
            .filter(|e| e.is_live(now) && glob_match(pattern, e.key()))
            .map(|e| e.key().clone())
            .collect())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live(key).is_some())
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>> {
        Ok(self.live(key).map(|e| {
            let remaining = e.expires_at.saturating_duration_since(Instant::now());
            ttl_secs(remaining)
        }))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.is_live(now) => {
                entry.expires_at = now + Duration::from_secs(ttl_secs(ttl));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

/// Redis-style glob match supporting `*`, `?` and `\` escapes.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        match p.get(pi) {
            Some('*') => {
                star = Some((pi, ti));
                pi += 1;
            }
            Some('?') => {
                pi += 1;
                ti += 1;
            }
            Some('\\') if p.get(pi + 1) == Some(&t[ti]) => {
                pi += 2;
                ti += 1;
            }
            Some(c) if *c != '\\' && *c == t[ti] => {
                pi += 1;
                ti += 1;
            }
            _ => match star {
                // Let the last `*` absorb one more character and retry.
                Some((sp, st)) => {
                    pi = sp + 1;
                    ti = st + 1;
                    star = Some((sp, st + 1));
                }
                None => return false,
            },
        }
    }

    p[pi..].iter().all(|c| *c == '*')
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("player:*", "player:eu:12345"));
        assert!(glob_match("*", ""));
        assert!(glob_match("player:?u:*", "player:eu:1"));
        assert!(glob_match("*:12345", "player:eu:12345"));
        assert!(glob_match("a*b*c", "axxbyyc"));
        assert!(glob_match(r"lit\*", "lit*"));

        assert!(!glob_match("player:*", "clan:eu:1"));
        assert!(!glob_match("player", "player:eu"));
        assert!(!glob_match(r"lit\*", "litx"));
        assert!(!glob_match("a*b*c", "axxbyy"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let backend = MemoryBackend::new();
        backend
            .set_ex("k", "v", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(backend.ttl("k").await.unwrap(), Some(1));

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(backend.get("k").await.unwrap(), None);
        assert!(!backend.exists("k").await.unwrap());
        assert_eq!(backend.ttl("k").await.unwrap(), None);
        assert!(backend.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_extends_live_keys_only() {
        let backend = MemoryBackend::new();
        backend
            .set_ex("k", "v", Duration::from_secs(5))
            .await
            .unwrap();

        assert!(backend.expire("k", Duration::from_secs(60)).await.unwrap());
        assert_eq!(backend.ttl("k").await.unwrap(), Some(60));
        assert!(!backend.expire("missing", Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_and_del() {
        let backend = MemoryBackend::new();
        for key in ["p:eu:1", "p:eu:2", "c:eu:1"] {
            backend
                .set_ex(key, "{}", Duration::from_secs(30))
                .await
                .unwrap();
        }

        let mut keys = backend.keys("p:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["p:eu:1".to_string(), "p:eu:2".to_string()]);

        assert_eq!(backend.del(&keys).await.unwrap(), 2);
        assert_eq!(backend.len(), 1);
    }
}
