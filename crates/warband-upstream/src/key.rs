//! Deterministic cache keys for upstream operations
//!
//! A key is `<namespace>:<name>=<value>:...` with parameters sorted by name.
//! Values are percent-escaped so separators and glob metacharacters in user
//! input can neither merge two parameters nor widen a pattern delete.

use std::collections::BTreeMap;
use std::fmt::{self, Write};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn builder(namespace: &'static str) -> CacheKeyBuilder {
        CacheKeyBuilder {
            namespace,
            params: BTreeMap::new(),
        }
    }

    /// Glob matching every key of one namespace.
    pub fn namespace_pattern(namespace: &str) -> String {
        format!("{}:*", escape(namespace))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    namespace: &'static str,
    params: BTreeMap<&'static str, String>,
}

impl CacheKeyBuilder {
    /// Add a parameter. Surrounding whitespace is ignored; a repeated name
    /// replaces the earlier value.
    #[must_use]
    pub fn param(mut self, name: &'static str, value: impl fmt::Display) -> Self {
        self.params.insert(name, value.to_string().trim().to_string());
        self
    }

    /// Add a parameter only when present.
    #[must_use]
    pub fn param_opt(self, name: &'static str, value: Option<impl fmt::Display>) -> Self {
        match value {
            Some(value) => self.param(name, value),
            None => self,
        }
    }

    pub fn build(self) -> CacheKey {
        let mut key = escape(self.namespace);
        for (name, value) in &self.params {
            let _ = write!(key, ":{}={}", escape(name), escape(value));
        }
        CacheKey(key)
    }
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' => {
                out.push(char::from(byte));
            }
            _ => {
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_key_layout() {
        let key = CacheKey::builder("player")
            .param("region", "eu")
            .param("id", 12345)
            .build();
        assert_eq!(key.as_str(), "player:id=12345:region=eu");
    }

    #[test]
    fn test_separators_are_escaped() {
        let key = CacheKey::builder("clan").param("tag", "A:B=*").build();
        assert_eq!(key.as_str(), "clan:tag=A%3AB%3D%2A");
    }

    #[test]
    fn test_whitespace_and_absent_params() {
        let a = CacheKey::builder("rankings")
            .param("page", " 2 ")
            .param_opt("season", None::<u32>)
            .build();
        let b = CacheKey::builder("rankings").param("page", 2).build();
        assert_eq!(a, b);
    }

    #[test]
    fn test_namespace_pattern() {
        assert_eq!(CacheKey::namespace_pattern("player"), "player:*");
    }

    proptest! {
        #[test]
        fn parameter_order_does_not_matter(a in ".*", b in ".*") {
            let forward = CacheKey::builder("ns").param("a", &a).param("b", &b).build();
            let reverse = CacheKey::builder("ns").param("b", &b).param("a", &a).build();
            prop_assert_eq!(forward, reverse);
        }

        #[test]
        fn distinct_values_give_distinct_keys(a in ".*", b in ".*") {
            let ka = CacheKey::builder("ns").param("id", &a).build();
            let kb = CacheKey::builder("ns").param("id", &b).build();
            prop_assert_eq!(a.trim() == b.trim(), ka == kb);
        }

        #[test]
        fn keys_contain_no_glob_metacharacters(value in ".*") {
            let key = CacheKey::builder("ns").param("v", &value).build();
            prop_assert!(!key.as_str().contains(['*', '?', '[', ']', '\\']));
        }
    }
}
