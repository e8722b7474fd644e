//! Cache key ergonomics over the engine's plain `String` keys.
//!
//! The on-disk `Key` column is always a UTF-8 string; this trait just gives
//! callers a way to build that string from richer application types.

use std::fmt::Display;

/// Types that can be turned into the engine's string key.
pub trait CacheKey: Send + Sync {
    /// The raw key portion, without namespace.
    fn cache_key(&self) -> String;

    /// Optional namespace prefix.
    fn namespace(&self) -> Option<&str> {
        None
    }

    /// The full key actually stored: `namespace:cache_key` when a namespace
    /// is present, `cache_key` otherwise.
    fn full_key(&self) -> String {
        match self.namespace() {
            Some(ns) => format!("{ns}:{}", self.cache_key()),
            None => self.cache_key(),
        }
    }
}

impl CacheKey for String {
    fn cache_key(&self) -> String {
        self.clone()
    }
}

impl CacheKey for &str {
    fn cache_key(&self) -> String {
        self.to_string()
    }
}

impl<T1: Display + Send + Sync, T2: Display + Send + Sync> CacheKey for (T1, T2) {
    fn cache_key(&self) -> String {
        format!("{}:{}", self.0, self.1)
    }
}

impl<T1: Display + Send + Sync, T2: Display + Send + Sync, T3: Display + Send + Sync> CacheKey
    for (T1, T2, T3)
{
    fn cache_key(&self) -> String {
        format!("{}:{}:{}", self.0, self.1, self.2)
    }
}

/// Builder for composite keys assembled from several parts.
#[derive(Debug, Clone, Default)]
pub struct CompositeKey {
    parts: Vec<String>,
    ns: Option<String>,
}

impl CompositeKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(mut self, ns: impl Into<String>) -> Self {
        self.ns = Some(ns.into());
        self
    }

    pub fn part(mut self, part: impl Display) -> Self {
        self.parts.push(part.to_string());
        self
    }
}

impl CacheKey for CompositeKey {
    fn cache_key(&self) -> String {
        self.parts.join(":")
    }

    fn namespace(&self) -> Option<&str> {
        self.ns.as_deref()
    }
}
