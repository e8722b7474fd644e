//! The single persisted row shape.

/// Instant in UTC, ticks since the fixed epoch used throughout the schema
/// (microseconds since the Unix epoch — see [`crate::Clock`]).
pub type Ticks = i64;

/// Sentinel expiration meaning "never expires".
pub const NEVER_EXPIRE: Ticks = i64::MAX;

/// The only persisted row. See invariants I1-I5: `Key` is the primary key
/// (at most one row per key); an expired entry must never be returned by a
/// read even if it is still physically present on disk; `TypeName` is an
/// opaque identifier the engine never interprets; `Value` is never absent
/// for a stored row, though it may be empty; `CreatedAt <= Expiration` for
/// any non-sentinel expiration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheElement {
    pub key: String,
    pub type_name: Option<String>,
    pub value: Vec<u8>,
    pub expiration: Ticks,
    pub created_at: Ticks,
}

impl CacheElement {
    /// A row with no type tag and the never-expire sentinel.
    pub fn new(key: impl Into<String>, value: Vec<u8>, created_at: Ticks) -> Self {
        Self {
            key: key.into(),
            type_name: None,
            value,
            expiration: NEVER_EXPIRE,
            created_at,
        }
    }

    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn with_expiration(mut self, expiration: Ticks) -> Self {
        self.expiration = expiration;
        self
    }

    /// An entry is live iff `now <= expiration`.
    pub fn is_live(&self, now: Ticks) -> bool {
        now <= self.expiration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_iff_now_before_expiration() {
        let el = CacheElement::new("k", vec![1], 0).with_expiration(100);
        assert!(el.is_live(50));
        assert!(el.is_live(100));
        assert!(!el.is_live(101));
    }

    #[test]
    fn never_expire_sentinel_is_always_live() {
        let el = CacheElement::new("k", vec![], 0);
        assert!(el.is_live(Ticks::MAX));
    }
}
