//! vaultcache: an asynchronous, persistent key-to-byte-string blob cache.
//!
//! # Overview
//!
//! - [`Engine`] is the blob-cache: `insert`/`get`/`invalidate`/
//!   `get_all_keys`/`flush`/`vacuum`, all backed by a single writer thread
//!   and a coalescing operation queue (see [`queue`]).
//! - [`ObjectCache`] layers typed objects on top of an [`Engine`], tagging
//!   each row with a stable type tag so callers can query by type.
//! - [`ObjectCache::get_or_fetch_object`] and
//!   [`ObjectCache::get_and_fetch_latest`] add deduplicated cache-or-fetch
//!   and cache-then-refresh patterns.
//! - [`CacheLocations`] is a small process-wide container for the four
//!   well-known cache instances an application typically wants
//!   (user-account, local-machine, secure, in-memory).
//!
//! # Quick start
//!
//! ```rust,no_run
//! use vaultcache::{Engine, EngineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::open("./cache.db", EngineConfig::default())?;
//!     engine.insert("key", b"value".to_vec(), None).await?;
//!     let value = engine.get("key").await?;
//!     assert_eq!(value, b"value");
//!     engine.shutdown().await?;
//!     Ok(())
//! }
//! ```

mod engine;
mod fetch;
mod locations;
mod object;
mod queue;

pub use vaultcache_core::*;
pub use vaultcache_storage::{Cipher, NoopCipher, StorageLocation};

#[cfg(feature = "secure")]
pub use vaultcache_storage::SecureCipher;

#[cfg(feature = "derive")]
pub use vaultcache_derive::CacheKey as DeriveCacheKey;

pub use engine::{Engine, EngineConfig};
pub use fetch::FetchCoalescer;
pub use locations::{CacheLocations, CacheLocationsConfig};
pub use object::{ObjectCache, ObjectCacheExt, TypedObjectCache};
pub use queue::QueueConfig;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        CacheElement, CacheError, CacheKey, CacheLocations, CacheMetrics, CacheObject, Clock,
        Engine, EngineConfig, JsonSerializer, ObjectCache, ObjectCacheExt, Result, Serializer,
        TypedObjectCache,
    };

    #[cfg(feature = "derive")]
    pub use crate::DeriveCacheKey;

    #[cfg(feature = "msgpack")]
    pub use crate::MsgPackSerializer;

    #[cfg(feature = "bincode")]
    pub use crate::BincodeSerializer;
}
