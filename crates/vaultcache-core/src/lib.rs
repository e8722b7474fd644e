//! vaultcache-core: core traits and types for the vaultcache library
//!
//! This crate provides the foundational types and traits shared by the
//! storage driver, the queue/coalescer, and the public engine facade.

mod clock;
mod element;
mod error;
mod key;
mod metrics;
mod object;
mod serializer;

pub use clock::{Clock, SystemClock, VirtualClock};
pub use element::{CacheElement, Ticks, NEVER_EXPIRE};
pub use error::{CacheError, Result};
pub use key::{CacheKey, CompositeKey};
pub use metrics::{CacheMetrics, CacheOperation, EvictionReason, NoopMetrics};
pub use object::CacheObject;
pub use serializer::{JsonSerializer, Serializer, TimestampPolicy};

#[cfg(feature = "msgpack")]
pub use serializer::MsgPackSerializer;

#[cfg(feature = "bincode")]
pub use serializer::BincodeSerializer;

#[cfg(feature = "tracing")]
mod tracing_metrics;
#[cfg(feature = "tracing")]
pub use tracing_metrics::TracingMetrics;

#[cfg(feature = "metrics")]
mod metrics_crate;
#[cfg(feature = "metrics")]
pub use metrics_crate::MetricsCrateAdapter;
