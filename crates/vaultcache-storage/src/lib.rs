//! vaultcache-storage: the SQLite-backed storage driver.
//!
//! Owns the database file, the schema, the cipher boundary,
//! and the single dedicated writer thread every database operation runs
//! on.

mod cipher;
mod driver;
mod ops;
mod schema;

pub use cipher::{Cipher, NoopCipher};
pub use driver::{StorageDriver, StorageLocation};
pub use ops::{placeholders, OpOutcome, PreparedOp};
pub use schema::SCHEMA_VERSION;

#[cfg(feature = "secure")]
pub use cipher::SecureCipher;
