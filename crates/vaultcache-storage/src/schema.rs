//! On-disk schema and forward migrations.

use rusqlite::Connection;

/// Current schema version this driver knows how to read and write.
pub const SCHEMA_VERSION: i64 = 1;

const CREATE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS CacheElement (
    Key         TEXT    PRIMARY KEY NOT NULL,
    TypeName    TEXT    NULL,
    Value       BLOB    NOT NULL,
    Expiration  INTEGER NOT NULL,
    CreatedAt   INTEGER NOT NULL
)";

const CREATE_EXPIRATION_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_CacheElement_Expiration ON CacheElement (Expiration)";

const CREATE_TYPE_NAME_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_CacheElement_TypeName ON CacheElement (TypeName)";

const CREATE_SCHEMA_VERSION_TABLE: &str = "
CREATE TABLE IF NOT EXISTS SchemaVersion (
    Version INTEGER NOT NULL
)";

/// Create the table/indexes if absent and check/stamp the schema version.
///
/// Runs once, synchronously, on the writer thread before the driver starts
/// serving operations. There is only one schema version today; this is the
/// hook future migrations attach to.
pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(CREATE_TABLE)?;
    conn.execute_batch(CREATE_EXPIRATION_INDEX)?;
    conn.execute_batch(CREATE_TYPE_NAME_INDEX)?;
    conn.execute_batch(CREATE_SCHEMA_VERSION_TABLE)?;

    let current: Option<i64> = conn
        .query_row("SELECT Version FROM SchemaVersion LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    match current {
        None => {
            conn.execute(
                "INSERT INTO SchemaVersion (Version) VALUES (?1)",
                [SCHEMA_VERSION],
            )?;
        }
        Some(v) if v < SCHEMA_VERSION => {
            conn.execute("UPDATE SchemaVersion SET Version = ?1", [SCHEMA_VERSION])?;
        }
        Some(_) => {}
    }

    Ok(())
}
