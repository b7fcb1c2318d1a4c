//! SQLite dialect
//!
//! Payload columns are plain `BLOB`s written through SQLite's incremental
//! blob I/O. A blob handle cannot grow, so the locate-for-update statement
//! resizes the column to the payload length with `zeroblob()` before the
//! handle is opened.

use super::{BackupTable, ContentTable, StorageDialect};

/// Current schema version (stored in `PRAGMA user_version`)
pub const SCHEMA_VERSION: i64 = 2;

/// SQLite's default `SQLITE_MAX_VARIABLE_NUMBER` before 3.32 was 999
const MAX_BATCH_SIZE: usize = 999;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS offline_contents (
    resource_id BLOB PRIMARY KEY NOT NULL,
    content BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS online_contents (
    resource_id BLOB PRIMARY KEY NOT NULL,
    content BLOB NOT NULL,
    publish_tag INTEGER NOT NULL,
    keep_online INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS backup_contents (
    backup_id BLOB PRIMARY KEY NOT NULL,
    resource_id BLOB NOT NULL,
    publish_tag INTEGER NOT NULL,
    version_id INTEGER NOT NULL,
    content BLOB NOT NULL,
    UNIQUE (resource_id, version_id)
);

CREATE TABLE IF NOT EXISTS backup_resources (
    backup_id BLOB PRIMARY KEY NOT NULL,
    resource_id BLOB NOT NULL,
    structure_id BLOB NOT NULL,
    publish_tag INTEGER NOT NULL,
    version_id INTEGER NOT NULL,
    root_path TEXT NOT NULL,
    resource_type INTEGER NOT NULL,
    flags INTEGER NOT NULL,
    date_last_modified INTEGER NOT NULL,
    user_last_modified BLOB NOT NULL,
    date_archived INTEGER NOT NULL,
    UNIQUE (resource_id, version_id)
);

CREATE INDEX IF NOT EXISTS backup_resources_publish_tag
    ON backup_resources (publish_tag);

CREATE TABLE IF NOT EXISTS backup_versions (
    resource_id BLOB PRIMARY KEY NOT NULL,
    last_version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS backup_properties (
    backup_id BLOB NOT NULL,
    resource_id BLOB NOT NULL,
    publish_tag INTEGER NOT NULL,
    version_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (backup_id, name)
);

CREATE TABLE IF NOT EXISTS backup_projects (
    publish_tag INTEGER PRIMARY KEY NOT NULL,
    project_id BLOB NOT NULL,
    name TEXT NOT NULL,
    description TEXT NOT NULL,
    publisher TEXT NOT NULL,
    date_published INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS backup_project_resources (
    publish_tag INTEGER NOT NULL REFERENCES backup_projects (publish_tag) ON DELETE CASCADE,
    resource_id BLOB NOT NULL,
    root_path TEXT NOT NULL,
    PRIMARY KEY (publish_tag, resource_id)
);
";

/// Dialect for SQLite 3.35+ (needs `RETURNING`)
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl StorageDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn schema_version(&self) -> i64 {
        SCHEMA_VERSION
    }

    fn schema(&self) -> &'static str {
        SCHEMA
    }

    fn insert_placeholder(&self, table: ContentTable) -> &'static str {
        match table {
            ContentTable::Offline => {
                "INSERT INTO offline_contents (resource_id, content) \
                 VALUES (?1, zeroblob(0)) \
                 ON CONFLICT (resource_id) DO NOTHING"
            }
            ContentTable::Online => {
                "INSERT INTO online_contents (resource_id, content, publish_tag, keep_online) \
                 VALUES (?1, zeroblob(0), ?2, ?3) \
                 ON CONFLICT (resource_id) DO NOTHING"
            }
        }
    }

    fn locate_for_update(&self, table: ContentTable) -> &'static str {
        match table {
            ContentTable::Offline => {
                "UPDATE offline_contents SET content = zeroblob(?2) \
                 WHERE resource_id = ?1 \
                 RETURNING rowid"
            }
            ContentTable::Online => {
                "UPDATE online_contents SET content = zeroblob(?2) \
                 WHERE resource_id = ?1 AND publish_tag = ?3 \
                 RETURNING rowid"
            }
        }
    }

    fn delete_backup_batch(&self, table: BackupTable, count: usize) -> String {
        let placeholders = (1..=count)
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "DELETE FROM {} WHERE backup_id IN ({})",
            table.name(),
            placeholders
        )
    }

    fn max_batch_size(&self) -> usize {
        MAX_BATCH_SIZE
    }
}
