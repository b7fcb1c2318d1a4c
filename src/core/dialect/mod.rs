//! Storage dialect boundary
//!
//! The store's algorithms are written once against [`StorageDialect`]. A
//! dialect only supplies the statements that differ between engines: the
//! schema, the placeholder insert and locate-for-update pair used by the
//! two-phase blob write, and batched deletes used by pruning. Portable
//! statements live next to the code that runs them.

mod sqlite;

pub use sqlite::SqliteDialect;

use std::fmt;

/// Table holding the current content of one project context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentTable {
    Offline,
    Online,
}

impl ContentTable {
    pub const fn name(self) -> &'static str {
        match self {
            ContentTable::Offline => "offline_contents",
            ContentTable::Online => "online_contents",
        }
    }
}

impl From<crate::core::ids::ProjectContext> for ContentTable {
    fn from(context: crate::core::ids::ProjectContext) -> Self {
        match context {
            crate::core::ids::ProjectContext::Offline => ContentTable::Offline,
            crate::core::ids::ProjectContext::Online => ContentTable::Online,
        }
    }
}

/// Record families making up one backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackupTable {
    Content,
    Structure,
    Properties,
}

impl BackupTable {
    /// All families, in the order pruning deletes from them
    pub const ALL: [BackupTable; 3] = [
        BackupTable::Properties,
        BackupTable::Content,
        BackupTable::Structure,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            BackupTable::Content => "backup_contents",
            BackupTable::Structure => "backup_resources",
            BackupTable::Properties => "backup_properties",
        }
    }
}

/// Engine-specific statements
///
/// Parameter conventions are fixed so that callers can bind without knowing
/// the engine:
///
/// - `insert_placeholder(Offline)`: `?1` resource id
/// - `insert_placeholder(Online)`: `?1` resource id, `?2` publish tag, `?3` keep-online flag
/// - `locate_for_update(Offline)`: `?1` resource id, `?2` payload length; yields one `rowid` column
/// - `locate_for_update(Online)`: as offline plus `?3` publish tag
/// - `delete_backup_batch(table, n)`: `?1..?n` backup ids
pub trait StorageDialect: fmt::Debug + Send + Sync {
    /// Human-readable engine name, used in log messages
    fn name(&self) -> &'static str;

    /// Schema version stamped into new databases
    fn schema_version(&self) -> i64;

    /// DDL batch creating every table and index (idempotent)
    fn schema(&self) -> &'static str;

    /// Insert a zero-length placeholder row unless one already exists
    fn insert_placeholder(&self, table: ContentTable) -> &'static str;

    /// Lock the row, size its payload field to the given length and return its
    /// row handle; yields no row when the locator does not match
    fn locate_for_update(&self, table: ContentTable) -> &'static str;

    /// Delete `count` backup rows from one family by backup id
    fn delete_backup_batch(&self, table: BackupTable, count: usize) -> String;

    /// Largest number of ids a single batched delete may bind
    fn max_batch_size(&self) -> usize;
}
