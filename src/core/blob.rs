//! Transactional blob writer
//!
//! Large payloads are not bound into an insert statement. A write is done in
//! two phases inside one transaction scope:
//!
//! 1. insert a zero-length placeholder row if the locator has none,
//! 2. lock the row for update, obtain a writable handle to its payload
//!    field and stream the bytes into it.
//!
//! The transaction is committed only after the whole payload was streamed.
//! Any failure rolls the scope back, so a reader sees either the previous
//! payload or no row at all, never a placeholder or a partial payload.

use crate::core::dialect::{ContentTable, StorageDialect};
use crate::core::ids::{PublishTag, ResourceId};
use crate::core::transaction::TransactionScope;
use crate::error::{Result, StoreError};
use rusqlite::blob::Blob;
use rusqlite::{params, Connection, DatabaseName, OptionalExtension};
use std::fmt;
use std::io::Write;
use tracing::{debug, warn};

/// Bytes handed to the blob handle per write call
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Identifies the row a payload is written to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowLocator {
    Offline {
        resource_id: ResourceId,
    },
    Online {
        resource_id: ResourceId,
        publish_tag: PublishTag,
        keep_online: bool,
    },
}

impl RowLocator {
    pub fn offline(resource_id: ResourceId) -> Self {
        RowLocator::Offline { resource_id }
    }

    pub fn online(resource_id: ResourceId, publish_tag: PublishTag, keep_online: bool) -> Self {
        RowLocator::Online {
            resource_id,
            publish_tag,
            keep_online,
        }
    }

    pub fn resource_id(&self) -> ResourceId {
        match *self {
            RowLocator::Offline { resource_id } | RowLocator::Online { resource_id, .. } => {
                resource_id
            }
        }
    }

    pub fn table(&self) -> ContentTable {
        match self {
            RowLocator::Offline { .. } => ContentTable::Offline,
            RowLocator::Online { .. } => ContentTable::Online,
        }
    }
}

impl fmt::Display for RowLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowLocator::Offline { resource_id } => write!(f, "offline content {}", resource_id),
            RowLocator::Online {
                resource_id,
                publish_tag,
                ..
            } => write!(f, "online content {} (tag {})", resource_id, publish_tag),
        }
    }
}

/// Engine capability for the two-phase payload write
///
/// [`write_blob`] is written once against this trait.
pub trait BlobSink {
    /// Writable handle to one row's payload field
    type Handle<'h>: Write
    where
        Self: 'h;

    /// Connection the sink writes through
    fn connection(&self) -> &Connection;

    /// Insert a zero-length placeholder row unless one exists
    fn insert_placeholder(&self, locator: &RowLocator) -> Result<()>;

    /// Lock the row, size its payload field to `len` bytes and open a handle
    ///
    /// Returns `None` when no row matches the locator.
    fn locate_for_write(&self, locator: &RowLocator, len: usize)
        -> Result<Option<Self::Handle<'_>>>;

    /// Stream the payload into an open handle
    fn stream_into(&self, handle: &mut Self::Handle<'_>, payload: &[u8]) -> Result<()> {
        for chunk in payload.chunks(STREAM_CHUNK_SIZE) {
            handle.write_all(chunk)?;
        }
        handle.flush()?;
        Ok(())
    }
}

/// [`BlobSink`] over SQLite incremental blob I/O
pub struct SqliteBlobSink<'c> {
    conn: &'c Connection,
    dialect: &'c dyn StorageDialect,
}

impl<'c> SqliteBlobSink<'c> {
    pub fn new(conn: &'c Connection, dialect: &'c dyn StorageDialect) -> Self {
        SqliteBlobSink { conn, dialect }
    }
}

impl BlobSink for SqliteBlobSink<'_> {
    type Handle<'h> = Blob<'h>
    where
        Self: 'h;

    fn connection(&self) -> &Connection {
        self.conn
    }

    fn insert_placeholder(&self, locator: &RowLocator) -> Result<()> {
        let sql = self.dialect.insert_placeholder(locator.table());
        let inserted = match *locator {
            RowLocator::Offline { resource_id } => self.conn.execute(sql, params![resource_id])?,
            RowLocator::Online {
                resource_id,
                publish_tag,
                keep_online,
            } => self
                .conn
                .execute(sql, params![resource_id, publish_tag, keep_online])?,
        };
        if inserted > 0 {
            debug!("Inserted placeholder row for {}", locator);
        }
        Ok(())
    }

    fn locate_for_write(&self, locator: &RowLocator, len: usize) -> Result<Option<Blob<'_>>> {
        let len = i64::try_from(len).map_err(|_| {
            StoreError::ConfigurationError(format!("payload of {} bytes is too large", len))
        })?;
        let sql = self.dialect.locate_for_update(locator.table());

        let row_id: Option<i64> = match *locator {
            RowLocator::Offline { resource_id } => self
                .conn
                .query_row(sql, params![resource_id, len], |row| row.get(0))
                .optional()?,
            RowLocator::Online {
                resource_id,
                publish_tag,
                ..
            } => self
                .conn
                .query_row(sql, params![resource_id, len, publish_tag], |row| row.get(0))
                .optional()?,
        };

        let Some(row_id) = row_id else {
            return Ok(None);
        };

        let blob = self.conn.blob_open(
            DatabaseName::Main,
            locator.table().name(),
            "content",
            row_id,
            false,
        )?;
        Ok(Some(blob))
    }
}

/// Write `payload` to the row identified by `locator`
///
/// Runs in its own transaction when the connection is in autocommit mode and
/// commits on success. Inside a caller transaction it joins through a
/// savepoint and leaves the commit to the caller.
pub fn write_blob<S: BlobSink>(sink: &S, locator: &RowLocator, payload: &[u8]) -> Result<()> {
    let scope = TransactionScope::begin(sink.connection(), "write_blob")?;

    sink.insert_placeholder(locator)?;

    let Some(mut handle) = sink.locate_for_write(locator, payload.len())? else {
        return Err(StoreError::not_found(locator));
    };
    debug!("Locked {} for a {} byte write", locator, payload.len());

    let streamed = sink.stream_into(&mut handle, payload);
    // Release the handle before the transaction is finalized
    drop(handle);

    match streamed {
        Ok(()) => scope.commit(),
        Err(e) => {
            warn!("Streaming into {} failed, rolling back: {}", locator, e);
            if let Err(rb) = scope.rollback() {
                warn!("Rollback after failed stream into {} failed: {}", locator, rb);
            }
            Err(e)
        }
    }
}
