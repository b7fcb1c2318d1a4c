//! Connections and sessions
//!
//! Every public store operation runs on a [`Session`]: one freshly opened
//! connection, exclusively owned for the duration of the call and closed
//! when the session is dropped. Nothing is cached between sessions.

use crate::core::config::StoreConfig;
use crate::core::dialect::StorageDialect;
use crate::core::transaction::TransactionScope;
use crate::error::{Result, StoreError};
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info};

/// Opens and configures connections to the store database
#[derive(Debug, Clone)]
pub struct Connector {
    config: StoreConfig,
}

impl Connector {
    pub fn new(config: StoreConfig) -> Self {
        Connector { config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Open a connection with the configured pragmas applied
    pub fn open(&self) -> Result<Connection> {
        let conn = Connection::open_with_flags(
            &self.config.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.busy_timeout(self.config.busy_timeout())?;
        let mode: String = conn.pragma_update_and_check(
            None,
            "journal_mode",
            self.config.journal_mode.pragma_value(),
            |row| row.get(0),
        )?;
        conn.pragma_update(None, "synchronous", self.config.synchronous.pragma_value())?;
        conn.pragma_update(None, "foreign_keys", true)?;

        debug!(
            "Opened connection to {:?} (journal_mode={})",
            self.config.path, mode
        );
        Ok(conn)
    }

    /// Create the schema if missing and check the schema version
    pub fn initialize(&self, dialect: &dyn StorageDialect) -> Result<()> {
        let conn = self.open()?;
        let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version == 0 {
            info!(
                "Creating {} content store schema v{} at {:?}",
                dialect.name(),
                dialect.schema_version(),
                self.config.path
            );
            let scope = TransactionScope::begin(&conn, "initialize_schema")?;
            conn.execute_batch(dialect.schema())?;
            conn.pragma_update(None, "user_version", dialect.schema_version())?;
            scope.commit()?;
        } else if version != dialect.schema_version() {
            return Err(StoreError::ConfigurationError(format!(
                "Schema version mismatch: database has v{}, expected v{}",
                version,
                dialect.schema_version()
            )));
        }

        Ok(())
    }
}

/// One connection, exclusively owned by the operation that opened it
pub struct Session<'s> {
    conn: Connection,
    dialect: &'s dyn StorageDialect,
    config: &'s StoreConfig,
}

impl<'s> Session<'s> {
    pub fn new(conn: Connection, dialect: &'s dyn StorageDialect, config: &'s StoreConfig) -> Self {
        Session {
            conn,
            dialect,
            config,
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn dialect(&self) -> &'s dyn StorageDialect {
        self.dialect
    }

    pub fn config(&self) -> &'s StoreConfig {
        self.config
    }

    /// Open a caller-managed unit of work
    ///
    /// Store operations called while the returned scope is open join it
    /// instead of committing on their own, so the caller can roll back all
    /// of them at once.
    pub fn begin(&self) -> Result<TransactionScope<'_>> {
        TransactionScope::begin(&self.conn, "unit_of_work")
    }
}

impl std::fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("dialect", &self.dialect.name())
            .field("path", &self.config.path)
            .field("autocommit", &self.conn.is_autocommit())
            .finish()
    }
}
