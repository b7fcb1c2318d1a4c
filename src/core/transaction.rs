//! Transaction scopes
//!
//! A [`TransactionScope`] is opened at the start of every unit of work. If
//! the connection is in autocommit mode the scope owns a real transaction
//! (`BEGIN ... COMMIT`). If a caller already opened one, the scope joins it
//! through a `SAVEPOINT` instead: finishing the scope releases or rolls back
//! to the savepoint and never commits or rolls back the caller's transaction.
//!
//! Scopes are consumed by [`TransactionScope::commit`] or
//! [`TransactionScope::rollback`]. A scope dropped without either is rolled
//! back, so early returns through `?` leave the connection the way they found
//! it.

use crate::error::Result;
use rusqlite::Connection;
use tracing::{debug, warn};

/// How a scope was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ownership {
    /// Opened with `BEGIN`; finishing it restores autocommit
    Owned,
    /// Joined a caller transaction through a named savepoint
    Nested(&'static str),
}

/// Lock intent when the scope owns the transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// `BEGIN IMMEDIATE`: take the write lock up front
    Write,
    /// `BEGIN DEFERRED`: a consistent read snapshot
    Read,
}

/// A unit of work on one connection
#[must_use = "a scope that is dropped without commit() is rolled back"]
pub struct TransactionScope<'c> {
    conn: &'c Connection,
    ownership: Ownership,
    finished: bool,
}

impl<'c> TransactionScope<'c> {
    /// Begin a write scope; `label` names the savepoint when nested
    ///
    /// `label` must be a plain SQL identifier.
    pub fn begin(conn: &'c Connection, label: &'static str) -> Result<Self> {
        Self::begin_with(conn, label, Intent::Write)
    }

    /// Begin a read scope
    pub fn begin_read(conn: &'c Connection, label: &'static str) -> Result<Self> {
        Self::begin_with(conn, label, Intent::Read)
    }

    pub fn begin_with(conn: &'c Connection, label: &'static str, intent: Intent) -> Result<Self> {
        let ownership = if conn.is_autocommit() {
            let sql = match intent {
                Intent::Write => "BEGIN IMMEDIATE",
                Intent::Read => "BEGIN DEFERRED",
            };
            conn.execute_batch(sql)?;
            debug!("{}: began transaction ({:?})", label, intent);
            Ownership::Owned
        } else {
            conn.execute_batch(&format!("SAVEPOINT {}", label))?;
            debug!("{}: joined caller transaction via savepoint", label);
            Ownership::Nested(label)
        };

        Ok(TransactionScope {
            conn,
            ownership,
            finished: false,
        })
    }

    /// True if this scope opened the transaction (and will finalize it)
    pub fn owns_transaction(&self) -> bool {
        self.ownership == Ownership::Owned
    }

    /// Connection the scope runs on
    pub fn connection(&self) -> &'c Connection {
        self.conn
    }

    /// Commit an owned transaction, or release the savepoint of a nested one
    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        match self.ownership {
            Ownership::Owned => {
                if let Err(e) = self.conn.execute_batch("COMMIT") {
                    // A failed COMMIT (e.g. SQLITE_BUSY) leaves the transaction open
                    if !self.conn.is_autocommit() {
                        if let Err(rb) = self.conn.execute_batch("ROLLBACK") {
                            warn!("Rollback after failed commit also failed: {}", rb);
                        }
                    }
                    return Err(e.into());
                }
                debug_assert!(self.conn.is_autocommit());
                Ok(())
            }
            Ownership::Nested(label) => {
                self.conn.execute_batch(&format!("RELEASE {}", label))?;
                Ok(())
            }
        }
    }

    /// Roll back an owned transaction, or roll back to the savepoint of a
    /// nested one (the caller's transaction stays open)
    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.undo()
    }

    fn undo(&self) -> Result<()> {
        match self.ownership {
            Ownership::Owned => {
                // SQLite may already have rolled back on its own (e.g. SQLITE_FULL)
                if !self.conn.is_autocommit() {
                    self.conn.execute_batch("ROLLBACK")?;
                }
                debug_assert!(self.conn.is_autocommit());
            }
            Ownership::Nested(label) => {
                self.conn
                    .execute_batch(&format!("ROLLBACK TO {label}; RELEASE {label}"))?;
            }
        }
        Ok(())
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!("Transaction scope dropped without commit, rolling back");
        if let Err(e) = self.undo() {
            warn!("Rollback of abandoned scope failed: {}", e);
        }
    }
}
