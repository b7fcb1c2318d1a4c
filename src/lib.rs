//! # VFS Content Store - Versioned Binary Content for a Virtual File System
//!
//! `vfs-content-store` durably stores the binary payload of VFS resources in
//! SQLite, across two project contexts:
//!
//! - **Offline**: the mutable working copy, one row per resource
//! - **Online**: the published copy, tagged with the publish that wrote it
//!
//! Superseded online content can be archived into a bounded **history**
//! (backup log) that is pruned to a configured number of versions.
//!
//! Every write is a two-phase blob write (placeholder row, then a locked
//! large-object handle the payload is streamed into) inside one transaction:
//! readers never see a row whose payload is missing or truncated.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use vfs_content_store::{ContentStore, ProjectContext, ResourceId, Result};
//!
//! # fn main() -> Result<()> {
//! let store = ContentStore::open_at("content.db")?;
//!
//! let id = ResourceId::new();
//! store.create_offline_content(id, b"<h1>Draft</h1>")?;
//!
//! let bytes = store.read_content(id, ProjectContext::Offline)?;
//! assert_eq!(bytes, b"<h1>Draft</h1>");
//! # Ok(())
//! # }
//! ```
//!
//! ## Publishing with history
//!
//! ```rust,no_run
//! use vfs_content_store::{ContentStoreBuilder, ResourceId, Result};
//!
//! # fn main() -> Result<()> {
//! let store = ContentStoreBuilder::new()
//!     .path("/var/lib/vfs/content.db")
//!     .max_versions(5)
//!     .prune_on_publish(true)
//!     .build()?;
//!
//! let id = ResourceId::new();
//! let tag = store.next_publish_tag()?;
//! store.publish(id, b"v1", tag)?;
//! store.publish(id, b"v2", store.next_publish_tag()?)?;
//!
//! assert_eq!(store.list_backups(id)?.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod error;

pub use crate::core::{
    blob::{BlobSink, RowLocator, SqliteBlobSink},
    config::{HistoryConfig, JournalMode, Retention, StoreConfig, SyncMode},
    connection::{Connector, Session},
    content::{OnlineMarker, OnlinePublish, PublishOutcome},
    dialect::{BackupTable, ContentTable, SqliteDialect, StorageDialect},
    history::{
        BackupHistory, BackupMetadata, BackupProjects, BackupRecord, HistoricalProject,
        ProjectSnapshot, PropertySnapshot, PublishedResource, ResourceSnapshot, StructureSnapshot,
    },
    ids::{BackupId, ProjectContext, ProjectId, PublishTag, ResourceId, VersionId},
    transaction::TransactionScope,
};
pub use crate::error::{Result, StoreError};

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// High-level content store API
///
/// Holds configuration only. Every operation opens its own [`Session`]
/// (one connection, closed when the operation returns), so a store can be
/// shared between threads behind an `Arc`.
///
/// For several operations in one transaction, open a session with
/// [`ContentStore::session`] and wrap the calls in [`Session::begin`].
///
/// # Examples
///
/// ```rust,no_run
/// use vfs_content_store::{ContentStore, ProjectContext, ResourceId, Result};
///
/// # fn main() -> Result<()> {
/// let store = ContentStore::open_at("content.db")?;
/// let id = ResourceId::new();
/// store.write_offline_content(id, b"content")?;
/// let len = store.content_length(id, ProjectContext::Offline)?;
/// assert_eq!(len, Some(7));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ContentStore {
    connector: Connector,
    dialect: Box<dyn StorageDialect>,
}

impl ContentStore {
    /// Open (and if needed create) a store with the SQLite dialect
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::with_dialect(config, Box::new(SqliteDialect))
    }

    /// Open a store at `path` with default settings
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(StoreConfig::at(path))
    }

    /// Open a store with an explicit dialect
    pub fn with_dialect(config: StoreConfig, dialect: Box<dyn StorageDialect>) -> Result<Self> {
        config.validate()?;
        info!(
            "Opening content store at {:?} ({}, history={}, max_versions={})",
            config.path,
            dialect.name(),
            config.history.enabled,
            config.history.max_versions
        );

        let connector = Connector::new(config);
        connector.initialize(dialect.as_ref())?;
        Ok(ContentStore { connector, dialect })
    }

    pub fn config(&self) -> &StoreConfig {
        self.connector.config()
    }

    pub fn dialect(&self) -> &dyn StorageDialect {
        self.dialect.as_ref()
    }

    /// Open a session on a fresh connection
    pub fn session(&self) -> Result<Session<'_>> {
        let conn = self.connector.open()?;
        Ok(Session::new(conn, self.dialect.as_ref(), self.connector.config()))
    }

    /// Create the offline content of a resource
    pub fn create_offline_content(&self, resource_id: ResourceId, payload: &[u8]) -> Result<()> {
        self.session()?.create_offline_content(resource_id, payload)
    }

    /// Overwrite the offline content of a resource
    pub fn write_offline_content(&self, resource_id: ResourceId, payload: &[u8]) -> Result<()> {
        self.session()?.write_offline_content(resource_id, payload)
    }

    /// Publish online content with every decision spelled out by the caller
    pub fn create_online_content(&self, publish: &OnlinePublish<'_>) -> Result<PublishOutcome> {
        self.session()?.create_online_content(publish)
    }

    /// Publish online content, archiving the prior version if history is
    /// enabled in the configuration
    pub fn publish(
        &self,
        resource_id: ResourceId,
        payload: &[u8],
        publish_tag: PublishTag,
    ) -> Result<PublishOutcome> {
        let publish = OnlinePublish::new(resource_id, payload, publish_tag)
            .with_history(self.config().history.enabled);
        self.create_online_content(&publish)
    }

    /// Read the current content of a resource
    pub fn read_content(&self, resource_id: ResourceId, context: ProjectContext) -> Result<Vec<u8>> {
        debug!("Reading {} content {}", context, resource_id);
        self.session()?.read_content(resource_id, context)
    }

    /// Stream the current content of a resource into `writer`
    pub fn read_content_to<W: Write>(
        &self,
        resource_id: ResourceId,
        context: ProjectContext,
        writer: &mut W,
    ) -> Result<u64> {
        self.session()?.read_content_to(resource_id, context, writer)
    }

    pub fn content_length(
        &self,
        resource_id: ResourceId,
        context: ProjectContext,
    ) -> Result<Option<u64>> {
        self.session()?.content_length(resource_id, context)
    }

    pub fn delete_content(&self, resource_id: ResourceId, context: ProjectContext) -> Result<()> {
        self.session()?.delete_content(resource_id, context)
    }

    /// All backups of a resource, oldest version first
    pub fn list_backups(&self, resource_id: ResourceId) -> Result<Vec<BackupMetadata>> {
        self.session()?.list_backups(resource_id)
    }

    pub fn read_backup(&self, resource_id: ResourceId, version_id: VersionId) -> Result<BackupRecord> {
        self.session()?.read_backup(resource_id, version_id)
    }

    pub fn read_backup_content(&self, backup_id: BackupId) -> Result<Vec<u8>> {
        self.session()?.read_backup_content(backup_id)
    }

    /// Remove the oldest of `backups` beyond `max_versions`
    pub fn prune(&self, backups: &[BackupMetadata], max_versions: i64) -> Result<Vec<BackupId>> {
        self.session()?.prune(backups, max_versions)
    }

    /// Prune a resource's backups to the configured retention
    pub fn prune_resource(&self, resource_id: ResourceId) -> Result<Vec<BackupId>> {
        self.session()?.prune_resource(resource_id)
    }

    pub fn delete_history(&self, resource_id: ResourceId) -> Result<usize> {
        self.session()?.delete_history(resource_id)
    }

    pub fn next_publish_tag(&self) -> Result<PublishTag> {
        self.session()?.next_publish_tag()
    }

    pub fn record_publish(
        &self,
        project: &HistoricalProject,
        resources: &[PublishedResource],
    ) -> Result<()> {
        self.session()?.record_publish(project, resources)
    }

    /// Latest publish of each project with its resources, newest first
    ///
    /// Collects [`Session::backup_projects`]; use a session directly to stop
    /// early without loading the remaining resource lists.
    pub fn list_backup_projects(&self, limit: usize) -> Result<Vec<ProjectSnapshot>> {
        let session = self.session()?;
        let projects = session.backup_projects(limit)?.collect();
        projects
    }
}

/// Builder for creating content stores with custom configuration
///
/// # Examples
///
/// ```rust,no_run
/// use vfs_content_store::ContentStoreBuilder;
///
/// # fn main() -> vfs_content_store::Result<()> {
/// let store = ContentStoreBuilder::new()
///     .path("/data/content.db")
///     .history(true)
///     .max_versions(3)
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ContentStoreBuilder {
    config: StoreConfig,
    dialect: Option<Box<dyn StorageDialect>>,
}

impl ContentStoreBuilder {
    /// Create a new ContentStoreBuilder with default settings
    pub fn new() -> Self {
        ContentStoreBuilder {
            config: StoreConfig::default(),
            dialect: None,
        }
    }

    /// Start from an existing configuration (e.g. loaded from TOML)
    pub fn from_config(config: StoreConfig) -> Self {
        ContentStoreBuilder {
            config,
            dialect: None,
        }
    }

    /// Set the database path
    pub fn path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.path = path.into();
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.config.busy_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn journal_mode(mut self, mode: JournalMode) -> Self {
        self.config.journal_mode = mode;
        self
    }

    pub fn synchronous(mut self, mode: SyncMode) -> Self {
        self.config.synchronous = mode;
        self
    }

    /// Enable or disable archiving on publish
    pub fn history(mut self, enabled: bool) -> Self {
        self.config.history.enabled = enabled;
        self
    }

    /// Backups retained per resource (-1 for unlimited)
    pub fn max_versions(mut self, max_versions: i64) -> Self {
        self.config.history.max_versions = max_versions;
        self
    }

    pub fn prune_on_publish(mut self, enabled: bool) -> Self {
        self.config.history.prune_on_publish = enabled;
        self
    }

    /// Use a dialect other than [`SqliteDialect`]
    pub fn dialect<D: StorageDialect + 'static>(mut self, dialect: D) -> Self {
        self.dialect = Some(Box::new(dialect));
        self
    }

    /// Build the ContentStore
    pub fn build(self) -> Result<ContentStore> {
        let dialect = self.dialect.unwrap_or_else(|| Box::new(SqliteDialect));
        ContentStore::with_dialect(self.config, dialect)
    }
}

impl Default for ContentStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
