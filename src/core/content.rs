//! Content store operations
//!
//! Offline content has one row per resource which every write replaces in
//! place. Online content has one current row per resource; publishing a new
//! payload either archives the current row into the backup log or discards
//! it, then writes a fresh row under the new publish tag.

use crate::core::blob::{write_blob, RowLocator, SqliteBlobSink};
use crate::core::connection::Session;
use crate::core::dialect::ContentTable;
use crate::core::history::ResourceSnapshot;
use crate::core::ids::{BackupId, ProjectContext, PublishTag, ResourceId};
use crate::core::transaction::TransactionScope;
use crate::error::{Result, StoreError};
use rusqlite::{params, DatabaseName, OptionalExtension};
use std::io::{self, Write};
use tracing::{debug, info};

/// Publish-time write of online content
///
/// Carries the inputs of one online content write. `history_enabled`,
/// `keep_online` and `content_already_current` are decisions of the publish
/// orchestrator and are not re-derived from storage state.
#[derive(Debug, Clone)]
pub struct OnlinePublish<'a> {
    pub resource_id: ResourceId,
    pub payload: &'a [u8],
    pub publish_tag: PublishTag,

    /// Archive (rather than discard) the superseded online content when
    /// history is enabled; also stored as the new row's keep-online marker
    pub keep_online: bool,

    /// Whether the backup log is in use for this publish
    pub history_enabled: bool,

    /// Bytes are unchanged: only move the row to the new publish tag
    pub content_already_current: bool,

    /// Structure and properties recorded with an archived version
    pub snapshot: ResourceSnapshot,
}

impl<'a> OnlinePublish<'a> {
    /// A full content publish with history disabled
    pub fn new(resource_id: ResourceId, payload: &'a [u8], publish_tag: PublishTag) -> Self {
        OnlinePublish {
            resource_id,
            payload,
            publish_tag,
            keep_online: true,
            history_enabled: false,
            content_already_current: false,
            snapshot: ResourceSnapshot::default(),
        }
    }

    pub fn with_history(mut self, enabled: bool) -> Self {
        self.history_enabled = enabled;
        self
    }

    pub fn keep_online(mut self, keep: bool) -> Self {
        self.keep_online = keep;
        self
    }

    pub fn content_already_current(mut self, current: bool) -> Self {
        self.content_already_current = current;
        self
    }

    pub fn with_snapshot(mut self, snapshot: ResourceSnapshot) -> Self {
        self.snapshot = snapshot;
        self
    }
}

/// What `create_online_content` did with the superseded online row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// No online content existed before
    Created,
    /// Prior content was moved into the backup log
    Archived(BackupId),
    /// Prior content was deleted without a backup
    Discarded,
    /// Only the publish tag / keep-online marker changed
    MetadataOnly,
}

/// Publish tag and keep-online marker of the current online row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnlineMarker {
    pub publish_tag: PublishTag,
    pub keep_online: bool,
}

impl Session<'_> {
    /// Create the offline content row of a resource
    ///
    /// One row per resource; calling this twice for the same resource
    /// overwrites the first payload.
    pub fn create_offline_content(&self, resource_id: ResourceId, payload: &[u8]) -> Result<()> {
        debug!(
            "Creating offline content for {} ({} bytes)",
            resource_id,
            payload.len()
        );
        self.write_blob(&RowLocator::offline(resource_id), payload)
    }

    /// Overwrite the offline content of a resource in place
    pub fn write_offline_content(&self, resource_id: ResourceId, payload: &[u8]) -> Result<()> {
        debug!(
            "Writing offline content for {} ({} bytes)",
            resource_id,
            payload.len()
        );
        self.write_blob(&RowLocator::offline(resource_id), payload)
    }

    /// Publish online content
    ///
    /// Runs as one unit of work: archiving or discarding the prior row and
    /// writing the new one either all happen or none do.
    pub fn create_online_content(&self, publish: &OnlinePublish<'_>) -> Result<PublishOutcome> {
        let id = publish.resource_id;
        let scope = TransactionScope::begin(self.connection(), "publish_content")?;
        let current = self.online_marker(id)?;

        if publish.content_already_current {
            if current.is_none() {
                return Err(StoreError::not_found(format!(
                    "online content {} (metadata-only republish)",
                    id
                )));
            }
            self.connection().execute(
                "UPDATE online_contents SET publish_tag = ?2, keep_online = ?3 \
                 WHERE resource_id = ?1",
                params![id, publish.publish_tag, publish.keep_online],
            )?;
            scope.commit()?;
            info!(
                "Republished {} under tag {} without rewriting content",
                id, publish.publish_tag
            );
            return Ok(PublishOutcome::MetadataOnly);
        }

        let outcome = match current {
            None => PublishOutcome::Created,
            Some(prior) if publish.history_enabled && publish.keep_online => {
                let version_id = self.next_version(id)?;
                let backup_id =
                    self.archive_current(id, prior.publish_tag, version_id, &publish.snapshot)?;
                if self.config().history.prune_on_publish {
                    self.prune_resource(id)?;
                }
                PublishOutcome::Archived(backup_id)
            }
            Some(prior) => {
                if publish.history_enabled {
                    info!(
                        "Discarding online content {} (tag {}) without backup: keep_online is false",
                        id, prior.publish_tag
                    );
                }
                PublishOutcome::Discarded
            }
        };

        if current.is_some() {
            self.connection().execute(
                "DELETE FROM online_contents WHERE resource_id = ?1",
                params![id],
            )?;
        }

        self.write_blob(
            &RowLocator::online(id, publish.publish_tag, publish.keep_online),
            publish.payload,
        )?;
        scope.commit()?;

        info!(
            "Published {} bytes for {} under tag {} ({:?})",
            publish.payload.len(),
            id,
            publish.publish_tag,
            outcome
        );
        Ok(outcome)
    }

    /// Read the current content of a resource
    pub fn read_content(&self, resource_id: ResourceId, context: ProjectContext) -> Result<Vec<u8>> {
        let table = ContentTable::from(context);
        self.connection()
            .query_row(
                &format!("SELECT content FROM {} WHERE resource_id = ?1", table.name()),
                params![resource_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found(format!("{} content {}", context, resource_id)))
    }

    /// Stream the current content of a resource into `writer`
    ///
    /// Returns the number of bytes copied.
    pub fn read_content_to<W: Write>(
        &self,
        resource_id: ResourceId,
        context: ProjectContext,
        writer: &mut W,
    ) -> Result<u64> {
        let table = ContentTable::from(context);
        let scope = TransactionScope::begin_read(self.connection(), "read_content")?;

        let row_id: i64 = self
            .connection()
            .query_row(
                &format!("SELECT rowid FROM {} WHERE resource_id = ?1", table.name()),
                params![resource_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found(format!("{} content {}", context, resource_id)))?;

        let mut blob =
            self.connection()
                .blob_open(DatabaseName::Main, table.name(), "content", row_id, true)?;
        let copied = io::copy(&mut blob, writer)?;
        drop(blob);

        scope.commit()?;
        Ok(copied)
    }

    /// Payload length of the current content, if any
    pub fn content_length(
        &self,
        resource_id: ResourceId,
        context: ProjectContext,
    ) -> Result<Option<u64>> {
        let table = ContentTable::from(context);
        let len: Option<i64> = self
            .connection()
            .query_row(
                &format!(
                    "SELECT length(content) FROM {} WHERE resource_id = ?1",
                    table.name()
                ),
                params![resource_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(len.map(|n| n.max(0) as u64))
    }

    /// Delete the current content of a resource
    ///
    /// Deleting content that does not exist is not an error.
    pub fn delete_content(&self, resource_id: ResourceId, context: ProjectContext) -> Result<()> {
        let table = ContentTable::from(context);
        let deleted = self.connection().execute(
            &format!("DELETE FROM {} WHERE resource_id = ?1", table.name()),
            params![resource_id],
        )?;
        if deleted == 0 {
            debug!("No {} content to delete for {}", context, resource_id);
        } else {
            debug!("Deleted {} content for {}", context, resource_id);
        }
        Ok(())
    }

    /// Publish tag and keep-online marker of the current online row
    pub fn online_marker(&self, resource_id: ResourceId) -> Result<Option<OnlineMarker>> {
        Ok(self
            .connection()
            .query_row(
                "SELECT publish_tag, keep_online FROM online_contents WHERE resource_id = ?1",
                params![resource_id],
                |row| {
                    Ok(OnlineMarker {
                        publish_tag: row.get(0)?,
                        keep_online: row.get(1)?,
                    })
                },
            )
            .optional()?)
    }

    fn write_blob(&self, locator: &RowLocator, payload: &[u8]) -> Result<()> {
        let sink = SqliteBlobSink::new(self.connection(), self.dialect());
        write_blob(&sink, locator, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::StoreConfig;
    use crate::core::connection::Connector;
    use crate::core::dialect::SqliteDialect;
    use crate::core::ids::VersionId;
    use tempfile::TempDir;

    fn with_session<F: FnOnce(&Session<'_>)>(f: F) {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig::at(temp_dir.path().join("content.db"));
        let connector = Connector::new(config.clone());
        connector.initialize(&SqliteDialect).unwrap();
        let session = Session::new(connector.open().unwrap(), &SqliteDialect, &config);
        f(&session);
    }

    #[test]
    fn test_offline_create_read_write() {
        with_session(|s| {
            let id = ResourceId::new();
            s.create_offline_content(id, b"draft").unwrap();
            assert_eq!(s.read_content(id, ProjectContext::Offline).unwrap(), b"draft");

            s.write_offline_content(id, b"draft, revised").unwrap();
            assert_eq!(
                s.read_content(id, ProjectContext::Offline).unwrap(),
                b"draft, revised"
            );
            assert_eq!(s.content_length(id, ProjectContext::Offline).unwrap(), Some(14));

            let rows: i64 = s
                .connection()
                .query_row("SELECT count(*) FROM offline_contents", [], |row| row.get(0))
                .unwrap();
            assert_eq!(rows, 1);
        });
    }

    #[test]
    fn test_read_missing_is_not_found() {
        with_session(|s| {
            let err = s
                .read_content(ResourceId::new(), ProjectContext::Online)
                .unwrap_err();
            assert!(err.is_not_found());
            assert_eq!(
                s.content_length(ResourceId::new(), ProjectContext::Online)
                    .unwrap(),
                None
            );
        });
    }

    #[test]
    fn test_contexts_are_independent() {
        with_session(|s| {
            let id = ResourceId::new();
            s.write_offline_content(id, b"working copy").unwrap();
            s.create_online_content(&OnlinePublish::new(id, b"published", PublishTag::new(1)))
                .unwrap();

            assert_eq!(s.read_content(id, ProjectContext::Offline).unwrap(), b"working copy");
            assert_eq!(s.read_content(id, ProjectContext::Online).unwrap(), b"published");

            s.delete_content(id, ProjectContext::Offline).unwrap();
            assert!(s.read_content(id, ProjectContext::Offline).is_err());
            assert_eq!(s.read_content(id, ProjectContext::Online).unwrap(), b"published");
        });
    }

    #[test]
    fn test_publish_without_history_discards() {
        with_session(|s| {
            let id = ResourceId::new();
            let outcome = s
                .create_online_content(&OnlinePublish::new(id, b"A", PublishTag::new(1)))
                .unwrap();
            assert_eq!(outcome, PublishOutcome::Created);

            let outcome = s
                .create_online_content(&OnlinePublish::new(id, b"B", PublishTag::new(2)))
                .unwrap();
            assert_eq!(outcome, PublishOutcome::Discarded);
            assert_eq!(s.read_content(id, ProjectContext::Online).unwrap(), b"B");
            assert!(s.list_backups(id).unwrap().is_empty());
        });
    }

    #[test]
    fn test_publish_with_history_archives() {
        with_session(|s| {
            let id = ResourceId::new();
            s.create_online_content(
                &OnlinePublish::new(id, b"A", PublishTag::new(1)).with_history(true),
            )
            .unwrap();
            let outcome = s
                .create_online_content(
                    &OnlinePublish::new(id, b"B", PublishTag::new(2)).with_history(true),
                )
                .unwrap();
            assert!(matches!(outcome, PublishOutcome::Archived(_)));

            let backups = s.list_backups(id).unwrap();
            assert_eq!(backups.len(), 1);
            assert_eq!(backups[0].publish_tag, PublishTag::new(1));
            assert_eq!(s.read_backup_content(backups[0].backup_id).unwrap(), b"A");
        });
    }

    #[test]
    fn test_history_enabled_without_keep_online_discards() {
        with_session(|s| {
            let id = ResourceId::new();
            s.create_online_content(&OnlinePublish::new(id, b"A", PublishTag::new(1)))
                .unwrap();
            let outcome = s
                .create_online_content(
                    &OnlinePublish::new(id, b"B", PublishTag::new(2))
                        .with_history(true)
                        .keep_online(false),
                )
                .unwrap();
            assert_eq!(outcome, PublishOutcome::Discarded);
            assert!(s.list_backups(id).unwrap().is_empty());
            assert_eq!(
                s.online_marker(id).unwrap().unwrap(),
                OnlineMarker {
                    publish_tag: PublishTag::new(2),
                    keep_online: false
                }
            );
        });
    }

    #[test]
    fn test_metadata_only_republish() {
        with_session(|s| {
            let id = ResourceId::new();
            s.create_online_content(
                &OnlinePublish::new(id, b"same bytes", PublishTag::new(1)).with_history(true),
            )
            .unwrap();

            let outcome = s
                .create_online_content(
                    &OnlinePublish::new(id, b"ignored", PublishTag::new(5))
                        .with_history(true)
                        .content_already_current(true),
                )
                .unwrap();
            assert_eq!(outcome, PublishOutcome::MetadataOnly);
            assert_eq!(s.read_content(id, ProjectContext::Online).unwrap(), b"same bytes");
            assert_eq!(
                s.online_marker(id).unwrap().unwrap().publish_tag,
                PublishTag::new(5)
            );
            assert!(s.list_backups(id).unwrap().is_empty());
        });
    }

    #[test]
    fn test_metadata_only_republish_requires_row() {
        with_session(|s| {
            let err = s
                .create_online_content(
                    &OnlinePublish::new(ResourceId::new(), b"", PublishTag::new(1))
                        .content_already_current(true),
                )
                .unwrap_err();
            assert!(err.is_not_found());
            assert!(s.connection().is_autocommit());
        });
    }

    #[test]
    fn test_read_content_to_writer() {
        with_session(|s| {
            let id = ResourceId::new();
            let payload = vec![42u8; 200_000];
            s.write_offline_content(id, &payload).unwrap();

            let mut out = Vec::new();
            let copied = s
                .read_content_to(id, ProjectContext::Offline, &mut out)
                .unwrap();
            assert_eq!(copied, 200_000);
            assert_eq!(out, payload);
        });
    }

    #[test]
    fn test_delete_missing_is_ok() {
        with_session(|s| {
            s.delete_content(ResourceId::new(), ProjectContext::Online)
                .unwrap();
        });
    }

    #[test]
    fn test_failed_overwrite_after_archive_keeps_prior_version() {
        with_session(|s| {
            let id = ResourceId::new();
            s.create_online_content(
                &OnlinePublish::new(id, b"A", PublishTag::new(1)).with_history(true),
            )
            .unwrap();

            // Fails the new row's placeholder insert, after the archive step ran
            s.connection()
                .execute_batch(
                    "CREATE TEMP TRIGGER reject_online_insert
                     BEFORE INSERT ON online_contents
                     BEGIN SELECT RAISE(ABORT, 'online insert rejected'); END;",
                )
                .unwrap();

            let err = s
                .create_online_content(
                    &OnlinePublish::new(id, b"B", PublishTag::new(2)).with_history(true),
                )
                .unwrap_err();
            assert!(matches!(err, StoreError::DialectFailure(_)));
            assert!(s.connection().is_autocommit());

            s.connection()
                .execute_batch("DROP TRIGGER reject_online_insert")
                .unwrap();
            assert_eq!(s.read_content(id, ProjectContext::Online).unwrap(), b"A");
            assert_eq!(
                s.online_marker(id).unwrap().map(|m| m.publish_tag),
                Some(PublishTag::new(1))
            );
            assert!(s.list_backups(id).unwrap().is_empty());
            assert_eq!(s.max_version(id).unwrap(), None);
        });
    }

    #[test]
    fn test_exhausted_version_counter_rejects_publish() {
        with_session(|s| {
            let id = ResourceId::new();
            s.create_online_content(
                &OnlinePublish::new(id, b"A", PublishTag::new(1)).with_history(true),
            )
            .unwrap();
            s.archive_current(
                id,
                PublishTag::new(1),
                VersionId::new(i64::MAX),
                &ResourceSnapshot::default(),
            )
            .unwrap();

            let err = s
                .create_online_content(
                    &OnlinePublish::new(id, b"B", PublishTag::new(2)).with_history(true),
                )
                .unwrap_err();
            assert!(matches!(err, StoreError::ConfigurationError(_)));
            assert!(s.connection().is_autocommit());
            assert_eq!(s.read_content(id, ProjectContext::Online).unwrap(), b"A");
            assert_eq!(s.list_backups(id).unwrap().len(), 1);
        });
    }
}
