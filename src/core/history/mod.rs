//! History (backup log) of superseded online content
//!
//! A backup is one row set spread over three record families sharing a
//! fresh [`BackupId`]:
//!
//! - `backup_contents`: the payload bytes
//! - `backup_resources`: the structure snapshot
//! - `backup_properties`: one row per property
//!
//! Backups are created only by [`Session::archive_current`], never updated,
//! and removed only by pruning or by [`Session::delete_history`]. Each of
//! these runs in a single transaction scope across all three families.

mod project;

pub use project::{BackupProjects, HistoricalProject, ProjectSnapshot, PublishedResource};

use crate::core::config::Retention;
use crate::core::connection::Session;
use crate::core::dialect::BackupTable;
use crate::core::ids::{BackupId, PublishTag, ResourceId, VersionId};
use crate::core::transaction::TransactionScope;
use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};
use uuid::Uuid;

/// Structure record of a resource at the time it was archived
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StructureSnapshot {
    pub structure_id: Uuid,
    pub root_path: String,
    pub resource_type: i32,
    pub flags: i32,
    pub date_last_modified: DateTime<Utc>,
    pub user_last_modified: Uuid,
}

/// Property name/value pairs of a resource at the time it was archived
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PropertySnapshot(BTreeMap<String, String>);

impl PropertySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for PropertySnapshot {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        PropertySnapshot(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Caller-supplied structure and properties recorded with a backup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ResourceSnapshot {
    pub structure: StructureSnapshot,
    pub properties: PropertySnapshot,
}

/// Backup metadata (payload not loaded)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    pub backup_id: BackupId,
    pub resource_id: ResourceId,
    /// Tag the archived content had been published under
    pub publish_tag: PublishTag,
    pub version_id: VersionId,
    pub content_length: u64,
    pub structure: StructureSnapshot,
    pub date_archived: DateTime<Utc>,
}

/// A complete backup: metadata, payload and properties
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub metadata: BackupMetadata,
    pub content: Vec<u8>,
    pub properties: PropertySnapshot,
}

const SELECT_BACKUP_METADATA: &str = "
    SELECT r.backup_id, r.resource_id, r.publish_tag, r.version_id, length(c.content),
           r.structure_id, r.root_path, r.resource_type, r.flags,
           r.date_last_modified, r.user_last_modified, r.date_archived
    FROM backup_resources r
    JOIN backup_contents c ON c.backup_id = r.backup_id";

fn metadata_from_row(row: &Row<'_>) -> rusqlite::Result<BackupMetadata> {
    let content_length: i64 = row.get(4)?;
    Ok(BackupMetadata {
        backup_id: row.get(0)?,
        resource_id: row.get(1)?,
        publish_tag: row.get(2)?,
        version_id: row.get(3)?,
        content_length: content_length.max(0) as u64,
        structure: StructureSnapshot {
            structure_id: row.get(5)?,
            root_path: row.get(6)?,
            resource_type: row.get(7)?,
            flags: row.get(8)?,
            date_last_modified: from_millis(row.get(9)?),
            user_last_modified: row.get(10)?,
        },
        date_archived: from_millis(row.get(11)?),
    })
}

pub(crate) fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_default()
}

impl Session<'_> {
    /// Copy the current online content of a resource into a new backup
    ///
    /// The payload is copied inside the database without being loaded.
    /// Fails with `EntryNotFound` if the resource has no online content, and
    /// with `DialectFailure` if the resource already has a backup with
    /// `version_id`.
    pub fn archive_current(
        &self,
        resource_id: ResourceId,
        publish_tag: PublishTag,
        version_id: VersionId,
        snapshot: &ResourceSnapshot,
    ) -> Result<BackupId> {
        let conn = self.connection();
        let scope = TransactionScope::begin(conn, "archive_backup")?;
        let backup_id = BackupId::new();

        let copied = conn.execute(
            "INSERT INTO backup_contents (backup_id, resource_id, publish_tag, version_id, content)
             SELECT ?1, resource_id, ?2, ?3, content FROM online_contents WHERE resource_id = ?4",
            params![backup_id, publish_tag, version_id, resource_id],
        )?;
        if copied == 0 {
            return Err(StoreError::not_found(format!(
                "online content {} to archive",
                resource_id
            )));
        }

        let structure = &snapshot.structure;
        conn.execute(
            "INSERT INTO backup_resources (
                 backup_id, resource_id, structure_id, publish_tag, version_id, root_path,
                 resource_type, flags, date_last_modified, user_last_modified, date_archived
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                backup_id,
                resource_id,
                structure.structure_id,
                publish_tag,
                version_id,
                structure.root_path,
                structure.resource_type,
                structure.flags,
                structure.date_last_modified.timestamp_millis(),
                structure.user_last_modified,
                Utc::now().timestamp_millis(),
            ],
        )?;

        {
            let mut stmt = conn.prepare(
                "INSERT INTO backup_properties
                     (backup_id, resource_id, publish_tag, version_id, name, value)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for (name, value) in snapshot.properties.iter() {
                stmt.execute(params![
                    backup_id,
                    resource_id,
                    publish_tag,
                    version_id,
                    name,
                    value
                ])?;
            }
        }

        conn.execute(
            "INSERT INTO backup_versions (resource_id, last_version) VALUES (?1, ?2)
             ON CONFLICT (resource_id)
             DO UPDATE SET last_version = max(last_version, excluded.last_version)",
            params![resource_id, version_id],
        )?;

        scope.commit()?;
        info!(
            "Archived online content {} as version {} (tag {}, backup {})",
            resource_id, version_id, publish_tag, backup_id
        );
        Ok(backup_id)
    }

    /// All backups of a resource, oldest version first
    ///
    /// Payloads are loaded separately with [`Session::read_backup_content`].
    pub fn list_backups(&self, resource_id: ResourceId) -> Result<Vec<BackupMetadata>> {
        let scope = TransactionScope::begin_read(self.connection(), "list_backups")?;
        let backups = self.backups(resource_id).collect::<Result<Vec<_>>>()?;
        scope.commit()?;
        Ok(backups)
    }

    /// Iterate the backups of a resource, oldest version first
    ///
    /// Each step fetches the next backup after the last one yielded, so
    /// nothing is loaded until the iterator is advanced.
    pub fn backups(&self, resource_id: ResourceId) -> BackupHistory<'_> {
        BackupHistory {
            session: self,
            resource_id,
            after: None,
            done: false,
        }
    }

    fn backup_after(
        &self,
        resource_id: ResourceId,
        after: Option<VersionId>,
    ) -> Result<Option<BackupMetadata>> {
        let after = after.map_or(i64::MIN, VersionId::value);
        Ok(self
            .connection()
            .query_row(
                &format!(
                    "{} WHERE r.resource_id = ?1 AND r.version_id > ?2 \
                     ORDER BY r.version_id ASC LIMIT 1",
                    SELECT_BACKUP_METADATA
                ),
                params![resource_id, after],
                metadata_from_row,
            )
            .optional()?)
    }

    fn backup_properties(&self, backup_id: BackupId) -> Result<PropertySnapshot> {
        let mut stmt = self.connection().prepare(
            "SELECT name, value FROM backup_properties WHERE backup_id = ?1 ORDER BY name",
        )?;
        let properties = stmt
            .query_map(params![backup_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<PropertySnapshot>>()?;
        Ok(properties)
    }

    /// Payload of one backup
    pub fn read_backup_content(&self, backup_id: BackupId) -> Result<Vec<u8>> {
        self.connection()
            .query_row(
                "SELECT content FROM backup_contents WHERE backup_id = ?1",
                params![backup_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| StoreError::not_found(format!("backup {}", backup_id)))
    }

    /// One backup of a resource with payload and properties
    pub fn read_backup(&self, resource_id: ResourceId, version_id: VersionId) -> Result<BackupRecord> {
        let scope = TransactionScope::begin_read(self.connection(), "read_backup")?;

        let metadata = self
            .connection()
            .query_row(
                &format!(
                    "{} WHERE r.resource_id = ?1 AND r.version_id = ?2",
                    SELECT_BACKUP_METADATA
                ),
                params![resource_id, version_id],
                metadata_from_row,
            )
            .optional()?
            .ok_or_else(|| {
                StoreError::not_found(format!("backup of {} version {}", resource_id, version_id))
            })?;

        let content = self.read_backup_content(metadata.backup_id)?;

        let properties = self.backup_properties(metadata.backup_id)?;

        scope.commit()?;
        Ok(BackupRecord {
            metadata,
            content,
            properties,
        })
    }

    /// Highest version ever archived for a resource
    ///
    /// Read from a per-resource counter that pruning and
    /// [`Session::delete_history`] leave in place, so version ids are never
    /// reused.
    pub fn max_version(&self, resource_id: ResourceId) -> Result<Option<VersionId>> {
        Ok(self
            .connection()
            .query_row(
                "SELECT last_version FROM backup_versions WHERE resource_id = ?1",
                params![resource_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Version the next archive of a resource is stored under
    pub fn next_version(&self, resource_id: ResourceId) -> Result<VersionId> {
        match self.max_version(resource_id)? {
            None => Ok(VersionId::FIRST),
            Some(last) => last.next().ok_or_else(|| {
                StoreError::ConfigurationError(format!(
                    "versions of {} exhausted at {}",
                    resource_id, last
                ))
            }),
        }
    }

    /// Remove the oldest backups beyond `max_versions`
    ///
    /// `backups` is the backup list of one resource (as returned by
    /// [`Session::list_backups`]). The `len - max_versions` entries with the
    /// lowest version ids are deleted from all record families in one
    /// transaction. Returns the removed backup ids, oldest first.
    pub fn prune(&self, backups: &[BackupMetadata], max_versions: i64) -> Result<Vec<BackupId>> {
        if max_versions < 0 {
            return Err(StoreError::ConfigurationError(format!(
                "max_versions must be >= 0, got {}",
                max_versions
            )));
        }
        let keep = usize::try_from(max_versions).unwrap_or(usize::MAX);
        let excess = backups.len().saturating_sub(keep);
        if excess == 0 {
            return Ok(Vec::new());
        }

        let mut ordered: Vec<&BackupMetadata> = backups.iter().collect();
        ordered.sort_by_key(|b| b.version_id);
        let victims: Vec<BackupId> = ordered
            .into_iter()
            .take(excess)
            .map(|b| b.backup_id)
            .collect();

        self.delete_backups(&victims)?;
        info!(
            "Pruned {} of {} backups (max_versions={})",
            victims.len(),
            backups.len(),
            max_versions
        );
        Ok(victims)
    }

    /// Prune a resource's backups to the configured retention
    pub fn prune_resource(&self, resource_id: ResourceId) -> Result<Vec<BackupId>> {
        match self.config().retention()? {
            Retention::Unlimited => Ok(Vec::new()),
            Retention::Keep(keep) => {
                let scope = TransactionScope::begin(self.connection(), "prune_resource")?;
                let backups = self.list_backups(resource_id)?;
                let pruned = self.prune(&backups, keep as i64)?;
                scope.commit()?;
                Ok(pruned)
            }
        }
    }

    /// Delete every backup of a resource
    ///
    /// Returns the number of backups removed. The version counter is kept:
    /// later archives continue after the highest version ever used.
    pub fn delete_history(&self, resource_id: ResourceId) -> Result<usize> {
        let conn = self.connection();
        let scope = TransactionScope::begin(conn, "delete_history")?;
        let mut removed = 0;
        for table in BackupTable::ALL {
            let deleted = conn.execute(
                &format!("DELETE FROM {} WHERE resource_id = ?1", table.name()),
                params![resource_id],
            )?;
            if table == BackupTable::Content {
                removed = deleted;
            }
        }
        scope.commit()?;
        info!("Deleted {} backups of {}", removed, resource_id);
        Ok(removed)
    }

    /// Batched multi-family delete of the given backups
    fn delete_backups(&self, victims: &[BackupId]) -> Result<()> {
        let conn = self.connection();
        let dialect = self.dialect();
        let scope = TransactionScope::begin(conn, "prune_backups")?;

        for batch in victims.chunks(dialect.max_batch_size().max(1)) {
            for table in BackupTable::ALL {
                let sql = dialect.delete_backup_batch(table, batch.len());
                let deleted = conn.execute(&sql, params_from_iter(batch.iter()))?;
                debug!("Deleted {} rows from {}", deleted, table.name());
            }
        }

        scope.commit()
    }
}

/// Lazy iterator over one resource's backups, see [`Session::backups`]
pub struct BackupHistory<'a> {
    session: &'a Session<'a>,
    resource_id: ResourceId,
    after: Option<VersionId>,
    done: bool,
}

impl Iterator for BackupHistory<'_> {
    type Item = Result<BackupMetadata>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.session.backup_after(self.resource_id, self.after) {
            Ok(Some(backup)) => {
                self.after = Some(backup.version_id);
                Some(Ok(backup))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
