//! Project-level publish history
//!
//! Every publish operation may record a [`HistoricalProject`] row under its
//! publish tag, together with the resources it published. Browsing is
//! project-level: [`Session::backup_projects`] yields the latest record of
//! each project and loads its resource list only when the entry is reached.

use super::from_millis;
use crate::core::connection::Session;
use crate::core::ids::{ProjectId, PublishTag, ResourceId};
use crate::core::transaction::TransactionScope;
use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// One recorded publish of a project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalProject {
    pub publish_tag: PublishTag,
    pub project_id: ProjectId,
    pub name: String,
    pub description: String,
    pub publisher: String,
    pub date_published: DateTime<Utc>,
}

/// A resource published under a recorded publish tag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedResource {
    pub resource_id: ResourceId,
    pub root_path: String,
}

/// A project record with the resources of its publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSnapshot {
    pub project: HistoricalProject,
    pub resources: Vec<PublishedResource>,
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<HistoricalProject> {
    Ok(HistoricalProject {
        publish_tag: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        publisher: row.get(4)?,
        date_published: from_millis(row.get(5)?),
    })
}

impl Session<'_> {
    /// Next unused publish tag (1 on an empty store)
    ///
    /// Considers recorded publishes as well as tags already carried by
    /// online and backup rows.
    pub fn next_publish_tag(&self) -> Result<PublishTag> {
        let max: Option<PublishTag> = self.connection().query_row(
            "SELECT max(tag) FROM (
                 SELECT max(publish_tag) AS tag FROM backup_projects
                 UNION ALL SELECT max(publish_tag) FROM online_contents
                 UNION ALL SELECT max(publish_tag) FROM backup_contents
             )",
            [],
            |row| row.get(0),
        )?;
        match max {
            None => Ok(PublishTag::FIRST),
            Some(tag) => tag.next().ok_or_else(|| {
                StoreError::ConfigurationError(format!("publish tags exhausted at {}", tag))
            }),
        }
    }

    /// Record a publish of `project` and the resources it published
    pub fn record_publish(
        &self,
        project: &HistoricalProject,
        resources: &[PublishedResource],
    ) -> Result<()> {
        let conn = self.connection();
        let scope = TransactionScope::begin(conn, "record_publish")?;

        conn.execute(
            "INSERT INTO backup_projects
                 (publish_tag, project_id, name, description, publisher, date_published)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                project.publish_tag,
                project.project_id,
                project.name,
                project.description,
                project.publisher,
                project.date_published.timestamp_millis(),
            ],
        )?;

        {
            let mut stmt = conn.prepare(
                "INSERT INTO backup_project_resources (publish_tag, resource_id, root_path)
                 VALUES (?1, ?2, ?3)",
            )?;
            for resource in resources {
                stmt.execute(params![
                    project.publish_tag,
                    resource.resource_id,
                    resource.root_path
                ])?;
            }
        }

        scope.commit()?;
        info!(
            "Recorded publish {} of project {} ({} resources)",
            project.publish_tag,
            project.name,
            resources.len()
        );
        Ok(())
    }

    /// Latest publish record of each project, newest first
    pub fn list_backup_projects(&self, limit: usize) -> Result<Vec<HistoricalProject>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.connection().prepare(
            "SELECT p.publish_tag, p.project_id, p.name, p.description, p.publisher,
                    p.date_published
             FROM backup_projects p
             WHERE p.publish_tag = (
                 SELECT max(q.publish_tag) FROM backup_projects q
                 WHERE q.project_id = p.project_id
             )
             ORDER BY p.publish_tag DESC
             LIMIT ?1",
        )?;
        let projects = stmt
            .query_map(params![limit], project_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(projects)
    }

    /// Resources published under `publish_tag`, ordered by path
    pub fn project_resources(&self, publish_tag: PublishTag) -> Result<Vec<PublishedResource>> {
        let mut stmt = self.connection().prepare(
            "SELECT resource_id, root_path FROM backup_project_resources
             WHERE publish_tag = ?1 ORDER BY root_path",
        )?;
        let resources = stmt
            .query_map(params![publish_tag], |row| {
                Ok(PublishedResource {
                    resource_id: row.get(0)?,
                    root_path: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(resources)
    }

    /// Iterate project history, loading each resource list on demand
    pub fn backup_projects(&self, limit: usize) -> Result<BackupProjects<'_>> {
        let projects = self.list_backup_projects(limit)?;
        debug!("Loaded {} historical project records", projects.len());
        Ok(BackupProjects {
            session: self,
            projects: projects.into_iter(),
        })
    }
}

/// Lazy iterator over project history, see [`Session::backup_projects`]
pub struct BackupProjects<'a> {
    session: &'a Session<'a>,
    projects: std::vec::IntoIter<HistoricalProject>,
}

impl Iterator for BackupProjects<'_> {
    type Item = Result<ProjectSnapshot>;

    fn next(&mut self) -> Option<Self::Item> {
        let project = self.projects.next()?;
        Some(
            self.session
                .project_resources(project.publish_tag)
                .map(|resources| ProjectSnapshot { project, resources }),
        )
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.projects.size_hint()
    }
}
