//! Typed change log between two revisions.
//!
//! The range `(from, to]` is walked along first parents, oldest first, and
//! each consecutive pair of snapshots is diffed with rename/copy detection.
//! Placeholder files never show up as operations.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use git2::{Commit, Oid, Repository};
use serde::Serialize;

use crate::config::ChangelogConfig;
use crate::error::{Error, Result};
use crate::git::{self, FileChange, FileStatus, RenameDetection, PLACEHOLDER_FILE};
use crate::history::{first_revision, revisions_between};
use crate::registry::{RepositoryRegistry, StoreKind};

/// Author reported when a revision carries no usable identity.
pub const UNKNOWN_AUTHOR: &str = "N/A";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
    Move,
    Copy,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationKind::Create => "CREATE",
            OperationKind::Update => "UPDATE",
            OperationKind::Delete => "DELETE",
            OperationKind::Move => "MOVE",
            OperationKind::Copy => "COPY",
        };
        f.write_str(name)
    }
}

/// One entry of a change log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepoOperation {
    pub kind: OperationKind,
    /// Affected path; the destination for moves and copies.
    pub path: String,
    /// Source of a move.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_path: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub revision_id: String,
}

/// Computes change logs for a site's authoring store.
#[derive(Clone)]
pub struct ChangeLogBuilder {
    registry: Arc<RepositoryRegistry>,
    detection: RenameDetection,
}

impl ChangeLogBuilder {
    pub fn new(registry: Arc<RepositoryRegistry>, config: &ChangelogConfig) -> Self {
        Self {
            registry,
            detection: RenameDetection {
                threshold: config.rename_threshold,
                copies: config.detect_copies,
            },
        }
    }

    /// Operations in `(from, to]`, oldest first.
    ///
    /// Without `from` the range starts at the first revision and the files of
    /// that revision are reported as creations first.
    pub fn operations_between(
        &self,
        site: &str,
        from: Option<&str>,
        to: &str,
    ) -> Result<Vec<RepoOperation>> {
        let from = from.map(str::trim).filter(|spec| !spec.is_empty());
        let result = self.registry.with_lock(site, StoreKind::for_site(site), |store| {
            operations_in(store.repo(), from, to, self.detection)
        });

        match result {
            Ok(operations) => Ok(operations),
            Err(err @ (Error::StoreUnavailable { .. } | Error::LockFailed(_))) => Err(err),
            Err(err) => {
                tracing::error!(
                    site,
                    from = from.unwrap_or(""),
                    to,
                    error = %err,
                    "failed to compute operations"
                );
                Ok(Vec::new())
            }
        }
    }
}

fn operations_in(
    repo: &Repository,
    from: Option<&str>,
    to: &str,
    detection: RenameDetection,
) -> Result<Vec<RepoOperation>> {
    let to = git::resolve_commit(repo, to)?.id();
    let mut operations = Vec::new();

    let from = match from {
        Some(spec) => git::resolve_commit(repo, spec)?.id(),
        None => {
            let first = repo.find_commit(first_revision(repo)?)?;
            let changes = git::diff_trees(repo, None, Some(&first.tree()?), detection)?;
            operations.extend(classify(&changes, &first));
            first.id()
        }
    };

    if from == to {
        return Ok(operations);
    }

    let mut previous = repo.find_commit(from)?;
    for oid in revisions_between(repo, from, to)? {
        let next = repo.find_commit(oid)?;
        let changes = git::diff_trees(
            repo,
            Some(&previous.tree()?),
            Some(&next.tree()?),
            detection,
        )?;
        operations.extend(classify(&changes, &next));
        previous = next;
    }

    Ok(operations)
}

/// Map diff entries to operations stamped with `revision`.
fn classify(changes: &[FileChange], revision: &Commit<'_>) -> Vec<RepoOperation> {
    let author = author_name(revision);
    let timestamp = git::commit_time_utc(revision);
    let revision_id = revision.id().to_string();

    changes
        .iter()
        .filter(|change| !is_placeholder(&change.path))
        .map(|change| {
            let kind = match change.status {
                FileStatus::Added => OperationKind::Create,
                FileStatus::Modified | FileStatus::TypeChanged => OperationKind::Update,
                FileStatus::Deleted => OperationKind::Delete,
                FileStatus::Renamed => OperationKind::Move,
                FileStatus::Copied => OperationKind::Copy,
            };
            let old_path = match kind {
                OperationKind::Move => change.old_path.as_deref().map(git::site_path),
                _ => None,
            };
            RepoOperation {
                kind,
                path: git::site_path(&change.path),
                old_path,
                timestamp,
                author: author.clone(),
                revision_id: revision_id.clone(),
            }
        })
        .collect()
}

fn author_name(commit: &Commit<'_>) -> String {
    commit
        .committer()
        .name()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(UNKNOWN_AUTHOR)
        .to_string()
}

fn is_placeholder(path: &Path) -> bool {
    path.file_name()
        .map(|name| name == PLACEHOLDER_FILE)
        .unwrap_or(false)
}
