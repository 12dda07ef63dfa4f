//! Version history, content at a revision, major-version tags and revert.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use git2::{ErrorCode, Oid, Repository, Sort};
use serde::Serialize;

use crate::content::ContentOperations;
use crate::error::{Error, Result};
use crate::git;
use crate::refs;
use crate::registry::{RepositoryRegistry, StoreKind};

/// Timestamp format of major-version tag labels.
pub const VERSION_LABEL_FORMAT: &str = "%Y-%m-%dT%H%M%SZ";

/// One revision that touched a path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionEntry {
    pub revision_id: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl VersionEntry {
    fn from_commit(commit: &git2::Commit<'_>) -> Self {
        Self {
            revision_id: commit.id().to_string(),
            author: commit.author().name().unwrap_or_default().to_string(),
            timestamp: git::commit_time_utc(commit),
            message: commit.message().unwrap_or_default().to_string(),
        }
    }
}

/// Read side of a site's revision graph.
#[derive(Clone)]
pub struct HistoryReader {
    registry: Arc<RepositoryRegistry>,
    content: ContentOperations,
}

impl HistoryReader {
    pub fn new(registry: Arc<RepositoryRegistry>, content: ContentOperations) -> Self {
        Self { registry, content }
    }

    /// Revisions touching `path`, newest first.
    pub fn version_history(&self, site: &str, path: &str) -> Result<Vec<VersionEntry>> {
        let rel = git::git_path(path)?;
        let result = self.registry.with_lock(site, StoreKind::for_site(site), |store| {
            let repo = store.repo();
            let mut revwalk = repo.revwalk()?;
            revwalk.push_head()?;
            revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;

            let mut entries = Vec::new();
            for oid in revwalk {
                let commit = repo.find_commit(oid?)?;
                if git::commit_touches_path(&commit, &rel)? {
                    entries.push(VersionEntry::from_commit(&commit));
                }
            }
            Ok(entries)
        });
        read_or_empty(site, "version_history", path, result)
    }

    /// Bytes of `path` as of `revision`. Reads immutable objects only, so no
    /// store lock is taken.
    pub fn content_at(&self, site: &str, path: &str, revision: &str) -> Result<Vec<u8>> {
        let rel = git::git_path(path)?;
        let store = self.registry.resolve(site, StoreKind::for_site(site))?;
        let commit = git::resolve_commit(store.repo(), revision)?;
        let blob = git::blob_at(store.repo(), &commit.tree()?, &rel)?;
        blob.ok_or_else(|| Error::ContentNotFound {
            site: site.to_string(),
            path: format!("{path}@{revision}"),
        })
    }

    /// Tag the published store's HEAD as a version of `path`.
    ///
    /// Only major versions produce a tag; every commit is already a minor
    /// version, so minor requests return `None`.
    pub fn tag_version(
        &self,
        site: &str,
        path: &str,
        comment: &str,
        major: bool,
    ) -> Result<Option<String>> {
        if !major {
            tracing::info!(site, path, "minor version request ignored");
            return Ok(None);
        }

        let kind = match StoreKind::for_site(site) {
            StoreKind::Global => StoreKind::Global,
            _ => StoreKind::Published,
        };
        let tagger = self.registry.identities().current_identity()?;

        let result = self.registry.with_lock(site, kind, |store| {
            let repo = store.repo();
            let label = Utc::now().format(VERSION_LABEL_FORMAT).to_string();
            let head = git::head_info(repo)?.oid;
            match refs::create_annotated_tag(repo, &label, head, &tagger, comment) {
                Ok(_) => Ok(label),
                Err(Error::Git(err)) if err.code() == ErrorCode::Exists => {
                    tracing::debug!(site, label = %label, "version label already exists");
                    Ok(label)
                }
                Err(err) => Err(err),
            }
        });

        match result {
            Ok(label) => Ok(Some(label)),
            Err(err @ Error::StoreUnavailable { .. }) => Err(err),
            Err(err) => {
                tracing::error!(site, path, error = %err, "failed to create version tag");
                Ok(None)
            }
        }
    }

    /// Shortcut for a major [`tag_version`](Self::tag_version).
    pub fn tag_major_version(
        &self,
        site: &str,
        path: &str,
        comment: &str,
    ) -> Result<Option<String>> {
        self.tag_version(site, path, comment, true)
    }

    /// Re-apply the content of `path` at `revision` as a new commit and tag
    /// a major version. History is never rewritten.
    pub fn revert(
        &self,
        site: &str,
        path: &str,
        revision: &str,
        comment: &str,
    ) -> Result<Option<Oid>> {
        let bytes = self.content_at(site, path, revision)?;
        let revision_id = self.content.write(site, path, &bytes)?;
        if revision_id.is_some() {
            self.tag_major_version(site, path, comment)?;
        }
        Ok(revision_id)
    }

    /// Root revision of the store, reached by following first parents.
    pub fn first_revision(&self, site: &str) -> Result<Oid> {
        self.registry.with_lock(site, StoreKind::for_site(site), |store| {
            first_revision(store.repo())
        })
    }

    /// Revision HEAD points at.
    pub fn last_revision(&self, site: &str) -> Result<Oid> {
        self.registry.with_lock(site, StoreKind::for_site(site), |store| {
            Ok(git::head_info(store.repo())?.oid)
        })
    }

    /// Whether `revision` names a commit in the store.
    pub fn commit_exists(&self, site: &str, revision: &str) -> Result<bool> {
        let store = self.registry.resolve(site, StoreKind::for_site(site))?;
        let found = git::resolve_commit(store.repo(), revision).map(|_| ());
        match found {
            Ok(()) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(Error::Git(err)) if err.code() == ErrorCode::InvalidSpec => Ok(false),
            Err(err) => {
                tracing::info!(site, revision, error = %err, "revision does not resolve");
                Ok(false)
            }
        }
    }

    /// Revisions in `(from, to]` touching `path`, oldest first. `from`
    /// defaults to the first revision and `to` to HEAD.
    pub fn edit_revisions(
        &self,
        site: &str,
        path: &str,
        from: Option<&str>,
        to: Option<&str>,
    ) -> Result<Vec<VersionEntry>> {
        let rel = git::git_path(path)?;
        let result = self.registry.with_lock(site, StoreKind::for_site(site), |store| {
            let repo = store.repo();
            let from = match from {
                Some(spec) => git::resolve_commit(repo, spec)?.id(),
                None => first_revision(repo)?,
            };
            let to = match to {
                Some(spec) => git::resolve_commit(repo, spec)?.id(),
                None => git::head_info(repo)?.oid,
            };
            if from == to {
                return Ok(Vec::new());
            }

            let mut entries = Vec::new();
            for oid in revisions_between(repo, from, to)? {
                let commit = repo.find_commit(oid)?;
                if git::commit_touches_path(&commit, &rel)? {
                    entries.push(VersionEntry::from_commit(&commit));
                }
            }
            Ok(entries)
        });
        read_or_empty(site, "edit_revisions", path, result)
    }
}

/// Follow first parents from HEAD to the root.
pub(crate) fn first_revision(repo: &Repository) -> Result<Oid> {
    let mut commit = git::head_commit(repo)?;
    while commit.parent_count() > 0 {
        commit = commit.parent(0)?;
    }
    Ok(commit.id())
}

/// First-parent revisions in `(from, to]`, oldest first.
pub(crate) fn revisions_between(repo: &Repository, from: Oid, to: Oid) -> Result<Vec<Oid>> {
    let mut revwalk = repo.revwalk()?;
    revwalk.push(to)?;
    revwalk.hide(from)?;
    revwalk.simplify_first_parent()?;
    revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;
    revwalk.map(|oid| oid.map_err(Error::from)).collect()
}

fn read_or_empty<T>(site: &str, op: &str, path: &str, result: Result<Vec<T>>) -> Result<Vec<T>> {
    match result {
        Ok(items) => Ok(items),
        Err(err @ (Error::StoreUnavailable { .. } | Error::LockFailed(_))) => Err(err),
        Err(err) => {
            tracing::error!(site, op, path, error = %err, "history query failed");
            Ok(Vec::new())
        }
    }
}
