//! Deployment history queries over the published store's environment
//! branches.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use git2::{Repository, Sort};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::git::{self, RenameDetection, MASTER};
use crate::refs;
use crate::registry::{RepositoryRegistry, StoreKind};

/// One file deployed to one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentRecord {
    pub site: String,
    pub path: String,
    pub sync_date: DateTime<Utc>,
    pub user: String,
    pub environment: String,
}

/// Glob-based path predicate for deployment queries.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    patterns: Vec<glob::Pattern>,
}

impl PathFilter {
    /// Accept every path.
    pub fn any() -> Self {
        Self::default()
    }

    /// Accept paths matching at least one pattern (e.g. `/site/website/**`).
    pub fn globs<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|pattern| {
                let pattern = pattern.as_ref();
                glob::Pattern::new(pattern).map_err(|err| {
                    Error::InvalidArgument(format!("invalid path pattern '{pattern}': {err}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn accept(&self, path: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|pattern| pattern.matches(path))
    }
}

/// Reads deployment history from a site's published store.
#[derive(Clone)]
pub struct DeploymentHistory {
    registry: Arc<RepositoryRegistry>,
    in_progress_suffix: String,
}

impl DeploymentHistory {
    pub fn new(registry: Arc<RepositoryRegistry>, in_progress_suffix: impl Into<String>) -> Self {
        Self {
            registry,
            in_progress_suffix: in_progress_suffix.into(),
        }
    }

    /// Files deployed between `from` and `to` (inclusive), newest commits
    /// first per environment, at most `limit` records.
    pub fn deployment_history(
        &self,
        site: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        filter: &PathFilter,
        limit: usize,
    ) -> Result<Vec<DeploymentRecord>> {
        let result = self.registry.with_lock(site, StoreKind::Published, |store| {
            let repo = store.repo();
            let mut records = Vec::new();

            for environment in self.environments(repo)? {
                if records.len() >= limit {
                    break;
                }
                let Some(tip) = refs::local_branch_tip(repo, &environment)? else {
                    continue;
                };

                let mut revwalk = repo.revwalk()?;
                revwalk.push(tip)?;
                revwalk.set_sorting(Sort::TIME)?;

                for oid in revwalk {
                    if records.len() >= limit {
                        break;
                    }
                    let commit = repo.find_commit(oid?)?;
                    let sync_date = git::commit_time_utc(&commit);
                    if sync_date < from || sync_date > to {
                        continue;
                    }

                    let user = commit.author().name().unwrap_or_default().to_string();
                    for file in files_in_commit(repo, &commit)? {
                        if records.len() >= limit {
                            break;
                        }
                        let name = Path::new(&file)
                            .file_name()
                            .map(|name| name.to_string_lossy().into_owned())
                            .unwrap_or_default();
                        if git::is_ignored_name(&name) || !filter.accept(&file) {
                            continue;
                        }
                        records.push(DeploymentRecord {
                            site: site.to_string(),
                            path: file,
                            sync_date,
                            user: user.clone(),
                            environment: environment.clone(),
                        });
                    }
                }
            }
            Ok(records)
        });

        match result {
            Ok(records) => Ok(records),
            Err(err @ (Error::StoreUnavailable { .. } | Error::LockFailed(_))) => Err(err),
            Err(err) => {
                tracing::error!(site, error = %err, "failed to read deployment history");
                Ok(Vec::new())
            }
        }
    }

    /// Newest commit time on any environment branch that changed `path`.
    pub fn last_deployment_date(&self, site: &str, path: &str) -> Result<Option<DateTime<Utc>>> {
        let rel = git::git_path(path)?;
        let result = self.registry.with_lock(site, StoreKind::Published, |store| {
            let repo = store.repo();
            let mut newest: Option<DateTime<Utc>> = None;
            for environment in self.environments(repo)? {
                let Some(tip) = refs::local_branch_tip(repo, &environment)? else {
                    continue;
                };
                if let Some(oid) = git::last_commit_touching(repo, tip, &rel)? {
                    let date = git::commit_time_utc(&repo.find_commit(oid)?);
                    newest = Some(newest.map_or(date, |current| current.max(date)));
                }
            }
            Ok(newest)
        });

        match result {
            Ok(date) => Ok(date),
            Err(err @ (Error::StoreUnavailable { .. } | Error::LockFailed(_))) => Err(err),
            Err(err) => {
                tracing::error!(site, path, error = %err, "failed to read last deployment date");
                Ok(None)
            }
        }
    }

    /// Sandbox revision that the newest `environment` commit touching `path`
    /// was published from.
    ///
    /// Publish commits carry their source revisions in the message. When
    /// several are listed, the one holding the same content at `path` wins.
    /// A commit without listed sources is a mirrored sandbox revision and is
    /// returned as is.
    pub fn last_published_revision(
        &self,
        site: &str,
        environment: &str,
        path: &str,
    ) -> Result<Option<String>> {
        let rel = git::git_path(path)?;
        let result = self.registry.with_lock(site, StoreKind::Published, |store| {
            let repo = store.repo();
            let Some(tip) = refs::local_branch_tip(repo, environment)? else {
                return Ok(None);
            };
            let Some(oid) = git::last_commit_touching(repo, tip, &rel)? else {
                return Ok(None);
            };
            let commit = repo.find_commit(oid)?;
            let sources = source_revisions(commit.message().unwrap_or_default());
            if sources.is_empty() {
                return Ok(Some(oid.to_string()));
            }

            let deployed = entry_id(&commit, &rel)?;
            for source in &sources {
                let Ok(candidate) = git::resolve_commit(repo, source) else {
                    continue;
                };
                if entry_id(&candidate, &rel)? == deployed {
                    return Ok(Some(source.clone()));
                }
            }
            Ok(sources.into_iter().next())
        });

        match result {
            Ok(revision) => Ok(revision),
            Err(err @ (Error::StoreUnavailable { .. } | Error::LockFailed(_))) => Err(err),
            Err(err) => {
                tracing::error!(
                    site,
                    environment,
                    path,
                    error = %err,
                    "failed to read last published revision"
                );
                Ok(None)
            }
        }
    }

    /// Environment branches: every local branch except master and staging
    /// branches.
    fn environments(&self, repo: &Repository) -> Result<Vec<String>> {
        Ok(refs::list_branches(repo, None)?
            .into_iter()
            .filter(|name| name != MASTER && !name.ends_with(&self.in_progress_suffix))
            .collect())
    }
}

/// Object id at `rel` in the commit's snapshot.
fn entry_id(commit: &git2::Commit<'_>, rel: &Path) -> Result<Option<git2::Oid>> {
    let tree = commit.tree()?;
    let id = git::entry_at(&tree, rel)?.map(|entry| entry.id());
    Ok(id)
}

const SOURCES_BEGIN: &str = "Commit ID begin:";
const SOURCES_END: &str = "Commit ID end.";

/// Full commit ids listed in a publish message, in order. Looks between the
/// begin/end markers when present, otherwise at the whole message.
fn source_revisions(message: &str) -> Vec<String> {
    let block = match message.find(SOURCES_BEGIN) {
        Some(start) => {
            let rest = &message[start + SOURCES_BEGIN.len()..];
            rest.find(SOURCES_END).map_or(rest, |end| &rest[..end])
        }
        None => message,
    };

    let mut revisions: Vec<String> = Vec::new();
    for token in block.split(|c: char| !c.is_ascii_hexdigit()) {
        if token.len() == 40 && !revisions.iter().any(|seen| seen == token) {
            revisions.push(token.to_ascii_lowercase());
        }
    }
    revisions
}

/// `/`-rooted paths a commit changed relative to its first parent.
fn files_in_commit(repo: &Repository, commit: &git2::Commit<'_>) -> Result<Vec<String>> {
    let tree = commit.tree()?;
    let parent_tree = match commit.parent_count() {
        0 => None,
        _ => Some(commit.parent(0)?.tree()?),
    };
    let detection = RenameDetection {
        threshold: 100,
        copies: false,
    };
    let changes = git::diff_trees(repo, parent_tree.as_ref(), Some(&tree), detection)?;
    Ok(changes
        .iter()
        .map(|change| git::site_path(&change.path))
        .collect())
}
