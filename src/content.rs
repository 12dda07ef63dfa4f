//! Content CRUD expressed as working-copy mutation, staging and commit.
//!
//! Every mutating operation runs under the store mutex. A failed mutation is
//! logged and reported as `Ok(None)` (or an empty map for moves); only store
//! resolution, lock contention and caller mistakes surface as errors.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::{Index, ObjectType, Oid};
use serde::Serialize;

use crate::blueprint::copy_tree;
use crate::error::{Error, Result};
use crate::git::{self, CommitOptions, PLACEHOLDER_FILE};
use crate::identity::Identity;
use crate::metadata::{MetadataStore, MetadataUpdate};
use crate::registry::{RepositoryRegistry, Store, StoreKind};

/// One child of a folder.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct RepositoryItem {
    pub name: String,
    pub is_folder: bool,
    /// Parent folder as a `/`-rooted path.
    pub path: String,
}

/// Content operations against a site's authoring store.
#[derive(Clone)]
pub struct ContentOperations {
    registry: Arc<RepositoryRegistry>,
    metadata: Option<Arc<dyn MetadataStore>>,
}

impl ContentOperations {
    pub fn new(registry: Arc<RepositoryRegistry>) -> Self {
        Self {
            registry,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Arc<dyn MetadataStore>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Write `bytes` at `path` and commit `"Wrote content {path}"`.
    pub fn write(&self, site: &str, path: &str, bytes: &[u8]) -> Result<Option<Oid>> {
        let rel = git::git_path(path)?;
        if rel.as_os_str().is_empty() {
            return Err(Error::InvalidArgument("cannot write to the root folder".to_string()));
        }
        let author = self.registry.identities().current_identity()?;

        let result = self.registry.with_lock(site, StoreKind::for_site(site), |store| {
            let target = store.workdir().join(&rel);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&target, bytes)?;
            commit_staged(store, &rel, &format!("Wrote content {path}"), author)
        });

        let revision = degrade(site, "write", path, result)?;
        if let Some(oid) = revision {
            self.record(site, &git::site_path(&rel), MetadataUpdate::commit_id(oid.to_string()));
        }
        Ok(revision)
    }

    /// Create `path/name` backed by a placeholder file.
    pub fn create_folder(&self, site: &str, path: &str, name: &str) -> Result<Option<Oid>> {
        if name.trim().is_empty() || name.contains('/') {
            return Err(Error::InvalidArgument(format!("invalid folder name '{name}'")));
        }
        let folder = git::git_path(path)?.join(name);
        let folder_display = git::site_path(&folder);
        let author = self.registry.identities().current_identity()?;

        let result = self.registry.with_lock(site, StoreKind::for_site(site), |store| {
            let placeholder = store.workdir().join(&folder).join(PLACEHOLDER_FILE);
            fs::create_dir_all(store.workdir().join(&folder))?;
            fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&placeholder)?;
            let message = format!("Created folder {}/{name}", path.trim_end_matches('/'));
            commit_staged(store, &folder, &message, author)
        });

        let revision = degrade(site, "create_folder", &folder_display, result)?;
        if let Some(oid) = revision {
            self.record(site, &folder_display, MetadataUpdate::commit_id(oid.to_string()));
        }
        Ok(revision)
    }

    /// Remove `path` and commit `"Delete file {path}"` under `approver` if
    /// given, else the acting user.
    pub fn delete(&self, site: &str, path: &str, approver: Option<&str>) -> Result<Option<Oid>> {
        let rel = git::git_path(path)?;
        if rel.as_os_str().is_empty() {
            return Err(Error::InvalidArgument("cannot delete the root folder".to_string()));
        }
        let identities = self.registry.identities();
        let author = match approver.filter(|name| !name.trim().is_empty()) {
            Some(name) => identities.identity_for(name)?,
            None => identities.current_identity()?,
        };

        let result = self.registry.with_lock(site, StoreKind::for_site(site), |store| {
            let kind = match git::entry_at(&store.head_tree()?, &rel)? {
                Some(entry) => entry.kind(),
                None => {
                    tracing::warn!(site, path, "delete requested for missing content");
                    return Ok(None);
                }
            };

            let target = store.workdir().join(&rel);
            let mut index = store.repo().index()?;
            git::stage_removal(&mut index, &rel)?;
            if kind == Some(ObjectType::Tree) {
                remove_if_exists(&target)?;
            } else if target.exists() {
                fs::remove_file(&target)?;
            }
            prune_parent(store, &mut index, &rel)?;
            index.write()?;

            let options = CommitOptions {
                allow_empty: false,
                author: Some(author),
            };
            let message = format!("Delete file {path}");
            let commit = git::create_commit(store.repo(), &message, &options)?;
            Ok(Some((commit.oid, kind == Some(ObjectType::Tree))))
        });

        match degrade(site, "delete", path, result)? {
            Some((oid, was_folder)) => {
                let display = git::site_path(&rel);
                self.forget(site, &display, was_folder);
                Ok(Some(oid))
            }
            None => Ok(None),
        }
    }

    /// Move `from` to `to` (or `to/new_name`).
    ///
    /// Returns the committed destination paths, each with the revision that
    /// recorded it. Moving a directory onto an existing file is rejected with
    /// [`Error::InvalidMove`].
    pub fn move_content(
        &self,
        site: &str,
        from: &str,
        to: &str,
        new_name: Option<&str>,
    ) -> Result<BTreeMap<String, Oid>> {
        let from_rel = git::git_path(from)?;
        let mut to_rel = git::git_path(to)?;
        let new_name = new_name.filter(|name| !name.trim().is_empty());
        if let Some(name) = new_name {
            to_rel = to_rel.join(git::git_path(name)?);
        }
        if from_rel.as_os_str().is_empty() || to_rel.as_os_str().is_empty() {
            return Err(Error::InvalidArgument("cannot move the root folder".to_string()));
        }
        let message = match new_name {
            Some(name) => format!("Moving {from} to {}/{name}", to.trim_end_matches('/')),
            None => format!("Moving {from} to {to}"),
        };
        let author = self.registry.identities().current_identity()?;

        let result = self.registry.with_lock(site, StoreKind::for_site(site), |store| {
            let to_rel = move_on_disk(store, from, to, &from_rel, to_rel)?;

            let mut index = store.repo().index()?;
            git::stage_all(&mut index, &to_rel)?;
            git::stage_all(&mut index, &from_rel)?;
            index.write()?;

            let mut committed = Vec::new();
            for added in git::staged_paths_under(store.repo(), &to_rel)? {
                let removed = paired_source(&added, &to_rel, &from_rel);
                let oid = commit_only(store, &index, &added, &removed, &message, &author)?;
                committed.push((added, removed, oid));
            }

            // sources whose destination already held identical content
            let leftover = git::staged_removals_under(store.repo(), &from_rel)?;
            if !leftover.is_empty() {
                let oid = commit_removals(store, &leftover, &message, &author)?;
                for removed in leftover {
                    let added = paired_source(&removed, &from_rel, &to_rel);
                    committed.push((added, removed, oid));
                }
            }

            // the per-path commits consumed the staged move; resync the index
            let mut index = store.repo().index()?;
            index.read_tree(&store.head_tree()?)?;
            index.write()?;
            Ok(committed)
        });

        let committed = match result {
            Ok(committed) => committed,
            Err(err) if surfaces(&err) => return Err(err),
            Err(err) => {
                tracing::error!(site, from, to, error = %err, "move failed");
                return Ok(BTreeMap::new());
            }
        };

        let mut moved = BTreeMap::new();
        for (added, removed, oid) in committed {
            let new_path = git::site_path(&added);
            let old_path = git::site_path(&removed);
            self.rename(site, &old_path, &new_path, oid);
            moved.insert(new_path, oid);
        }
        Ok(moved)
    }

    /// Recursively copy `from` to `to` in a single commit.
    pub fn copy(&self, site: &str, from: &str, to: &str) -> Result<Option<Oid>> {
        let from_rel = git::git_path(from)?;
        let to_rel = git::git_path(to)?;
        if to_rel.as_os_str().is_empty() {
            return Err(Error::InvalidArgument("cannot copy onto the root folder".to_string()));
        }
        let author = self.registry.identities().current_identity()?;

        let result = self.registry.with_lock(site, StoreKind::for_site(site), |store| {
            let source = store.workdir().join(&from_rel);
            if !source.exists() {
                return Err(Error::ContentNotFound {
                    site: site.to_string(),
                    path: from.to_string(),
                });
            }
            copy_tree(&source, &store.workdir().join(&to_rel))?;
            commit_staged(store, &to_rel, &format!("Copying {from} to {to}"), author)
        });

        let revision = degrade(site, "copy", to, result)?;
        if let Some(oid) = revision {
            self.record(site, &git::site_path(&to_rel), MetadataUpdate::commit_id(oid.to_string()));
        }
        Ok(revision)
    }

    /// Whether `path` exists in the tip snapshot. The root always exists.
    pub fn exists(&self, site: &str, path: &str) -> Result<bool> {
        let rel = git::git_path(path)?;
        if rel.as_os_str().is_empty() {
            return Ok(true);
        }
        self.registry.with_lock(site, StoreKind::for_site(site), |store| {
            Ok(git::entry_at(&store.head_tree()?, &rel)?.is_some())
        })
    }

    /// Bytes of `path` in the tip snapshot.
    pub fn read(&self, site: &str, path: &str) -> Result<Vec<u8>> {
        let rel = git::git_path(path)?;
        self.registry.with_lock(site, StoreKind::for_site(site), |store| {
            git::blob_at(store.repo(), &store.head_tree()?, &rel)?.ok_or_else(|| {
                Error::ContentNotFound {
                    site: site.to_string(),
                    path: path.to_string(),
                }
            })
        })
    }

    /// Children of a folder in the tip snapshot, ordered by name, without
    /// control files. Missing folders and files yield an empty list.
    pub fn list_children(&self, site: &str, path: &str) -> Result<Vec<RepositoryItem>> {
        let rel = git::git_path(path)?;
        let result = self.registry.with_lock(site, StoreKind::for_site(site), |store| {
            let repo = store.repo();
            let head = store.head_tree()?;
            let folder = if rel.as_os_str().is_empty() {
                head
            } else {
                match git::entry_at(&head, &rel)? {
                    Some(entry) if entry.kind() == Some(ObjectType::Tree) => {
                        repo.find_tree(entry.id())?
                    }
                    Some(_) => {
                        tracing::warn!(site, path, "children requested for a file");
                        return Ok(Vec::new());
                    }
                    None => return Ok(Vec::new()),
                }
            };

            let parent = git::site_path(&rel);
            let mut items: Vec<RepositoryItem> = folder
                .iter()
                .filter_map(|entry| {
                    let name = entry.name()?.to_string();
                    if git::is_ignored_name(&name) {
                        return None;
                    }
                    Some(RepositoryItem {
                        name,
                        is_folder: entry.kind() == Some(ObjectType::Tree),
                        path: parent.clone(),
                    })
                })
                .collect();
            items.sort();
            Ok(items)
        });

        match result {
            Ok(items) => Ok(items),
            Err(err) if surfaces(&err) => Err(err),
            Err(err) => {
                tracing::error!(site, path, error = %err, "listing children failed");
                Ok(Vec::new())
            }
        }
    }

    fn record(&self, site: &str, path: &str, update: MetadataUpdate) {
        if let Some(metadata) = &self.metadata {
            if let Err(err) = metadata.set_properties(site, path, &update) {
                tracing::warn!(site, path, error = %err, "metadata update failed");
            }
        }
    }

    fn forget(&self, site: &str, path: &str, folder: bool) {
        if let Some(metadata) = &self.metadata {
            let result = if folder {
                metadata.delete_folder(site, path)
            } else {
                metadata.delete(site, path)
            };
            if let Err(err) = result {
                tracing::warn!(site, path, error = %err, "metadata delete failed");
            }
        }
    }

    fn rename(&self, site: &str, old_path: &str, new_path: &str, oid: Oid) {
        if let Some(metadata) = &self.metadata {
            let update = MetadataUpdate {
                renamed: Some(true),
                old_path: Some(Some(old_path.to_string())),
                commit_id: Some(Some(oid.to_string())),
                ..Default::default()
            };
            let result = metadata
                .update_path(site, old_path, new_path)
                .and_then(|_| metadata.set_properties(site, new_path, &update));
            if let Err(err) = result {
                tracing::warn!(site, old_path, new_path, error = %err, "metadata rename failed");
            }
        }
    }
}

/// Errors that reach the caller instead of degrading to "no revision".
fn surfaces(err: &Error) -> bool {
    matches!(
        err,
        Error::StoreUnavailable { .. }
            | Error::ContentNotFound { .. }
            | Error::InvalidArgument(_)
            | Error::InvalidMove { .. }
            | Error::LockFailed(_)
    )
}

fn degrade<T>(site: &str, op: &str, path: &str, result: Result<Option<T>>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(value),
        Err(err) if surfaces(&err) => Err(err),
        Err(err) => {
            tracing::error!(site, op, path, error = %err, "content operation failed");
            Ok(None)
        }
    }
}

/// Stage everything under `rel` and commit it. When the snapshot is already
/// up to date the newest revision that touched `rel` is returned instead.
fn commit_staged(
    store: &Store,
    rel: &Path,
    message: &str,
    author: Identity,
) -> Result<Option<Oid>> {
    let repo = store.repo();
    let mut index = repo.index()?;
    git::stage_all(&mut index, rel)?;
    index.write()?;

    let head = git::head_commit(repo)?;
    if index.write_tree()? == head.tree_id() {
        tracing::debug!(path = %rel.display(), "content unchanged, nothing to commit");
        return git::last_commit_touching(repo, head.id(), rel);
    }

    let options = CommitOptions {
        allow_empty: false,
        author: Some(author),
    };
    Ok(Some(git::create_commit(repo, message, &options)?.oid))
}

/// Commit exactly `added` (from the staged index) and the removal of
/// `removed` on top of HEAD.
fn commit_only(
    store: &Store,
    staged: &Index,
    added: &Path,
    removed: &Path,
    message: &str,
    author: &Identity,
) -> Result<Oid> {
    let repo = store.repo();
    let mut partial = Index::new()?;
    partial.read_tree(&store.head_tree()?)?;

    if removed != added && partial.get_path(removed, 0).is_some() {
        partial.remove_path(removed)?;
    }
    let entry = staged.get_path(added, 0).ok_or_else(|| {
        Error::OperationFailed(format!("'{}' is not staged", added.display()))
    })?;
    partial.add(&entry)?;

    let tree = partial.write_tree_to(repo)?;
    git::commit_tree_on_head(repo, tree, message, author)
}

/// Commit HEAD minus `removed` as a single revision.
fn commit_removals(
    store: &Store,
    removed: &[PathBuf],
    message: &str,
    author: &Identity,
) -> Result<Oid> {
    let repo = store.repo();
    let mut partial = Index::new()?;
    partial.read_tree(&store.head_tree()?)?;
    for path in removed {
        partial.remove_path(path)?;
    }
    let tree = partial.write_tree_to(repo)?;
    git::commit_tree_on_head(repo, tree, message, author)
}

/// Pre-move location of a path that now lives under `to`.
fn paired_source(added: &Path, to: &Path, from: &Path) -> PathBuf {
    match added.strip_prefix(to) {
        Ok(suffix) if suffix.as_os_str().is_empty() => from.to_path_buf(),
        Ok(suffix) => from.join(suffix),
        Err(_) => added.to_path_buf(),
    }
}

/// Perform the filesystem side of a move and return the effective
/// destination (a file moved onto a folder lands inside it).
fn move_on_disk(
    store: &Store,
    from: &str,
    to: &str,
    from_rel: &Path,
    to_rel: PathBuf,
) -> Result<PathBuf> {
    let source = store.workdir().join(from_rel);
    let mut target = store.workdir().join(&to_rel);
    let mut to_rel = to_rel;

    if !source.exists() {
        return Err(Error::ContentNotFound {
            site: store.site().to_string(),
            path: from.to_string(),
        });
    }
    if source == target {
        return Ok(to_rel);
    }
    if target.starts_with(&source) {
        return Err(Error::InvalidMove {
            from: from.to_string(),
            to: to.to_string(),
            reason: "cannot move a folder into itself".to_string(),
        });
    }

    if target.is_file() {
        if source.is_file() {
            fs::rename(&source, &target)?;
        } else {
            tracing::error!(site = store.site(), from, to, "invalid move: folder onto a file");
            return Err(Error::InvalidMove {
                from: from.to_string(),
                to: to.to_string(),
                reason: "cannot replace a file with a folder".to_string(),
            });
        }
    } else if source.is_dir() {
        if target.is_dir() {
            merge_into(&source, &target)?;
            fs::remove_dir_all(&source)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(&source, &target)?;
        }
    } else {
        if target.is_dir() {
            if let Some(name) = from_rel.file_name() {
                to_rel = to_rel.join(name);
                target = target.join(name);
            }
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&source, &target)?;
    }
    Ok(to_rel)
}

/// Move every child of `source` into `target`, merging folders.
fn merge_into(source: &Path, target: &Path) -> Result<()> {
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let dest = target.join(entry.file_name());
        if entry.file_type()?.is_dir() && dest.is_dir() {
            merge_into(&entry.path(), &dest)?;
        } else {
            remove_if_exists(&dest)?;
            fs::rename(entry.path(), &dest)?;
        }
    }
    Ok(())
}

/// After removing `rel`, drop its parent's placeholder when it is the only
/// thing left, or the parent itself when it is empty.
fn prune_parent(store: &Store, index: &mut Index, rel: &Path) -> Result<()> {
    let Some(parent) = rel.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    let parent_dir = store.workdir().join(parent);
    if !parent_dir.is_dir() {
        return Ok(());
    }

    let remaining: Vec<String> = fs::read_dir(&parent_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();

    match remaining.as_slice() {
        [only] if only == PLACEHOLDER_FILE => {
            let placeholder = parent.join(PLACEHOLDER_FILE);
            if index.get_path(&placeholder, 0).is_some() {
                index.remove_path(&placeholder)?;
            }
            fs::remove_dir_all(&parent_dir)?;
        }
        [] => {
            git::stage_removal(index, parent)?;
            fs::remove_dir(&parent_dir)?;
        }
        _ => {}
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)?;
    } else if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}
