//! Advisory per-item locks.
//!
//! A lock is a marker file under the store's git directory
//! (`.git/sitevault/locks/<path>.lock`), so snapshots never contain lock
//! artefacts. Locks are cooperative: content operations ignore them.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::git;
use crate::lock::write_atomic;
use crate::registry::{RepositoryRegistry, Store, StoreKind};

const LOCKS_DIR: &str = "locks";
const MARKER_EXTENSION: &str = "lock";

/// Contents of a lock marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMarker {
    pub path: String,
    pub owner: String,
    pub locked_at: DateTime<Utc>,
}

/// Lock/unlock items in a site's sandbox or published store.
#[derive(Clone)]
pub struct ItemLock {
    registry: Arc<RepositoryRegistry>,
}

impl ItemLock {
    pub fn new(registry: Arc<RepositoryRegistry>) -> Self {
        Self { registry }
    }

    /// Lock `path` in the authoring store. Returns false when the path does
    /// not exist or is already locked.
    pub fn lock(&self, site: &str, path: &str) -> Result<bool> {
        self.lock_in(site, StoreKind::for_site(site), path)
    }

    pub fn unlock(&self, site: &str, path: &str) -> Result<()> {
        self.unlock_in(site, StoreKind::for_site(site), path)
    }

    pub fn lock_published(&self, site: &str, path: &str) -> Result<bool> {
        self.lock_in(site, StoreKind::Published, path)
    }

    pub fn unlock_published(&self, site: &str, path: &str) -> Result<()> {
        self.unlock_in(site, StoreKind::Published, path)
    }

    /// Current holder of the lock on `path`, if any.
    pub fn lock_owner(&self, site: &str, path: &str) -> Result<Option<LockMarker>> {
        let rel = git::git_path(path)?;
        self.registry
            .with_lock(site, StoreKind::for_site(site), |store| read_marker(store, &rel))
    }

    pub fn lock_in(&self, site: &str, kind: StoreKind, path: &str) -> Result<bool> {
        let rel = git::git_path(path)?;
        let owner = self.registry.identities().current_identity()?.name;

        self.registry.with_lock(site, kind, |store| {
            if git::entry_at(&store.head_tree()?, &rel)?.is_none() {
                tracing::debug!(site, path, "lock requested for missing item");
                return Ok(false);
            }

            let marker_path = marker_path(store, &rel);
            if marker_path.exists() {
                tracing::debug!(site, path, "item already locked");
                return Ok(false);
            }

            let marker = LockMarker {
                path: git::site_path(&rel),
                owner,
                locked_at: Utc::now(),
            };
            write_atomic(&marker_path, &serde_json::to_vec_pretty(&marker)?)?;
            tracing::debug!(site, path, owner = %marker.owner, "locked item");
            Ok(true)
        })
    }

    /// Remove the lock on `path`. Unlocking an unlocked item is a no-op.
    pub fn unlock_in(&self, site: &str, kind: StoreKind, path: &str) -> Result<()> {
        let rel = git::git_path(path)?;
        self.registry.with_lock(site, kind, |store| {
            let marker_path = marker_path(store, &rel);
            match fs::remove_file(&marker_path) {
                Ok(()) => {
                    tracing::debug!(site, path, "unlocked item");
                    prune_empty_dirs(&marker_path, &store.state_dir().join(LOCKS_DIR));
                    Ok(())
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(err.into()),
            }
        })
    }
}

fn marker_path(store: &Store, rel: &Path) -> PathBuf {
    let mut marker = store.state_dir().join(LOCKS_DIR).join(rel);
    let file_name = marker
        .file_name()
        .map(|name| format!("{}.{MARKER_EXTENSION}", name.to_string_lossy()))
        .unwrap_or_else(|| format!("root.{MARKER_EXTENSION}"));
    marker.set_file_name(file_name);
    marker
}

fn read_marker(store: &Store, rel: &Path) -> Result<Option<LockMarker>> {
    let marker_path = marker_path(store, rel);
    match fs::read(&marker_path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Remove now-empty marker directories up to (not including) `stop`.
fn prune_empty_dirs(marker: &Path, stop: &Path) {
    let mut current = marker.parent();
    while let Some(dir) = current {
        if dir == stop || !dir.starts_with(stop) || fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}
