//! Store resolution and per-store locking.
//!
//! Layout under the configured root:
//!
//! ```text
//! <root>/
//!   global/                    # GLOBAL store
//!   sites/<site>/sandbox/      # SANDBOX store (authoring)
//!   sites/<site>/published/    # PUBLISHED store (clone of sandbox, one branch per environment)
//!   .locks/<site>.<kind>.lock  # cross-process lock files (optional)
//! ```
//!
//! Each physical store has its own mutex. The lock table is populated lazily
//! and entries are never removed for the registry's lifetime.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use git2::{build::RepoBuilder, Repository, RepositoryInitOptions, Tree};
use serde::{Deserialize, Serialize};

use crate::blueprint::Blueprint;
use crate::config::RepositoryConfig;
use crate::error::{Error, Result};
use crate::git::{self, CommitOptions, MASTER};
use crate::identity::IdentityProvider;
use crate::lock::StoreLock;

const GLOBAL_DIR: &str = "global";
const SITES_DIR: &str = "sites";
const LOCKS_DIR: &str = ".locks";
const INITIAL_COMMIT_MESSAGE: &str = "Initial commit";

/// Which of a site's stores an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Global,
    Sandbox,
    Published,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Global => "global",
            StoreKind::Sandbox => "sandbox",
            StoreKind::Published => "published",
        }
    }

    /// Authoring store for a site id; the empty id addresses GLOBAL.
    pub fn for_site(site: &str) -> Self {
        if site.trim().is_empty() {
            StoreKind::Global
        } else {
            StoreKind::Sandbox
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An opened store. Handles are cheap to reopen and are not shared across
/// threads.
pub struct Store {
    site: String,
    kind: StoreKind,
    repo: Repository,
    workdir: PathBuf,
}

impl Store {
    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    pub fn repo(&self) -> &Repository {
        &self.repo
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Snapshot at HEAD.
    pub fn head_tree(&self) -> Result<Tree<'_>> {
        Ok(git::head_commit(&self.repo)?.tree()?)
    }

    /// Directory for sitevault bookkeeping inside the git dir.
    pub fn state_dir(&self) -> PathBuf {
        self.repo.path().join("sitevault")
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("site", &self.site)
            .field("kind", &self.kind)
            .field("workdir", &self.workdir)
            .finish()
    }
}

type StoreKey = (String, StoreKind);

/// Resolves `(site, kind)` to stores and serializes access to each one.
pub struct RepositoryRegistry {
    root: PathBuf,
    lock_timeout_ms: u64,
    cross_process: bool,
    identities: Arc<dyn IdentityProvider>,
    locks: Mutex<HashMap<StoreKey, Arc<Mutex<()>>>>,
}

impl RepositoryRegistry {
    pub fn new(config: &RepositoryConfig, identities: Arc<dyn IdentityProvider>) -> Self {
        Self {
            root: config.root.clone(),
            lock_timeout_ms: config.lock_timeout_ms,
            cross_process: config.cross_process_lock,
            identities,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn identities(&self) -> &Arc<dyn IdentityProvider> {
        &self.identities
    }

    /// On-disk location of a store.
    pub fn store_path(&self, site: &str, kind: StoreKind) -> Result<PathBuf> {
        match kind {
            StoreKind::Global => Ok(self.root.join(GLOBAL_DIR)),
            StoreKind::Sandbox | StoreKind::Published => {
                validate_site(site, kind)?;
                Ok(self.root.join(SITES_DIR).join(site).join(kind.as_str()))
            }
        }
    }

    /// Whether the site's sandbox store exists on disk.
    pub fn site_exists(&self, site: &str) -> bool {
        self.store_path(site, StoreKind::Sandbox)
            .map(|path| path.join(".git").is_dir())
            .unwrap_or(false)
    }

    /// Open a store, creating it on first use.
    pub fn resolve(&self, site: &str, kind: StoreKind) -> Result<Store> {
        let path = self.ensure_store(site, kind)?;
        self.open(site, kind, &path)
    }

    /// Run `f` against the store while holding its mutex.
    ///
    /// The mutex is released on every exit path, including errors and
    /// panics. Internal helpers take `&Store` instead of calling back into the
    /// registry, so one operation never locks the same store twice.
    pub fn with_lock<T, F>(&self, site: &str, kind: StoreKind, f: F) -> Result<T>
    where
        F: FnOnce(&Store) -> Result<T>,
    {
        let path = self.ensure_store(site, kind)?;

        let mutex = self.store_mutex(site, kind);
        let _guard = mutex.lock().unwrap_or_else(PoisonError::into_inner);
        let _file_lock = self.cross_process_lock(site, kind)?;

        let store = self.open(site, kind, &path)?;
        f(&store)
    }

    /// Make sure the store exists on disk, creating it under its own mutex.
    ///
    /// Stores with a born HEAD return without locking. A missing published
    /// store needs its sandbox first, which is created under the sandbox
    /// mutex before the published mutex is taken.
    fn ensure_store(&self, site: &str, kind: StoreKind) -> Result<PathBuf> {
        let path = self.store_path(site, kind)?;
        if store_ready(&path) {
            return Ok(path);
        }

        let sandbox = match kind {
            StoreKind::Published => Some(self.ensure_store(site, StoreKind::Sandbox)?),
            StoreKind::Global | StoreKind::Sandbox => None,
        };

        let mutex = self.store_mutex(site, kind);
        let _guard = mutex.lock().unwrap_or_else(PoisonError::into_inner);
        let _file_lock = self.cross_process_lock(site, kind)?;

        // another caller may have won the race while we waited
        if store_ready(&path) {
            return Ok(path);
        }
        match sandbox {
            Some(sandbox) => self.clone_published(site, &sandbox, &path)?,
            None => self.init_store(site, kind, &path, None)?,
        }
        Ok(path)
    }

    /// Create a site: SANDBOX seeded from `blueprint`, then PUBLISHED cloned
    /// from it.
    pub fn create_site(&self, site: &str, blueprint: Option<&dyn Blueprint>) -> Result<()> {
        let sandbox = self.store_path(site, StoreKind::Sandbox)?;
        let published = self.store_path(site, StoreKind::Published)?;

        let sandbox_mutex = self.store_mutex(site, StoreKind::Sandbox);
        let _sandbox_guard = sandbox_mutex.lock().unwrap_or_else(PoisonError::into_inner);
        let _sandbox_file = self.cross_process_lock(site, StoreKind::Sandbox)?;

        if sandbox.join(".git").is_dir() {
            return Err(Error::SiteExists(site.to_string()));
        }

        let published_mutex = self.store_mutex(site, StoreKind::Published);
        let _published_guard = published_mutex
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let _published_file = self.cross_process_lock(site, StoreKind::Published)?;

        let result = self
            .init_store(site, StoreKind::Sandbox, &sandbox, blueprint)
            .and_then(|_| self.clone_published(site, &sandbox, &published));

        if let Err(err) = &result {
            tracing::error!(site, error = %err, "site creation failed, removing partial stores");
            if let Some(site_dir) = sandbox.parent() {
                if let Err(cleanup) = fs::remove_dir_all(site_dir) {
                    tracing::warn!(site, error = %cleanup, "failed to remove partial site");
                }
            }
        } else {
            tracing::info!(site, "created site");
        }
        result
    }

    /// Remove both of a site's stores. Holds SANDBOX then PUBLISHED.
    pub fn delete_site(&self, site: &str) -> Result<()> {
        let sandbox = self.store_path(site, StoreKind::Sandbox)?;
        let site_dir = sandbox
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| Error::InvalidArgument(format!("invalid site id '{site}'")))?;

        let sandbox_mutex = self.store_mutex(site, StoreKind::Sandbox);
        let _sandbox_guard = sandbox_mutex.lock().unwrap_or_else(PoisonError::into_inner);
        let _sandbox_file = self.cross_process_lock(site, StoreKind::Sandbox)?;
        let published_mutex = self.store_mutex(site, StoreKind::Published);
        let _published_guard = published_mutex
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let _published_file = self.cross_process_lock(site, StoreKind::Published)?;

        if !site_dir.exists() {
            return Err(Error::StoreUnavailable {
                site: site.to_string(),
                kind: StoreKind::Sandbox,
                reason: "site does not exist".to_string(),
            });
        }

        fs::remove_dir_all(&site_dir)?;
        tracing::info!(site, "deleted site");
        Ok(())
    }

    /// Create the GLOBAL store from `blueprint` if missing; otherwise commit
    /// any pending changes in it. Returns true when the store was created.
    pub fn bootstrap_global(&self, blueprint: Option<&dyn Blueprint>) -> Result<bool> {
        let path = self.store_path("", StoreKind::Global)?;
        let mutex = self.store_mutex("", StoreKind::Global);
        let _guard = mutex.lock().unwrap_or_else(PoisonError::into_inner);
        let _file_lock = self.cross_process_lock("", StoreKind::Global)?;

        if !path.join(".git").is_dir() {
            self.init_store("", StoreKind::Global, &path, blueprint)?;
            tracing::info!(path = %path.display(), "bootstrapped global store");
            return Ok(true);
        }

        let store = self.open("", StoreKind::Global, &path)?;
        if git::has_uncommitted_changes(store.repo())? {
            let mut index = store.repo().index()?;
            git::stage_all(&mut index, Path::new(""))?;
            index.write()?;
            let options = CommitOptions {
                allow_empty: false,
                author: Some(self.identities.current_identity()?),
            };
            git::create_commit(store.repo(), "Bootstrap global repository", &options)?;
            tracing::info!("committed pending global changes");
        }
        Ok(false)
    }

    fn store_mutex(&self, site: &str, kind: StoreKind) -> Arc<Mutex<()>> {
        let key = match kind {
            StoreKind::Global => (String::new(), kind),
            _ => (site.to_string(), kind),
        };
        let mut table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(table.entry(key).or_default())
    }

    fn cross_process_lock(&self, site: &str, kind: StoreKind) -> Result<Option<StoreLock>> {
        if !self.cross_process {
            return Ok(None);
        }
        let name = match kind {
            StoreKind::Global => format!("{}.lock", kind.as_str()),
            _ => format!("{site}.{}.lock", kind.as_str()),
        };
        let path = self.root.join(LOCKS_DIR).join(name);
        StoreLock::acquire(&path, self.lock_timeout_ms).map(Some)
    }

    fn open(&self, site: &str, kind: StoreKind, path: &Path) -> Result<Store> {
        let repo = Repository::open(path).map_err(|err| Error::StoreUnavailable {
            site: site.to_string(),
            kind,
            reason: err.message().to_string(),
        })?;
        let workdir = git::workdir(&repo).map_err(|err| Error::StoreUnavailable {
            site: site.to_string(),
            kind,
            reason: err.to_string(),
        })?;
        Ok(Store {
            site: site.to_string(),
            kind,
            repo,
            workdir,
        })
    }

    fn init_store(
        &self,
        site: &str,
        kind: StoreKind,
        path: &Path,
        blueprint: Option<&dyn Blueprint>,
    ) -> Result<()> {
        let unavailable = |reason: String| Error::StoreUnavailable {
            site: site.to_string(),
            kind,
            reason,
        };

        fs::create_dir_all(path).map_err(|err| unavailable(err.to_string()))?;
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head(MASTER);
        let repo = Repository::init_opts(path, &opts)
            .map_err(|err| unavailable(err.message().to_string()))?;

        if let Some(blueprint) = blueprint {
            blueprint.populate(path)?;
        }

        let mut index = repo.index()?;
        git::stage_all(&mut index, Path::new(""))?;
        index.write()?;
        let options = CommitOptions {
            allow_empty: true,
            author: Some(self.identities.current_identity()?),
        };
        git::create_commit(&repo, INITIAL_COMMIT_MESSAGE, &options)?;

        tracing::debug!(site, kind = %kind, path = %path.display(), "initialized store");
        Ok(())
    }

    fn clone_published(&self, site: &str, sandbox: &Path, published: &Path) -> Result<()> {
        let url = sandbox.to_string_lossy().into_owned();
        if let Some(parent) = published.parent() {
            fs::create_dir_all(parent)?;
        }
        RepoBuilder::new()
            .branch(MASTER)
            .clone(&url, published)
            .map_err(|err| Error::StoreUnavailable {
                site: site.to_string(),
                kind: StoreKind::Published,
                reason: err.message().to_string(),
            })?;
        tracing::debug!(site, path = %published.display(), "cloned published store");
        Ok(())
    }
}

/// A store is usable once its HEAD resolves. `init_store` commits last, so a
/// half-initialized repository reads as missing.
fn store_ready(path: &Path) -> bool {
    path.join(".git").is_dir()
        && Repository::open(path)
            .map(|repo| repo.head().is_ok())
            .unwrap_or(false)
}

fn validate_site(site: &str, kind: StoreKind) -> Result<()> {
    let invalid = site.trim().is_empty()
        || site == "."
        || site == ".."
        || site.contains(['/', '\\'])
        || site.starts_with('.');
    if invalid {
        return Err(Error::StoreUnavailable {
            site: site.to_string(),
            kind,
            reason: "invalid site id".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, IdentityConfig};
    use crate::identity::ConfigIdentityProvider;
    use tempfile::TempDir;

    fn registry(temp: &TempDir) -> RepositoryRegistry {
        let config = Config::with_root(temp.path());
        RepositoryRegistry::new(
            &config.repository,
            Arc::new(ConfigIdentityProvider::new(IdentityConfig::default())),
        )
    }

    #[test]
    fn store_kind_for_site() {
        assert_eq!(StoreKind::for_site(""), StoreKind::Global);
        assert_eq!(StoreKind::for_site("s1"), StoreKind::Sandbox);
        assert_eq!(StoreKind::Published.to_string(), "published");
    }

    #[test]
    fn store_paths_follow_layout() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);
        assert_eq!(
            registry.store_path("s1", StoreKind::Sandbox).unwrap(),
            temp.path().join("sites/s1/sandbox")
        );
        assert_eq!(
            registry.store_path("ignored", StoreKind::Global).unwrap(),
            temp.path().join("global")
        );
    }

    #[test]
    fn invalid_site_ids_are_unavailable() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);
        for site in ["", "..", "a/b", ".hidden"] {
            assert!(matches!(
                registry.resolve(site, StoreKind::Sandbox),
                Err(Error::StoreUnavailable { .. })
            ));
        }
    }

    #[test]
    fn resolve_creates_store_with_initial_commit() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);

        let store = registry.resolve("s1", StoreKind::Sandbox).unwrap();
        let head = git::head_commit(store.repo()).unwrap();
        assert_eq!(head.message(), Some("Initial commit"));
        assert_eq!(head.parent_count(), 0);
        assert!(registry.site_exists("s1"));

        // second resolve opens the same store
        let again = registry.resolve("s1", StoreKind::Sandbox).unwrap();
        assert_eq!(git::head_commit(again.repo()).unwrap().id(), head.id());
    }

    #[test]
    fn published_store_is_clone_of_sandbox() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);

        let sandbox = registry.resolve("s1", StoreKind::Sandbox).unwrap();
        let published = registry.resolve("s1", StoreKind::Published).unwrap();
        assert_eq!(
            git::head_commit(sandbox.repo()).unwrap().id(),
            git::head_commit(published.repo()).unwrap().id()
        );
        assert!(published.repo().find_remote(git::ORIGIN).is_ok());
    }

    #[test]
    fn with_lock_runs_closure_and_propagates_errors() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);

        let kind = registry
            .with_lock("s1", StoreKind::Sandbox, |store| Ok(store.kind()))
            .unwrap();
        assert_eq!(kind, StoreKind::Sandbox);

        let result: Result<()> = registry.with_lock("s1", StoreKind::Sandbox, |_| {
            Err(Error::OperationFailed("boom".to_string()))
        });
        assert!(result.is_err());

        // the lock was released on the error path
        assert!(registry
            .with_lock("s1", StoreKind::Sandbox, |_| Ok(()))
            .is_ok());
    }

    #[test]
    fn create_site_twice_fails() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);
        registry.create_site("s1", None).unwrap();
        assert!(matches!(
            registry.create_site("s1", None),
            Err(Error::SiteExists(_))
        ));
    }

    #[test]
    fn bootstrap_global_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let registry = registry(&temp);
        assert!(registry.bootstrap_global(None).unwrap());
        assert!(!registry.bootstrap_global(None).unwrap());
    }
}
