#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::{Oid, Repository};
use sitevault::config::Config;
use sitevault::identity::ConfigIdentityProvider;
use sitevault::registry::StoreKind;
use sitevault::ContentRepository;
use tempfile::TempDir;

pub const SITE: &str = "s1";

pub struct TestVault {
    dir: TempDir,
    vault: ContentRepository,
}

impl TestVault {
    /// Empty root, no sites.
    pub fn new() -> Self {
        Self::with_actor("admin")
    }

    pub fn with_actor(actor: &str) -> Self {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let config = Config::with_root(dir.path().join("repos"));
        let identities = Arc::new(
            ConfigIdentityProvider::new(config.identity.clone()).with_actor(Some(actor)),
        );
        let vault = ContentRepository::with_identities(config, identities);
        Self { dir, vault }
    }

    /// Root with site [`SITE`] created.
    pub fn with_site() -> Self {
        let vault = Self::new();
        vault
            .vault
            .registry()
            .create_site(SITE, None)
            .expect("create site");
        vault
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn root(&self) -> PathBuf {
        self.dir.path().join("repos")
    }

    pub fn vault(&self) -> &ContentRepository {
        &self.vault
    }

    /// Same root, different acting user.
    pub fn as_actor(&self, actor: &str) -> ContentRepository {
        let config = self.vault.config().clone();
        ContentRepository::open(config, Some(actor))
    }

    pub fn write(&self, path: &str, content: &str) -> Oid {
        self.vault
            .content()
            .write(SITE, path, content.as_bytes())
            .expect("write")
            .expect("revision")
    }

    pub fn read(&self, path: &str) -> String {
        let bytes = self.vault.content().read(SITE, path).expect("read");
        String::from_utf8(bytes).expect("utf8")
    }

    pub fn store(&self, kind: StoreKind) -> Repository {
        let path = self
            .vault
            .registry()
            .store_path(SITE, kind)
            .expect("store path");
        Repository::open(path).expect("open store")
    }

    pub fn sandbox_head(&self) -> Oid {
        self.vault.history().last_revision(SITE).expect("head")
    }

    /// Content of `path` on `branch` of the published store.
    pub fn published_content(&self, branch: &str, path: &str) -> Option<String> {
        let repo = self.store(StoreKind::Published);
        let tip = repo
            .find_branch(branch, git2::BranchType::Local)
            .ok()?
            .get()
            .peel_to_commit()
            .ok()?;
        let entry = tip.tree().ok()?.get_path(Path::new(path.trim_start_matches('/'))).ok()?;
        let blob = repo.find_blob(entry.id()).ok()?;
        Some(String::from_utf8_lossy(blob.content()).into_owned())
    }
}
