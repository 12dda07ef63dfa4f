//! One handle bundling every service over a shared store registry.

use std::sync::Arc;

use crate::changelog::ChangeLogBuilder;
use crate::config::Config;
use crate::content::ContentOperations;
use crate::deployments::DeploymentHistory;
use crate::history::HistoryReader;
use crate::identity::{ConfigIdentityProvider, IdentityProvider};
use crate::item_lock::ItemLock;
use crate::metadata::MetadataStore;
use crate::publish::PublishPipeline;
use crate::registry::RepositoryRegistry;

/// Content repository over all stores below `config.repository.root`.
#[derive(Clone)]
pub struct ContentRepository {
    config: Config,
    registry: Arc<RepositoryRegistry>,
    content: ContentOperations,
    history: HistoryReader,
    changelog: ChangeLogBuilder,
    publish: PublishPipeline,
    locks: ItemLock,
    deployments: DeploymentHistory,
}

impl ContentRepository {
    /// Build with identities resolved from `config` and an optional actor.
    pub fn open(config: Config, actor: Option<&str>) -> Self {
        let identities =
            Arc::new(ConfigIdentityProvider::new(config.identity.clone()).with_actor(actor));
        Self::with_identities(config, identities)
    }

    pub fn with_identities(config: Config, identities: Arc<dyn IdentityProvider>) -> Self {
        let registry = Arc::new(RepositoryRegistry::new(&config.repository, identities));
        Self::assemble(config, registry, None)
    }

    /// Same repository, with content mutations mirrored into `metadata`.
    pub fn with_metadata(self, metadata: Arc<dyn MetadataStore>) -> Self {
        Self::assemble(self.config, self.registry, Some(metadata))
    }

    fn assemble(
        config: Config,
        registry: Arc<RepositoryRegistry>,
        metadata: Option<Arc<dyn MetadataStore>>,
    ) -> Self {
        let mut content = ContentOperations::new(Arc::clone(&registry));
        if let Some(metadata) = metadata {
            content = content.with_metadata(metadata);
        }
        Self {
            history: HistoryReader::new(Arc::clone(&registry), content.clone()),
            changelog: ChangeLogBuilder::new(Arc::clone(&registry), &config.changelog),
            publish: PublishPipeline::new(Arc::clone(&registry), config.publish.clone()),
            locks: ItemLock::new(Arc::clone(&registry)),
            deployments: DeploymentHistory::new(
                Arc::clone(&registry),
                config.publish.in_progress_suffix.clone(),
            ),
            content,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<RepositoryRegistry> {
        &self.registry
    }

    pub fn content(&self) -> &ContentOperations {
        &self.content
    }

    pub fn history(&self) -> &HistoryReader {
        &self.history
    }

    pub fn changelog(&self) -> &ChangeLogBuilder {
        &self.changelog
    }

    pub fn publish(&self) -> &PublishPipeline {
        &self.publish
    }

    pub fn locks(&self) -> &ItemLock {
        &self.locks
    }

    pub fn deployments(&self) -> &DeploymentHistory {
        &self.deployments
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::InMemoryMetadataStore;
    use tempfile::TempDir;

    #[test]
    fn services_share_one_registry() {
        let temp = TempDir::new().unwrap();
        let repo = ContentRepository::open(Config::with_root(temp.path()), Some("editor"));
        repo.registry().create_site("blog", None).unwrap();

        let revision = repo.content().write("blog", "/index.xml", b"<page/>").unwrap();
        assert!(revision.is_some());
        assert_eq!(
            repo.history().last_revision("blog").unwrap(),
            revision.unwrap()
        );
    }

    #[test]
    fn metadata_is_recorded_after_commit() {
        let temp = TempDir::new().unwrap();
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let repo = ContentRepository::open(Config::with_root(temp.path()), None)
            .with_metadata(metadata.clone());
        repo.registry().create_site("blog", None).unwrap();

        let revision = repo.content().write("blog", "/a.xml", b"a").unwrap().unwrap();
        let record = metadata.get("blog", "/a.xml").unwrap().unwrap();
        assert_eq!(record.commit_id, Some(revision.to_string()));
    }
}
