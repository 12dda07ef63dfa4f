//! Publish pipeline: promote sandbox content into environment branches of the
//! published store.
//!
//! ```text
//! FETCHING -> SYNC_MASTER -> PREP_ENVIRONMENT -> NEW_BRANCH ---------------------------> DONE
//!                                            \-> STAGING -> AGGREGATE_COMMIT -> TAG -> MERGE -> CLEANUP -> DONE
//! ```
//!
//! Any failure ends in `FAILED` and surfaces as [`Error::Deployment`]. Nothing
//! is rolled back; a leftover in-progress branch is removed by the recovery
//! at the start of the next attempt (`SYNC_MASTER`).

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use git2::{build::CheckoutBuilder, ObjectType, Oid, Repository, TreeWalkMode, TreeWalkResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::PublishConfig;
use crate::error::{Error, Result};
use crate::git::{self, CommitOptions, MASTER, ORIGIN};
use crate::identity::Identity;
use crate::refs;
use crate::registry::{RepositoryRegistry, Store, StoreKind};

/// Timestamp format used in publish tags and the `{datetime}` placeholder.
pub const PUBLISH_TIME_FORMAT: &str = "%Y-%m-%dT%H%M%S%3fZ";

/// One participant in a publish request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentItem {
    /// Site path (`/a/b.xml`).
    pub path: String,
    /// Sandbox revision whose content of `path` is published.
    pub revision: String,
}

impl DeploymentItem {
    pub fn new(path: impl Into<String>, revision: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            revision: revision.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishState {
    Fetching,
    SyncMaster,
    PrepEnvironment,
    NewBranch,
    Staging,
    AggregateCommit,
    Tag,
    Merge,
    Cleanup,
    Done,
    Failed,
}

impl fmt::Display for PublishState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PublishState::Fetching => "FETCHING",
            PublishState::SyncMaster => "SYNC_MASTER",
            PublishState::PrepEnvironment => "PREP_ENVIRONMENT",
            PublishState::NewBranch => "NEW_BRANCH",
            PublishState::Staging => "STAGING",
            PublishState::AggregateCommit => "AGGREGATE_COMMIT",
            PublishState::Tag => "TAG",
            PublishState::Merge => "MERGE",
            PublishState::Cleanup => "CLEANUP",
            PublishState::Done => "DONE",
            PublishState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub request_id: String,
    pub environment: String,
    pub state: PublishState,
    /// Whether the environment branch was created by this request.
    pub new_branch: bool,
    /// Aggregate commit (publish) or environment tip (initial publish).
    pub commit_id: Option<String>,
    pub tag: Option<String>,
    /// Distinct sandbox revisions that contributed content.
    pub source_revisions: Vec<String>,
}

/// Promotes sandbox content into environment branches.
#[derive(Clone)]
pub struct PublishPipeline {
    registry: Arc<RepositoryRegistry>,
    config: PublishConfig,
}

impl PublishPipeline {
    pub fn new(registry: Arc<RepositoryRegistry>, config: PublishConfig) -> Self {
        Self { registry, config }
    }

    /// Name of the staging branch used while publishing to `environment`.
    pub fn in_progress_branch(&self, environment: &str) -> String {
        format!("{environment}{}", self.config.in_progress_suffix)
    }

    /// Publish `items` to `environment` as `author`.
    pub fn publish(
        &self,
        site: &str,
        items: &[DeploymentItem],
        environment: &str,
        author: &str,
        comment: &str,
    ) -> Result<PublishReport> {
        self.validate_environment(environment)?;
        let identity = self.registry.identities().identity_for(author)?;
        let request_id = Uuid::new_v4();
        tracing::info!(%request_id, site, environment, items = items.len(), "publish requested");

        let mut last_commit = String::new();
        let result = self.registry.with_lock(site, StoreKind::Published, |store| {
            let mut run = PublishRun::new(store, &self.config, environment, identity, request_id);
            let outcome = run.publish(items, author, comment);
            last_commit = run.last_commit.clone();
            if outcome.is_err() {
                run.transition(PublishState::Failed);
            }
            outcome
        });

        self.finish(site, environment, &last_commit, request_id, result)
    }

    /// First deployment of an environment: the whole of master is published.
    pub fn initial_publish(
        &self,
        site: &str,
        environment: &str,
        author: &str,
        comment: &str,
    ) -> Result<PublishReport> {
        self.validate_environment(environment)?;
        let identity = self.registry.identities().identity_for(author)?;
        let request_id = Uuid::new_v4();
        tracing::info!(%request_id, site, environment, "initial publish requested");

        let mut last_commit = String::new();
        let result = self.registry.with_lock(site, StoreKind::Published, |store| {
            let mut run = PublishRun::new(store, &self.config, environment, identity, request_id);
            let outcome = run.initial_publish(comment);
            last_commit = run.last_commit.clone();
            if outcome.is_err() {
                run.transition(PublishState::Failed);
            }
            outcome
        });

        self.finish(site, environment, &last_commit, request_id, result)
    }

    fn finish(
        &self,
        site: &str,
        environment: &str,
        last_commit: &str,
        request_id: Uuid,
        result: Result<PublishReport>,
    ) -> Result<PublishReport> {
        match result {
            Ok(report) => {
                tracing::info!(
                    %request_id,
                    site,
                    environment,
                    commit = report.commit_id.as_deref().unwrap_or(""),
                    "publish complete"
                );
                Ok(report)
            }
            Err(err @ Error::Deployment { .. }) => Err(err),
            Err(err) => {
                tracing::error!(%request_id, site, environment, error = %err, "publish failed");
                Err(Error::Deployment {
                    environment: environment.to_string(),
                    commit_id: last_commit.to_string(),
                    reason: err.to_string(),
                })
            }
        }
    }

    fn validate_environment(&self, environment: &str) -> Result<()> {
        let valid = !environment.trim().is_empty()
            && environment != MASTER
            && !environment.ends_with(&self.config.in_progress_suffix)
            && git2::Branch::name_is_valid(environment).unwrap_or(false);
        if valid {
            Ok(())
        } else {
            Err(Error::InvalidArgument(format!(
                "'{environment}' is not a valid environment name"
            )))
        }
    }
}

/// State of one publish request.
struct PublishRun<'a> {
    store: &'a Store,
    config: &'a PublishConfig,
    environment: &'a str,
    in_progress: String,
    author: Identity,
    request_id: Uuid,
    state: PublishState,
    last_commit: String,
}

impl<'a> PublishRun<'a> {
    fn new(
        store: &'a Store,
        config: &'a PublishConfig,
        environment: &'a str,
        author: Identity,
        request_id: Uuid,
    ) -> Self {
        Self {
            store,
            config,
            environment,
            in_progress: format!("{environment}{}", config.in_progress_suffix),
            author,
            request_id,
            state: PublishState::Fetching,
            last_commit: String::new(),
        }
    }

    fn repo(&self) -> &'a Repository {
        self.store.repo()
    }

    fn transition(&mut self, next: PublishState) {
        tracing::debug!(
            request_id = %self.request_id,
            site = self.store.site(),
            environment = self.environment,
            from = %self.state,
            to = %next,
            "publish state"
        );
        self.state = next;
    }

    fn publish(
        &mut self,
        items: &[DeploymentItem],
        author: &str,
        comment: &str,
    ) -> Result<PublishReport> {
        self.fetch()?;
        self.transition(PublishState::SyncMaster);
        self.sync_master()?;

        self.transition(PublishState::PrepEnvironment);
        if self.prepare_environment()? {
            self.transition(PublishState::NewBranch);
            self.transition(PublishState::Done);
            return Ok(self.report(true, None, None, Vec::new()));
        }

        self.transition(PublishState::Staging);
        let sources = self.stage(items)?;

        self.transition(PublishState::AggregateCommit);
        let commit = self.aggregate_commit(author, comment, &sources)?;

        self.transition(PublishState::Tag);
        let message = self
            .repo()
            .find_commit(commit)?
            .message()
            .unwrap_or_default()
            .to_string();
        let tag = self.tag(commit, &message)?;

        self.transition(PublishState::Merge);
        self.merge()?;

        self.transition(PublishState::Cleanup);
        refs::delete_branch(self.repo(), &self.in_progress)?;

        self.transition(PublishState::Done);
        Ok(self.report(false, Some(commit), Some(tag), sources))
    }

    fn initial_publish(&mut self, comment: &str) -> Result<PublishReport> {
        self.fetch()?;
        self.transition(PublishState::SyncMaster);
        self.sync_master()?;

        self.transition(PublishState::PrepEnvironment);
        let repo = self.repo();
        let master = master_tip(repo)?;
        let existed = refs::local_branch_tip(repo, self.environment)?.is_some();
        refs::create_branch_at(repo, self.environment, master, true)?;
        refs::set_upstream(repo, self.environment, MASTER)?;
        refs::checkout_branch(repo, self.environment)?;
        self.last_commit = master.to_string();

        self.transition(PublishState::Tag);
        let tag = self.tag(master, comment)?;

        self.transition(PublishState::Done);
        Ok(self.report(!existed, Some(master), Some(tag), Vec::new()))
    }

    /// FETCHING: bring sandbox objects and refs in; the working copy is untouched.
    fn fetch(&mut self) -> Result<()> {
        let mut remote = self.repo().find_remote(ORIGIN)?;
        remote.fetch(&[] as &[&str], None, None)?;
        Ok(())
    }

    /// SYNC_MASTER: recover from an aborted run, then mirror sandbox master.
    fn sync_master(&mut self) -> Result<()> {
        let repo = self.repo();
        if let Some(current) = refs::current_branch(repo)? {
            if current.ends_with(&self.config.in_progress_suffix) {
                tracing::warn!(
                    request_id = %self.request_id,
                    branch = %current,
                    "resetting stale in-progress branch"
                );
                refs::hard_reset(repo, git::head_info(repo)?.oid)?;
            }
        }

        refs::checkout_branch(repo, MASTER).map_err(|err| Error::Deployment {
            environment: self.environment.to_string(),
            commit_id: self.last_commit.clone(),
            reason: format!("failed to checkout published master: {err}"),
        })?;

        if refs::delete_branch(repo, &self.in_progress)? {
            tracing::warn!(
                request_id = %self.request_id,
                branch = %self.in_progress,
                "deleted leftover in-progress branch"
            );
        }

        self.merge_theirs()
    }

    /// Merge `origin/master` into master, always taking the sandbox tree.
    fn merge_theirs(&mut self) -> Result<()> {
        let repo = self.repo();
        let local = master_tip(repo)?;
        let remote = refs::remote_branch_tip(repo, &format!("{ORIGIN}/{MASTER}"))?;
        if local == remote {
            return Ok(());
        }

        if repo.graph_descendant_of(remote, local)? {
            let mut master = repo.find_reference(&format!("refs/heads/{MASTER}"))?;
            master.set_target(remote, "sitevault: fast-forward master")?;
        } else {
            let local_commit = repo.find_commit(local)?;
            let remote_commit = repo.find_commit(remote)?;
            if local_commit.tree_id() != remote_commit.tree_id() {
                tracing::info!(
                    request_id = %self.request_id,
                    "published master diverged from sandbox, taking sandbox content"
                );
            }
            let tree = remote_commit.tree()?;
            let signature = self.author.signature()?;
            let message = format!("Merge remote-tracking branch '{ORIGIN}/{MASTER}'");
            let parents = if repo.graph_descendant_of(local, remote)? {
                vec![&local_commit]
            } else {
                vec![&local_commit, &remote_commit]
            };
            repo.commit(Some("HEAD"), &signature, &signature, &message, &tree, &parents)?;
        }

        let mut checkout = CheckoutBuilder::new();
        checkout.force().remove_untracked(true);
        repo.checkout_head(Some(&mut checkout))?;
        self.last_commit = master_tip(repo)?.to_string();
        Ok(())
    }

    /// PREP_ENVIRONMENT: checkout the environment branch, creating it from
    /// master when missing. Returns true when the branch was created.
    fn prepare_environment(&mut self) -> Result<bool> {
        let repo = self.repo();
        match refs::checkout_branch(repo, self.environment) {
            Ok(()) => Ok(false),
            Err(Error::ReferenceNotFound(_)) => {
                tracing::info!(
                    request_id = %self.request_id,
                    environment = self.environment,
                    "environment branch not found, creating it from master"
                );
                let master = master_tip(repo)?;
                refs::create_branch_at(repo, self.environment, master, true)?;
                refs::set_upstream(repo, self.environment, MASTER)?;
                refs::checkout_branch(repo, self.environment)?;
                self.last_commit = master.to_string();
                Ok(true)
            }
            Err(err) => Err(err),
        }
    }

    /// STAGING: branch off the environment and import each item's content as
    /// of its source revision. Returns the distinct source revisions.
    fn stage(&mut self, items: &[DeploymentItem]) -> Result<Vec<String>> {
        let repo = self.repo();
        let tip = refs::local_branch_tip(repo, self.environment)?
            .ok_or_else(|| Error::ReferenceNotFound(self.environment.to_string()))?;
        refs::create_branch_at(repo, &self.in_progress, tip, true)?;
        refs::set_upstream(repo, &self.in_progress, self.environment)?;
        refs::checkout_branch(repo, &self.in_progress)?;

        let mut sources: Vec<String> = Vec::new();
        for item in items {
            self.last_commit = item.revision.clone();
            let rel = git::git_path(&item.path)?;
            tracing::debug!(
                request_id = %self.request_id,
                path = %item.path,
                revision = %item.revision,
                "checking out item"
            );
            let source = git::resolve_commit(repo, &item.revision)?;
            checkout_path(repo, &source.tree()?, &rel, self.store.workdir())?;

            let id = source.id().to_string();
            if !sources.contains(&id) {
                sources.push(id);
            }
        }
        Ok(sources)
    }

    /// AGGREGATE_COMMIT: one commit for everything staged.
    fn aggregate_commit(&mut self, author: &str, comment: &str, sources: &[String]) -> Result<Oid> {
        let repo = self.repo();
        let mut index = repo.index()?;
        git::stage_all(&mut index, Path::new(""))?;
        index.write()?;

        let message = render_commit_message(
            &self.config.commit_message,
            author,
            Utc::now(),
            &self.config.source,
            comment,
            sources,
        );
        let options = CommitOptions {
            allow_empty: true,
            author: Some(self.author.clone()),
        };
        let commit = git::create_commit(repo, &message, &options)?;
        self.last_commit = commit.oid.to_string();
        Ok(commit.oid)
    }

    /// TAG: `<commit time>_published_on_<now>`, annotated with `message`.
    fn tag(&mut self, commit: Oid, message: &str) -> Result<String> {
        let repo = self.repo();
        let commit_time = git::commit_time_utc(&repo.find_commit(commit)?);
        let name = publish_tag_name(commit_time, Utc::now());
        refs::create_annotated_tag(repo, &name, commit, &self.author, message)?;
        Ok(name)
    }

    /// MERGE: bring the in-progress branch into the environment branch.
    fn merge(&mut self) -> Result<()> {
        let repo = self.repo();
        refs::checkout_branch(repo, self.environment)?;
        let target = refs::local_branch_tip(repo, self.environment)?
            .ok_or_else(|| Error::ReferenceNotFound(self.environment.to_string()))?;
        let staged = refs::local_branch_tip(repo, &self.in_progress)?
            .ok_or_else(|| Error::ReferenceNotFound(self.in_progress.clone()))?;

        if target == staged || repo.graph_descendant_of(target, staged)? {
            return Ok(());
        }

        if repo.graph_descendant_of(staged, target)? {
            let mut branch = repo.find_reference(&format!("refs/heads/{}", self.environment))?;
            branch.set_target(staged, "sitevault: fast-forward environment")?;
        } else {
            let ours = repo.find_commit(target)?;
            let theirs = repo.find_commit(staged)?;
            let mut merged = repo.merge_commits(&ours, &theirs, None)?;
            if merged.has_conflicts() {
                return Err(Error::OperationFailed(format!(
                    "merging {} into {} produced conflicts",
                    self.in_progress, self.environment
                )));
            }
            let tree = repo.find_tree(merged.write_tree_to(repo)?)?;
            let signature = self.author.signature()?;
            let message = format!("Merge branch '{}' into {}", self.in_progress, self.environment);
            repo.commit(Some("HEAD"), &signature, &signature, &message, &tree, &[&ours, &theirs])?;
        }

        let mut checkout = CheckoutBuilder::new();
        checkout.force().remove_untracked(true);
        repo.checkout_head(Some(&mut checkout))?;
        self.last_commit = git::head_info(repo)?.oid.to_string();
        Ok(())
    }

    fn report(
        &self,
        new_branch: bool,
        commit: Option<Oid>,
        tag: Option<String>,
        source_revisions: Vec<String>,
    ) -> PublishReport {
        PublishReport {
            request_id: self.request_id.to_string(),
            environment: self.environment.to_string(),
            state: self.state,
            new_branch,
            commit_id: commit.map(|oid| oid.to_string()),
            tag,
            source_revisions,
        }
    }
}

fn master_tip(repo: &Repository) -> Result<Oid> {
    refs::local_branch_tip(repo, MASTER)?
        .ok_or_else(|| Error::ReferenceNotFound(MASTER.to_string()))
}

/// Make `rel` in the working copy and index match `tree`; an absent entry
/// becomes a deletion.
fn checkout_path(
    repo: &Repository,
    tree: &git2::Tree<'_>,
    rel: &Path,
    workdir: &Path,
) -> Result<()> {
    if let Some(entry) = git::entry_at(tree, rel)? {
        // literal paths only, so names with glob characters match themselves
        let mut checkout = CheckoutBuilder::new();
        checkout.force().disable_pathspec_match(true);
        if entry.kind() == Some(ObjectType::Tree) {
            let subtree = repo.find_tree(entry.id())?;
            subtree.walk(TreeWalkMode::PreOrder, |dir, child| {
                if child.kind() == Some(ObjectType::Blob) {
                    if let Some(name) = child.name() {
                        checkout.path(rel.join(dir).join(name));
                    }
                }
                TreeWalkResult::Ok
            })?;
            // files the environment has under the folder but the source dropped
            for staged in repo.index()?.iter() {
                let path = String::from_utf8_lossy(&staged.path).into_owned();
                if Path::new(&path).starts_with(rel) {
                    checkout.path(path);
                }
            }
        } else {
            checkout.path(rel);
        }
        repo.checkout_tree(tree.as_object(), Some(&mut checkout))?;
        return Ok(());
    }

    let mut index = repo.index()?;
    let current = index.get_path(rel, 0).is_some();
    git::stage_removal(&mut index, rel)?;
    index.write()?;

    let target = workdir.join(rel);
    if target.is_dir() {
        std::fs::remove_dir_all(&target)?;
    } else if target.exists() {
        std::fs::remove_file(&target)?;
    }
    if !current {
        tracing::debug!(path = %rel.display(), "item absent at source revision and on environment");
    }
    Ok(())
}

/// Fill the aggregate commit message template.
pub fn render_commit_message(
    template: &str,
    username: &str,
    now: DateTime<Utc>,
    source: &str,
    comment: &str,
    revisions: &[String],
) -> String {
    template
        .replace("{username}", username)
        .replace("{datetime}", &now.format(PUBLISH_TIME_FORMAT).to_string())
        .replace("{source}", source)
        .replace("{message}", comment)
        .replace("{commit_id}", revisions.join(" ").trim())
}

/// Tag name for a publish: `<commit time>_published_on_<publish time>`.
pub fn publish_tag_name(commit_time: DateTime<Utc>, published: DateTime<Utc>) -> String {
    format!(
        "{}_published_on_{}",
        commit_time.format(PUBLISH_TIME_FORMAT),
        published.format(PUBLISH_TIME_FORMAT)
    )
}
