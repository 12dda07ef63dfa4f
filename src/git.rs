//! Git object-model helpers shared by the content, history, change log and
//! publish layers.
//!
//! This module wraps the libgit2 operations used across sitevault:
//! - Content path normalization (site paths are `/`-rooted, git paths are not)
//! - Snapshot lookups (tree entries and blobs at a revision)
//! - Staging and committing with an explicit identity
//! - Tree-to-tree diffs with rename/copy detection

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use git2::{
    Commit, Delta, DiffFindOptions, DiffOptions, ErrorCode, Index, IndexAddOption, ObjectType,
    Oid, Repository, Tree, TreeEntry,
};

use crate::error::{Error, Result};
use crate::identity::Identity;

/// Zero-length sentinel that keeps an otherwise empty folder in a snapshot.
pub const PLACEHOLDER_FILE: &str = ".keep";

/// Control files never reported as content.
pub const IGNORE_FILES: [&str; 3] = [PLACEHOLDER_FILE, ".git", ".DS_Store"];

/// Main branch of every store.
pub const MASTER: &str = "master";

/// Remote through which the published store reaches the sandbox.
pub const ORIGIN: &str = "origin";

/// Whether a file name is one of the ignored control files.
pub fn is_ignored_name(name: &str) -> bool {
    IGNORE_FILES.contains(&name)
}

/// Convert a site path (`/a/b.txt`) into a repository-relative path.
///
/// The root (`/`, `""` or `.`) maps to an empty path. `..` is rejected so a
/// caller can never escape the working copy.
pub fn git_path(path: &str) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for component in Path::new(path).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::RootDir | Component::CurDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(Error::InvalidArgument(format!(
                    "path '{path}' escapes the repository"
                )));
            }
        }
    }
    Ok(out)
}

/// Render a repository-relative path as a `/`-rooted site path.
pub fn site_path(rel: &Path) -> String {
    let joined = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/");
    format!("/{joined}")
}

/// Return the repository workdir (root of the working tree).
pub fn workdir(repo: &Repository) -> Result<PathBuf> {
    repo.workdir()
        .map(|path| path.to_path_buf())
        .ok_or_else(|| Error::OperationFailed("repository has no working directory".to_string()))
}

/// Basic information about the current HEAD.
#[derive(Debug, Clone)]
pub struct HeadInfo {
    /// Commit pointed to by HEAD.
    pub oid: Oid,
    /// Shorthand name (e.g., "master") when available.
    pub shorthand: Option<String>,
    /// Whether HEAD is detached.
    pub is_detached: bool,
}

/// Return information about HEAD (shorthand and commit).
pub fn head_info(repo: &Repository) -> Result<HeadInfo> {
    let head = repo.head()?;
    let oid = head
        .target()
        .ok_or_else(|| Error::OperationFailed("HEAD has no target commit".to_string()))?;

    Ok(HeadInfo {
        oid,
        shorthand: head.shorthand().map(|name| name.to_string()),
        is_detached: !head.is_branch(),
    })
}

/// Commit HEAD points at.
pub fn head_commit(repo: &Repository) -> Result<Commit<'_>> {
    Ok(repo.head()?.peel_to_commit()?)
}

/// Resolve a revision spec (full id, short id, ref name) to a commit.
pub fn resolve_commit<'r>(repo: &'r Repository, spec: &str) -> Result<Commit<'r>> {
    let obj = repo.revparse_single(spec).map_err(|err| {
        if err.code() == ErrorCode::NotFound {
            Error::ReferenceNotFound(spec.to_string())
        } else {
            Error::Git(err)
        }
    })?;
    Ok(obj.peel_to_commit()?)
}

/// Commit time as a UTC timestamp.
pub fn commit_time_utc(commit: &Commit<'_>) -> DateTime<Utc> {
    Utc.timestamp_opt(commit.time().seconds(), 0)
        .single()
        .unwrap_or_default()
}

/// Tree entry at `rel` inside `tree`, or `None` when absent (or the root).
pub fn entry_at<'t>(tree: &'t Tree<'_>, rel: &Path) -> Result<Option<TreeEntry<'t>>> {
    if rel.as_os_str().is_empty() {
        return Ok(None);
    }
    match tree.get_path(rel) {
        Ok(entry) => Ok(Some(entry)),
        Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
        Err(err) => Err(Error::Git(err)),
    }
}

/// Blob content at `rel` inside `tree`; `None` when absent or a folder.
pub fn blob_at(repo: &Repository, tree: &Tree<'_>, rel: &Path) -> Result<Option<Vec<u8>>> {
    match entry_at(tree, rel)? {
        Some(entry) if entry.kind() == Some(ObjectType::Blob) => {
            let blob = repo.find_blob(entry.id())?;
            Ok(Some(blob.content().to_vec()))
        }
        _ => Ok(None),
    }
}

/// Whether `commit` changed anything at or below `rel` relative to its first
/// parent. Root commits count as touching every path they contain.
pub fn commit_touches_path(commit: &Commit<'_>, rel: &Path) -> Result<bool> {
    let tree = commit.tree()?;
    let current = entry_at(&tree, rel)?.map(|entry| entry.id());

    if commit.parent_count() == 0 {
        return Ok(current.is_some());
    }

    let parent_tree = commit.parent(0)?.tree()?;
    let previous = entry_at(&parent_tree, rel)?.map(|entry| entry.id());
    Ok(current != previous)
}

/// Check if a repository has uncommitted changes.
pub fn has_uncommitted_changes(repo: &Repository) -> Result<bool> {
    let statuses = repo.statuses(None)?;

    for entry in statuses.iter() {
        let status = entry.status();
        if !status.is_ignored() && !status.is_empty() {
            return Ok(true);
        }
    }

    Ok(false)
}

// =============================================================================
// Staging
// =============================================================================

/// Stage everything under `rel` (additions, modifications and deletions).
pub fn stage_all(index: &mut Index, rel: &Path) -> Result<()> {
    let spec = pathspec(rel);
    index.add_all([spec.as_str()].iter(), IndexAddOption::DEFAULT, None)?;
    index.update_all([spec.as_str()].iter(), None)?;
    Ok(())
}

/// Remove `rel` (file or folder) from the index.
pub fn stage_removal(index: &mut Index, rel: &Path) -> Result<()> {
    if index.get_path(rel, 0).is_some() {
        index.remove_path(rel)?;
    } else {
        index.remove_dir(rel, 0)?;
    }
    Ok(())
}

fn pathspec(rel: &Path) -> String {
    let spec = rel.to_string_lossy().replace('\\', "/");
    if spec.is_empty() {
        "*".to_string()
    } else {
        spec
    }
}

/// Paths under `rel` that the index adds or modifies relative to HEAD.
pub fn staged_paths_under(repo: &Repository, rel: &Path) -> Result<Vec<PathBuf>> {
    staged_under(repo, rel, |status| matches!(status, Delta::Added | Delta::Modified))
}

/// Paths under `rel` that HEAD still has but the index has dropped.
pub fn staged_removals_under(repo: &Repository, rel: &Path) -> Result<Vec<PathBuf>> {
    staged_under(repo, rel, |status| status == Delta::Deleted)
}

fn staged_under(
    repo: &Repository,
    rel: &Path,
    wanted: impl Fn(Delta) -> bool,
) -> Result<Vec<PathBuf>> {
    let head_tree = head_commit(repo)?.tree()?;
    let index = repo.index()?;
    let mut opts = DiffOptions::new();
    opts.pathspec(pathspec(rel));
    let diff = repo.diff_tree_to_index(Some(&head_tree), Some(&index), Some(&mut opts))?;

    Ok(diff
        .deltas()
        .filter(|delta| wanted(delta.status()))
        .filter_map(|delta| match delta.status() {
            Delta::Deleted => delta.old_file().path(),
            _ => delta.new_file().path(),
        })
        .map(PathBuf::from)
        .collect())
}

// =============================================================================
// Commit Operations
// =============================================================================

/// Result of creating a commit.
#[derive(Debug, Clone)]
pub struct CommitResult {
    /// The OID of the created commit.
    pub oid: Oid,
    /// The commit message used.
    pub message: String,
}

/// Options for creating a commit.
#[derive(Debug, Clone, Default)]
pub struct CommitOptions {
    /// If true, allow creating an empty commit (no changes).
    pub allow_empty: bool,
    /// Author and committer (defaults to Git config).
    pub author: Option<Identity>,
}

/// Create a commit on HEAD with the staged changes.
pub fn create_commit(
    repo: &Repository,
    message: &str,
    options: &CommitOptions,
) -> Result<CommitResult> {
    let mut index = repo.index()?;
    let tree_oid = index.write_tree()?;
    let tree = repo.find_tree(tree_oid)?;

    let parents = match repo.head() {
        Ok(head) => vec![head.peel_to_commit()?],
        Err(e) if e.code() == ErrorCode::UnbornBranch => vec![],
        Err(e) => return Err(Error::Git(e)),
    };
    let parent_refs: Vec<&Commit> = parents.iter().collect();

    if !options.allow_empty {
        if let Some(parent) = parent_refs.first() {
            if parent.tree_id() == tree_oid {
                return Err(Error::OperationFailed("nothing to commit".to_string()));
            }
        }
    }

    let signature = match &options.author {
        Some(identity) => identity.signature()?,
        None => repo.signature()?,
    };

    let oid = repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        message,
        &tree,
        &parent_refs,
    )?;

    Ok(CommitResult {
        oid,
        message: message.to_string(),
    })
}

/// Commit an already written tree on top of HEAD.
pub fn commit_tree_on_head(
    repo: &Repository,
    tree: Oid,
    message: &str,
    author: &Identity,
) -> Result<Oid> {
    let parent = head_commit(repo)?;
    let tree = repo.find_tree(tree)?;
    let signature = author.signature()?;
    Ok(repo.commit(
        Some("HEAD"),
        &signature,
        &signature,
        message,
        &tree,
        &[&parent],
    )?)
}

/// Newest first-parent ancestor of `start` that changed `rel`.
pub fn last_commit_touching(repo: &Repository, start: Oid, rel: &Path) -> Result<Option<Oid>> {
    let mut revwalk = repo.revwalk()?;
    revwalk.push(start)?;
    revwalk.simplify_first_parent()?;

    for oid in revwalk {
        let commit = repo.find_commit(oid?)?;
        if commit_touches_path(&commit, rel)? {
            return Ok(Some(commit.id()));
        }
    }
    Ok(None)
}

// =============================================================================
// Diff Operations
// =============================================================================

/// Kind of change between two snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    /// File is new (not in the previous tree)
    Added,
    /// File was modified
    Modified,
    /// File was deleted
    Deleted,
    /// File was renamed
    Renamed,
    /// File was copied from an existing file
    Copied,
    /// File type changed (e.g., file to symlink)
    TypeChanged,
}

/// Information about a changed file.
#[derive(Debug, Clone)]
pub struct FileChange {
    /// Path to the file (relative to repo root)
    pub path: PathBuf,
    /// Status of the file
    pub status: FileStatus,
    /// Source path for renames and copies
    pub old_path: Option<PathBuf>,
}

/// Rename/copy detection settings for tree diffs.
#[derive(Debug, Clone, Copy)]
pub struct RenameDetection {
    /// Similarity percentage (0-100)
    pub threshold: u16,
    /// Also look for copies of files modified in the same diff
    pub copies: bool,
}

impl Default for RenameDetection {
    fn default() -> Self {
        Self {
            threshold: 90,
            copies: true,
        }
    }
}

/// Diff two snapshots. `old = None` diffs against the empty tree.
pub fn diff_trees(
    repo: &Repository,
    old: Option<&Tree<'_>>,
    new: Option<&Tree<'_>>,
    detection: RenameDetection,
) -> Result<Vec<FileChange>> {
    let mut diff = repo.diff_tree_to_tree(old, new, None)?;

    // copy sources are limited to files modified or deleted in the same diff
    let mut find = DiffFindOptions::new();
    find.renames(true)
        .rename_threshold(detection.threshold)
        .copies(detection.copies)
        .copy_threshold(detection.threshold);
    diff.find_similar(Some(&mut find))?;

    Ok(parse_diff_to_changes(&diff))
}

/// Parse a git2 Diff into our FileChange structure.
fn parse_diff_to_changes(diff: &git2::Diff) -> Vec<FileChange> {
    let mut changes = Vec::new();

    for delta in diff.deltas() {
        let status = match delta.status() {
            Delta::Added => FileStatus::Added,
            Delta::Deleted => FileStatus::Deleted,
            Delta::Modified => FileStatus::Modified,
            Delta::Renamed => FileStatus::Renamed,
            Delta::Copied => FileStatus::Copied,
            Delta::Typechange => FileStatus::TypeChanged,
            _ => continue,
        };

        let current = match status {
            FileStatus::Deleted => delta.old_file().path(),
            _ => delta.new_file().path(),
        };
        let path = current.map(PathBuf::from).unwrap_or_default();

        let old_path = match status {
            FileStatus::Renamed | FileStatus::Copied => delta.old_file().path().map(PathBuf::from),
            _ => None,
        };

        changes.push(FileChange {
            path,
            status,
            old_path,
        });
    }

    changes
}
