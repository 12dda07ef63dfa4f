//! Branch, tag and checkout operations using libgit2.

use git2::{build::CheckoutBuilder, BranchType, ErrorCode, Oid, Repository, ResetType};

use crate::error::{Error, Result};
use crate::identity::Identity;

/// Create (or with `force`, reset) a local branch at `target`.
pub fn create_branch_at(repo: &Repository, name: &str, target: Oid, force: bool) -> Result<()> {
    let commit = repo.find_commit(target)?;
    repo.branch(name, &commit, force)?;
    Ok(())
}

/// Tip of a local branch, or `None` when the branch does not exist.
pub fn local_branch_tip(repo: &Repository, name: &str) -> Result<Option<Oid>> {
    match repo.find_branch(name, BranchType::Local) {
        Ok(branch) => Ok(branch.get().target()),
        Err(err) if err.code() == ErrorCode::NotFound => Ok(None),
        Err(err) => Err(Error::Git(err)),
    }
}

/// Tip of a remote-tracking branch such as `origin/master`.
pub fn remote_branch_tip(repo: &Repository, name: &str) -> Result<Oid> {
    match repo.find_branch(name, BranchType::Remote) {
        Ok(branch) => branch
            .get()
            .target()
            .ok_or_else(|| Error::ReferenceNotFound(name.to_string())),
        Err(err) if err.code() == ErrorCode::NotFound => {
            Err(Error::ReferenceNotFound(name.to_string()))
        }
        Err(err) => Err(Error::Git(err)),
    }
}

/// Delete a local branch by name. Returns false when it did not exist.
pub fn delete_branch(repo: &Repository, name: &str) -> Result<bool> {
    match repo.find_branch(name, BranchType::Local) {
        Ok(mut branch) => {
            branch.delete()?;
            Ok(true)
        }
        Err(err) if err.code() == ErrorCode::NotFound => Ok(false),
        Err(err) => Err(Error::Git(err)),
    }
}

/// Track `upstream` (e.g. `origin/master`) from a local branch.
pub fn set_upstream(repo: &Repository, name: &str, upstream: &str) -> Result<()> {
    let mut branch = repo.find_branch(name, BranchType::Local)?;
    branch.set_upstream(Some(upstream))?;
    Ok(())
}

/// List local branches, optionally filtered by a glob pattern.
pub fn list_branches(repo: &Repository, pattern: Option<&str>) -> Result<Vec<String>> {
    let matcher = if let Some(pattern) = pattern {
        Some(
            glob::Pattern::new(pattern).map_err(|err| {
                Error::InvalidArgument(format!("invalid branch pattern '{pattern}': {err}"))
            })?,
        )
    } else {
        None
    };

    let mut branches = Vec::new();
    for entry in repo.branches(Some(BranchType::Local))? {
        let (branch, _) = entry?;
        if let Some(name) = branch.name()? {
            let matches = match &matcher {
                Some(glob) => glob.matches(name),
                None => true,
            };
            if matches {
                branches.push(name.to_string());
            }
        }
    }

    branches.sort();
    Ok(branches)
}

/// Current branch name, `None` when HEAD is detached or unborn.
pub fn current_branch(repo: &Repository) -> Result<Option<String>> {
    match repo.head() {
        Ok(head) if head.is_branch() => Ok(head.shorthand().map(str::to_string)),
        Ok(_) => Ok(None),
        Err(err) if matches!(err.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
            Ok(None)
        }
        Err(err) => Err(Error::Git(err)),
    }
}

/// Point HEAD at a local branch and force the working copy to match it.
pub fn checkout_branch(repo: &Repository, name: &str) -> Result<()> {
    if local_branch_tip(repo, name)?.is_none() {
        return Err(Error::ReferenceNotFound(name.to_string()));
    }
    repo.set_head(&format!("refs/heads/{name}"))?;
    let mut checkout = CheckoutBuilder::new();
    checkout.force().remove_untracked(true);
    repo.checkout_head(Some(&mut checkout))?;
    Ok(())
}

/// Hard-reset the current branch (index and working copy) to `target`.
pub fn hard_reset(repo: &Repository, target: Oid) -> Result<()> {
    let obj = repo.find_object(target, None)?;
    let mut checkout = CheckoutBuilder::new();
    checkout.force().remove_untracked(true);
    repo.reset(&obj, ResetType::Hard, Some(&mut checkout))?;
    Ok(())
}

/// Create an annotated tag on `target`.
pub fn create_annotated_tag(
    repo: &Repository,
    name: &str,
    target: Oid,
    tagger: &Identity,
    message: &str,
) -> Result<Oid> {
    let obj = repo.find_object(target, None)?;
    let signature = tagger.signature()?;
    Ok(repo.tag(name, &obj, &signature, message, false)?)
}

/// List tag names, optionally filtered by a glob pattern.
pub fn list_tags(repo: &Repository, pattern: Option<&str>) -> Result<Vec<String>> {
    let names = repo.tag_names(pattern)?;
    let mut tags: Vec<String> = names.iter().flatten().map(str::to_string).collect();
    tags.sort();
    Ok(tags)
}
