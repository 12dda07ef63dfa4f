//! Initial file trees for new stores.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Supplies the initial content of a freshly created store.
pub trait Blueprint: Send + Sync {
    /// Materialize the blueprint into `dest` (an empty working copy).
    fn populate(&self, dest: &Path) -> Result<()>;
}

/// Blueprint backed by a directory on disk.
#[derive(Debug, Clone)]
pub struct DirectoryBlueprint {
    source: PathBuf,
}

impl DirectoryBlueprint {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

impl Blueprint for DirectoryBlueprint {
    fn populate(&self, dest: &Path) -> Result<()> {
        if !self.source.is_dir() {
            return Err(Error::InvalidArgument(format!(
                "blueprint '{}' is not a directory",
                self.source.display()
            )));
        }
        copy_tree(&self.source, dest)
    }
}

/// Recursively copy `from` (file or directory) to `to`, skipping `.git`.
///
/// Directory targets are merged: existing files under `to` are overwritten,
/// others are left alone.
pub fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    if from.is_file() {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(from, to)?;
        return Ok(());
    }

    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let name = entry.file_name();
        if name == ".git" {
            continue;
        }
        let target = to.join(&name);
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn directory_blueprint_copies_tree_without_git_dir() {
        let source = TempDir::new().unwrap();
        fs::create_dir_all(source.path().join("config/studio")).unwrap();
        fs::create_dir_all(source.path().join(".git")).unwrap();
        fs::write(source.path().join("config/studio/site.xml"), "<site/>").unwrap();
        fs::write(source.path().join(".git/HEAD"), "ref: refs/heads/master").unwrap();

        let dest = TempDir::new().unwrap();
        DirectoryBlueprint::new(source.path())
            .populate(dest.path())
            .unwrap();

        assert_eq!(
            fs::read_to_string(dest.path().join("config/studio/site.xml")).unwrap(),
            "<site/>"
        );
        assert!(!dest.path().join(".git").exists());
    }

    #[test]
    fn missing_blueprint_is_rejected() {
        let dest = TempDir::new().unwrap();
        let result = DirectoryBlueprint::new(dest.path().join("nope")).populate(dest.path());
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn copy_tree_merges_into_existing_directory() {
        let temp = TempDir::new().unwrap();
        let from = temp.path().join("from");
        let to = temp.path().join("to");
        fs::create_dir_all(&from).unwrap();
        fs::create_dir_all(&to).unwrap();
        fs::write(from.join("a.txt"), "new").unwrap();
        fs::write(to.join("a.txt"), "old").unwrap();
        fs::write(to.join("b.txt"), "kept").unwrap();

        copy_tree(&from, &to).unwrap();

        assert_eq!(fs::read_to_string(to.join("a.txt")).unwrap(), "new");
        assert_eq!(fs::read_to_string(to.join("b.txt")).unwrap(), "kept");
    }
}
