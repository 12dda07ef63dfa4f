//! Configuration loading and management
//!
//! Handles parsing of `sitevault.toml` configuration files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the configuration file looked up in a directory.
pub const CONFIG_FILENAME: &str = "sitevault.toml";

/// Environment variable that overrides `repository.root`.
pub const ROOT_ENV: &str = "SITEVAULT_ROOT";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Store layout and locking
    #[serde(default)]
    pub repository: RepositoryConfig,

    /// Identity used to stamp commits
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Publish pipeline settings
    #[serde(default)]
    pub publish: PublishConfig,

    /// Change log computation
    #[serde(default)]
    pub changelog: ChangelogConfig,
}

/// Store layout and locking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Directory holding every site store and the global store
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// How long to wait for a cross-process store lock
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Also take a file lock so separate processes serialize on a store
    #[serde(default)]
    pub cross_process_lock: bool,
}

fn default_root() -> PathBuf {
    if let Ok(root) = std::env::var(ROOT_ENV) {
        let root = root.trim();
        if !root.is_empty() {
            return PathBuf::from(root);
        }
    }
    directories::ProjectDirs::from("", "", "sitevault")
        .map(|dirs| dirs.data_dir().join("repos"))
        .unwrap_or_else(|| PathBuf::from(".sitevault").join("repos"))
}

fn default_lock_timeout_ms() -> u64 {
    crate::lock::DEFAULT_LOCK_TIMEOUT_MS
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            lock_timeout_ms: default_lock_timeout_ms(),
            cross_process_lock: false,
        }
    }
}

/// Identity-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Acting user when none is given explicitly
    #[serde(default = "default_user")]
    pub default_user: String,

    /// Domain used to synthesize commit emails
    #[serde(default = "default_email_domain")]
    pub email_domain: String,
}

fn default_user() -> String {
    "admin".to_string()
}

fn default_email_domain() -> String {
    "sitevault.local".to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            default_user: default_user(),
            email_domain: default_email_domain(),
        }
    }
}

/// Publish pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Aggregate commit message template
    #[serde(default = "default_commit_message")]
    pub commit_message: String,

    /// Value substituted for `{source}`
    #[serde(default = "default_source")]
    pub source: String,

    /// Suffix appended to an environment name for its staging branch
    #[serde(default = "default_in_progress_suffix")]
    pub in_progress_suffix: String,
}

/// Placeholders understood by the publish commit message template.
pub const COMMIT_MESSAGE_PLACEHOLDERS: [&str; 5] = [
    "{username}",
    "{datetime}",
    "{source}",
    "{message}",
    "{commit_id}",
];

fn default_commit_message() -> String {
    "Publish event triggered by \"{username}\" on \"{datetime}\" via \"{source}\".\n\n\
     Publish note from user: \"{message}\"\n\n\
     Commit ID begin:\n{commit_id}\nCommit ID end."
        .to_string()
}

fn default_source() -> String {
    "UI".to_string()
}

fn default_in_progress_suffix() -> String {
    "_in_progress".to_string()
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            commit_message: default_commit_message(),
            source: default_source(),
            in_progress_suffix: default_in_progress_suffix(),
        }
    }
}

/// Change log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangelogConfig {
    /// Similarity (0-100) above which an add/delete pair becomes a move or copy
    #[serde(default = "default_rename_threshold")]
    pub rename_threshold: u16,

    /// Report copies in addition to renames
    #[serde(default = "default_true")]
    pub detect_copies: bool,
}

fn default_rename_threshold() -> u16 {
    90
}

fn default_true() -> bool {
    true
}

impl Default for ChangelogConfig {
    fn default() -> Self {
        Self {
            rename_threshold: default_rename_threshold(),
            detect_copies: true,
        }
    }
}

impl Config {
    /// Load configuration from a `sitevault.toml` file
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a directory, or return defaults
    pub fn load_from_dir(dir: &Path) -> Self {
        let config_path = dir.join(CONFIG_FILENAME);
        if config_path.exists() {
            match Self::load(&config_path) {
                Ok(config) => config,
                Err(err) => {
                    tracing::warn!(
                        path = %config_path.display(),
                        error = %err,
                        "ignoring invalid configuration"
                    );
                    Self::default()
                }
            }
        } else {
            Self::default()
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> crate::error::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Defaults rooted at `root`, mostly for tests and embedding.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.repository.root = root.into();
        config
    }

    fn validate(&self) -> crate::error::Result<()> {
        if self.repository.root.as_os_str().is_empty() {
            return Err(crate::error::Error::InvalidConfig(
                "repository.root cannot be empty".to_string(),
            ));
        }
        if self.identity.default_user.trim().is_empty() {
            return Err(crate::error::Error::InvalidConfig(
                "identity.default_user cannot be empty".to_string(),
            ));
        }
        if self.identity.email_domain.trim().is_empty() {
            return Err(crate::error::Error::InvalidConfig(
                "identity.email_domain cannot be empty".to_string(),
            ));
        }
        self.publish.validate()?;
        if self.changelog.rename_threshold > 100 {
            return Err(crate::error::Error::InvalidConfig(format!(
                "changelog.rename_threshold must be <= 100 (got {})",
                self.changelog.rename_threshold
            )));
        }
        Ok(())
    }
}

impl PublishConfig {
    fn validate(&self) -> crate::error::Result<()> {
        if self.commit_message.trim().is_empty() {
            return Err(crate::error::Error::InvalidConfig(
                "publish.commit_message cannot be empty".to_string(),
            ));
        }
        let suffix = self.in_progress_suffix.trim();
        if suffix.is_empty() {
            return Err(crate::error::Error::InvalidConfig(
                "publish.in_progress_suffix cannot be empty".to_string(),
            ));
        }
        if !git2::Branch::name_is_valid(&format!("live{suffix}")).unwrap_or(false) {
            return Err(crate::error::Error::InvalidConfig(format!(
                "publish.in_progress_suffix '{suffix}' does not form a valid branch name"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_are_expected() {
        let cfg = Config::with_root("/tmp/vault");
        assert_eq!(cfg.repository.root, PathBuf::from("/tmp/vault"));
        assert_eq!(cfg.repository.lock_timeout_ms, 5000);
        assert!(!cfg.repository.cross_process_lock);
        assert_eq!(cfg.identity.default_user, "admin");
        assert_eq!(cfg.identity.email_domain, "sitevault.local");
        assert_eq!(cfg.publish.source, "UI");
        assert_eq!(cfg.publish.in_progress_suffix, "_in_progress");
        for placeholder in COMMIT_MESSAGE_PLACEHOLDERS {
            assert!(cfg.publish.commit_message.contains(placeholder));
        }
        assert_eq!(cfg.changelog.rename_threshold, 90);
        assert!(cfg.changelog.detect_copies);
    }

    #[test]
    fn load_parses_overrides() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILENAME);
        let content = r#"
[repository]
root = "/srv/vault"
lock_timeout_ms = 250
cross_process_lock = true

[identity]
default_user = "editor"
email_domain = "example.org"

[publish]
commit_message = "{username} published {commit_id}"
source = "API"
in_progress_suffix = "-staging"

[changelog]
rename_threshold = 100
detect_copies = false
"#;
        fs::write(&path, content.trim()).expect("write config");

        let cfg = Config::load(&path).expect("load config");
        assert_eq!(cfg.repository.root, PathBuf::from("/srv/vault"));
        assert_eq!(cfg.repository.lock_timeout_ms, 250);
        assert!(cfg.repository.cross_process_lock);
        assert_eq!(cfg.identity.default_user, "editor");
        assert_eq!(cfg.identity.email_domain, "example.org");
        assert_eq!(cfg.publish.commit_message, "{username} published {commit_id}");
        assert_eq!(cfg.publish.source, "API");
        assert_eq!(cfg.publish.in_progress_suffix, "-staging");
        assert_eq!(cfg.changelog.rename_threshold, 100);
        assert!(!cfg.changelog.detect_copies);
    }

    #[test]
    fn invalid_threshold_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILENAME);
        fs::write(&path, "[changelog]\nrename_threshold = 101\n").expect("write config");

        let err = Config::load(&path).expect_err("invalid config");
        match err {
            crate::error::Error::InvalidConfig(_) => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn invalid_suffix_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join(CONFIG_FILENAME);
        fs::write(&path, "[publish]\nin_progress_suffix = \"..\"\n").expect("write config");

        assert!(matches!(
            Config::load(&path),
            Err(crate::error::Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn load_from_dir_falls_back_on_invalid_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(CONFIG_FILENAME), "this = [not valid").expect("write");

        let cfg = Config::load_from_dir(dir.path());
        assert_eq!(cfg.identity.default_user, "admin");
    }

    #[test]
    fn save_writes_toml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("out.toml");
        let cfg = Config::with_root(dir.path().join("repos"));
        cfg.save(&path).expect("save config");

        let written = fs::read_to_string(&path).expect("read config");
        assert!(written.contains("default_user = \"admin\""));
        let reloaded = Config::load(&path).expect("reload");
        assert_eq!(reloaded.repository.root, dir.path().join("repos"));
    }
}
