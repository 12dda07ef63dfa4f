//! Identity used to stamp commits and tags.
//!
//! Acting-user resolution order:
//! 1) Explicit override (CLI --actor)
//! 2) SITEVAULT_ACTOR environment variable
//! 3) Config default (identity.default_user)

use git2::Signature;
use serde::{Deserialize, Serialize};

use crate::config::IdentityConfig;
use crate::error::{Error, Result};

/// Environment variable naming the acting user.
pub const ACTOR_ENV: &str = "SITEVAULT_ACTOR";

/// Author/committer identity for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Signature stamped with the current time.
    pub fn signature(&self) -> Result<Signature<'static>> {
        Ok(Signature::now(&self.name, &self.email)?)
    }
}

/// Source of commit identities.
pub trait IdentityProvider: Send + Sync {
    /// Identity of the user performing the current operation.
    fn current_identity(&self) -> Result<Identity>;

    /// Identity of a named user (publish authors, delete approvers).
    fn identity_for(&self, username: &str) -> Result<Identity>;
}

/// Identity provider backed by configuration and the environment.
#[derive(Debug, Clone)]
pub struct ConfigIdentityProvider {
    config: IdentityConfig,
    actor: Option<String>,
}

impl ConfigIdentityProvider {
    pub fn new(config: IdentityConfig) -> Self {
        Self {
            config,
            actor: None,
        }
    }

    /// Pin the acting user, taking precedence over env and config.
    pub fn with_actor(mut self, actor: Option<&str>) -> Self {
        self.actor = non_empty(actor).map(str::to_string);
        self
    }

    /// Resolve the acting user name.
    pub fn resolve_actor(&self) -> String {
        if let Some(actor) = &self.actor {
            return actor.clone();
        }

        if let Ok(env_actor) = std::env::var(ACTOR_ENV) {
            if let Some(actor) = non_empty(Some(env_actor.as_str())) {
                return actor.to_string();
            }
        }

        self.config.default_user.clone()
    }
}

impl IdentityProvider for ConfigIdentityProvider {
    fn current_identity(&self) -> Result<Identity> {
        self.identity_for(&self.resolve_actor())
    }

    fn identity_for(&self, username: &str) -> Result<Identity> {
        let name = non_empty(Some(username)).ok_or_else(|| {
            Error::InvalidArgument("user name cannot be empty".to_string())
        })?;
        Ok(Identity::new(
            name,
            format!("{name}@{}", self.config.email_domain),
        ))
    }
}

fn non_empty(input: Option<&str>) -> Option<&str> {
    input.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_actor_wins() {
        let provider =
            ConfigIdentityProvider::new(IdentityConfig::default()).with_actor(Some(" jane "));
        let identity = provider.current_identity().unwrap();
        assert_eq!(identity.name, "jane");
        assert_eq!(identity.email, "jane@sitevault.local");
    }

    #[test]
    fn blank_actor_is_ignored() {
        let provider =
            ConfigIdentityProvider::new(IdentityConfig::default()).with_actor(Some("  "));
        assert!(provider.actor.is_none());
    }

    #[test]
    fn identity_for_rejects_empty_name() {
        let provider = ConfigIdentityProvider::new(IdentityConfig::default());
        assert!(matches!(
            provider.identity_for(""),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn identity_for_uses_domain() {
        let provider = ConfigIdentityProvider::new(IdentityConfig {
            default_user: "admin".to_string(),
            email_domain: "example.org".to_string(),
        });
        let identity = provider.identity_for("approver").unwrap();
        assert_eq!(identity, Identity::new("approver", "approver@example.org"));
        assert!(identity.signature().is_ok());
    }
}
