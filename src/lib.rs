//! sitevault - versioned content repository
//!
//! Stores site content in git repositories: one authoring (sandbox) store and
//! one published store per site, plus a global store for shared content.
//!
//! # Core Concepts
//!
//! - **Stores**: sandbox, published and global git repositories per site
//! - **Content operations**: write, folder, delete, move and copy as commits
//! - **History**: version lists, content at a revision, major-version tags
//! - **Change logs**: typed CREATE/UPDATE/DELETE/MOVE/COPY operations
//! - **Publishing**: promotion of sandbox revisions into environment branches
//!
//! # Module Organization
//!
//! - `cli`: Command-line interface using clap
//! - `config`: Configuration loading from `sitevault.toml`
//! - `error`: Error types and result aliases
//! - `git` / `refs`: libgit2 helpers for snapshots, diffs, branches and tags
//! - `registry`: Store resolution and per-store locking
//! - `content`: Content CRUD over the working copy
//! - `history` / `changelog`: Read side of the revision graph
//! - `publish` / `deployments`: Publish pipeline and deployment queries
//! - `item_lock`: Advisory per-item locks
//! - `repository`: Facade bundling every service

pub mod blueprint;
pub mod changelog;
pub mod cli;
pub mod config;
pub mod content;
pub mod deployments;
pub mod error;
pub mod git;
pub mod history;
pub mod identity;
pub mod item_lock;
pub mod lock;
pub mod metadata;
pub mod output;
pub mod publish;
pub mod refs;
pub mod registry;
pub mod repository;

pub use error::{Error, Result};
pub use repository::ContentRepository;
