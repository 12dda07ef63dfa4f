//! Command-line interface for sitevault
//!
//! This module defines the CLI structure using clap derive macros.
//! Commands are grouped by concern into submodules.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::error::Result;
use crate::output::OutputOptions;
use crate::repository::ContentRepository;

mod content;
mod history;
mod lock;
mod publish;
mod site;

/// sitevault - versioned site content
///
/// Author content in per-site git stores, inspect its history and publish it
/// to environment branches. An empty site id (`""`) addresses the global
/// store.
#[derive(Parser, Debug)]
#[command(name = "sitevault")]
#[command(author, version, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file (defaults to ./sitevault.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding all stores (overrides repository.root)
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Acting user for commits, tags and locks
    #[arg(long, global = true)]
    pub actor: Option<String>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Site store management
    #[command(subcommand)]
    Site(SiteCommands),

    /// Write content at a path and commit it
    Write {
        site: String,
        path: String,

        /// Read content from this file instead of stdin
        #[arg(short, long, conflicts_with = "content")]
        file: Option<PathBuf>,

        /// Inline content
        #[arg(short, long)]
        content: Option<String>,
    },

    /// Print content at a path
    Read { site: String, path: String },

    /// Create a folder
    Mkdir {
        site: String,
        /// Parent folder
        path: String,
        /// Folder name
        name: String,
    },

    /// Delete a file or folder
    Rm {
        site: String,
        path: String,

        /// User recorded as the author of the deletion
        #[arg(long)]
        approver: Option<String>,
    },

    /// Move or rename content
    Mv {
        site: String,
        from: String,
        to: String,

        /// New name inside the destination folder
        #[arg(long)]
        name: Option<String>,
    },

    /// Copy content
    Cp {
        site: String,
        from: String,
        to: String,
    },

    /// List the children of a folder
    Ls {
        site: String,
        #[arg(default_value = "/")]
        path: String,
    },

    /// Revisions that touched a path, newest first
    History {
        site: String,
        path: String,

        /// Only revisions after this one (oldest first)
        #[arg(long)]
        from: Option<String>,

        /// Only revisions up to this one (oldest first)
        #[arg(long)]
        to: Option<String>,
    },

    /// Print content of a path at a revision
    Show {
        site: String,
        path: String,
        revision: String,
    },

    /// Restore content of a path from a revision as a new commit
    Revert {
        site: String,
        path: String,
        revision: String,

        #[arg(long, default_value = "")]
        comment: String,
    },

    /// Tag the published head as a version of a path
    Tag {
        site: String,
        path: String,

        #[arg(long, default_value = "")]
        comment: String,

        /// Request a minor version (no tag is created)
        #[arg(long)]
        minor: bool,
    },

    /// Change log between two revisions
    Ops {
        site: String,

        /// Exclusive lower bound (defaults to the initial snapshot)
        #[arg(long)]
        from: Option<String>,

        /// Inclusive upper bound
        #[arg(long, default_value = "HEAD")]
        to: String,
    },

    /// Publish items to an environment
    Publish {
        site: String,
        environment: String,

        /// Items as `path` or `path@revision` (revision defaults to the sandbox head)
        #[arg(required = true)]
        items: Vec<String>,

        /// Publishing user (defaults to the acting user)
        #[arg(long)]
        author: Option<String>,

        #[arg(long, default_value = "")]
        comment: String,
    },

    /// Publish the whole sandbox master to a new environment
    InitialPublish {
        site: String,
        environment: String,

        #[arg(long)]
        author: Option<String>,

        #[arg(long, default_value = "")]
        comment: String,
    },

    /// Lock an item
    Lock {
        site: String,
        path: String,

        /// Lock in the published store
        #[arg(long)]
        published: bool,
    },

    /// Unlock an item
    Unlock {
        site: String,
        path: String,

        #[arg(long)]
        published: bool,
    },

    /// Deployment history of a site
    Deployments {
        site: String,

        /// RFC 3339 lower bound (inclusive)
        #[arg(long)]
        since: Option<String>,

        /// RFC 3339 upper bound (inclusive)
        #[arg(long)]
        until: Option<String>,

        /// Glob patterns a path must match
        #[arg(long)]
        filter: Vec<String>,

        #[arg(long, default_value = "100")]
        limit: usize,

        /// Only report the last deployment date of this path
        #[arg(long, conflicts_with_all = ["since", "until", "filter"])]
        path: Option<String>,

        /// With --path, also report the sandbox revision last published to
        /// this environment
        #[arg(long, requires = "path")]
        environment: Option<String>,
    },
}

/// Site subcommands
#[derive(Subcommand, Debug)]
pub enum SiteCommands {
    /// Create the sandbox and published stores of a site
    Create {
        site: String,

        /// Directory copied into the initial snapshot
        #[arg(long)]
        blueprint: Option<PathBuf>,
    },

    /// Remove both stores of a site
    Delete { site: String },
}

/// Shared state for one command invocation.
pub(crate) struct Context {
    pub repository: ContentRepository,
    pub output: OutputOptions,
}

impl Cli {
    fn context(&self) -> Result<Context> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => {
                let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                Config::load_from_dir(&cwd)
            }
        };
        if let Some(root) = &self.root {
            config.repository.root = root.clone();
        }
        tracing::debug!(root = %config.repository.root.display(), "resolved configuration");

        Ok(Context {
            repository: ContentRepository::open(config, self.actor.as_deref()),
            output: OutputOptions {
                json: self.json,
                quiet: self.quiet,
            },
        })
    }

    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let ctx = self.context()?;
        match self.command {
            Commands::Site(cmd) => match cmd {
                SiteCommands::Create { site, blueprint } => {
                    site::run_create(&ctx, &site, blueprint)
                }
                SiteCommands::Delete { site } => site::run_delete(&ctx, &site),
            },
            Commands::Write {
                site,
                path,
                file,
                content,
            } => content::run_write(&ctx, &site, &path, file, content),
            Commands::Read { site, path } => content::run_read(&ctx, &site, &path),
            Commands::Mkdir { site, path, name } => content::run_mkdir(&ctx, &site, &path, &name),
            Commands::Rm {
                site,
                path,
                approver,
            } => content::run_rm(&ctx, &site, &path, approver.as_deref()),
            Commands::Mv {
                site,
                from,
                to,
                name,
            } => content::run_mv(&ctx, &site, &from, &to, name.as_deref()),
            Commands::Cp { site, from, to } => content::run_cp(&ctx, &site, &from, &to),
            Commands::Ls { site, path } => content::run_ls(&ctx, &site, &path),
            Commands::History {
                site,
                path,
                from,
                to,
            } => history::run_history(&ctx, &site, &path, from.as_deref(), to.as_deref()),
            Commands::Show {
                site,
                path,
                revision,
            } => history::run_show(&ctx, &site, &path, &revision),
            Commands::Revert {
                site,
                path,
                revision,
                comment,
            } => history::run_revert(&ctx, &site, &path, &revision, &comment),
            Commands::Tag {
                site,
                path,
                comment,
                minor,
            } => history::run_tag(&ctx, &site, &path, &comment, !minor),
            Commands::Ops { site, from, to } => history::run_ops(&ctx, &site, from.as_deref(), &to),
            Commands::Publish {
                site,
                environment,
                items,
                author,
                comment,
            } => publish::run_publish(publish::PublishOptions {
                site,
                environment,
                items,
                author,
                comment,
                ctx: &ctx,
            }),
            Commands::InitialPublish {
                site,
                environment,
                author,
                comment,
            } => publish::run_initial_publish(publish::PublishOptions {
                site,
                environment,
                items: Vec::new(),
                author,
                comment,
                ctx: &ctx,
            }),
            Commands::Lock {
                site,
                path,
                published,
            } => lock::run_lock(&ctx, &site, &path, published),
            Commands::Unlock {
                site,
                path,
                published,
            } => lock::run_unlock(&ctx, &site, &path, published),
            Commands::Deployments {
                site,
                since,
                until,
                filter,
                limit,
                path,
                environment,
            } => publish::run_deployments(publish::DeploymentsOptions {
                site,
                since,
                until,
                filter,
                limit,
                path,
                environment,
                ctx: &ctx,
            }),
        }
    }
}

/// Site id as shown to humans.
pub(crate) fn site_label(site: &str) -> &str {
    if site.trim().is_empty() {
        "(global)"
    } else {
        site
    }
}
