//! sitevault publish commands: publish, initial-publish, deployments.

use chrono::{DateTime, Utc};

use crate::deployments::{DeploymentRecord, PathFilter};
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput};
use crate::publish::{DeploymentItem, PublishReport};

use super::content::short;
use super::Context;

/// Options for `sitevault publish` and `sitevault initial-publish`
pub struct PublishOptions<'a> {
    pub site: String,
    pub environment: String,
    pub items: Vec<String>,
    pub author: Option<String>,
    pub comment: String,
    pub ctx: &'a Context,
}

/// Options for `sitevault deployments`
pub struct DeploymentsOptions<'a> {
    pub site: String,
    pub since: Option<String>,
    pub until: Option<String>,
    pub filter: Vec<String>,
    pub limit: usize,
    pub path: Option<String>,
    pub environment: Option<String>,
    pub ctx: &'a Context,
}

#[derive(serde::Serialize)]
struct DeploymentsReport {
    site: String,
    deployments: Vec<DeploymentRecord>,
}

#[derive(serde::Serialize)]
struct LastDeploymentReport {
    site: String,
    path: String,
    last_deployed: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    published_revision: Option<String>,
}

pub fn run_publish(options: PublishOptions<'_>) -> Result<()> {
    let repository = &options.ctx.repository;
    let author = resolve_author(&options)?;

    let head = repository.history().last_revision(&options.site)?.to_string();
    let items = options
        .items
        .iter()
        .map(|item| parse_item(item, &head))
        .collect::<Result<Vec<_>>>()?;

    let report = repository.publish().publish(
        &options.site,
        &items,
        &options.environment,
        &author,
        &options.comment,
    )?;
    emit_report(options.ctx, "publish", &author, &report)
}

pub fn run_initial_publish(options: PublishOptions<'_>) -> Result<()> {
    let author = resolve_author(&options)?;
    let report = options.ctx.repository.publish().initial_publish(
        &options.site,
        &options.environment,
        &author,
        &options.comment,
    )?;
    emit_report(options.ctx, "initial-publish", &author, &report)
}

pub fn run_deployments(options: DeploymentsOptions<'_>) -> Result<()> {
    let ctx = options.ctx;
    let deployments = ctx.repository.deployments();

    if let Some(path) = options.path {
        let last_deployed = deployments.last_deployment_date(&options.site, &path)?;
        let mut human = HumanOutput::new(format!("Last deployment of {path}"));
        match last_deployed {
            Some(date) => human.push_summary("date", date.to_rfc3339()),
            None => human.push_warning("never deployed"),
        }
        let published_revision = match options.environment.as_deref() {
            Some(environment) => {
                let revision =
                    deployments.last_published_revision(&options.site, environment, &path)?;
                if let Some(revision) = &revision {
                    human.push_summary(environment, revision.clone());
                }
                revision
            }
            None => None,
        };
        let report = LastDeploymentReport {
            site: options.site,
            path,
            last_deployed,
            environment: options.environment,
            published_revision,
        };
        return emit_success(ctx.output, "deployments", &report, Some(&human));
    }

    let from = match options.since.as_deref() {
        Some(raw) => parse_time(raw)?,
        None => DateTime::<Utc>::MIN_UTC,
    };
    let to = match options.until.as_deref() {
        Some(raw) => parse_time(raw)?,
        None => Utc::now(),
    };
    let filter = PathFilter::globs(&options.filter)?;
    let records =
        deployments.deployment_history(&options.site, from, to, &filter, options.limit)?;

    let mut human = HumanOutput::new(format!("Deployments of {}", options.site));
    human.push_summary("records", records.len().to_string());
    for record in &records {
        human.push_detail(format!(
            "{} {} {} {}",
            record.sync_date.format("%Y-%m-%d %H:%M:%S"),
            record.environment,
            record.user,
            record.path
        ));
    }

    let report = DeploymentsReport {
        site: options.site,
        deployments: records,
    };
    emit_success(ctx.output, "deployments", &report, Some(&human))
}

fn resolve_author(options: &PublishOptions<'_>) -> Result<String> {
    match options.author.as_deref().map(str::trim) {
        Some(author) if !author.is_empty() => Ok(author.to_string()),
        _ => Ok(options
            .ctx
            .repository
            .registry()
            .identities()
            .current_identity()?
            .name),
    }
}

/// `path` or `path@revision`.
fn parse_item(raw: &str, default_revision: &str) -> Result<DeploymentItem> {
    let (path, revision) = match raw.rsplit_once('@') {
        Some((path, revision)) => (path, revision),
        None => (raw, default_revision),
    };
    if path.trim().is_empty() || revision.trim().is_empty() {
        return Err(Error::InvalidArgument(format!(
            "invalid publish item '{raw}', expected <path>[@<revision>]"
        )));
    }
    Ok(DeploymentItem::new(path, revision))
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|date| date.with_timezone(&Utc))
        .map_err(|err| Error::InvalidArgument(format!("invalid timestamp '{raw}': {err}")))
}

fn emit_report(ctx: &Context, command: &str, author: &str, report: &PublishReport) -> Result<()> {
    let mut human = HumanOutput::new(format!("Published to {}", report.environment));
    human.push_summary("author", author);
    human.push_summary("state", report.state.to_string());
    if let Some(commit) = &report.commit_id {
        human.push_summary("commit", short(commit));
    }
    if let Some(tag) = &report.tag {
        human.push_summary("tag", tag.clone());
    }
    if report.new_branch {
        human.push_detail(format!("created environment branch {}", report.environment));
    }
    for revision in &report.source_revisions {
        human.push_detail(format!("from sandbox revision {}", short(revision)));
    }

    emit_success(ctx.output, command, report, Some(&human))
}
