//! sitevault history commands: history, show, revert, tag, ops.

use crate::changelog::RepoOperation;
use crate::error::Result;
use crate::history::VersionEntry;
use crate::output::{emit_success, HumanOutput};

use super::content::{emit_bytes, short};
use super::{site_label, Context};

#[derive(serde::Serialize)]
struct HistoryReport {
    site: String,
    path: String,
    versions: Vec<VersionEntry>,
}

#[derive(serde::Serialize)]
struct RevertReport {
    site: String,
    path: String,
    from_revision: String,
    revision: Option<String>,
}

#[derive(serde::Serialize)]
struct TagReport {
    site: String,
    path: String,
    major: bool,
    label: Option<String>,
}

#[derive(serde::Serialize)]
struct OpsReport {
    site: String,
    from: Option<String>,
    to: String,
    operations: Vec<RepoOperation>,
}

pub fn run_history(
    ctx: &Context,
    site: &str,
    path: &str,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<()> {
    let history = ctx.repository.history();
    let versions = if from.is_none() && to.is_none() {
        history.version_history(site, path)?
    } else {
        history.edit_revisions(site, path, from, to)?
    };

    let mut human = HumanOutput::new(format!("History of {path}"));
    human.push_summary("site", site_label(site));
    human.push_summary("versions", versions.len().to_string());
    for version in &versions {
        human.push_detail(format!(
            "{} {} {} {}",
            short(&version.revision_id),
            version.timestamp.format("%Y-%m-%d %H:%M:%S"),
            version.author,
            version.message.lines().next().unwrap_or_default()
        ));
    }

    let report = HistoryReport {
        site: site.to_string(),
        path: path.to_string(),
        versions,
    };
    emit_success(ctx.output, "history", &report, Some(&human))
}

pub fn run_show(ctx: &Context, site: &str, path: &str, revision: &str) -> Result<()> {
    let bytes = ctx.repository.history().content_at(site, path, revision)?;
    emit_bytes(ctx, "show", site, path, bytes)
}

pub fn run_revert(
    ctx: &Context,
    site: &str,
    path: &str,
    revision: &str,
    comment: &str,
) -> Result<()> {
    let reverted = ctx.repository.history().revert(site, path, revision, comment)?;

    let report = RevertReport {
        site: site.to_string(),
        path: path.to_string(),
        from_revision: revision.to_string(),
        revision: reverted.map(|oid| oid.to_string()),
    };

    let mut human = HumanOutput::new(format!("Reverted {path} to {}", short(revision)));
    human.push_summary("site", site_label(site));
    match &report.revision {
        Some(oid) => human.push_summary("revision", short(oid)),
        None => human.push_warning("nothing was committed"),
    }

    emit_success(ctx.output, "revert", &report, Some(&human))
}

pub fn run_tag(ctx: &Context, site: &str, path: &str, comment: &str, major: bool) -> Result<()> {
    let label = ctx.repository.history().tag_version(site, path, comment, major)?;

    let mut human = HumanOutput::new(format!("Versioned {path}"));
    human.push_summary("site", site_label(site));
    match &label {
        Some(label) => human.push_summary("label", label.clone()),
        None if major => human.push_warning("no tag was created"),
        None => human.push_detail("minor versions are recorded by every commit"),
    }

    let report = TagReport {
        site: site.to_string(),
        path: path.to_string(),
        major,
        label,
    };
    emit_success(ctx.output, "tag", &report, Some(&human))
}

pub fn run_ops(ctx: &Context, site: &str, from: Option<&str>, to: &str) -> Result<()> {
    let operations = ctx.repository.changelog().operations_between(site, from, to)?;

    let mut human = HumanOutput::new(format!(
        "Operations {}..{to}",
        from.unwrap_or("(initial)")
    ));
    human.push_summary("site", site_label(site));
    human.push_summary("operations", operations.len().to_string());
    for op in &operations {
        let line = match &op.old_path {
            Some(old) => format!("{} {} -> {} ({})", op.kind, old, op.path, op.author),
            None => format!("{} {} ({})", op.kind, op.path, op.author),
        };
        human.push_detail(line);
    }

    let report = OpsReport {
        site: site.to_string(),
        from: from.map(str::to_string),
        to: to.to_string(),
        operations,
    };
    emit_success(ctx.output, "ops", &report, Some(&human))
}
