//! sitevault content commands: write, read, mkdir, rm, mv, cp, ls.

use std::io::{Read, Write};
use std::path::PathBuf;

use crate::content::RepositoryItem;
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput};

use super::{site_label, Context};

#[derive(serde::Serialize)]
struct CommitReport {
    site: String,
    path: String,
    /// Revision recorded for the change; `None` when nothing was committed.
    revision: Option<String>,
}

#[derive(serde::Serialize)]
struct ReadReport {
    site: String,
    path: String,
    size: usize,
    content: String,
}

#[derive(serde::Serialize)]
struct MoveReport {
    site: String,
    from: String,
    to: String,
    moved: Vec<MovedPath>,
}

#[derive(serde::Serialize)]
struct MovedPath {
    path: String,
    revision: String,
}

#[derive(serde::Serialize)]
struct ListReport {
    site: String,
    path: String,
    items: Vec<RepositoryItem>,
}

pub fn run_write(
    ctx: &Context,
    site: &str,
    path: &str,
    file: Option<PathBuf>,
    content: Option<String>,
) -> Result<()> {
    let bytes = match (file, content) {
        (Some(file), _) => std::fs::read(&file)?,
        (None, Some(content)) => content.into_bytes(),
        (None, None) => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };

    let revision = ctx.repository.content().write(site, path, &bytes)?;
    emit_commit(ctx, "write", site, path, revision, format!("Wrote {path}"))
}

pub fn run_read(ctx: &Context, site: &str, path: &str) -> Result<()> {
    let bytes = ctx.repository.content().read(site, path)?;
    emit_bytes(ctx, "read", site, path, bytes)
}

pub fn run_mkdir(ctx: &Context, site: &str, path: &str, name: &str) -> Result<()> {
    let revision = ctx.repository.content().create_folder(site, path, name)?;
    let folder = format!("{}/{name}", path.trim_end_matches('/'));
    emit_commit(ctx, "mkdir", site, &folder, revision, format!("Created folder {folder}"))
}

pub fn run_rm(ctx: &Context, site: &str, path: &str, approver: Option<&str>) -> Result<()> {
    let revision = ctx.repository.content().delete(site, path, approver)?;
    emit_commit(ctx, "rm", site, path, revision, format!("Deleted {path}"))
}

pub fn run_mv(ctx: &Context, site: &str, from: &str, to: &str, name: Option<&str>) -> Result<()> {
    let moved = ctx.repository.content().move_content(site, from, to, name)?;

    let report = MoveReport {
        site: site.to_string(),
        from: from.to_string(),
        to: to.to_string(),
        moved: moved
            .iter()
            .map(|(path, oid)| MovedPath {
                path: path.clone(),
                revision: oid.to_string(),
            })
            .collect(),
    };

    let mut human = HumanOutput::new(format!("Moved {from} to {to}"));
    human.push_summary("site", site_label(site));
    human.push_summary("paths", moved.len().to_string());
    for entry in &report.moved {
        human.push_detail(format!("{} @ {}", entry.path, short(&entry.revision)));
    }
    if moved.is_empty() {
        human.push_warning("nothing was committed");
    }

    emit_success(ctx.output, "mv", &report, Some(&human))
}

pub fn run_cp(ctx: &Context, site: &str, from: &str, to: &str) -> Result<()> {
    let revision = ctx.repository.content().copy(site, from, to)?;
    emit_commit(ctx, "cp", site, to, revision, format!("Copied {from} to {to}"))
}

pub fn run_ls(ctx: &Context, site: &str, path: &str) -> Result<()> {
    let items = ctx.repository.content().list_children(site, path)?;

    let mut human = HumanOutput::new(format!("{} {path}", site_label(site)));
    for item in &items {
        if item.is_folder {
            human.push_detail(format!("{}/", item.name));
        } else {
            human.push_detail(item.name.clone());
        }
    }
    if items.is_empty() {
        human.push_warning("no items");
    }

    let report = ListReport {
        site: site.to_string(),
        path: path.to_string(),
        items,
    };
    emit_success(ctx.output, "ls", &report, Some(&human))
}

fn emit_commit(
    ctx: &Context,
    command: &str,
    site: &str,
    path: &str,
    revision: Option<git2::Oid>,
    header: String,
) -> Result<()> {
    let report = CommitReport {
        site: site.to_string(),
        path: path.to_string(),
        revision: revision.map(|oid| oid.to_string()),
    };

    let mut human = HumanOutput::new(header);
    human.push_summary("site", site_label(site));
    match &report.revision {
        Some(revision) => human.push_summary("revision", short(revision)),
        None => human.push_warning("nothing was committed"),
    }

    emit_success(ctx.output, command, &report, Some(&human))
}

/// Raw bytes on stdout for humans; lossy UTF-8 inside the JSON envelope.
pub(super) fn emit_bytes(
    ctx: &Context,
    command: &str,
    site: &str,
    path: &str,
    bytes: Vec<u8>,
) -> Result<()> {
    if ctx.output.json {
        let report = ReadReport {
            site: site.to_string(),
            path: path.to_string(),
            size: bytes.len(),
            content: String::from_utf8_lossy(&bytes).into_owned(),
        };
        return emit_success(ctx.output, command, &report, None);
    }

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&bytes).map_err(Error::from)?;
    stdout.flush()?;
    Ok(())
}

pub(super) fn short(revision: &str) -> &str {
    revision.get(..10).unwrap_or(revision)
}
