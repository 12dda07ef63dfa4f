//! sitevault site command implementation
//!
//! Creates and deletes the sandbox/published store pair of a site.

use std::path::PathBuf;

use crate::blueprint::{Blueprint, DirectoryBlueprint};
use crate::error::{Error, Result};
use crate::output::{emit_success, HumanOutput};
use crate::registry::StoreKind;

use super::Context;

#[derive(serde::Serialize)]
struct SiteReport {
    site: String,
    sandbox: PathBuf,
    published: PathBuf,
}

pub fn run_create(ctx: &Context, site: &str, blueprint: Option<PathBuf>) -> Result<()> {
    if site.trim().is_empty() {
        return Err(Error::InvalidArgument(
            "site id cannot be empty; the global store is created on first use".to_string(),
        ));
    }
    let blueprint = match blueprint {
        Some(dir) if !dir.is_dir() => {
            return Err(Error::InvalidArgument(format!(
                "blueprint '{}' is not a directory",
                dir.display()
            )))
        }
        Some(dir) => Some(DirectoryBlueprint::new(dir)),
        None => None,
    };

    let registry = ctx.repository.registry();
    registry.create_site(site, blueprint.as_ref().map(|b| b as &dyn Blueprint))?;

    let report = SiteReport {
        site: site.to_string(),
        sandbox: registry.store_path(site, StoreKind::Sandbox)?,
        published: registry.store_path(site, StoreKind::Published)?,
    };

    let mut human = HumanOutput::new(format!("Created site {site}"));
    human.push_summary("sandbox", report.sandbox.display().to_string());
    human.push_summary("published", report.published.display().to_string());
    if let Some(blueprint) = &blueprint {
        human.push_detail(format!("seeded from {}", blueprint.source().display()));
    }
    human.push_next_step(format!("sitevault write {site} /index.xml --file <path>"));

    emit_success(ctx.output, "site create", &report, Some(&human))
}

pub fn run_delete(ctx: &Context, site: &str) -> Result<()> {
    let registry = ctx.repository.registry();
    let report = SiteReport {
        site: site.to_string(),
        sandbox: registry.store_path(site, StoreKind::Sandbox)?,
        published: registry.store_path(site, StoreKind::Published)?,
    };
    registry.delete_site(site)?;

    let human = HumanOutput::new(format!("Deleted site {site}"));
    emit_success(ctx.output, "site delete", &report, Some(&human))
}
