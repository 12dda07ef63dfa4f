//! sitevault lock/unlock commands.

use crate::error::Result;
use crate::output::{emit_success, HumanOutput};

use super::{site_label, Context};

#[derive(serde::Serialize)]
struct LockReport {
    site: String,
    path: String,
    published: bool,
    locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    owner: Option<String>,
}

pub fn run_lock(ctx: &Context, site: &str, path: &str, published: bool) -> Result<()> {
    let locks = ctx.repository.locks();
    let acquired = if published {
        locks.lock_published(site, path)?
    } else {
        locks.lock(site, path)?
    };
    let owner = if published {
        None
    } else {
        locks.lock_owner(site, path)?.map(|marker| marker.owner)
    };

    let mut human = HumanOutput::new(if acquired {
        format!("Locked {path}")
    } else {
        format!("Could not lock {path}")
    });
    human.push_summary("site", site_label(site));
    if let Some(owner) = &owner {
        human.push_summary("owner", owner.clone());
    }
    if !acquired {
        human.push_warning("item is missing or already locked");
    }

    let report = LockReport {
        site: site.to_string(),
        path: path.to_string(),
        published,
        locked: acquired,
        owner,
    };
    emit_success(ctx.output, "lock", &report, Some(&human))
}

pub fn run_unlock(ctx: &Context, site: &str, path: &str, published: bool) -> Result<()> {
    let locks = ctx.repository.locks();
    if published {
        locks.unlock_published(site, path)?;
    } else {
        locks.unlock(site, path)?;
    }

    let mut human = HumanOutput::new(format!("Unlocked {path}"));
    human.push_summary("site", site_label(site));

    let report = LockReport {
        site: site.to_string(),
        path: path.to_string(),
        published,
        locked: false,
        owner: None,
    };
    emit_success(ctx.output, "unlock", &report, Some(&human))
}
