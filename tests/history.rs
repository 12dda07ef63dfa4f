mod support;

use sitevault::history::VERSION_LABEL_FORMAT;
use sitevault::registry::StoreKind;
use sitevault::{refs, Error};

use support::{TestVault, SITE};

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[test]
fn version_history_is_newest_first_and_path_scoped() -> TestResult {
    let vault = TestVault::with_site();
    let r1 = vault.write("/page.xml", "page v1");
    vault.write("/other.xml", "unrelated page");
    let r3 = vault.write("/page.xml", "page v2");

    let history = vault.vault().history().version_history(SITE, "/page.xml")?;
    let ids: Vec<_> = history.iter().map(|v| v.revision_id.clone()).collect();
    assert_eq!(ids, vec![r3.to_string(), r1.to_string()]);
    Ok(())
}

#[test]
fn folder_history_includes_nested_changes() -> TestResult {
    let vault = TestVault::with_site();
    vault.write("/blog/2024/post.xml", "first post");
    vault.write("/about.xml", "about page");
    vault.write("/blog/2025/post.xml", "second post");

    let history = vault.vault().history().version_history(SITE, "/blog")?;
    assert_eq!(history.len(), 2);
    Ok(())
}

#[test]
fn content_at_reads_historical_snapshot() -> TestResult {
    let vault = TestVault::with_site();
    let r1 = vault.write("/a/b.txt", "hello");
    vault.write("/a/b.txt", "world");

    let old = vault
        .vault()
        .history()
        .content_at(SITE, "/a/b.txt", &r1.to_string())?;
    assert_eq!(old, b"hello");
    assert_eq!(vault.read("/a/b.txt"), "world");
    Ok(())
}

#[test]
fn content_at_missing_path_is_content_not_found() {
    let vault = TestVault::with_site();
    let r1 = vault.write("/present.xml", "present");
    vault.write("/later.xml", "added later");

    let result = vault
        .vault()
        .history()
        .content_at(SITE, "/later.xml", &r1.to_string());
    assert!(matches!(result, Err(Error::ContentNotFound { .. })));
}

#[test]
fn content_at_unknown_revision_is_reference_not_found() {
    let vault = TestVault::with_site();
    let result = vault.vault().history().content_at(
        SITE,
        "/x.xml",
        "0123456789012345678901234567890123456789",
    );
    assert!(matches!(result, Err(Error::ReferenceNotFound(_))));
}

#[test]
fn revert_reapplies_old_content_as_new_commit() -> TestResult {
    let vault = TestVault::with_site();
    let r1 = vault.write("/doc.xml", "original text");
    let r2 = vault.write("/doc.xml", "broken edit");

    let reverted = vault
        .vault()
        .history()
        .revert(SITE, "/doc.xml", &r1.to_string(), "roll back")?
        .expect("revision");

    assert_ne!(reverted, r1);
    assert_ne!(reverted, r2);
    assert_eq!(vault.read("/doc.xml"), "original text");

    let history = vault.vault().history().version_history(SITE, "/doc.xml")?;
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].revision_id, reverted.to_string());

    // a major version label exists in the published store
    let published = vault.store(StoreKind::Published);
    let tags = refs::list_tags(&published, None)?;
    assert_eq!(tags.len(), 1);
    assert!(chrono::NaiveDateTime::parse_from_str(&tags[0], VERSION_LABEL_FORMAT).is_ok());
    Ok(())
}

#[test]
fn major_version_creates_annotated_tag() -> TestResult {
    let vault = TestVault::with_site();
    vault.write("/tagged.xml", "tag me");

    let label = vault
        .vault()
        .history()
        .tag_major_version(SITE, "/tagged.xml", "release notes")?
        .expect("label");

    let published = vault.store(StoreKind::Published);
    let tag = published
        .find_reference(&format!("refs/tags/{label}"))?
        .peel_to_tag()?;
    assert_eq!(tag.message(), Some("release notes"));
    assert_eq!(tag.tagger().and_then(|t| t.name().map(str::to_string)), Some("admin".to_string()));
    Ok(())
}

#[test]
fn minor_version_is_a_no_op() -> TestResult {
    let vault = TestVault::with_site();
    vault.write("/minor.xml", "minor");

    let label = vault
        .vault()
        .history()
        .tag_version(SITE, "/minor.xml", "small fix", false)?;
    assert!(label.is_none());
    assert!(refs::list_tags(&vault.store(StoreKind::Published), None)?.is_empty());
    Ok(())
}

#[test]
fn first_and_last_revision() -> TestResult {
    let vault = TestVault::with_site();
    let sandbox = vault.store(StoreKind::Sandbox);
    let root = sandbox.head()?.peel_to_commit()?.id();
    vault.write("/one.xml", "one");
    let last = vault.write("/two.xml", "two");

    let history = vault.vault().history();
    assert_eq!(history.first_revision(SITE)?, root);
    assert_eq!(history.last_revision(SITE)?, last);
    Ok(())
}

#[test]
fn commit_exists_checks_revisions() -> TestResult {
    let vault = TestVault::with_site();
    let r1 = vault.write("/exists.xml", "exists");

    let history = vault.vault().history();
    assert!(history.commit_exists(SITE, &r1.to_string())?);
    assert!(!history.commit_exists(SITE, "0123456789012345678901234567890123456789")?);
    assert!(!history.commit_exists(SITE, "not a revision")?);
    Ok(())
}

#[test]
fn edit_revisions_are_oldest_first_in_half_open_range() -> TestResult {
    let vault = TestVault::with_site();
    let r1 = vault.write("/edit.xml", "edit one");
    let r2 = vault.write("/edit.xml", "edit two");
    vault.write("/noise.xml", "noise");
    let r4 = vault.write("/edit.xml", "edit three");

    let history = vault.vault().history();
    let from_r1 = history.edit_revisions(SITE, "/edit.xml", Some(&r1.to_string()), None)?;
    let ids: Vec<_> = from_r1.iter().map(|v| v.revision_id.clone()).collect();
    assert_eq!(ids, vec![r2.to_string(), r4.to_string()]);

    let all = history.edit_revisions(SITE, "/edit.xml", None, Some(&r2.to_string()))?;
    let ids: Vec<_> = all.iter().map(|v| v.revision_id.clone()).collect();
    assert_eq!(ids, vec![r1.to_string(), r2.to_string()]);
    Ok(())
}
