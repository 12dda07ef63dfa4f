mod support;

use sitevault::content::RepositoryItem;
use sitevault::registry::StoreKind;
use sitevault::Error;

use support::{TestVault, SITE};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn names(items: &[RepositoryItem]) -> Vec<(&str, bool)> {
    items
        .iter()
        .map(|item| (item.name.as_str(), item.is_folder))
        .collect()
}

#[test]
fn write_then_read_returns_bytes_and_history() -> TestResult {
    let vault = TestVault::with_site();
    let bytes = b"<page>\n  <title>Home</title>\n</page>\n";

    let revision = vault
        .vault()
        .content()
        .write(SITE, "/site/website/index.xml", bytes)?
        .expect("revision");

    assert_eq!(vault.vault().content().read(SITE, "/site/website/index.xml")?, bytes);

    let history = vault.vault().history().version_history(SITE, "/site/website/index.xml")?;
    assert!(!history.is_empty());
    assert_eq!(history[0].revision_id, revision.to_string());
    assert_eq!(history[0].author, "admin");
    assert_eq!(history[0].message, "Wrote content /site/website/index.xml");
    Ok(())
}

#[test]
fn rewriting_identical_bytes_returns_last_revision() -> TestResult {
    let vault = TestVault::with_site();
    let first = vault.write("/same.txt", "unchanged body");
    let second = vault
        .vault()
        .content()
        .write(SITE, "/same.txt", b"unchanged body")?;

    assert_eq!(second, Some(first));
    assert_eq!(vault.sandbox_head(), first);
    Ok(())
}

#[test]
fn write_to_root_is_rejected() {
    let vault = TestVault::with_site();
    let result = vault.vault().content().write(SITE, "/", b"x");
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

#[test]
fn read_missing_path_is_content_not_found() {
    let vault = TestVault::with_site();
    let result = vault.vault().content().read(SITE, "/missing.xml");
    assert!(matches!(result, Err(Error::ContentNotFound { .. })));
}

#[test]
fn empty_folder_survives_snapshot() -> TestResult {
    let vault = TestVault::with_site();
    vault.write("/a/readme.txt", "folder a readme");
    let revision = vault.vault().content().create_folder(SITE, "/a", "b")?;
    assert!(revision.is_some());

    let children = vault.vault().content().list_children(SITE, "/a")?;
    assert_eq!(names(&children), vec![("b", true), ("readme.txt", false)]);
    assert!(children.iter().all(|item| item.path == "/a"));

    // the placeholder itself is never listed
    assert!(vault.vault().content().list_children(SITE, "/a/b")?.is_empty());
    assert!(vault.vault().content().exists(SITE, "/a/b")?);
    Ok(())
}

#[test]
fn creating_an_existing_folder_commits_nothing() -> TestResult {
    let vault = TestVault::with_site();
    vault.vault().content().create_folder(SITE, "/", "docs")?;
    let head = vault.sandbox_head();

    let again = vault.vault().content().create_folder(SITE, "/", "docs")?;
    assert!(again.is_none());
    assert_eq!(vault.sandbox_head(), head);
    Ok(())
}

#[test]
fn deleting_only_file_removes_folder() -> TestResult {
    let vault = TestVault::with_site();
    vault.write("/lonely/only.xml", "the only file");
    vault.write("/keep.xml", "root file");

    let revision = vault.vault().content().delete(SITE, "/lonely/only.xml", None)?;
    assert!(revision.is_some());

    let root = vault.vault().content().list_children(SITE, "/")?;
    assert_eq!(names(&root), vec![("keep.xml", false)]);
    assert!(!vault.vault().content().exists(SITE, "/lonely")?);
    Ok(())
}

#[test]
fn deleting_one_of_two_files_keeps_folder() -> TestResult {
    let vault = TestVault::with_site();
    vault.write("/pair/one.xml", "first of two");
    vault.write("/pair/two.xml", "second of two");

    vault.vault().content().delete(SITE, "/pair/one.xml", None)?;

    let root = vault.vault().content().list_children(SITE, "/")?;
    assert_eq!(names(&root), vec![("pair", true)]);
    let pair = vault.vault().content().list_children(SITE, "/pair")?;
    assert_eq!(names(&pair), vec![("two.xml", false)]);
    Ok(())
}

#[test]
fn deleting_last_file_next_to_placeholder_removes_folder() -> TestResult {
    let vault = TestVault::with_site();
    vault.vault().content().create_folder(SITE, "/", "news")?;
    vault.write("/news/item.xml", "news item");

    vault.vault().content().delete(SITE, "/news/item.xml", None)?;

    assert!(!vault.vault().content().exists(SITE, "/news")?);
    Ok(())
}

#[test]
fn delete_uses_approver_identity() -> TestResult {
    let vault = TestVault::with_site();
    vault.write("/approved.xml", "needs approval");

    vault
        .vault()
        .content()
        .delete(SITE, "/approved.xml", Some("reviewer"))?;

    let repo = vault.store(StoreKind::Sandbox);
    let head = repo.head()?.peel_to_commit()?;
    assert_eq!(head.author().name(), Some("reviewer"));
    assert_eq!(head.message(), Some("Delete file /approved.xml"));
    Ok(())
}

#[test]
fn deleting_missing_path_returns_no_revision() -> TestResult {
    let vault = TestVault::with_site();
    let head = vault.sandbox_head();
    assert!(vault.vault().content().delete(SITE, "/ghost.xml", None)?.is_none());
    assert_eq!(vault.sandbox_head(), head);
    Ok(())
}

#[test]
fn rename_file_commits_destination() -> TestResult {
    let vault = TestVault::with_site();
    vault.write("/docs/old.xml", "rename me please");

    let moved = vault
        .vault()
        .content()
        .move_content(SITE, "/docs/old.xml", "/docs/new.xml", None)?;

    assert_eq!(moved.keys().collect::<Vec<_>>(), vec!["/docs/new.xml"]);
    assert_eq!(vault.read("/docs/new.xml"), "rename me please");
    assert!(!vault.vault().content().exists(SITE, "/docs/old.xml")?);
    assert_eq!(moved["/docs/new.xml"], vault.sandbox_head());
    Ok(())
}

#[test]
fn move_with_new_name_into_folder() -> TestResult {
    let vault = TestVault::with_site();
    vault.write("/src.xml", "move with new name");
    vault.write("/target/existing.xml", "already here");

    let moved = vault
        .vault()
        .content()
        .move_content(SITE, "/src.xml", "/target", Some("renamed.xml"))?;

    assert!(moved.contains_key("/target/renamed.xml"));
    assert_eq!(vault.read("/target/renamed.xml"), "move with new name");
    let repo = vault.store(StoreKind::Sandbox);
    let head = repo.head()?.peel_to_commit()?;
    assert_eq!(head.message(), Some("Moving /src.xml to /target/renamed.xml"));
    Ok(())
}

#[test]
fn file_moved_onto_folder_lands_inside() -> TestResult {
    let vault = TestVault::with_site();
    vault.write("/loose.xml", "loose file body");
    vault.write("/bucket/other.xml", "bucket content");

    let moved = vault
        .vault()
        .content()
        .move_content(SITE, "/loose.xml", "/bucket", None)?;

    assert!(moved.contains_key("/bucket/loose.xml"));
    assert_eq!(vault.read("/bucket/loose.xml"), "loose file body");
    Ok(())
}

#[test]
fn file_moved_onto_existing_file_replaces_it() -> TestResult {
    let vault = TestVault::with_site();
    vault.write("/winner.xml", "winner body");
    vault.write("/loser.xml", "loser body");

    let moved = vault
        .vault()
        .content()
        .move_content(SITE, "/winner.xml", "/loser.xml", None)?;

    assert!(moved.contains_key("/loser.xml"));
    assert_eq!(vault.read("/loser.xml"), "winner body");
    assert!(!vault.vault().content().exists(SITE, "/winner.xml")?);
    Ok(())
}

#[test]
fn folder_move_commits_each_file() -> TestResult {
    let vault = TestVault::with_site();
    vault.write("/old/a.xml", "alpha document");
    vault.write("/old/nested/b.xml", "beta document");

    let moved = vault
        .vault()
        .content()
        .move_content(SITE, "/old", "/new", None)?;

    assert_eq!(
        moved.keys().cloned().collect::<Vec<_>>(),
        vec!["/new/a.xml".to_string(), "/new/nested/b.xml".to_string()]
    );
    assert_eq!(vault.read("/new/nested/b.xml"), "beta document");
    assert!(!vault.vault().content().exists(SITE, "/old")?);

    // the index is back in sync with the tip
    let sandbox = vault.store(StoreKind::Sandbox);
    let statuses = sandbox.statuses(None)?;
    assert!(statuses.iter().all(|entry| entry.status().is_empty()));
    Ok(())
}

#[test]
fn folder_merge_into_existing_folder() -> TestResult {
    let vault = TestVault::with_site();
    vault.write("/from/one.xml", "merged one");
    vault.write("/into/two.xml", "stays two");

    vault
        .vault()
        .content()
        .move_content(SITE, "/from", "/into", None)?;

    let children = vault.vault().content().list_children(SITE, "/into")?;
    assert_eq!(names(&children), vec![("one.xml", false), ("two.xml", false)]);
    assert!(!vault.vault().content().exists(SITE, "/from")?);
    Ok(())
}

#[test]
fn folder_merge_with_identical_content_commits_source_removal() -> TestResult {
    let vault = TestVault::with_site();
    vault.write("/src/x.txt", "same");
    vault.write("/dst/x.txt", "same");
    let before = vault.sandbox_head();

    let moved = vault
        .vault()
        .content()
        .move_content(SITE, "/src", "/dst", None)?;

    assert_eq!(moved.keys().collect::<Vec<_>>(), vec!["/dst/x.txt"]);
    assert_eq!(moved["/dst/x.txt"], vault.sandbox_head());
    assert_ne!(vault.sandbox_head(), before);
    assert!(!vault.vault().content().exists(SITE, "/src/x.txt")?);
    assert!(!vault.vault().content().exists(SITE, "/src")?);
    assert_eq!(vault.read("/dst/x.txt"), "same");

    let repo = vault.store(StoreKind::Sandbox);
    let head = repo.head()?.peel_to_commit()?;
    assert_eq!(head.message(), Some("Moving /src to /dst"));
    assert!(head.tree()?.get_path(std::path::Path::new("src/x.txt")).is_err());
    Ok(())
}

#[test]
fn folder_onto_file_is_invalid_move() {
    let vault = TestVault::with_site();
    vault.write("/dir/inner.xml", "inner file");
    vault.write("/plain.xml", "plain file");
    let head = vault.sandbox_head();

    let result = vault
        .vault()
        .content()
        .move_content(SITE, "/dir", "/plain.xml", None);

    assert!(matches!(result, Err(Error::InvalidMove { .. })));
    assert_eq!(vault.sandbox_head(), head);
    assert_eq!(vault.read("/plain.xml"), "plain file");
}

#[test]
fn folder_into_itself_is_invalid_move() {
    let vault = TestVault::with_site();
    vault.write("/loop/file.xml", "loop file");

    let result = vault
        .vault()
        .content()
        .move_content(SITE, "/loop", "/loop/inner", None);
    assert!(matches!(result, Err(Error::InvalidMove { .. })));
}

#[test]
fn moving_missing_source_is_content_not_found() {
    let vault = TestVault::with_site();
    let result = vault
        .vault()
        .content()
        .move_content(SITE, "/nope.xml", "/dest.xml", None);
    assert!(matches!(result, Err(Error::ContentNotFound { .. })));
}

#[test]
fn copy_folder_in_one_commit() -> TestResult {
    let vault = TestVault::with_site();
    vault.write("/tpl/page.ftl", "template page");
    vault.write("/tpl/parts/header.ftl", "template header");
    let before = vault.sandbox_head();

    let revision = vault
        .vault()
        .content()
        .copy(SITE, "/tpl", "/tpl-copy")?
        .expect("revision");

    let repo = vault.store(StoreKind::Sandbox);
    let commit = repo.find_commit(revision)?;
    assert_eq!(commit.parent_id(0)?, before);
    assert_eq!(commit.message(), Some("Copying /tpl to /tpl-copy"));
    assert_eq!(vault.read("/tpl-copy/parts/header.ftl"), "template header");
    assert_eq!(vault.read("/tpl/page.ftl"), "template page");
    Ok(())
}

#[test]
fn copy_missing_source_is_content_not_found() {
    let vault = TestVault::with_site();
    let result = vault.vault().content().copy(SITE, "/none", "/dest");
    assert!(matches!(result, Err(Error::ContentNotFound { .. })));
}

#[test]
fn list_children_of_file_or_missing_folder_is_empty() -> TestResult {
    let vault = TestVault::with_site();
    vault.write("/file.xml", "just a file");

    assert!(vault.vault().content().list_children(SITE, "/file.xml")?.is_empty());
    assert!(vault.vault().content().list_children(SITE, "/nowhere")?.is_empty());
    Ok(())
}

#[test]
fn global_store_is_addressed_by_empty_site() -> TestResult {
    let vault = TestVault::new();
    let revision = vault
        .vault()
        .content()
        .write("", "/shared/config.xml", b"<shared/>")?;
    assert!(revision.is_some());
    assert_eq!(
        vault.vault().content().read("", "/shared/config.xml")?,
        b"<shared/>"
    );
    assert!(vault.root().join("global").join(".git").is_dir());
    Ok(())
}

#[test]
fn traversal_paths_are_rejected() {
    let vault = TestVault::with_site();
    let result = vault.vault().content().write(SITE, "/../escape.txt", b"x");
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}
