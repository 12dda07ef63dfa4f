mod support;

use std::sync::Arc;

use sitevault::metadata::{InMemoryMetadataStore, ItemMetadataRecord, MetadataStore};

use support::{TestVault, SITE};

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn tracked(vault: &TestVault) -> (Arc<InMemoryMetadataStore>, sitevault::ContentRepository) {
    let metadata = Arc::new(InMemoryMetadataStore::new());
    let repository = vault.vault().clone().with_metadata(metadata.clone());
    (metadata, repository)
}

#[test]
fn move_rekeys_record_and_marks_rename() -> TestResult {
    let vault = TestVault::with_site();
    let (metadata, repository) = tracked(&vault);

    repository.content().write(SITE, "/old.xml", b"content")?;
    let mut record = metadata.get(SITE, "/old.xml")?.expect("record");
    record.lock_owner = Some("author".to_string());
    metadata.insert(record)?;

    let moved = repository
        .content()
        .move_content(SITE, "/old.xml", "/", Some("new.xml"))?;
    let revision = moved.get("/new.xml").expect("moved path");

    assert!(!metadata.exists(SITE, "/old.xml")?);
    let record = metadata.get(SITE, "/new.xml")?.expect("rekeyed record");
    assert!(record.renamed);
    assert_eq!(record.old_path.as_deref(), Some("/old.xml"));
    assert_eq!(record.commit_id, Some(revision.to_string()));
    assert_eq!(record.lock_owner.as_deref(), Some("author"));
    Ok(())
}

#[test]
fn delete_drops_file_and_folder_records() -> TestResult {
    let vault = TestVault::with_site();
    let (metadata, repository) = tracked(&vault);

    repository.content().write(SITE, "/docs/a.xml", b"a")?;
    repository.content().write(SITE, "/docs/b.xml", b"b")?;
    repository.content().write(SITE, "/other.xml", b"other")?;
    metadata.insert(ItemMetadataRecord::new(SITE, "/docsearch.xml"))?;

    repository.content().delete(SITE, "/docs", None)?;
    assert!(!metadata.exists(SITE, "/docs/a.xml")?);
    assert!(!metadata.exists(SITE, "/docs/b.xml")?);
    assert!(metadata.exists(SITE, "/other.xml")?);
    assert!(metadata.exists(SITE, "/docsearch.xml")?);

    repository.content().delete(SITE, "/other.xml", None)?;
    assert!(!metadata.exists(SITE, "/other.xml")?);
    Ok(())
}

#[test]
fn unchanged_write_keeps_metadata_consistent() -> TestResult {
    let vault = TestVault::with_site();
    let (metadata, repository) = tracked(&vault);

    let first = repository.content().write(SITE, "/same.xml", b"same")?.expect("revision");
    let second = repository.content().write(SITE, "/same.xml", b"same")?.expect("revision");
    assert_eq!(first, second);

    let record = metadata.get(SITE, "/same.xml")?.expect("record");
    assert_eq!(record.commit_id, Some(first.to_string()));
    Ok(())
}

#[test]
fn copies_are_recorded_at_the_destination() -> TestResult {
    let vault = TestVault::with_site();
    let (metadata, repository) = tracked(&vault);

    repository.content().write(SITE, "/template.xml", b"template")?;
    let revision = repository
        .content()
        .copy(SITE, "/template.xml", "/instance.xml")?
        .expect("revision");

    let record = metadata.get(SITE, "/instance.xml")?.expect("record");
    assert_eq!(record.commit_id, Some(revision.to_string()));
    assert!(!record.renamed);
    assert_eq!(metadata.records(SITE).len(), 2);
    Ok(())
}
