//! Per-item metadata bookkeeping.
//!
//! Commits never depend on this state; it records lock owners, renames and
//! the last commit id per `(site, path)` for higher layers.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Metadata tracked for one content item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadataRecord {
    pub site: String,
    pub path: String,
    pub lock_owner: Option<String>,
    pub renamed: bool,
    pub old_path: Option<String>,
    pub commit_id: Option<String>,
}

impl ItemMetadataRecord {
    pub fn new(site: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            path: path.into(),
            ..Default::default()
        }
    }
}

/// Partial update applied by [`MetadataStore::set_properties`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataUpdate {
    pub lock_owner: Option<Option<String>>,
    pub renamed: Option<bool>,
    pub old_path: Option<Option<String>>,
    pub commit_id: Option<Option<String>>,
}

impl MetadataUpdate {
    pub fn commit_id(commit_id: impl Into<String>) -> Self {
        Self {
            commit_id: Some(Some(commit_id.into())),
            ..Default::default()
        }
    }

    fn apply(&self, record: &mut ItemMetadataRecord) {
        if let Some(owner) = &self.lock_owner {
            record.lock_owner = owner.clone();
        }
        if let Some(renamed) = self.renamed {
            record.renamed = renamed;
        }
        if let Some(old_path) = &self.old_path {
            record.old_path = old_path.clone();
        }
        if let Some(commit_id) = &self.commit_id {
            record.commit_id = commit_id.clone();
        }
    }
}

/// Key-value store of item metadata keyed by `(site, path)`.
pub trait MetadataStore: Send + Sync {
    fn insert(&self, record: ItemMetadataRecord) -> Result<()>;

    /// Apply `update` to an existing record, inserting a fresh one if absent.
    fn set_properties(&self, site: &str, path: &str, update: &MetadataUpdate) -> Result<()>;

    fn exists(&self, site: &str, path: &str) -> Result<bool>;

    fn get(&self, site: &str, path: &str) -> Result<Option<ItemMetadataRecord>>;

    fn delete(&self, site: &str, path: &str) -> Result<()>;

    /// Delete every record at or below `prefix`.
    fn delete_folder(&self, site: &str, prefix: &str) -> Result<()>;

    /// Re-key a record from `old` to `new`.
    fn update_path(&self, site: &str, old: &str, new: &str) -> Result<()>;
}

type RecordKey = (String, String);

/// Process-local metadata store.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    records: Mutex<BTreeMap<RecordKey, ItemMetadataRecord>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records of a site, ordered by path.
    pub fn records(&self, site: &str) -> Vec<ItemMetadataRecord> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records
            .values()
            .filter(|record| record.site == site)
            .cloned()
            .collect()
    }
}

fn key(site: &str, path: &str) -> RecordKey {
    (site.to_string(), path.to_string())
}

fn is_under(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    path == prefix || path.starts_with(&format!("{prefix}/"))
}

impl MetadataStore for InMemoryMetadataStore {
    fn insert(&self, record: ItemMetadataRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.insert(key(&record.site, &record.path), record);
        Ok(())
    }

    fn set_properties(&self, site: &str, path: &str, update: &MetadataUpdate) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let record = records
            .entry(key(site, path))
            .or_insert_with(|| ItemMetadataRecord::new(site, path));
        update.apply(record);
        Ok(())
    }

    fn exists(&self, site: &str, path: &str) -> Result<bool> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.contains_key(&key(site, path)))
    }

    fn get(&self, site: &str, path: &str) -> Result<Option<ItemMetadataRecord>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(&key(site, path)).cloned())
    }

    fn delete(&self, site: &str, path: &str) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.remove(&key(site, path));
        Ok(())
    }

    fn delete_folder(&self, site: &str, prefix: &str) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.retain(|(record_site, path), _| record_site != site || !is_under(path, prefix));
        Ok(())
    }

    fn update_path(&self, site: &str, old: &str, new: &str) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let mut record = records
            .remove(&key(site, old))
            .unwrap_or_else(|| ItemMetadataRecord::new(site, old));
        record.path = new.to_string();
        records.insert(key(site, new), record);
        Ok(())
    }
}
