//! An ordered document collection with a per-record size limit.
//!
//! This models the storage primitive the chunked backend is built on: keyed
//! records, atomic single-record conditional updates, ordered range scans
//! and a hard cap on encoded record size. Record size is measured as the
//! bincode encoding of the document.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::error::{StoreError, StoreResult};

pub struct Collection<K, D> {
    name: &'static str,
    max_record_bytes: u64,
    records: RwLock<BTreeMap<K, D>>,
}

impl<K, D> Collection<K, D>
where
    K: Ord + Clone + fmt::Debug,
    D: Serialize + Clone,
{
    pub fn new(name: &'static str, max_record_bytes: u64) -> Self {
        Self {
            name,
            max_record_bytes,
            records: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn max_record_bytes(&self) -> u64 {
        self.max_record_bytes
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, BTreeMap<K, D>>> {
        self.records
            .read()
            .map_err(|_| StoreError::LockPoisoned(self.name))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, BTreeMap<K, D>>> {
        self.records
            .write()
            .map_err(|_| StoreError::LockPoisoned(self.name))
    }

    /// Encoded size of `doc`, failing if it exceeds the record limit.
    pub fn check_size(&self, doc: &D) -> StoreResult<u64> {
        let size =
            bincode::serialized_size(doc).map_err(|e| StoreError::Serialization(e.to_string()))?;
        if size > self.max_record_bytes {
            return Err(StoreError::RecordTooLarge {
                collection: self.name,
                size,
                limit: self.max_record_bytes,
            });
        }
        Ok(size)
    }

    /// Insert under a unique key. Fails with [`StoreError::DuplicateKey`]
    /// if the key exists.
    pub fn insert(&self, key: K, doc: D) -> StoreResult<()> {
        self.check_size(&doc)?;
        let mut records = self.write()?;
        if records.contains_key(&key) {
            return Err(StoreError::DuplicateKey {
                collection: self.name,
                key: format!("{key:?}"),
            });
        }
        records.insert(key, doc);
        Ok(())
    }

    /// Insert `doc` if the key is absent, or replace the existing document
    /// if `replace` accepts it. Returns whether `doc` was written.
    pub fn upsert_if<P>(&self, key: K, doc: D, replace: P) -> StoreResult<bool>
    where
        P: FnOnce(&D) -> bool,
    {
        self.check_size(&doc)?;
        let mut records = self.write()?;
        match records.get_mut(&key) {
            Some(existing) if replace(existing) => {
                *existing = doc;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => {
                records.insert(key, doc);
                Ok(true)
            }
        }
    }

    /// Atomically apply `update` to the document at `key` if `filter`
    /// accepts it. Returns whether an update happened. The updated document
    /// must still fit the size limit, otherwise nothing changes.
    pub fn update_if<P, U>(&self, key: &K, filter: P, update: U) -> StoreResult<bool>
    where
        P: FnOnce(&D) -> bool,
        U: FnOnce(&mut D),
    {
        let mut records = self.write()?;
        let Some(existing) = records.get_mut(key) else {
            return Ok(false);
        };
        if !filter(existing) {
            return Ok(false);
        }
        let mut updated = existing.clone();
        update(&mut updated);
        self.check_size(&updated)?;
        *existing = updated;
        Ok(true)
    }

    pub fn find(&self, key: &K) -> StoreResult<Option<D>> {
        Ok(self.read()?.get(key).cloned())
    }

    /// Ordered scan starting at `start`, continuing while `keep` accepts the
    /// key.
    pub fn scan_from<P>(&self, start: &K, keep: P) -> StoreResult<Vec<(K, D)>>
    where
        P: Fn(&K) -> bool,
    {
        let records = self.read()?;
        Ok(records
            .range(start..)
            .take_while(|(key, _)| keep(key))
            .map(|(key, doc)| (key.clone(), doc.clone()))
            .collect())
    }

    /// Delete the document at `key` if `filter` accepts it.
    pub fn delete_if<P>(&self, key: &K, filter: P) -> StoreResult<bool>
    where
        P: FnOnce(&D) -> bool,
    {
        let mut records = self.write()?;
        let matched = records.get(key).is_some_and(filter);
        if matched {
            records.remove(key);
        }
        Ok(matched)
    }

    /// Delete every document in the ordered run starting at `start` whose
    /// key satisfies `keep` and `filter`. Returns the number removed.
    pub fn delete_range_where<P, F>(&self, start: &K, keep: P, filter: F) -> StoreResult<usize>
    where
        P: Fn(&K) -> bool,
        F: Fn(&K, &D) -> bool,
    {
        let mut records = self.write()?;
        let doomed: Vec<K> = records
            .range(start..)
            .take_while(|(key, _)| keep(key))
            .filter(|(key, doc)| filter(key, doc))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            records.remove(key);
        }
        Ok(doomed.len())
    }

    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.read()?.is_empty())
    }
}

impl<K, D> fmt::Debug for Collection<K, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.records.read().map(|r| r.len()).unwrap_or(0);
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("max_record_bytes", &self.max_record_bytes)
            .field("len", &len)
            .finish()
    }
}
