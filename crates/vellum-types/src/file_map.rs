use std::collections::BTreeMap;

use crate::file_id::FileId;
use crate::store_id::StoreId;

/// Association of blobs to the files that reference them.
///
/// Built by callers that turn a list of files into the set of distinct blobs
/// to fetch, and back again. Iteration order follows [`StoreId`] ordering.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileMap {
    by_store: BTreeMap<StoreId, Vec<FileId>>,
}

impl FileMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `file` under its store and return that store.
    pub fn insert(&mut self, file: FileId) -> StoreId {
        let store = file.store;
        let files = self.by_store.entry(store).or_default();
        if !files.contains(&file) {
            files.push(file);
        }
        store
    }

    /// Record every file and return the distinct stores in first-seen order.
    pub fn extend_files<I>(&mut self, files: I) -> Vec<StoreId>
    where
        I: IntoIterator<Item = FileId>,
    {
        let mut stores = Vec::new();
        for file in files {
            let store = self.insert(file);
            if !stores.contains(&store) {
                stores.push(store);
            }
        }
        stores
    }

    /// Files recorded for `store`; empty if none.
    pub fn files_for(&self, store: &StoreId) -> &[FileId] {
        self.by_store.get(store).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All files recorded for any of `stores`, grouped in the order given.
    pub fn files_for_all<'a, I>(&self, stores: I) -> Vec<FileId>
    where
        I: IntoIterator<Item = &'a StoreId>,
    {
        stores
            .into_iter()
            .flat_map(|store| self.files_for(store).iter().cloned())
            .collect()
    }

    pub fn stores(&self) -> impl Iterator<Item = &StoreId> {
        self.by_store.keys()
    }

    pub fn store_count(&self) -> usize {
        self.by_store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_store.is_empty()
    }
}

impl FromIterator<FileId> for FileMap {
    fn from_iter<I: IntoIterator<Item = FileId>>(iter: I) -> Self {
        let mut map = Self::new();
        map.extend_files(iter);
        map
    }
}
