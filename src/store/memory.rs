//! In-memory store, shared by every clone.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use super::{CacheEntry, CacheStorage};
use crate::error::{Error, Result};
use crate::request::{Request, RequestKey, Response};

type Store = HashMap<RequestKey, CacheEntry>;

/// Process-wide in-memory [`CacheStorage`]. Cloning shares the contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStorage {
    // Vec keeps creation order for `keys`.
    stores: Arc<RwLock<Vec<(String, Store)>>>,
}

impl MemoryCacheStorage {
    /// Creates an empty storage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&Vec<(String, Store)>) -> T) -> T {
        let guard = self.stores.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write<T>(&self, f: impl FnOnce(&mut Vec<(String, Store)>) -> T) -> T {
        let mut guard = self.stores.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

fn open_in<'a>(stores: &'a mut Vec<(String, Store)>, name: &str) -> &'a mut Store {
    let index = match stores.iter().position(|(n, _)| n == name) {
        Some(index) => index,
        None => {
            stores.push((name.to_string(), Store::new()));
            stores.len() - 1
        }
    };
    &mut stores[index].1
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<()> {
        self.write(|stores| {
            open_in(stores, name);
        });
        Ok(())
    }

    async fn has(&self, name: &str) -> Result<bool> {
        Ok(self.read(|stores| stores.iter().any(|(n, _)| n == name)))
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.read(|stores| stores.iter().map(|(n, _)| n.clone()).collect()))
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.write(|stores| {
            let before = stores.len();
            stores.retain(|(n, _)| n != name);
            stores.len() != before
        }))
    }

    async fn match_request(&self, name: &str, request: &Request) -> Result<Option<Response>> {
        self.read(|stores| {
            let (_, store) = stores
                .iter()
                .find(|(n, _)| n == name)
                .ok_or_else(|| Error::StoreNotFound(name.to_string()))?;
            Ok(store
                .get(&request.key())
                .filter(|entry| entry.matches(request))
                .map(|entry| entry.response.clone()))
        })
    }

    async fn put(&self, name: &str, entry: CacheEntry) -> Result<()> {
        self.write(|stores| {
            open_in(stores, name).insert(entry.key.clone(), entry);
        });
        Ok(())
    }

    async fn put_all(&self, name: &str, entries: Vec<CacheEntry>) -> Result<()> {
        // Single write lock: readers see all entries or none.
        self.write(|stores| {
            let store = open_in(stores, name);
            for entry in entries {
                store.insert(entry.key.clone(), entry);
            }
        });
        Ok(())
    }

    async fn entries(&self, name: &str) -> Result<Vec<CacheEntry>> {
        self.read(|stores| {
            let (_, store) = stores
                .iter()
                .find(|(n, _)| n == name)
                .ok_or_else(|| Error::StoreNotFound(name.to_string()))?;
            let mut entries: Vec<_> = store.values().cloned().collect();
            entries.sort_by(|a, b| a.key.cmp(&b.key));
            Ok(entries)
        })
    }
}
