//! Session-scoped memo for name→ID resolutions.
//!
//! Reference data (option groups, custom fields, tags, location types) is
//! assumed immutable for the lifetime of a session, so entries are never
//! invalidated. A resolved "absent" is cached like any other value.
//!
//! Locking: readers of populated keys take a shared lock and never wait on a
//! resolution in progress. Misses take the single upgradable lock, re-check,
//! run the resolver and upgrade to a write lock only for the insert. Only one
//! resolution runs at a time, so each key is resolved exactly once.
//! A resolver must not call back into the same cache.

use crate::error::CiviResult;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use std::collections::HashMap;

/// Namespaced lookup cache.
#[derive(Debug)]
pub struct LookupCache<V> {
    entries: RwLock<HashMap<String, HashMap<String, V>>>,
}

impl<V> Default for LookupCache<V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<V: Clone> LookupCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value, running `resolve` on the first request only.
    ///
    /// Resolver errors propagate and leave the key unpopulated.
    pub fn resolve<F>(&self, namespace: &str, key: &str, resolve: F) -> CiviResult<V>
    where
        F: FnOnce() -> CiviResult<V>,
    {
        if let Some(value) = self.get(namespace, key) {
            return Ok(value);
        }

        let guard = self.entries.upgradable_read();
        if let Some(value) = guard.get(namespace).and_then(|keys| keys.get(key)) {
            return Ok(value.clone());
        }

        let value = resolve()?;
        log::debug!("cached {}[{}]", namespace, key);

        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        guard
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.clone());
        Ok(value)
    }

    pub fn get(&self, namespace: &str, key: &str) -> Option<V> {
        self.entries
            .read()
            .get(namespace)
            .and_then(|keys| keys.get(key))
            .cloned()
    }

    /// Store or overwrite a value learned outside a resolver, e.g. from a create.
    pub fn insert(&self, namespace: &str, key: &str, value: V) {
        self.entries
            .write()
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn contains(&self, namespace: &str, key: &str) -> bool {
        self.entries
            .read()
            .get(namespace)
            .is_some_and(|keys| keys.contains_key(key))
    }

    pub fn len(&self) -> usize {
        self.entries.read().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn namespace_len(&self, namespace: &str) -> usize {
        self.entries.read().get(namespace).map_or(0, HashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CiviError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn resolver_runs_once_per_key() {
        let cache = LookupCache::new();
        let calls = AtomicUsize::new(0);
        let resolve = || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(7_i64)
        };

        assert_eq!(cache.resolve("tag", "donor", resolve).unwrap(), 7);
        assert_eq!(cache.resolve("tag", "donor", resolve).unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.contains("tag", "donor"));
        assert!(!cache.contains("group", "donor"));
    }

    #[test]
    fn absent_sentinel_is_cached() {
        let cache = LookupCache::new();
        assert_eq!(cache.resolve("campaign", "none", || Ok(0_i64)).unwrap(), 0);
        let again = cache.resolve("campaign", "none", || Err(CiviError::record("must not run")));
        assert_eq!(again.unwrap(), 0);
    }

    #[test]
    fn errors_are_not_cached() {
        let cache: LookupCache<i64> = LookupCache::new();
        let failed = cache.resolve("custom_field", "Mood", || Err(CiviError::record("offline")));
        assert!(failed.is_err());
        assert!(cache.is_empty());

        assert_eq!(cache.resolve("custom_field", "Mood", || Ok(12)).unwrap(), 12);
        assert_eq!(cache.namespace_len("custom_field"), 1);
    }
}
