#![forbid(unsafe_code)]

//! Observable hash map.
//!
//! Each mutating call emits one unqualified notification on the owning
//! field: old and new are the map itself and no [`ListChange`] is attached.
//! Observers re-read what they need.
//!
//! [`ListChange`]: crate::ListChange

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::source::ObservableSource;

struct MapInner<K, V> {
    source: Weak<ObservableSource>,
    field: &'static str,
    entries: RwLock<FxHashMap<K, V>>,
}

/// Shared handle to an observable map. Clones refer to the same map.
pub struct ObservableMap<K, V>(Arc<MapInner<K, V>>);

impl<K, V> Clone for ObservableMap<K, V> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<K, V> PartialEq for ObservableMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<K, V> fmt::Debug for ObservableMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableMap")
            .field("field", &self.0.field)
            .field("len", &self.0.entries.read().len())
            .finish()
    }
}

impl<K, V> Default for ObservableMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ObservableMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// A detached map; mutations emit nothing.
    #[must_use]
    pub fn new() -> Self {
        Self::attached(&Weak::new(), "")
    }

    #[must_use]
    pub fn attached(source: &Weak<ObservableSource>, field: &'static str) -> Self {
        Self(Arc::new(MapInner {
            source: source.clone(),
            field,
            entries: RwLock::new(FxHashMap::default()),
        }))
    }

    fn emit(&self) {
        if let Some(source) = self.0.source.upgrade() {
            source.notify_collection(self.0.field, None);
        }
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let old = self.0.entries.write().insert(key, value);
        self.emit();
        old
    }

    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let old = self.0.entries.write().remove(key);
        self.emit();
        old
    }

    pub fn extend(&self, iter: impl IntoIterator<Item = (K, V)>) {
        self.0.entries.write().extend(iter);
        self.emit();
    }

    pub fn retain(&self, keep: impl FnMut(&K, &mut V) -> bool) {
        self.0.entries.write().retain(keep);
        self.emit();
    }

    pub fn clear(&self) {
        self.0.entries.write().clear();
        self.emit();
    }

    #[must_use]
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.0.entries.read().get(key).cloned()
    }

    #[must_use]
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.0.entries.read().contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.entries.read().is_empty()
    }

    #[must_use]
    pub fn snapshot(&self) -> FxHashMap<K, V> {
        self.0.entries.read().clone()
    }

    /// Run `f` under the read lock. `f` must not mutate this map.
    pub fn with<R>(&self, f: impl FnOnce(&FxHashMap<K, V>) -> R) -> R {
        f(&self.0.entries.read())
    }
}
