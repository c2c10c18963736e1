#![forbid(unsafe_code)]

//! Observable hash set. Notifies like [`ObservableMap`](crate::ObservableMap):
//! one unqualified notification per mutating call.

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use rustc_hash::FxHashSet;

use crate::source::ObservableSource;

struct SetInner<T> {
    source: Weak<ObservableSource>,
    field: &'static str,
    items: RwLock<FxHashSet<T>>,
}

/// Shared handle to an observable set. Clones refer to the same set.
pub struct ObservableSet<T>(Arc<SetInner<T>>);

impl<T> Clone for ObservableSet<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> PartialEq for ObservableSet<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> fmt::Debug for ObservableSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableSet")
            .field("field", &self.0.field)
            .field("len", &self.0.items.read().len())
            .finish()
    }
}

impl<T: Eq + Hash + Clone + Send + Sync + 'static> Default for ObservableSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash + Clone + Send + Sync + 'static> ObservableSet<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::attached(&Weak::new(), "")
    }

    #[must_use]
    pub fn attached(source: &Weak<ObservableSource>, field: &'static str) -> Self {
        Self(Arc::new(SetInner {
            source: source.clone(),
            field,
            items: RwLock::new(FxHashSet::default()),
        }))
    }

    fn emit(&self) {
        if let Some(source) = self.0.source.upgrade() {
            source.notify_collection(self.0.field, None);
        }
    }

    pub fn insert(&self, item: T) -> bool {
        let added = self.0.items.write().insert(item);
        self.emit();
        added
    }

    pub fn remove<Q>(&self, item: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let removed = self.0.items.write().remove(item);
        self.emit();
        removed
    }

    pub fn extend(&self, iter: impl IntoIterator<Item = T>) {
        self.0.items.write().extend(iter);
        self.emit();
    }

    pub fn retain(&self, keep: impl FnMut(&T) -> bool) {
        self.0.items.write().retain(keep);
        self.emit();
    }

    /// Keep only items also in `other`.
    pub fn retain_all(&self, other: &FxHashSet<T>) {
        self.retain(|item| other.contains(item));
    }

    /// Remove every item in `other`.
    pub fn remove_all(&self, other: &FxHashSet<T>) {
        self.retain(|item| !other.contains(item));
    }

    pub fn clear(&self) {
        self.0.items.write().clear();
        self.emit();
    }

    #[must_use]
    pub fn contains<Q>(&self, item: &Q) -> bool
    where
        T: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.0.items.read().contains(item)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.items.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.items.read().is_empty()
    }

    #[must_use]
    pub fn snapshot(&self) -> FxHashSet<T> {
        self.0.items.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldDecl, ObservableFields};
    use courier_core::{Intent, Registry, Subscriber};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Room;

    impl ObservableFields for Room {
        fn fields() -> Vec<FieldDecl> {
            vec![FieldDecl::set::<u64>("members")]
        }
    }

    #[test]
    fn mutations_notify_even_without_effect() {
        let registry = Registry::new();
        let source = ObservableSource::new::<Room>(&registry);
        let set = source.get::<ObservableSet<u64>>("members").unwrap();

        let owner = Arc::new(AtomicUsize::new(0));
        source.bind(
            "members",
            Subscriber::new(&owner, "count", |hits: &AtomicUsize, _: &Intent| {
                hits.fetch_add(1, Ordering::Relaxed);
            }),
        );
        assert_eq!(owner.load(Ordering::Relaxed), 1);

        assert!(set.insert(7));
        assert!(!set.insert(7));
        set.extend([8, 9]);
        set.remove_all(&FxHashSet::from_iter([8]));
        assert!(!set.remove(&42));

        assert_eq!(owner.load(Ordering::Relaxed), 6);
        let mut members: Vec<u64> = set.snapshot().into_iter().collect();
        members.sort_unstable();
        assert_eq!(members, [7, 9]);
    }
}
