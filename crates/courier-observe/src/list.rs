#![forbid(unsafe_code)]

//! Observable list with structured change notifications.
//!
//! Every mutation that changes the list emits one notification on the owning
//! field, carrying a [`ListChange`] that describes it:
//!
//! | Operation | Change |
//! |---|---|
//! | `push`, `insert`, `insert_all`, `extend` | `Insert(pos, n)` |
//! | `remove_at`, `remove_value`, `remove_range` | `Remove(pos, n)` |
//! | `clear` | `Remove(0, len)`, also when already empty |
//! | `replace_at`, `replace_range` | `Replace(pos, n)` |
//! | `move_item` | `Move(from, to)`, nothing if `from == to` |
//! | `reload` | `Reload(0, len)` |
//! | `retain`, `remove_all`, `retain_all` | one `Remove` per removed run |
//!
//! Items are mutated under the list lock; notifications go out after it is
//! released, so a handler may read the list. Bulk removal emits its runs
//! after the whole mutation, with positions already adjusted for the earlier
//! runs, so replaying them in order against the pre-mutation list yields the
//! post-mutation list. Concurrent writers may interleave between the mutation
//! and its notification; a reader that needs a consistent view should take
//! [`snapshot`](ObservableList::snapshot) inside the handler.
//!
//! A list built with [`ObservableList::new`] is detached and emits nothing.

use std::fmt;
use std::ops::Range;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::change::ListChange;
use crate::error::CollectionError;
use crate::source::ObservableSource;

struct ListInner<T> {
    source: Weak<ObservableSource>,
    field: &'static str,
    items: RwLock<Vec<T>>,
}

/// Shared handle to an observable list. Clones refer to the same list.
pub struct ObservableList<T>(Arc<ListInner<T>>);

impl<T> Clone for ObservableList<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T> PartialEq for ObservableList<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> fmt::Debug for ObservableList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableList")
            .field("field", &self.0.field)
            .field("len", &self.0.items.read().len())
            .finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for ObservableList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> ObservableList<T> {
    /// A detached list.
    #[must_use]
    pub fn new() -> Self {
        Self::attached(&Weak::new(), "")
    }

    /// A list that notifies field `field` of `source`.
    #[must_use]
    pub fn attached(source: &Weak<ObservableSource>, field: &'static str) -> Self {
        Self(Arc::new(ListInner {
            source: source.clone(),
            field,
            items: RwLock::new(Vec::new()),
        }))
    }

    fn emit(&self, change: ListChange) {
        if let Some(source) = self.0.source.upgrade() {
            source.notify_collection(self.0.field, Some(change));
        }
    }

    fn check_index(index: usize, len: usize) -> Result<(), CollectionError> {
        if index < len {
            Ok(())
        } else {
            Err(CollectionError::IndexOutOfBounds { index, len })
        }
    }

    fn check_range(range: &Range<usize>, len: usize) -> Result<(), CollectionError> {
        if range.start <= range.end && range.end <= len {
            Ok(())
        } else {
            Err(CollectionError::RangeOutOfBounds {
                start: range.start,
                end: range.end,
                len,
            })
        }
    }

    // ── Reads ─────────────────────────────────────────────────────────

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.items.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.items.read().is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        self.0.items.read().get(index).cloned()
    }

    /// Copy of the current items.
    #[must_use]
    pub fn snapshot(&self) -> Vec<T> {
        self.0.items.read().clone()
    }

    /// Run `f` against the items under the read lock. `f` must not mutate
    /// this list.
    pub fn with<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        f(&self.0.items.read())
    }

    // ── Inserts ───────────────────────────────────────────────────────

    pub fn push(&self, item: T) {
        let position = {
            let mut items = self.0.items.write();
            items.push(item);
            items.len() - 1
        };
        self.emit(ListChange::insert(position, 1));
    }

    pub fn insert(&self, index: usize, item: T) -> Result<(), CollectionError> {
        {
            let mut items = self.0.items.write();
            if index > items.len() {
                return Err(CollectionError::IndexOutOfBounds {
                    index,
                    len: items.len(),
                });
            }
            items.insert(index, item);
        }
        self.emit(ListChange::insert(index, 1));
        Ok(())
    }

    /// Insert `iter` at `index`. Emits nothing if `iter` is empty.
    pub fn insert_all(
        &self,
        index: usize,
        iter: impl IntoIterator<Item = T>,
    ) -> Result<(), CollectionError> {
        let added = {
            let mut items = self.0.items.write();
            if index > items.len() {
                return Err(CollectionError::IndexOutOfBounds {
                    index,
                    len: items.len(),
                });
            }
            let before = items.len();
            items.splice(index..index, iter);
            items.len() - before
        };
        if added > 0 {
            self.emit(ListChange::insert(index, added));
        }
        Ok(())
    }

    /// Append `iter`. Emits nothing if `iter` is empty.
    pub fn extend(&self, iter: impl IntoIterator<Item = T>) {
        let (position, added) = {
            let mut items = self.0.items.write();
            let before = items.len();
            items.extend(iter);
            (before, items.len() - before)
        };
        if added > 0 {
            self.emit(ListChange::insert(position, added));
        }
    }

    // ── Removals ──────────────────────────────────────────────────────

    pub fn remove_at(&self, index: usize) -> Result<T, CollectionError> {
        let item = {
            let mut items = self.0.items.write();
            Self::check_index(index, items.len())?;
            items.remove(index)
        };
        self.emit(ListChange::remove(index, 1));
        Ok(item)
    }

    /// Remove and return the last item.
    pub fn pop(&self) -> Option<T> {
        let (position, item) = {
            let mut items = self.0.items.write();
            let item = items.pop()?;
            (items.len(), item)
        };
        self.emit(ListChange::remove(position, 1));
        Some(item)
    }

    pub fn remove_range(&self, range: Range<usize>) -> Result<Vec<T>, CollectionError> {
        let removed: Vec<T> = {
            let mut items = self.0.items.write();
            Self::check_range(&range, items.len())?;
            items.drain(range.clone()).collect()
        };
        if !removed.is_empty() {
            self.emit(ListChange::remove(range.start, removed.len()));
        }
        Ok(removed)
    }

    /// Remove every item. Always emits `Remove(0, len)`, even for an empty
    /// list, so observers can treat it as a reset.
    pub fn clear(&self) {
        let len = {
            let mut items = self.0.items.write();
            let len = items.len();
            items.clear();
            len
        };
        self.emit(ListChange::remove(0, len));
    }

    /// Keep the items `keep` accepts. Emits one `Remove` per removed run.
    pub fn retain(&self, mut keep: impl FnMut(&T) -> bool) {
        let runs = {
            let mut items = self.0.items.write();
            let mut runs: Vec<ListChange> = Vec::new();
            let mut kept = 0;
            let mut extends_run = false;
            items.retain(|item| {
                let stays = keep(item);
                if stays {
                    kept += 1;
                } else if extends_run && let Some(run) = runs.last_mut() {
                    run.range.length += 1;
                } else {
                    // Earlier runs are gone by the time this one applies.
                    runs.push(ListChange::remove(kept, 1));
                }
                extends_run = !stays;
                stays
            });
            runs
        };
        for change in runs {
            self.emit(change);
        }
    }

    // ── Replacement ───────────────────────────────────────────────────

    pub fn replace_at(&self, index: usize, item: T) -> Result<T, CollectionError> {
        let old = {
            let mut items = self.0.items.write();
            Self::check_index(index, items.len())?;
            std::mem::replace(&mut items[index], item)
        };
        self.emit(ListChange::replace(index, 1));
        Ok(old)
    }

    /// Overwrite `start..start + replacement.len()`. Emits nothing for an
    /// empty replacement.
    pub fn replace_range(&self, start: usize, replacement: Vec<T>) -> Result<(), CollectionError> {
        let length = replacement.len();
        {
            let mut items = self.0.items.write();
            let range = start..start.saturating_add(length);
            Self::check_range(&range, items.len())?;
            items.splice(range, replacement);
        }
        if length > 0 {
            self.emit(ListChange::replace(start, length));
        }
        Ok(())
    }

    /// Move the item at `from` so it ends up at `to`.
    pub fn move_item(&self, from: usize, to: usize) -> Result<(), CollectionError> {
        {
            let mut items = self.0.items.write();
            let len = items.len();
            Self::check_index(from, len)?;
            Self::check_index(to, len)?;
            if from == to {
                return Ok(());
            }
            let item = items.remove(from);
            items.insert(to, item);
        }
        self.emit(ListChange::moved(from, to));
        Ok(())
    }

    /// Replace the whole contents.
    pub fn reload(&self, items: Vec<T>) {
        let len = items.len();
        *self.0.items.write() = items;
        self.emit(ListChange::reload(len));
    }
}

impl<T: Clone + PartialEq + Send + Sync + 'static> ObservableList<T> {
    #[must_use]
    pub fn contains(&self, item: &T) -> bool {
        self.0.items.read().contains(item)
    }

    #[must_use]
    pub fn index_of(&self, item: &T) -> Option<usize> {
        self.0.items.read().iter().position(|i| i == item)
    }

    /// Remove the first item equal to `item`. Emits only if one was found.
    pub fn remove_value(&self, item: &T) -> bool {
        let position = {
            let mut items = self.0.items.write();
            let Some(position) = items.iter().position(|i| i == item) else {
                return false;
            };
            items.remove(position);
            position
        };
        self.emit(ListChange::remove(position, 1));
        true
    }

    /// Remove every item contained in `other`.
    pub fn remove_all(&self, other: &[T]) {
        self.retain(|item| !other.contains(item));
    }

    /// Keep only items contained in `other`.
    pub fn retain_all(&self, other: &[T]) {
        self.retain(|item| other.contains(item));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{ChangeExt, ChangeKind};
    use crate::field::{FieldDecl, ObservableFields};
    use courier_core::{DispatchConfig, Intent, Registry, Subscriber};
    use parking_lot::Mutex;

    struct Board;

    impl ObservableFields for Board {
        fn fields() -> Vec<FieldDecl> {
            vec![FieldDecl::list::<&'static str>("cards")]
        }
    }

    type Log = Arc<Mutex<Vec<ListChange>>>;

    fn board() -> (Arc<ObservableSource>, ObservableList<&'static str>, Log, Arc<()>) {
        let registry = Registry::new();
        let source = ObservableSource::with_config::<Board>(&registry, DispatchConfig::new().strict());
        let list = source
            .get::<ObservableList<&'static str>>("cards")
            .expect("cards is a list");
        let log: Log = Arc::default();
        let owner = Arc::new(());
        let sink = Arc::clone(&log);
        source.bind(
            "cards",
            Subscriber::new(&owner, "record", move |_: &(), intent: &Intent| {
                if !intent.is_sticky_replay() {
                    sink.lock().extend(intent.list_change());
                }
            }),
        );
        (source, list, log, owner)
    }

    #[test]
    fn push_push_remove_reports_each_step() {
        let (_source, list, log, _owner) = board();
        list.push("a");
        list.push("b");
        list.remove_at(0).unwrap();
        assert_eq!(list.snapshot(), ["b"]);
        assert_eq!(
            *log.lock(),
            [
                ListChange::insert(0, 1),
                ListChange::insert(1, 1),
                ListChange::remove(0, 1),
            ]
        );
    }

    #[test]
    fn retain_coalesces_runs_with_shifted_positions() {
        let (_source, list, log, _owner) = board();
        list.extend(["a", "b", "c", "d", "e", "f"]);
        log.lock().clear();

        list.remove_all(&["b", "c", "e"]);
        assert_eq!(list.snapshot(), ["a", "d", "f"]);
        assert_eq!(
            *log.lock(),
            [ListChange::remove(1, 2), ListChange::remove(2, 1)]
        );
    }

    #[test]
    fn retain_removing_nothing_is_silent() {
        let (_source, list, log, _owner) = board();
        list.extend(["a", "b"]);
        log.lock().clear();
        list.retain_all(&["a", "b", "z"]);
        list.extend(std::iter::empty());
        assert!(!list.remove_value(&"z"));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn clear_always_reports_a_removal() {
        let (_source, list, log, _owner) = board();
        list.clear();
        list.extend(["a", "b", "c"]);
        list.clear();
        assert_eq!(
            *log.lock(),
            [
                ListChange::remove(0, 0),
                ListChange::insert(0, 3),
                ListChange::remove(0, 3),
            ]
        );
    }

    #[test]
    fn move_replace_and_reload() {
        let (_source, list, log, _owner) = board();
        list.extend(["a", "b", "c"]);
        log.lock().clear();

        list.move_item(0, 2).unwrap();
        list.move_item(1, 1).unwrap();
        assert_eq!(list.snapshot(), ["b", "c", "a"]);
        assert_eq!(list.replace_at(1, "x"), Ok("c"));
        list.replace_range(0, vec!["y", "z"]).unwrap();
        list.reload(vec!["q"]);

        let log = log.lock();
        assert_eq!(log[0].kind, ChangeKind::Move { to: 2 });
        assert_eq!(log[1], ListChange::replace(1, 1));
        assert_eq!(log[2], ListChange::replace(0, 2));
        assert_eq!(log[3], ListChange::reload(1));
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn out_of_bounds_changes_nothing() {
        let (_source, list, log, _owner) = board();
        list.push("a");
        log.lock().clear();

        assert_eq!(
            list.insert(5, "b"),
            Err(CollectionError::IndexOutOfBounds { index: 5, len: 1 })
        );
        assert!(list.remove_at(1).is_err());
        assert!(matches!(
            list.remove_range(0..3),
            Err(CollectionError::RangeOutOfBounds { .. })
        ));
        assert!(list.replace_range(0, vec!["x", "y"]).is_err());
        assert!(list.move_item(0, 4).is_err());
        assert_eq!(list.snapshot(), ["a"]);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn handler_sees_the_mutated_list() {
        let registry = Registry::new();
        let source = ObservableSource::new::<Board>(&registry);
        let owner = Arc::new(());
        let lens = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lens);
        source.bind(
            "cards",
            Subscriber::new(&owner, "len", move |_: &(), intent: &Intent| {
                if let Some(list) = intent.new_value::<ObservableList<&'static str>>() {
                    sink.lock().push(list.len());
                }
            }),
        );
        let list = source.get::<ObservableList<&'static str>>("cards").unwrap();
        list.push("a");
        list.insert_all(0, ["b", "c"]).unwrap();
        assert_eq!(*lens.lock(), [0, 1, 3]);
    }

    #[test]
    fn detached_list_is_plain_storage() {
        let list = ObservableList::new();
        list.push(1);
        list.push(2);
        assert_eq!(list.pop(), Some(2));
        assert_eq!(list.index_of(&1), Some(0));
        assert!(list.contains(&1));
        assert_eq!(list.with(|items| items.iter().sum::<i32>()), 1);
    }
}
