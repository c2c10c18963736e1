#![forbid(unsafe_code)]

//! Observable paged list.
//!
//! [`PageList`] accumulates the pages of an offset-paginated remote listing
//! into an [`ObservableList`] and exposes the paging cursor as observable
//! scalar fields:
//!
//! | Field | Type | Meaning |
//! |---|---|---|
//! | `items` | list | accumulated items |
//! | `has_more` | `bool` | `total > offset` |
//! | `offset` | `u64` | offset to request next |
//! | `limit` | `u64` | page size of the last response |
//! | `snapshot` | `u64` | server snapshot the items belong to |
//! | `total` | `u64` | total item count reported by the server |
//!
//! A page is merged by [`PageList::combine`]. A request at offset 0 is a
//! refresh. A later page is appended only if it belongs to the same snapshot
//! and continues where the local list ends; otherwise it is discarded, or for
//! an expired snapshot handled per [`SnapshotPolicy`].

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use courier_core::{DispatchConfig, Registry};

use crate::field::{FieldDecl, ObservableFields};
use crate::list::ObservableList;
use crate::source::ObservableSource;

pub const ITEMS: &str = "items";
pub const HAS_MORE: &str = "has_more";
pub const OFFSET: &str = "offset";
pub const LIMIT: &str = "limit";
pub const SNAPSHOT: &str = "snapshot";
pub const TOTAL: &str = "total";

/// Field table of a [`PageList`] of `T`.
pub struct PageFields<T>(PhantomData<fn() -> T>);

impl<T: Clone + Send + Sync + 'static> ObservableFields for PageFields<T> {
    fn fields() -> Vec<FieldDecl> {
        vec![
            FieldDecl::list::<T>(ITEMS),
            FieldDecl::scalar(HAS_MORE, false),
            FieldDecl::scalar(OFFSET, 0_u64),
            FieldDecl::scalar(LIMIT, 0_u64),
            FieldDecl::scalar(SNAPSHOT, 0_u64),
            FieldDecl::scalar(TOTAL, 0_u64),
        ]
    }
}

/// Paging metadata of one server response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageInfo {
    pub snapshot: u64,
    pub limit: u64,
    pub total: u64,
    /// Offset to request next.
    pub offset: u64,
}

/// What to do with a page from a snapshot other than the local one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotPolicy {
    /// Drop the local items and keep only the new page.
    #[default]
    Replace,
    /// Keep the local items and append the page.
    Append,
}

/// How [`PageList::combine`] handled a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    Refreshed,
    Appended,
    /// Same snapshot, but the page does not continue the local list.
    Discontinuous,
    /// The local cursor is already past the page.
    OffsetRegressed,
    /// The page belongs to another snapshot; handled per the policy.
    SnapshotExpired,
}

impl PageOutcome {
    /// Whether the page made it into the list.
    #[must_use]
    pub fn accepted(self) -> bool {
        matches!(self, Self::Refreshed | Self::Appended | Self::SnapshotExpired)
    }
}

/// Paged list backed by an observable source.
pub struct PageList<T> {
    source: Arc<ObservableSource>,
    items: ObservableList<T>,
    policy: SnapshotPolicy,
}

impl<T: Clone + Send + Sync + 'static> PageList<T> {
    #[must_use]
    pub fn new(registry: &Registry) -> Self {
        Self::with_config(registry, DispatchConfig::default())
    }

    #[must_use]
    pub fn with_config(registry: &Registry, config: DispatchConfig) -> Self {
        let source = ObservableSource::with_config::<PageFields<T>>(registry, config);
        let items = source
            .get::<ObservableList<T>>(ITEMS)
            .unwrap_or_else(|| ObservableList::attached(&Arc::downgrade(&source), ITEMS));
        Self {
            source,
            items,
            policy: SnapshotPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: SnapshotPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The source observers bind to.
    #[must_use]
    pub fn source(&self) -> &Arc<ObservableSource> {
        &self.source
    }

    #[must_use]
    pub fn items(&self) -> &ObservableList<T> {
        &self.items
    }

    #[must_use]
    pub fn has_more(&self) -> bool {
        self.source.get(HAS_MORE).unwrap_or(false)
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        self.scalar(OFFSET)
    }

    #[must_use]
    pub fn limit(&self) -> u64 {
        self.scalar(LIMIT)
    }

    #[must_use]
    pub fn snapshot(&self) -> u64 {
        self.scalar(SNAPSHOT)
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.scalar(TOTAL)
    }

    fn scalar(&self, field: &str) -> u64 {
        self.source.get(field).unwrap_or(0)
    }

    /// Empty the list and zero the cursor.
    pub fn reset(&self) {
        self.items.clear();
        self.source.set(HAS_MORE, false);
        self.source.set(OFFSET, 0_u64);
        self.source.set(LIMIT, 0_u64);
        self.source.set(SNAPSHOT, 0_u64);
        self.source.set(TOTAL, 0_u64);
    }

    /// Merge a page requested at `request_offset`.
    pub fn combine(&self, items: Vec<T>, request_offset: u64, page: PageInfo) -> PageOutcome {
        if request_offset == 0 {
            self.items.reload(items);
            self.source.set(SNAPSHOT, page.snapshot);
            self.advance(page);
            return PageOutcome::Refreshed;
        }

        let local = self.offset();
        if page.snapshot != self.snapshot() {
            tracing::error!(
                local = self.snapshot(),
                remote = page.snapshot,
                policy = ?self.policy,
                "page snapshot expired"
            );
            match self.policy {
                SnapshotPolicy::Replace => self.items.reload(items),
                SnapshotPolicy::Append => self.items.extend(items),
            }
            self.source.set(SNAPSHOT, page.snapshot);
            self.advance(page);
            return PageOutcome::SnapshotExpired;
        }

        if local > page.offset {
            tracing::error!(local, remote = page.offset, "page offset behind the local cursor");
            return PageOutcome::OffsetRegressed;
        }
        let reach = local.saturating_add(page.limit);
        if reach < page.offset && reach < page.total {
            tracing::error!(
                local,
                remote = page.offset,
                limit = page.limit,
                "no continuous data; page discarded"
            );
            return PageOutcome::Discontinuous;
        }

        self.items.extend(items);
        self.advance(page);
        PageOutcome::Appended
    }

    fn advance(&self, page: PageInfo) {
        self.source.set(LIMIT, page.limit);
        self.source.set(TOTAL, page.total);
        self.source.set(OFFSET, page.offset);
        self.source.set(HAS_MORE, page.total > page.offset);
        tracing::debug!(
            offset = page.offset,
            total = page.total,
            items = self.items.len(),
            "page combined"
        );
    }
}

impl<T> fmt::Debug for PageList<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageList")
            .field("source", &self.source)
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeExt;
    use courier_core::{Intent, Subscriber};
    use parking_lot::Mutex;
    use tracing_test::traced_test;

    fn page(snapshot: u64, limit: u64, total: u64, offset: u64) -> PageInfo {
        PageInfo {
            snapshot,
            limit,
            total,
            offset,
        }
    }

    fn list() -> PageList<u32> {
        PageList::new(&Registry::new())
    }

    #[test]
    fn refresh_then_append() {
        let pages = list();
        assert_eq!(pages.combine(vec![1, 2], 0, page(7, 2, 5, 2)), PageOutcome::Refreshed);
        assert!(pages.has_more());
        assert_eq!(pages.snapshot(), 7);

        assert_eq!(pages.combine(vec![3, 4], 2, page(7, 2, 5, 4)), PageOutcome::Appended);
        assert_eq!(pages.combine(vec![5], 4, page(7, 2, 5, 5)), PageOutcome::Appended);
        assert_eq!(pages.items().snapshot(), [1, 2, 3, 4, 5]);
        assert_eq!(pages.offset(), 5);
        assert!(!pages.has_more());
    }

    #[test]
    #[traced_test]
    fn gap_and_regression_are_discarded() {
        let pages = list();
        pages.combine(vec![1, 2], 0, page(7, 2, 10, 2));

        assert_eq!(
            pages.combine(vec![7, 8], 6, page(7, 2, 10, 8)),
            PageOutcome::Discontinuous
        );
        assert!(logs_contain("no continuous data"));

        pages.combine(vec![3, 4], 2, page(7, 2, 10, 4));
        assert_eq!(
            pages.combine(vec![1, 2], 2, page(7, 2, 10, 2)),
            PageOutcome::OffsetRegressed
        );
        assert_eq!(pages.items().snapshot(), [1, 2, 3, 4]);
        assert_eq!(pages.offset(), 4);
    }

    #[test]
    fn expired_snapshot_follows_policy() {
        let replace = list();
        replace.combine(vec![1, 2], 0, page(1, 2, 10, 2));
        let outcome = replace.combine(vec![9], 2, page(2, 2, 10, 4));
        assert_eq!(outcome, PageOutcome::SnapshotExpired);
        assert!(outcome.accepted());
        assert_eq!(replace.items().snapshot(), [9]);
        assert_eq!(replace.snapshot(), 2);

        let append = list().with_policy(SnapshotPolicy::Append);
        append.combine(vec![1, 2], 0, page(1, 2, 10, 2));
        append.combine(vec![9], 2, page(2, 2, 10, 4));
        assert_eq!(append.items().snapshot(), [1, 2, 9]);
    }

    #[test]
    fn reset_zeroes_everything_and_notifies_observers() {
        let registry = Registry::new();
        let pages = PageList::<u32>::new(&registry);
        pages.combine(vec![1, 2, 3], 0, page(4, 3, 9, 3));

        let owner = Arc::new(Mutex::new(Vec::new()));
        pages.source().bind(
            HAS_MORE,
            Subscriber::new(&owner, "more", |seen: &Mutex<Vec<bool>>, intent: &Intent| {
                seen.lock().extend(intent.new_value::<bool>().copied());
            }),
        );

        pages.reset();
        assert!(pages.items().is_empty());
        assert_eq!(
            (pages.offset(), pages.limit(), pages.snapshot(), pages.total()),
            (0, 0, 0, 0)
        );
        assert_eq!(*owner.lock(), [true, false]);
    }
}
