#![forbid(unsafe_code)]

//! Change descriptors carried by observable notifications.
//!
//! Every field notification carries the old and new value under
//! [`OLD_VALUE`] and [`NEW_VALUE`]. List notifications add a [`ListChange`]
//! under [`CHANGE`]. Map and set notifications, and the replay a subscriber
//! receives when it binds, carry no change descriptor: treat them as a reload.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use courier_core::Intent;

use crate::source::ObservableSource;

/// Bundle key of the value before the change.
pub const OLD_VALUE: &str = "observe.old";
/// Bundle key of the value after the change.
pub const NEW_VALUE: &str = "observe.new";
/// Bundle key of the [`ListChange`] of a list notification.
pub const CHANGE: &str = "observe.change";

/// What happened to a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Remove,
    Replace,
    /// One item moved from `range.position` to `to`.
    Move { to: usize },
    Reload,
}

/// Affected positions. For inserts, positions after the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ChangeRange {
    pub position: usize,
    pub length: usize,
}

impl ChangeRange {
    #[must_use]
    pub const fn new(position: usize, length: usize) -> Self {
        Self { position, length }
    }
}

/// One structured list change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListChange {
    pub kind: ChangeKind,
    pub range: ChangeRange,
}

impl ListChange {
    #[must_use]
    pub const fn insert(position: usize, length: usize) -> Self {
        Self {
            kind: ChangeKind::Insert,
            range: ChangeRange::new(position, length),
        }
    }

    #[must_use]
    pub const fn remove(position: usize, length: usize) -> Self {
        Self {
            kind: ChangeKind::Remove,
            range: ChangeRange::new(position, length),
        }
    }

    #[must_use]
    pub const fn replace(position: usize, length: usize) -> Self {
        Self {
            kind: ChangeKind::Replace,
            range: ChangeRange::new(position, length),
        }
    }

    #[must_use]
    pub const fn moved(from: usize, to: usize) -> Self {
        Self {
            kind: ChangeKind::Move { to },
            range: ChangeRange::new(from, 1),
        }
    }

    #[must_use]
    pub const fn reload(length: usize) -> Self {
        Self {
            kind: ChangeKind::Reload,
            range: ChangeRange::new(0, length),
        }
    }
}

impl fmt::Display for ListChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ChangeRange { position, length } = self.range;
        match self.kind {
            ChangeKind::Insert => write!(f, "Insert(pos={position},len={length})"),
            ChangeKind::Remove => write!(f, "Remove(pos={position},len={length})"),
            ChangeKind::Replace => write!(f, "Replace(pos={position},len={length})"),
            ChangeKind::Move { to } => write!(f, "Move(from={position},to={to})"),
            ChangeKind::Reload => write!(f, "Reload(len={length})"),
        }
    }
}

/// Typed access to the change payload of an intent.
pub trait ChangeExt {
    /// Value before the change.
    fn old_value<T: Any>(&self) -> Option<&T>;
    /// Value after the change.
    fn new_value<T: Any>(&self) -> Option<&T>;
    /// Structured list change, if this is a list mutation.
    fn list_change(&self) -> Option<ListChange>;
    /// [`list_change`](Self::list_change), or an empty reload.
    fn change_or_reload(&self) -> ListChange {
        self.list_change().unwrap_or(ListChange::reload(0))
    }
    /// The source that emitted the notification, if it is still alive.
    fn observed_source(&self) -> Option<Arc<ObservableSource>>;
}

impl ChangeExt for Intent {
    fn old_value<T: Any>(&self) -> Option<&T> {
        self.get(OLD_VALUE)
    }

    fn new_value<T: Any>(&self) -> Option<&T> {
        self.get(NEW_VALUE)
    }

    fn list_change(&self) -> Option<ListChange> {
        self.get::<ListChange>(CHANGE).copied()
    }

    fn observed_source(&self) -> Option<Arc<ObservableSource>> {
        self.sender()?.downcast::<ObservableSource>()
    }
}
