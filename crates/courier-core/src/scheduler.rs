#![forbid(unsafe_code)]

//! Scheduling-backend seam.
//!
//! The dispatcher owns no threads. A subscriber either runs inline on the
//! notifying thread or hands a [`Task`] to a [`Scheduler`] chosen when it was
//! bound. Execution timing and ordering across backends belong to the backend.

use std::fmt;

/// A zero-argument unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// An executor that accepts posted tasks.
pub trait Scheduler: Send + Sync {
    /// Submit `task`. Returns whether the backend accepted it.
    fn post(&self, task: Task) -> bool;

    /// Name used in logs.
    fn name(&self) -> &str {
        "scheduler"
    }
}

/// Runs every task immediately on the posting thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineScheduler;

impl Scheduler for InlineScheduler {
    fn post(&self, task: Task) -> bool {
        task();
        true
    }

    fn name(&self) -> &str {
        "inline"
    }
}

/// Identifier under which a [`Scheduler`] is registered in a
/// [`Registry`](crate::Registry), so binding metadata can name a backend
/// without holding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchedulerId(pub u32);

impl fmt::Display for SchedulerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scheduler#{}", self.0)
    }
}
