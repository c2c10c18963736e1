#![forbid(unsafe_code)]

//! Channel table and the four dispatch operations.
//!
//! # Design
//!
//! The table maps each [`Channel`] to its [`SubscriberSet`]. Entries appear
//! lazily on first bind, or on the first sticky notify with nobody listening,
//! and disappear when the last subscriber of a non-sticky channel unbinds.
//!
//! Two lock levels:
//!
//! | Lock | Guards | Held during handler calls |
//! |---|---|---|
//! | table (coarse, re-entrant) | entry create / erase | only for bind-time replay |
//! | set (one per channel, re-entrant) | ordered subscribers, sticky slot | only for bind-time replay |
//!
//! Locks are always taken table first, then set.
//!
//! # Ordering
//!
//! Concurrent `add_binding` and `remove_binding` of the *same* subscriber on
//! the *same* channel from different threads are unordered. Callers that need
//! a strict order for one pair serialize those calls themselves.

use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::ReentrantMutex;
use rustc_hash::FxHashMap;

use crate::channel::Channel;
use crate::config::DispatchConfig;
use crate::intent::Intent;
use crate::scheduler::Scheduler;
use crate::subscriber::Subscriber;
use crate::subscriber_set::{BindReplay, SubscriberSet};

type Table = FxHashMap<Channel, Arc<SubscriberSet>>;

/// Routes intents to the subscribers of their channel.
pub struct Dispatcher {
    config: Arc<DispatchConfig>,
    replay: Option<Weak<dyn BindReplay>>,
    table: ReentrantMutex<RefCell<Table>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Dispatcher with [`DispatchConfig::default`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DispatchConfig::default())
    }

    #[must_use]
    pub fn with_config(config: DispatchConfig) -> Self {
        Self {
            config: Arc::new(config),
            replay: None,
            table: ReentrantMutex::new(RefCell::new(Table::default())),
        }
    }

    /// Every set this dispatcher creates asks `replay` for a bind-time intent.
    #[must_use]
    pub fn with_replay(mut self, replay: Weak<dyn BindReplay>) -> Self {
        self.replay = Some(replay);
        self
    }

    #[must_use]
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    fn new_set(&self, channel: &Channel) -> Arc<SubscriberSet> {
        let set = SubscriberSet::new(channel.clone(), Arc::clone(&self.config));
        let set = match &self.replay {
            Some(replay) => set.with_replay(replay.clone()),
            None => set,
        };
        tracing::trace!(channel = %channel, "created subscriber set");
        Arc::new(set)
    }

    fn resolve(&self, channel: &Channel) -> Option<Arc<SubscriberSet>> {
        self.table.lock().borrow().get(channel).cloned()
    }

    /// Resolve-or-create under the table lock, returning with it still held.
    fn resolve_or_create<R>(&self, channel: &Channel, f: impl FnOnce(&Arc<SubscriberSet>) -> R) -> R {
        let guard = self.table.lock();
        let set = {
            let mut table = guard.borrow_mut();
            Arc::clone(
                table
                    .entry(channel.clone())
                    .or_insert_with(|| self.new_set(channel)),
            )
        };
        let result = f(&set);
        drop(guard);
        result
    }

    /// Bind `subscriber` to `channel`.
    ///
    /// Creation of the channel's set and insertion happen under the table
    /// lock, so any sticky or bind replay sees a consistent set. Returns
    /// `false` for a duplicate binding.
    pub fn add_binding(&self, channel: &Channel, subscriber: Subscriber) -> bool {
        self.add_shared(channel, Arc::new(subscriber))
    }

    /// [`add_binding`](Self::add_binding) for an already shared subscriber.
    pub fn add_shared(&self, channel: &Channel, subscriber: Arc<Subscriber>) -> bool {
        self.resolve_or_create(channel, |set| set.add(subscriber))
    }

    /// Unbind the subscriber equal to `subscriber`.
    ///
    /// A non-sticky channel left empty is trimmed from the table, even when
    /// the subscriber was already dropped for a dead owner. Removing a
    /// subscriber that is not bound returns `false`.
    pub fn remove_binding(&self, channel: &Channel, subscriber: &Subscriber) -> bool {
        let Some(set) = self.resolve(channel) else {
            return false;
        };
        let removed = set.remove(subscriber);
        if !set.is_sticky() && set.is_empty() {
            let guard = self.table.lock();
            let mut table = guard.borrow_mut();
            set.trim(&mut table);
        }
        removed
    }

    /// Deliver `intent` to its channel's subscribers.
    ///
    /// A sticky intent with nobody listening still creates the channel's set
    /// so the intent is kept for future binders. Returns the shared intent so
    /// the caller can check [`Intent::is_done`].
    pub fn notify(&self, intent: impl Into<Arc<Intent>>) -> Arc<Intent> {
        let intent = intent.into();
        let channel = intent.channel();
        match self.resolve(channel) {
            Some(set) => set.invoke(&intent),
            None if channel.is_sticky() => {
                let set = self.resolve_or_create(channel, Arc::clone);
                set.invoke(&intent);
            }
            None => {
                tracing::trace!(channel = %channel, "no subscribers");
            }
        }
        intent
    }

    /// Post a [`notify`](Self::notify) to `scheduler`. Returns whether the
    /// backend accepted the task.
    pub fn notify_async(self: &Arc<Self>, scheduler: &dyn Scheduler, intent: Intent) -> bool {
        let dispatcher = Arc::clone(self);
        let channel = intent.channel().clone();
        let accepted = scheduler.post(Box::new(move || {
            dispatcher.notify(intent);
        }));
        if !accepted {
            tracing::warn!(channel = %channel, scheduler = scheduler.name(), "notify rejected by scheduler");
        }
        accepted
    }

    /// Whether the table holds any channel entry.
    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        !self.table.lock().borrow().is_empty()
    }

    #[must_use]
    pub fn contains_channel(&self, channel: &Channel) -> bool {
        self.table.lock().borrow().contains_key(channel)
    }

    /// Number of subscribers bound to `channel`.
    #[must_use]
    pub fn subscriber_count(&self, channel: &Channel) -> usize {
        self.resolve(channel).map_or(0, |set| set.len())
    }

    /// The intent a late binder of `channel` would be replayed.
    #[must_use]
    pub fn last_sticky(&self, channel: &Channel) -> Option<Arc<Intent>> {
        self.resolve(channel)?.last_sticky()
    }

    /// Channels currently present in the table.
    #[must_use]
    pub fn channels(&self) -> Vec<Channel> {
        self.table.lock().borrow().keys().cloned().collect()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("channels", &self.table.lock().borrow().len())
            .finish()
    }
}
