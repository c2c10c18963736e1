#![forbid(unsafe_code)]

//! Per-channel ordered subscriber list with sticky replay.
//!
//! # Invariants
//!
//! 1. Subscribers are kept sorted by priority descending, ties broken by
//!    identity, so every pass visits them in the same order regardless of
//!    registration order.
//! 2. No two equal subscribers are ever stored. Re-adding one logs a warning
//!    and changes nothing.
//! 3. Sticky replay and bind replay run before `add` releases the set lock,
//!    so they happen-before any live delivery to the new subscriber.
//! 4. A set on a sticky channel, or holding a sticky intent, is never trimmed.
//!
//! # Locking
//!
//! The set lock is a [`ReentrantMutex`] so a handler running during a replay
//! may bind or unbind on the same set. `RefCell` borrows are never held across
//! a handler call. [`SubscriberSet::invoke`] copies the list under the lock
//! and iterates the copy without it, so a subscriber added mid-pass may or may
//! not be visited.

use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::ReentrantMutex;
use rustc_hash::FxHashMap;

use crate::channel::Channel;
use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::intent::Intent;
use crate::subscriber::Subscriber;

/// Source of a synthetic intent delivered to every new binder of a channel.
///
/// Observable state implements this to hand a fresh subscriber the current
/// value of a field, computed from live state instead of a stored intent.
pub trait BindReplay: Send + Sync {
    /// The intent to replay for `channel`, if any.
    fn replay_for(&self, channel: &Channel) -> Option<Arc<Intent>>;
}

#[derive(Default)]
struct SetState {
    subscribers: Vec<Arc<Subscriber>>,
    last_sticky: Option<Arc<Intent>>,
}

/// The subscribers of one channel.
pub struct SubscriberSet {
    channel: Channel,
    config: Arc<DispatchConfig>,
    replay: Option<Weak<dyn BindReplay>>,
    state: ReentrantMutex<RefCell<SetState>>,
}

impl SubscriberSet {
    #[must_use]
    pub fn new(channel: Channel, config: Arc<DispatchConfig>) -> Self {
        Self {
            channel,
            config,
            replay: None,
            state: ReentrantMutex::new(RefCell::new(SetState::default())),
        }
    }

    /// Attach a bind-replay hook. Held weakly.
    #[must_use]
    pub fn with_replay(mut self, replay: Weak<dyn BindReplay>) -> Self {
        self.replay = Some(replay);
        self
    }

    #[must_use]
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Insert `subscriber` in order, then replay to it.
    ///
    /// Returns `false` if an equal subscriber is already present.
    pub fn add(&self, subscriber: Arc<Subscriber>) -> bool {
        let guard = self.state.lock();
        {
            let mut state = guard.borrow_mut();
            let key = subscriber.sort_key();
            let start = state.subscribers.partition_point(|s| s.sort_key() < key);
            let duplicate = state.subscribers[start..]
                .iter()
                .take_while(|s| s.sort_key() == key)
                .any(|s| **s == *subscriber);
            if duplicate {
                let err = DispatchError::DuplicateBinding {
                    channel: self.channel.clone(),
                    handler: subscriber.id().clone(),
                };
                tracing::warn!(channel = %self.channel, handler = %subscriber.id(), "{err}");
                return false;
            }
            state.subscribers.insert(start, Arc::clone(&subscriber));
        }

        let sticky = guard.borrow().last_sticky.clone();
        if let Some(stored) = sticky {
            let replay = Arc::new(stored.sticky_copy());
            self.deliver(&subscriber, &replay);
        }

        if let Some(hook) = self.replay.as_ref().and_then(Weak::upgrade)
            && let Some(replay) = hook.replay_for(&self.channel)
        {
            self.deliver(&subscriber, &replay);
        }

        let size = guard.borrow().subscribers.len();
        if size > self.config.sweep_threshold {
            let err = DispatchError::CapacityExceeded {
                channel: self.channel.clone(),
                size,
                threshold: self.config.sweep_threshold,
            };
            tracing::warn!(channel = %self.channel, size, "{err}");
            guard.borrow_mut().subscribers.retain(|s| s.is_alive());
        }
        true
    }

    /// Remove the subscriber equal to `subscriber`. Returns whether one was
    /// present.
    pub fn remove(&self, subscriber: &Subscriber) -> bool {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let key = subscriber.sort_key();
        let start = state.subscribers.partition_point(|s| s.sort_key() < key);
        let found = state.subscribers[start..]
            .iter()
            .take_while(|s| s.sort_key() == key)
            .position(|s| **s == *subscriber);
        match found {
            Some(offset) => {
                state.subscribers.remove(start + offset);
                true
            }
            None => false,
        }
    }

    /// Fan `intent` out in priority order, stopping once it is marked done.
    pub fn invoke(&self, intent: &Arc<Intent>) {
        let snapshot = {
            let guard = self.state.lock();
            let mut state = guard.borrow_mut();
            if self.channel.is_sticky() || intent.channel().is_sticky() {
                state.last_sticky = Some(Arc::new(intent.sticky_copy()));
            }
            state.subscribers.clone()
        };

        for subscriber in &snapshot {
            self.deliver(subscriber, intent);
            if intent.is_done() {
                tracing::trace!(channel = %self.channel, handler = %subscriber.id(), "intent marked done");
                break;
            }
        }
    }

    fn deliver(&self, subscriber: &Subscriber, intent: &Arc<Intent>) {
        if !subscriber.invoke(&self.channel, intent, &self.config) {
            self.remove(subscriber);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().borrow().subscribers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this set must survive being empty.
    #[must_use]
    pub fn is_sticky(&self) -> bool {
        self.channel.is_sticky() || self.state.lock().borrow().last_sticky.is_some()
    }

    /// The most recent intent stored for replay.
    #[must_use]
    pub fn last_sticky(&self) -> Option<Arc<Intent>> {
        self.state.lock().borrow().last_sticky.clone()
    }

    /// Point-in-time copy of the subscribers, in delivery order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Subscriber>> {
        self.state.lock().borrow().subscribers.clone()
    }

    /// Erase this set's entry from `table` if it is still empty.
    ///
    /// Best effort: returns `false` when the set gained a subscriber, is
    /// sticky, or the table entry has already been replaced.
    pub fn trim(&self, table: &mut FxHashMap<Channel, Arc<SubscriberSet>>) -> bool {
        let guard = self.state.lock();
        let state = guard.borrow();
        if !state.subscribers.is_empty() || self.channel.is_sticky() || state.last_sticky.is_some() {
            return false;
        }
        let is_current = table
            .get(&self.channel)
            .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), self));
        if is_current {
            table.remove(&self.channel);
            tracing::debug!(channel = %self.channel, "trimmed empty channel");
        }
        is_current
    }
}

impl fmt::Debug for SubscriberSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = self.state.lock();
        let state = guard.borrow();
        f.debug_struct("SubscriberSet")
            .field("channel", &self.channel)
            .field("subscribers", &state.subscribers)
            .field("has_sticky", &state.last_sticky.is_some())
            .finish()
    }
}
