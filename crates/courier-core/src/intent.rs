#![forbid(unsafe_code)]

//! One occurrence of an event.
//!
//! An [`Intent`] is built and mutated by its producer, then frozen into an
//! `Arc<Intent>` by [`Dispatcher::notify`](crate::Dispatcher::notify). After
//! that point only the flag word changes, through atomic OR, so a subscriber
//! can mark it [`done`](Intent::done) while other threads read it.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use bitflags::bitflags;

use crate::bundle::Bundle;
use crate::channel::Channel;

bitflags! {
    /// Runtime flags of an intent. Bits only ever get set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct IntentFlags: u32 {
        /// Remaining lower-priority subscribers are skipped for this pass.
        const DONE = 1;
    }
}

/// Weak reference to the producer of an intent.
#[derive(Clone)]
pub struct Sender {
    type_name: &'static str,
    object: Weak<dyn Any + Send + Sync>,
}

impl Sender {
    #[must_use]
    pub fn new<T: Any + Send + Sync>(object: &Arc<T>) -> Self {
        let object: Arc<dyn Any + Send + Sync> = Arc::clone(object) as _;
        Self {
            type_name: std::any::type_name::<T>(),
            object: Arc::downgrade(&object),
        }
    }

    /// Wrap an existing weak handle.
    #[must_use]
    pub fn from_weak(type_name: &'static str, object: Weak<dyn Any + Send + Sync>) -> Self {
        Self { type_name, object }
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    #[must_use]
    pub fn upgrade(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        self.object.upgrade()
    }

    /// Upgrade and downcast in one step.
    #[must_use]
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.upgrade()?.downcast::<T>().ok()
    }
}

impl fmt::Debug for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("type_name", &self.type_name)
            .field("alive", &(self.object.strong_count() > 0))
            .finish()
    }
}

/// One event: channel, sender, payload and flag word.
pub struct Intent {
    channel: Channel,
    sender: Option<Sender>,
    sticky_replay: bool,
    bundle: Bundle,
    flags: AtomicU32,
}

impl Intent {
    #[must_use]
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            sender: None,
            sticky_replay: false,
            bundle: Bundle::new(),
            flags: AtomicU32::new(0),
        }
    }

    /// Mark this intent as a replay delivered at bind time.
    #[must_use]
    pub fn replayed(channel: Channel) -> Self {
        Self {
            sticky_replay: true,
            ..Self::new(channel)
        }
    }

    #[must_use]
    pub fn with_sender(mut self, sender: Sender) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Append a positional argument.
    #[must_use]
    pub fn with_arg<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.bundle.add_arg(value);
        self
    }

    /// Set a keyed argument.
    #[must_use]
    pub fn with_keyed<T: Any + Send + Sync>(mut self, key: &str, value: T) -> Self {
        self.bundle.put_arg(key, value);
        self
    }

    #[must_use]
    pub fn with_bundle(mut self, bundle: Bundle) -> Self {
        self.bundle = bundle;
        self
    }

    /// Mutable payload access while the producer still owns the intent.
    pub fn bundle_mut(&mut self) -> &mut Bundle {
        &mut self.bundle
    }

    #[must_use]
    pub fn bundle(&self) -> &Bundle {
        &self.bundle
    }

    #[must_use]
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    #[must_use]
    pub fn sender(&self) -> Option<&Sender> {
        self.sender.as_ref()
    }

    /// True when this intent was delivered as a bind-time replay rather than
    /// a live notification.
    #[must_use]
    pub fn is_sticky_replay(&self) -> bool {
        self.sticky_replay
    }

    /// Copy used as a stored sticky value: same channel, sender and payload,
    /// marked as a replay, with a cleared flag word.
    #[must_use]
    pub fn sticky_copy(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            sender: self.sender.clone(),
            sticky_replay: true,
            bundle: self.bundle.clone(),
            flags: AtomicU32::new(0),
        }
    }

    /// Stop delivery to the remaining subscribers of the current pass.
    pub fn done(&self) {
        self.flags.fetch_or(IntentFlags::DONE.bits(), Ordering::AcqRel);
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.flags().contains(IntentFlags::DONE)
    }

    #[must_use]
    pub fn flags(&self) -> IntentFlags {
        IntentFlags::from_bits_retain(self.flags.load(Ordering::Acquire))
    }

    /// Typed positional argument.
    #[must_use]
    pub fn arg<T: Any>(&self, index: usize) -> Option<&T> {
        self.bundle.arg(index)
    }

    /// Typed keyed argument.
    #[must_use]
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.bundle.get(key)
    }
}

impl From<Channel> for Intent {
    fn from(channel: Channel) -> Self {
        Self::new(channel)
    }
}

impl fmt::Debug for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Intent")
            .field("channel", &self.channel)
            .field("sender", &self.sender)
            .field("sticky_replay", &self.sticky_replay)
            .field("bundle", &self.bundle)
            .field("flags", &self.flags())
            .finish()
    }
}
