#![forbid(unsafe_code)]

//! Channel identity and flag bits.
//!
//! A [`Channel`] names one topic. Identity is the pair `(kind, key)`; flags
//! ride along but never participate in equality or hashing, so a lookup with a
//! flag-less channel finds the entry that was registered with flags.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bitflags::bitflags;

bitflags! {
    /// Per-channel behavior bits.
    ///
    /// The low half is for general channels; bits 16 and up are reserved for
    /// the observable-state layer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ChannelFlags: u32 {
        /// Retain the last delivered intent and replay it to late binders.
        /// Sticky channels are never trimmed from the dispatch table.
        const STICKY = 1;
        /// Subscribers must run inline; a scheduler-bound subscriber is a
        /// thread-discipline violation.
        const FORCE_SYNC = 1 << 16;
        /// Handlers must run on the configured main thread.
        const FORCE_MAIN_THREAD = 1 << 17;
    }
}

/// A named pub/sub topic.
#[derive(Clone)]
pub struct Channel {
    kind: &'static str,
    key: Arc<str>,
    flags: ChannelFlags,
}

impl Channel {
    /// Kind used by general-purpose event channels.
    pub const EVENT: &'static str = "event";

    /// Create a non-sticky event channel.
    #[must_use]
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self::with_kind(Self::EVENT, key, ChannelFlags::empty())
    }

    /// Create a sticky event channel.
    #[must_use]
    pub fn sticky(key: impl Into<Arc<str>>) -> Self {
        Self::with_kind(Self::EVENT, key, ChannelFlags::STICKY)
    }

    /// Create a channel of an explicit kind.
    #[must_use]
    pub fn with_kind(kind: &'static str, key: impl Into<Arc<str>>, flags: ChannelFlags) -> Self {
        Self {
            kind,
            key: key.into(),
            flags,
        }
    }

    /// Return a copy with additional flags OR-ed in.
    #[must_use]
    pub fn with_flags(mut self, flags: ChannelFlags) -> Self {
        self.flags |= flags;
        self
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    #[inline]
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[inline]
    #[must_use]
    pub fn flags(&self) -> ChannelFlags {
        self.flags
    }

    #[inline]
    #[must_use]
    pub fn is_sticky(&self) -> bool {
        self.flags.contains(ChannelFlags::STICKY)
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.key == other.key
    }
}

impl Eq for Channel {}

impl Hash for Channel {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.key.hash(state);
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("kind", &self.kind)
            .field("key", &&*self.key)
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustc_hash::FxHashSet;

    #[test]
    fn identity_ignores_flags() {
        let plain = Channel::new("net.state");
        let sticky = Channel::sticky("net.state");
        assert_eq!(plain, sticky);

        let mut set = FxHashSet::default();
        set.insert(sticky);
        assert!(set.contains(&plain));
    }

    #[test]
    fn kind_is_part_of_identity() {
        let event = Channel::new("title");
        let field = Channel::with_kind("field", "title", ChannelFlags::empty());
        assert_ne!(event, field);
    }

    #[test]
    fn flags_only_accumulate() {
        let ch = Channel::sticky("a").with_flags(ChannelFlags::FORCE_SYNC);
        assert!(ch.is_sticky());
        assert!(ch.flags().contains(ChannelFlags::FORCE_SYNC));
    }

    #[test]
    fn display_joins_kind_and_key() {
        assert_eq!(Channel::new("net.state").to_string(), "event:net.state");
    }
}
