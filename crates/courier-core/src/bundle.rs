#![forbid(unsafe_code)]

//! Ordered and keyed argument container carried by an intent.
//!
//! # Invariants
//!
//! 1. A key appears at most once in the keyed map.
//! 2. [`Bundle::put_arg`] appends to the ordered sequence only the first time
//!    a key is set; overwriting an existing key updates the map alone.
//! 3. [`Bundle::merge`] concatenates sequences, unions maps (later wins) and
//!    ORs flags.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::channel::ChannelFlags;

/// A type-erased, shareable argument value.
pub type Arg = Arc<dyn Any + Send + Sync>;

/// Payload of an [`Intent`](crate::Intent).
#[derive(Clone, Default)]
pub struct Bundle {
    args: SmallVec<[Arg; 4]>,
    keyed: FxHashMap<Arc<str>, Arg>,
    flags: ChannelFlags,
}

impl Bundle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional argument.
    pub fn add_arg<T: Any + Send + Sync>(&mut self, value: T) -> &mut Self {
        self.args.push(Arc::new(value));
        self
    }

    /// Append an already shared positional argument.
    pub fn add_shared(&mut self, value: Arg) -> &mut Self {
        self.args.push(value);
        self
    }

    /// Set a keyed argument.
    pub fn put_arg<T: Any + Send + Sync>(&mut self, key: impl Into<Arc<str>>, value: T) -> &mut Self {
        self.put_shared(key, Arc::new(value))
    }

    /// Set an already shared keyed argument.
    pub fn put_shared(&mut self, key: impl Into<Arc<str>>, value: Arg) -> &mut Self {
        let key = key.into();
        if !self.keyed.contains_key(&key) {
            self.args.push(Arc::clone(&value));
        }
        self.keyed.insert(key, value);
        self
    }

    /// Typed positional read. `None` if out of range or of another type.
    #[must_use]
    pub fn arg<T: Any>(&self, index: usize) -> Option<&T> {
        let value = self.args.get(index)?;
        let typed = value.downcast_ref::<T>();
        if typed.is_none() {
            tracing::debug!(
                index,
                expected = std::any::type_name::<T>(),
                "bundle argument has a different type"
            );
        }
        typed
    }

    /// Typed keyed read. `None` if absent or of another type.
    #[must_use]
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        let value = self.keyed.get(key)?;
        let typed = value.downcast_ref::<T>();
        if typed.is_none() {
            tracing::debug!(
                key,
                expected = std::any::type_name::<T>(),
                "bundle argument has a different type"
            );
        }
        typed
    }

    /// The shared value stored under `key`.
    #[must_use]
    pub fn get_shared(&self, key: &str) -> Option<&Arg> {
        self.keyed.get(key)
    }

    /// The shared value at `index`.
    #[must_use]
    pub fn arg_shared(&self, index: usize) -> Option<&Arg> {
        self.args.get(index)
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.keyed.contains_key(key)
    }

    /// Iterate the keys of the keyed map (unordered).
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keyed.keys().map(|k| &**k)
    }

    /// Fold `other` into `self`.
    pub fn merge(&mut self, other: &Bundle) -> &mut Self {
        self.args.extend(other.args.iter().cloned());
        for (key, value) in &other.keyed {
            self.keyed.insert(Arc::clone(key), Arc::clone(value));
        }
        self.flags |= other.flags;
        self
    }

    /// Number of positional arguments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.args.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Number of keyed arguments.
    #[must_use]
    pub fn keyed_len(&self) -> usize {
        self.keyed.len()
    }

    #[must_use]
    pub fn flags(&self) -> ChannelFlags {
        self.flags
    }

    pub fn add_flags(&mut self, flags: ChannelFlags) -> &mut Self {
        self.flags |= flags;
        self
    }
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.keys().collect();
        keys.sort_unstable();
        f.debug_struct("Bundle")
            .field("args", &self.args.len())
            .field("keys", &keys)
            .field("flags", &self.flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_arg_appends_once_per_key() {
        let mut b = Bundle::new();
        b.put_arg("k", 1_i32).put_arg("k", 2_i32);
        assert_eq!(b.len(), 1);
        assert_eq!(b.get::<i32>("k"), Some(&2));
        // The ordered slot keeps the first value.
        assert_eq!(b.arg::<i32>(0), Some(&1));
    }

    #[test]
    fn positional_and_keyed_reads() {
        let mut b = Bundle::new();
        b.add_arg("first").put_arg("n", 7_u64);
        assert_eq!(b.arg::<&'static str>(0), Some(&"first"));
        assert_eq!(b.arg::<u64>(1), Some(&7));
        assert_eq!(b.arg::<u64>(2), None);
        assert!(b.contains_key("n"));
    }

    #[test]
    fn type_mismatch_reads_none() {
        let mut b = Bundle::new();
        b.put_arg("n", 7_u64);
        assert_eq!(b.get::<String>("n"), None);
        assert_eq!(b.arg::<i8>(0), None);
    }

    #[test]
    fn merge_round_trip_keeps_single_entry() {
        let mut src = Bundle::new();
        src.put_arg("k", String::from("v"));
        let mut dst = Bundle::new();
        dst.merge(&src);

        assert_eq!(dst.keyed_len(), 1);
        assert_eq!(dst.len(), 1);
        assert_eq!(dst.get::<String>("k").map(String::as_str), Some("v"));
        assert_eq!(dst.arg::<String>(0).map(String::as_str), Some("v"));
    }

    #[test]
    fn merge_later_key_wins_and_flags_union() {
        let mut a = Bundle::new();
        a.put_arg("k", 1_i32).add_flags(ChannelFlags::STICKY);
        let mut b = Bundle::new();
        b.put_arg("k", 2_i32).add_flags(ChannelFlags::FORCE_SYNC);

        a.merge(&b);
        assert_eq!(a.get::<i32>("k"), Some(&2));
        assert_eq!(a.len(), 2);
        assert_eq!(a.flags(), ChannelFlags::STICKY | ChannelFlags::FORCE_SYNC);
    }
}
