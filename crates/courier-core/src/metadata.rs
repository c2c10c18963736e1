#![forbid(unsafe_code)]

//! Binding metadata and the per-type cache behind it.
//!
//! A type that handles events implements [`Bindings`], returning a table of
//! [`BindingDecl`]s: which channel key, which handler, at what priority and on
//! which scheduler. The table is a pure function of the type, so a
//! [`Registry`] builds it once and shares it afterwards.
//!
//! The registry is passed around as explicit context rather than living in a
//! static, so tests get a fresh one each time.
//!
//! # Invariants
//!
//! 1. [`TypeCache::get_or_build`] runs `build` at most once per `(K, V)` pair,
//!    even under concurrent first access.
//! 2. Interned channels live as long as the registry. Re-interning a key with
//!    more flags ORs them into the stored channel.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::channel::{Channel, ChannelFlags};
use crate::dispatcher::Dispatcher;
use crate::intent::Intent;
use crate::scheduler::{Scheduler, SchedulerId};
use crate::subscriber::{Handler, Subscriber};

type CacheSlot = Arc<dyn Any + Send + Sync>;

/// Process-lifetime memo keyed by type.
#[derive(Default)]
pub struct TypeCache {
    slots: RwLock<FxHashMap<(TypeId, TypeId), CacheSlot>>,
}

impl TypeCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Value cached for key type `K`, building it on first access.
    ///
    /// `build` runs outside the map lock, so it may itself use the cache.
    pub fn get_or_build<K, V>(&self, build: impl FnOnce() -> V) -> Arc<V>
    where
        K: ?Sized + 'static,
        V: Any + Send + Sync,
    {
        let key = (TypeId::of::<K>(), TypeId::of::<V>());
        let existing = self.slots.read().get(&key).cloned();
        let slot = match existing {
            Some(slot) => slot,
            None => {
                let mut slots = self.slots.write();
                Arc::clone(slots.entry(key).or_insert_with(|| {
                    let cell: CacheSlot = Arc::new(OnceLock::<Arc<V>>::new());
                    cell
                }))
            }
        };
        // The slot was created for this exact `V`, so the downcast holds; a
        // mismatch would only cost the memoization.
        let cell = slot
            .downcast::<OnceLock<Arc<V>>>()
            .unwrap_or_else(|_| Arc::new(OnceLock::new()));
        Arc::clone(cell.get_or_init(|| {
            tracing::debug!(
                key = std::any::type_name::<K>(),
                value = std::any::type_name::<V>(),
                "building type metadata"
            );
            Arc::new(build())
        }))
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for TypeCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeCache").field("entries", &self.len()).finish()
    }
}

/// One handler declaration of a subscriber type.
pub struct BindingDecl<T> {
    key: Arc<str>,
    channel_flags: ChannelFlags,
    handler_name: &'static str,
    priority: i32,
    scheduler: Option<SchedulerId>,
    flags: u32,
    handler: Handler<T>,
}

impl<T> Clone for BindingDecl<T> {
    fn clone(&self) -> Self {
        Self {
            key: Arc::clone(&self.key),
            channel_flags: self.channel_flags,
            handler_name: self.handler_name,
            priority: self.priority,
            scheduler: self.scheduler,
            flags: self.flags,
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<T: Any + Send + Sync> BindingDecl<T> {
    /// Declare `handler` on channel `key`, inline, priority 0.
    #[must_use]
    pub fn new<F>(key: impl Into<Arc<str>>, handler_name: &'static str, handler: F) -> Self
    where
        F: Fn(&T, &Intent) + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            channel_flags: ChannelFlags::empty(),
            handler_name,
            priority: 0,
            scheduler: None,
            flags: 0,
            handler: Arc::new(handler),
        }
    }

    #[must_use]
    pub fn sticky(self) -> Self {
        self.with_channel_flags(ChannelFlags::STICKY)
    }

    #[must_use]
    pub fn with_channel_flags(mut self, flags: ChannelFlags) -> Self {
        self.channel_flags |= flags;
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn on_scheduler(mut self, id: SchedulerId) -> Self {
        self.scheduler = Some(id);
        self
    }

    #[must_use]
    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }
}

impl<T> BindingDecl<T> {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn channel_flags(&self) -> ChannelFlags {
        self.channel_flags
    }

    #[must_use]
    pub fn handler_name(&self) -> &'static str {
        self.handler_name
    }

    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    #[must_use]
    pub fn scheduler(&self) -> Option<SchedulerId> {
        self.scheduler
    }

    #[must_use]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    #[must_use]
    pub fn handler(&self) -> &Handler<T> {
        &self.handler
    }
}

impl<T> fmt::Debug for BindingDecl<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingDecl")
            .field("key", &&*self.key)
            .field("channel_flags", &self.channel_flags)
            .field("handler", &self.handler_name)
            .field("priority", &self.priority)
            .field("scheduler", &self.scheduler)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Handler table of a subscriber type.
pub trait Bindings: Any + Send + Sync + Sized {
    fn bindings() -> Vec<BindingDecl<Self>>;
}

/// Process-lifetime context: per-type metadata, interned channels and named
/// schedulers.
#[derive(Default)]
pub struct Registry {
    types: TypeCache,
    channels: RwLock<FxHashMap<Arc<str>, Channel>>,
    schedulers: RwLock<FxHashMap<SchedulerId, Arc<dyn Scheduler>>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The per-type metadata cache.
    #[must_use]
    pub fn types(&self) -> &TypeCache {
        &self.types
    }

    /// Interned event channel for `key`.
    pub fn channel(&self, key: &str, flags: ChannelFlags) -> Channel {
        if let Some(existing) = self.channels.read().get(key)
            && existing.flags().contains(flags)
        {
            return existing.clone();
        }
        let mut channels = self.channels.write();
        let entry = channels
            .entry(Arc::from(key))
            .or_insert_with(|| Channel::with_kind(Channel::EVENT, key, ChannelFlags::empty()));
        if !entry.flags().contains(flags) {
            *entry = entry.clone().with_flags(flags);
        }
        entry.clone()
    }

    /// Make `scheduler` resolvable by `id`. Returns the scheduler it replaced.
    pub fn register_scheduler(
        &self,
        id: SchedulerId,
        scheduler: Arc<dyn Scheduler>,
    ) -> Option<Arc<dyn Scheduler>> {
        self.schedulers.write().insert(id, scheduler)
    }

    #[must_use]
    pub fn scheduler(&self, id: SchedulerId) -> Option<Arc<dyn Scheduler>> {
        self.schedulers.read().get(&id).cloned()
    }

    /// Cached handler table of `T`.
    pub fn bindings_for<T: Bindings>(&self) -> Arc<Vec<BindingDecl<T>>> {
        self.types.get_or_build::<T, Vec<BindingDecl<T>>>(T::bindings)
    }

    /// Build the subscriber `decl` describes for `owner`.
    ///
    /// An unregistered scheduler id logs a warning and falls back to inline
    /// delivery.
    pub fn subscriber_for<T: Any + Send + Sync>(
        &self,
        owner: &Arc<T>,
        decl: &BindingDecl<T>,
    ) -> Subscriber {
        let subscriber = Subscriber::from_handler(owner, decl.handler_name, Arc::clone(&decl.handler))
            .with_priority(decl.priority)
            .with_flags(decl.flags);
        match decl.scheduler {
            Some(id) => match self.scheduler(id) {
                Some(scheduler) => subscriber.with_scheduler(scheduler),
                None => {
                    tracing::warn!(
                        scheduler = %id,
                        handler = %subscriber.id(),
                        "unknown scheduler; delivering inline"
                    );
                    subscriber
                }
            },
            None => subscriber,
        }
    }

    /// Bind every handler `T` declares. Returns how many were newly bound.
    pub fn bind_all<T: Bindings>(&self, dispatcher: &Dispatcher, owner: &Arc<T>) -> usize {
        self.bind_where(dispatcher, owner, |_| true)
    }

    /// Bind only the handlers declared with exactly `flag`.
    ///
    /// Lets one owner tell apart several producers of the same type, e.g.
    /// flag 1 for its own session and flag 2 for a peer's.
    pub fn bind_all_with_flag<T: Bindings>(
        &self,
        dispatcher: &Dispatcher,
        owner: &Arc<T>,
        flag: u32,
    ) -> usize {
        self.bind_where(dispatcher, owner, |decl| decl.flags == flag)
    }

    /// Unbind every handler `T` declares. Returns how many were removed.
    pub fn unbind_all<T: Bindings>(&self, dispatcher: &Dispatcher, owner: &Arc<T>) -> usize {
        self.unbind_where(dispatcher, owner, |_| true)
    }

    /// Counterpart of [`bind_all_with_flag`](Self::bind_all_with_flag).
    pub fn unbind_all_with_flag<T: Bindings>(
        &self,
        dispatcher: &Dispatcher,
        owner: &Arc<T>,
        flag: u32,
    ) -> usize {
        self.unbind_where(dispatcher, owner, |decl| decl.flags == flag)
    }

    fn bind_where<T: Bindings>(
        &self,
        dispatcher: &Dispatcher,
        owner: &Arc<T>,
        keep: impl Fn(&BindingDecl<T>) -> bool,
    ) -> usize {
        let mut bound = 0;
        for decl in self.bindings_for::<T>().iter().filter(|decl| keep(decl)) {
            let channel = self.channel(decl.key(), decl.channel_flags());
            if dispatcher.add_binding(&channel, self.subscriber_for(owner, decl)) {
                bound += 1;
            }
        }
        bound
    }

    fn unbind_where<T: Bindings>(
        &self,
        dispatcher: &Dispatcher,
        owner: &Arc<T>,
        keep: impl Fn(&BindingDecl<T>) -> bool,
    ) -> usize {
        let mut removed = 0;
        for decl in self.bindings_for::<T>().iter().filter(|decl| keep(decl)) {
            let channel = self.channel(decl.key(), decl.channel_flags());
            if dispatcher.remove_binding(&channel, &self.subscriber_for(owner, decl)) {
                removed += 1;
            }
        }
        removed
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("types", &self.types)
            .field("channels", &self.channels.read().len())
            .field("schedulers", &self.schedulers.read().len())
            .finish()
    }
}
