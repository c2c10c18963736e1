#![forbid(unsafe_code)]

//! A weakly-owned binding of one handler to one channel.
//!
//! # Invariants
//!
//! 1. A subscriber never keeps its owner alive. [`Subscriber::invoke`]
//!    returns `false` once the owner is gone so the set can drop it.
//! 2. Identity is computed once from the owner's type name, the handler name
//!    and the owner's address. Equality additionally compares scheduler,
//!    priority and flags.
//! 3. Whether the handler runs inline or on a scheduler is fixed at
//!    construction and never depends on the intent.
//!
//! # Failure Modes
//!
//! | Failure | Strict | Lenient |
//! |---|---|---|
//! | handler panics | logged, re-raised | logged, swallowed |
//! | `FORCE_SYNC` channel on a scheduler-bound subscriber | panic | logged, task still posted |
//! | `FORCE_MAIN_THREAD` channel delivered off the main thread | panic | logged, handler still runs |
//! | scheduler rejects the task | logged | logged |

use std::any::Any;
use std::cmp::Reverse;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::{Arc, Weak};

use rustc_hash::FxHasher;

use crate::channel::{Channel, ChannelFlags};
use crate::config::DispatchConfig;
use crate::error::{DispatchError, panic_message};
use crate::intent::Intent;
use crate::scheduler::Scheduler;

type ErasedHandler = Arc<dyn Fn(&(dyn Any + Send + Sync), &Intent) + Send + Sync>;

/// A typed handler closure shared between bindings of the same declaration.
pub type Handler<T> = Arc<dyn Fn(&T, &Intent) + Send + Sync>;

/// Names a handler for logs and identity: owner type plus handler name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerId {
    owner_type: &'static str,
    name: &'static str,
}

impl HandlerId {
    #[must_use]
    pub const fn new(owner_type: &'static str, name: &'static str) -> Self {
        Self { owner_type, name }
    }

    #[must_use]
    pub fn owner_type(&self) -> &'static str {
        self.owner_type
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.owner_type, self.name)
    }
}

/// One handler bound for one owner.
pub struct Subscriber {
    owner: Weak<dyn Any + Send + Sync>,
    handler: ErasedHandler,
    id: HandlerId,
    scheduler: Option<Arc<dyn Scheduler>>,
    priority: i32,
    flags: u32,
    identity: u64,
}

impl Subscriber {
    /// Bind `handler` for `owner`, running inline at priority 0.
    #[must_use]
    pub fn new<T, F>(owner: &Arc<T>, name: &'static str, handler: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&T, &Intent) + Send + Sync + 'static,
    {
        Self::from_handler(owner, name, Arc::new(handler))
    }

    /// Bind an already shared handler.
    #[must_use]
    pub fn from_handler<T>(owner: &Arc<T>, name: &'static str, handler: Handler<T>) -> Self
    where
        T: Any + Send + Sync,
    {
        let owner_type = std::any::type_name::<T>();
        let address = Arc::as_ptr(owner) as *const () as usize;
        let mut hasher = FxHasher::default();
        owner_type.hash(&mut hasher);
        name.hash(&mut hasher);
        address.hash(&mut hasher);

        let erased: ErasedHandler = Arc::new(move |owner: &(dyn Any + Send + Sync), intent: &Intent| {
            if let Some(owner) = owner.downcast_ref::<T>() {
                handler(owner, intent);
            }
        });
        let strong: Arc<dyn Any + Send + Sync> = Arc::clone(owner) as _;

        Self {
            owner: Arc::downgrade(&strong),
            handler: erased,
            id: HandlerId::new(owner_type, name),
            scheduler: None,
            priority: 0,
            flags: 0,
            identity: hasher.finish(),
        }
    }

    /// Higher priorities are visited first.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Post the handler to `scheduler` instead of running it inline.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Opaque caller-defined bits, compared for equality.
    #[must_use]
    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    #[must_use]
    pub fn id(&self) -> &HandlerId {
        &self.id
    }

    #[must_use]
    pub fn priority(&self) -> i32 {
        self.priority
    }

    #[must_use]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    #[must_use]
    pub fn identity(&self) -> u64 {
        self.identity
    }

    #[must_use]
    pub fn scheduler(&self) -> Option<&Arc<dyn Scheduler>> {
        self.scheduler.as_ref()
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.owner.strong_count() > 0
    }

    /// Ordering key within a set: priority descending, then identity.
    #[must_use]
    pub fn sort_key(&self) -> (Reverse<i32>, u64) {
        (Reverse(self.priority), self.identity)
    }

    /// Deliver `intent` as bound on `bound`. Returns `false` when the owner
    /// is gone.
    ///
    /// Thread discipline follows the union of the bound channel's flags and
    /// the flags the intent was published with.
    pub fn invoke(&self, bound: &Channel, intent: &Arc<Intent>, config: &DispatchConfig) -> bool {
        let channel = bound.clone().with_flags(intent.channel().flags());
        let Some(owner) = self.owner.upgrade() else {
            let err = DispatchError::OwnerUnreachable {
                channel: channel.clone(),
                handler: self.id.clone(),
            };
            tracing::info!(channel = %channel, handler = %self.id, "{err}");
            return false;
        };

        let Some(scheduler) = &self.scheduler else {
            run_handler(&self.handler, &self.id, &*owner, &channel, intent, config);
            return true;
        };

        if channel.flags().contains(ChannelFlags::FORCE_SYNC) {
            violation(&channel, &self.id, "forced-sync delivery", config);
        }
        drop(owner);

        let weak = self.owner.clone();
        let handler = Arc::clone(&self.handler);
        let id = self.id.clone();
        let task_channel = channel.clone();
        let task_intent = Arc::clone(intent);
        let task_config = config.clone();
        let accepted = scheduler.post(Box::new(move || {
            if let Some(owner) = weak.upgrade() {
                run_handler(&handler, &id, &*owner, &task_channel, &task_intent, &task_config);
            }
        }));
        if !accepted {
            let err = DispatchError::Rejected {
                channel: channel.clone(),
                handler: self.id.clone(),
                scheduler: scheduler.name().to_string(),
            };
            tracing::warn!(channel = %channel, handler = %self.id, "{err}");
        }
        true
    }
}

fn run_handler(
    handler: &ErasedHandler,
    id: &HandlerId,
    owner: &(dyn Any + Send + Sync),
    channel: &Channel,
    intent: &Intent,
    config: &DispatchConfig,
) {
    if channel.flags().contains(ChannelFlags::FORCE_MAIN_THREAD)
        && config
            .main_thread
            .is_some_and(|main| main != std::thread::current().id())
    {
        violation(channel, id, "main-thread delivery", config);
    }

    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(owner, intent))) {
        let err = DispatchError::HandlerPanicked {
            channel: channel.clone(),
            handler: id.clone(),
            message: panic_message(&*payload),
        };
        tracing::error!(channel = %channel, handler = %id, policy = %config.failure_policy, "{err}");
        if config.failure_policy.is_strict() {
            resume_unwind(payload);
        }
    }
}

fn violation(channel: &Channel, id: &HandlerId, rule: &'static str, config: &DispatchConfig) {
    let err = DispatchError::ThreadDiscipline {
        channel: channel.clone(),
        handler: id.clone(),
        rule,
    };
    tracing::error!(channel = %channel, handler = %id, "{err}");
    if config.failure_policy.is_strict() {
        panic!("{err}");
    }
}

impl PartialEq for Subscriber {
    fn eq(&self, other: &Self) -> bool {
        let same_scheduler = match (&self.scheduler, &other.scheduler) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        self.identity == other.identity
            && self.id == other.id
            && same_scheduler
            && self.priority == other.priority
            && self.flags == other.flags
    }
}

impl Eq for Subscriber {}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("flags", &self.flags)
            .field("scheduler", &self.scheduler.as_ref().map(|s| s.name().to_string()))
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FailurePolicy;
    use crate::scheduler::Task;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        hits: AtomicUsize,
    }

    fn counter() -> Arc<Counter> {
        Arc::new(Counter {
            hits: AtomicUsize::new(0),
        })
    }

    fn bump(c: &Counter, _: &Intent) {
        c.hits.fetch_add(1, Ordering::SeqCst);
    }

    #[derive(Default)]
    struct Queue {
        tasks: Mutex<Vec<Task>>,
        accept: bool,
    }

    impl Scheduler for Queue {
        fn post(&self, task: Task) -> bool {
            if self.accept {
                self.tasks.lock().push(task);
            }
            self.accept
        }

        fn name(&self) -> &str {
            "queue"
        }
    }

    impl Queue {
        fn drain(&self) {
            let tasks: Vec<Task> = std::mem::take(&mut *self.tasks.lock());
            for task in tasks {
                task();
            }
        }
    }

    fn lenient() -> DispatchConfig {
        DispatchConfig::new().lenient()
    }

    fn plain() -> Arc<Intent> {
        Arc::new(Intent::new(Channel::new("a")))
    }

    fn deliver(sub: &Subscriber, intent: &Arc<Intent>, config: &DispatchConfig) -> bool {
        sub.invoke(intent.channel(), intent, config)
    }

    #[test]
    fn inline_invoke_runs_handler() {
        let owner = counter();
        let sub = Subscriber::new(&owner, "bump", bump);
        let intent = Arc::new(Intent::new(Channel::new("a")));
        assert!(deliver(&sub, &intent, &lenient()));
        assert_eq!(owner.hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dead_owner_reports_false() {
        let owner = counter();
        let sub = Subscriber::new(&owner, "bump", bump);
        drop(owner);
        assert!(!sub.is_alive());
        assert!(!deliver(&sub, &plain(), &lenient()));
    }

    #[test]
    fn identity_distinguishes_owner_instances() {
        let a = counter();
        let b = counter();
        let sa = Subscriber::new(&a, "bump", bump);
        let sb = Subscriber::new(&b, "bump", bump);
        assert_ne!(sa.identity(), sb.identity());
        assert_eq!(sa, Subscriber::new(&a, "bump", bump));
        assert_ne!(sa, Subscriber::new(&a, "bump", bump).with_priority(3));
    }

    #[test]
    fn scheduled_invoke_defers_until_drained() {
        let owner = counter();
        let queue = Arc::new(Queue {
            accept: true,
            ..Queue::default()
        });
        let sub = Subscriber::new(&owner, "bump", bump).with_scheduler(queue.clone());
        assert!(deliver(&sub, &plain(), &lenient()));
        assert_eq!(owner.hits.load(Ordering::SeqCst), 0);
        queue.drain();
        assert_eq!(owner.hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scheduled_task_does_not_keep_owner_alive() {
        let owner = counter();
        let queue = Arc::new(Queue {
            accept: true,
            ..Queue::default()
        });
        let sub = Subscriber::new(&owner, "bump", bump).with_scheduler(queue.clone());
        deliver(&sub, &plain(), &lenient());
        let weak = Arc::downgrade(&owner);
        drop(owner);
        assert!(weak.upgrade().is_none());
        queue.drain();
    }

    #[test]
    fn rejected_post_still_reports_alive() {
        let owner = counter();
        let queue: Arc<dyn Scheduler> = Arc::new(Queue::default());
        let sub = Subscriber::new(&owner, "bump", bump).with_scheduler(queue);
        assert!(deliver(&sub, &plain(), &lenient()));
        assert_eq!(owner.hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn lenient_swallows_handler_panic() {
        let owner = counter();
        let sub = Subscriber::new(&owner, "explode", |_: &Counter, _: &Intent| panic!("boom"));
        assert!(deliver(&sub, &plain(), &lenient()));
    }

    #[test]
    fn strict_reraises_handler_panic() {
        let owner = counter();
        let sub = Subscriber::new(&owner, "explode", |_: &Counter, _: &Intent| panic!("boom"));
        let config = DispatchConfig::new().with_failure_policy(FailurePolicy::Strict);
        let intent = Arc::new(Intent::new(Channel::new("a")));
        let err =
            catch_unwind(AssertUnwindSafe(|| deliver(&sub, &intent, &config))).unwrap_err();
        assert_eq!(panic_message(&*err), "boom");
    }

    #[test]
    fn forced_sync_on_scheduler_is_a_violation() {
        let owner = counter();
        let queue = Arc::new(Queue {
            accept: true,
            ..Queue::default()
        });
        let sub = Subscriber::new(&owner, "bump", bump).with_scheduler(queue.clone());
        let intent = Arc::new(Intent::new(
            Channel::new("list").with_flags(ChannelFlags::FORCE_SYNC),
        ));

        let strict = DispatchConfig::new().strict();
        assert!(catch_unwind(AssertUnwindSafe(|| deliver(&sub, &intent, &strict))).is_err());

        // Lenient logs and still schedules.
        assert!(deliver(&sub, &intent, &lenient()));
        queue.drain();
        assert_eq!(owner.hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn forced_main_thread_checks_current_thread() {
        let owner = counter();
        let sub = Arc::new(Subscriber::new(&owner, "bump", bump));
        let intent = Arc::new(Intent::new(
            Channel::new("ui").with_flags(ChannelFlags::FORCE_MAIN_THREAD),
        ));
        let config = DispatchConfig::new()
            .strict()
            .with_main_thread(std::thread::current().id());

        assert!(deliver(&sub, &intent, &config));

        let (sub2, intent2, config2) = (Arc::clone(&sub), Arc::clone(&intent), config.clone());
        let off_main = std::thread::spawn(move || {
            catch_unwind(AssertUnwindSafe(|| deliver(&sub2, &intent2, &config2))).is_err()
        })
        .join()
        .unwrap();
        assert!(off_main);
        assert_eq!(owner.hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn bound_channel_flags_apply_to_flagless_intents() {
        let owner = counter();
        let queue = Arc::new(Queue {
            accept: true,
            ..Queue::default()
        });
        let sub = Subscriber::new(&owner, "bump", bump).with_scheduler(queue.clone());
        let bound = Channel::new("list").with_flags(ChannelFlags::FORCE_SYNC);
        let intent = Arc::new(Intent::new(Channel::new("list")));

        let strict = DispatchConfig::new().strict();
        let err =
            catch_unwind(AssertUnwindSafe(|| sub.invoke(&bound, &intent, &strict))).unwrap_err();
        assert!(panic_message(&*err).contains("forced-sync"));
        assert!(queue.tasks.lock().is_empty());

        let ui = Channel::new("ui").with_flags(ChannelFlags::FORCE_MAIN_THREAD);
        let config = DispatchConfig::new()
            .strict()
            .with_main_thread(std::thread::current().id());
        let inline = Arc::new(Subscriber::new(&owner, "bump", bump));
        let off_main = std::thread::spawn(move || {
            let intent = Arc::new(Intent::new(Channel::new("ui")));
            catch_unwind(AssertUnwindSafe(|| inline.invoke(&ui, &intent, &config))).is_err()
        })
        .join()
        .unwrap();
        assert!(off_main);
        assert_eq!(owner.hits.load(Ordering::SeqCst), 0);
    }
}
