#![forbid(unsafe_code)]

//! Observable source: a dispatcher whose channels are declared fields.
//!
//! # Design
//!
//! [`ObservableSource`] owns one value slot per declared field and a private
//! [`Dispatcher`]. Writes compare old and new by value and only notify on a
//! real change. A subscriber that binds to a field immediately receives the
//! current value as an `old == new` replay, computed from live state through
//! the [`BindReplay`] seam rather than stored per field.
//!
//! # Invariants
//!
//! 1. `set(f, v)` with `get(f) == v` emits nothing.
//! 2. `set(f, v2)` with a different value emits exactly one notification with
//!    `old = v`, `new = v2`.
//! 3. The value lock is released before any notification is dispatched, so
//!    handlers may read or write the source.
//!
//! # Failure Modes
//!
//! - **Unknown field / type mismatch**: `try_*` methods return a
//!   [`FieldError`]. The non-`try` methods log it; under
//!   [`FailurePolicy::Strict`](courier_core::FailurePolicy::Strict) they panic
//!   with the field, old and new value, otherwise they report the write as not
//!   having happened.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, Weak};

use courier_core::{
    BindReplay, BindingDecl, Channel, DispatchConfig, Dispatcher, Intent, Registry, Sender,
    Subscriber,
};
use parking_lot::RwLock;

use crate::change::{CHANGE, ListChange, NEW_VALUE, OLD_VALUE};
use crate::error::FieldError;
use crate::field::{FieldDescriptor, FieldTable, FieldValue, ObservableFields, SharedValue};

/// Handler table of a type that observes fields of `S`.
///
/// Declaration keys name fields of `S`. The channel flags of a declaration
/// are ignored; a field's kind decides its flags.
pub trait Observer<S: ObservableFields>: Any + Send + Sync + Sized {
    fn observations() -> Vec<BindingDecl<Self>>;
}

/// Shared observable state of one instance.
pub struct ObservableSource {
    source_type: TypeId,
    table: Arc<FieldTable>,
    values: RwLock<Vec<SharedValue>>,
    dispatcher: Dispatcher,
    this: Weak<ObservableSource>,
}

impl ObservableSource {
    /// Source for the fields `T` declares, with the default dispatch config.
    #[must_use]
    pub fn new<T: ObservableFields>(registry: &Registry) -> Arc<Self> {
        Self::with_config::<T>(registry, DispatchConfig::default())
    }

    #[must_use]
    pub fn with_config<T: ObservableFields>(registry: &Registry, config: DispatchConfig) -> Arc<Self> {
        let table = registry
            .types()
            .get_or_build::<T, FieldTable>(FieldTable::build::<T>);
        Arc::new_cyclic(|this: &Weak<Self>| {
            let replay: Weak<dyn BindReplay> = this.clone();
            Self {
                source_type: TypeId::of::<T>(),
                values: RwLock::new(table.initial_values(this)),
                table,
                dispatcher: Dispatcher::with_config(config).with_replay(replay),
                this: this.clone(),
            }
        })
    }

    /// Type name of the declaring type.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.table.type_name()
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        self.table.fields()
    }

    fn descriptor(&self, name: &str) -> Result<&FieldDescriptor, FieldError> {
        self.table.get(name).ok_or_else(|| FieldError::UnknownField {
            source_type: self.table.type_name(),
            field: name.to_string(),
        })
    }

    /// Channel of field `name`.
    #[must_use]
    pub fn channel(&self, name: &str) -> Option<Channel> {
        self.table.get(name).map(|d| d.channel().clone())
    }

    /// Current value of `name`, shared.
    pub fn get_shared(&self, name: &str) -> Result<SharedValue, FieldError> {
        let index = self.descriptor(name)?.index();
        Ok(Arc::clone(&self.values.read()[index]))
    }

    /// Current value of `name`, cloned out.
    pub fn try_get<V: Any + Clone>(&self, name: &str) -> Result<V, FieldError> {
        let desc = self.descriptor(name)?;
        let value = Arc::clone(&self.values.read()[desc.index()]);
        value
            .as_any()
            .downcast_ref::<V>()
            .cloned()
            .ok_or_else(|| FieldError::TypeMismatch {
                field: desc.name(),
                expected: std::any::type_name::<V>(),
                found: value.value_type_name(),
            })
    }

    /// [`try_get`](Self::try_get), `None` on any failure.
    #[must_use]
    pub fn get<V: Any + Clone>(&self, name: &str) -> Option<V> {
        self.try_get(name).ok()
    }

    /// Write `value` if it differs from the current one, then notify.
    ///
    /// Returns `Ok(true)` if a notification was emitted.
    pub fn try_set<V: FieldValue>(&self, name: &str, value: V) -> Result<bool, FieldError> {
        self.write(name, Arc::new(value), false)
    }

    /// [`try_set`](Self::try_set) with failures logged and escalated per the
    /// failure policy.
    pub fn set<V: FieldValue>(&self, name: &str, value: V) -> bool {
        let value: SharedValue = Arc::new(value);
        match self.write(name, Arc::clone(&value), false) {
            Ok(changed) => changed,
            Err(err) => self.fail(name, &err, Some(&value)),
        }
    }

    /// Write `value` and notify even when it equals the current value.
    pub fn notify_with<V: FieldValue>(&self, name: &str, value: V) -> bool {
        let value: SharedValue = Arc::new(value);
        match self.write(name, Arc::clone(&value), true) {
            Ok(changed) => changed,
            Err(err) => self.fail(name, &err, Some(&value)),
        }
    }

    /// Notify `name` with its current value as both old and new.
    ///
    /// For producers that mutate through aliasing, where comparison cannot
    /// detect the change.
    pub fn notify_field(&self, name: &str) -> bool {
        match self.descriptor(name) {
            Ok(desc) => {
                let current = Arc::clone(&self.values.read()[desc.index()]);
                self.emit(desc, Arc::clone(&current), current, None);
                true
            }
            Err(err) => self.fail(name, &err, None),
        }
    }

    fn write(&self, name: &str, new: SharedValue, force: bool) -> Result<bool, FieldError> {
        let desc = self.descriptor(name)?;
        let old = {
            let mut values = self.values.write();
            let slot = &mut values[desc.index()];
            if (**slot).as_any().type_id() != (*new).as_any().type_id() {
                return Err(FieldError::TypeMismatch {
                    field: desc.name(),
                    expected: new.value_type_name(),
                    found: slot.value_type_name(),
                });
            }
            if !force && slot.value_eq(&*new) {
                return Ok(false);
            }
            std::mem::replace(slot, Arc::clone(&new))
        };
        self.emit(desc, old, new, None);
        Ok(true)
    }

    fn fail(&self, name: &str, err: &FieldError, new: Option<&SharedValue>) -> bool {
        let old = self
            .get_shared(name)
            .map_or_else(|_| "<unavailable>".to_string(), |v| format!("{v:?}"));
        let new = new.map_or_else(|| "<none>".to_string(), |v| format!("{v:?}"));
        tracing::error!(
            source_type = self.type_name(),
            field = name,
            old = %old,
            new = %new,
            "{err}"
        );
        if self.dispatcher.config().failure_policy.is_strict() {
            panic!("field `{name}` (old: {old}, new: {new}): {err}");
        }
        false
    }

    fn sender(&self) -> Sender {
        let this: Weak<dyn Any + Send + Sync> = self.this.clone();
        Sender::from_weak(self.table.type_name(), this)
    }

    fn emit(
        &self,
        desc: &FieldDescriptor,
        old: SharedValue,
        new: SharedValue,
        change: Option<ListChange>,
    ) {
        let mut intent = Intent::new(desc.channel().clone()).with_sender(self.sender());
        let bundle = intent.bundle_mut();
        bundle
            .put_shared(OLD_VALUE, old.into_arg())
            .put_shared(NEW_VALUE, new.into_arg());
        if let Some(change) = change {
            bundle.put_arg(CHANGE, change);
        }
        tracing::trace!(source_type = self.type_name(), field = desc.name(), ?change, "field changed");
        self.dispatcher.notify(intent);
    }

    /// Notification for an in-place collection mutation: old and new are the
    /// collection itself.
    pub(crate) fn notify_collection(&self, name: &str, change: Option<ListChange>) {
        match self.descriptor(name) {
            Ok(desc) => {
                let current = Arc::clone(&self.values.read()[desc.index()]);
                self.emit(desc, Arc::clone(&current), current, change);
            }
            Err(err) => {
                self.fail(name, &err, None);
            }
        }
    }

    /// Bind `subscriber` to field `name`. The subscriber immediately receives
    /// the current value.
    pub fn bind(&self, name: &str, subscriber: Subscriber) -> bool {
        match self.descriptor(name) {
            Ok(desc) => self.dispatcher.add_binding(desc.channel(), subscriber),
            Err(err) => {
                tracing::warn!(field = name, "{err}");
                false
            }
        }
    }

    pub fn unbind(&self, name: &str, subscriber: &Subscriber) -> bool {
        match self.descriptor(name) {
            Ok(desc) => self.dispatcher.remove_binding(desc.channel(), subscriber),
            Err(_) => false,
        }
    }

    /// Bind every observation `R` declares on `S`. Returns how many were
    /// newly bound.
    pub fn bind_observer<S, R>(&self, registry: &Registry, observer: &Arc<R>) -> usize
    where
        S: ObservableFields,
        R: Observer<S>,
    {
        self.observe_where::<S, R>(registry, observer, true, |_| true)
    }

    /// Bind only the observations declared with exactly `flag`.
    pub fn bind_observer_with_flag<S, R>(&self, registry: &Registry, observer: &Arc<R>, flag: u32) -> usize
    where
        S: ObservableFields,
        R: Observer<S>,
    {
        self.observe_where::<S, R>(registry, observer, true, |d| d.flags() == flag)
    }

    /// Unbind every observation `R` declares on `S`.
    pub fn unbind_observer<S, R>(&self, registry: &Registry, observer: &Arc<R>) -> usize
    where
        S: ObservableFields,
        R: Observer<S>,
    {
        self.observe_where::<S, R>(registry, observer, false, |_| true)
    }

    /// Counterpart of [`bind_observer_with_flag`](Self::bind_observer_with_flag).
    pub fn unbind_observer_with_flag<S, R>(
        &self,
        registry: &Registry,
        observer: &Arc<R>,
        flag: u32,
    ) -> usize
    where
        S: ObservableFields,
        R: Observer<S>,
    {
        self.observe_where::<S, R>(registry, observer, false, |d| d.flags() == flag)
    }

    fn observe_where<S, R>(
        &self,
        registry: &Registry,
        observer: &Arc<R>,
        bind: bool,
        keep: impl Fn(&BindingDecl<R>) -> bool,
    ) -> usize
    where
        S: ObservableFields,
        R: Observer<S>,
    {
        if TypeId::of::<S>() != self.source_type {
            let err = FieldError::SourceMismatch {
                expected: std::any::type_name::<S>(),
                found: self.type_name(),
            };
            tracing::warn!(observer = std::any::type_name::<R>(), "{err}");
            return 0;
        }
        let decls = registry
            .types()
            .get_or_build::<(S, R), Vec<BindingDecl<R>>>(R::observations);
        let mut count = 0;
        for decl in decls.iter().filter(|d| keep(d)) {
            let subscriber = registry.subscriber_for(observer, decl);
            let done = if bind {
                self.bind(decl.key(), subscriber)
            } else {
                self.unbind(decl.key(), &subscriber)
            };
            if done {
                count += 1;
            }
        }
        count
    }

    /// Whether any field currently has a binding.
    #[must_use]
    pub fn has_subscribers(&self) -> bool {
        self.dispatcher.has_subscribers()
    }

    /// Number of subscribers bound to field `name`.
    #[must_use]
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.table
            .get(name)
            .map_or(0, |d| self.dispatcher.subscriber_count(d.channel()))
    }

    /// The underlying dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }
}

impl BindReplay for ObservableSource {
    fn replay_for(&self, channel: &Channel) -> Option<Arc<Intent>> {
        let desc = self.table.get(channel.key())?;
        if desc.channel() != channel {
            return None;
        }
        let current = Arc::clone(&self.values.read()[desc.index()]);
        let mut intent = Intent::replayed(desc.channel().clone()).with_sender(self.sender());
        intent
            .bundle_mut()
            .put_shared(OLD_VALUE, Arc::clone(&current).into_arg())
            .put_shared(NEW_VALUE, current.into_arg());
        Some(Arc::new(intent))
    }
}

impl fmt::Debug for ObservableSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let values = self.values.read();
        let mut s = f.debug_struct("ObservableSource");
        s.field("type", &self.type_name());
        for field in self.table.fields() {
            s.field(field.name(), &values[field.index()]);
        }
        s.finish()
    }
}
