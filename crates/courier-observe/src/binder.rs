#![forbid(unsafe_code)]

//! Keyed single-source binding.
//!
//! A [`SourceBinder`] keeps at most one source bound per key for one
//! observer. Binding a different source under a key unbinds the previous one
//! first; binding the same source again is a no-op. Typical use is a view
//! that follows "the current account" while the account object changes.

use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use courier_core::Registry;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::field::ObservableFields;
use crate::source::{ObservableSource, Observer};

struct Bound {
    source: Arc<ObservableSource>,
    flag: Option<u32>,
}

/// Per-observer table of bound sources, keyed by caller-chosen names.
///
/// Holds the observer weakly so an observer may own its binder.
pub struct SourceBinder<S, R> {
    registry: Arc<Registry>,
    observer: Weak<R>,
    bound: Mutex<FxHashMap<String, Bound>>,
    _source: PhantomData<fn() -> S>,
}

impl<S, R> SourceBinder<S, R>
where
    S: ObservableFields,
    R: Observer<S>,
{
    #[must_use]
    pub fn new(registry: Arc<Registry>, observer: &Arc<R>) -> Self {
        Self {
            registry,
            observer: Arc::downgrade(observer),
            bound: Mutex::new(FxHashMap::default()),
            _source: PhantomData,
        }
    }

    /// Bind `source` under `key`, replacing whatever was bound there.
    ///
    /// Returns `false` if `source` is already the one bound under `key`, or
    /// if the observer is gone.
    pub fn bind_single(&self, key: &str, source: &Arc<ObservableSource>) -> bool {
        self.swap(key.to_string(), source, None)
    }

    /// [`bind_single`](Self::bind_single) keyed by the source type name.
    pub fn bind_source(&self, source: &Arc<ObservableSource>) -> bool {
        self.swap(source.type_name().to_string(), source, None)
    }

    /// Bind only the observations declared with `flag`, under `key`.
    pub fn bind_single_with_flag(&self, key: &str, source: &Arc<ObservableSource>, flag: u32) -> bool {
        self.swap(key.to_string(), source, Some(flag))
    }

    /// [`bind_single_with_flag`](Self::bind_single_with_flag) keyed by the
    /// source type name and the flag.
    pub fn bind_source_with_flag(&self, source: &Arc<ObservableSource>, flag: u32) -> bool {
        self.swap(flag_key(source, flag), source, Some(flag))
    }

    /// Unbind what [`bind_source_with_flag`](Self::bind_source_with_flag)
    /// bound for `source` and `flag`.
    pub fn clear_with_flag(&self, source: &Arc<ObservableSource>, flag: u32) -> bool {
        self.clear(&flag_key(source, flag))
    }

    /// Unbind whatever is bound under `key`.
    pub fn clear(&self, key: &str) -> bool {
        let removed = self.bound.lock().remove(key);
        match removed {
            Some(bound) => {
                self.unbind(&bound);
                true
            }
            None => false,
        }
    }

    /// Unbind everything.
    pub fn clear_all(&self) {
        let drained: Vec<Bound> = self.bound.lock().drain().map(|(_, b)| b).collect();
        for bound in &drained {
            self.unbind(bound);
        }
    }

    /// Source currently bound under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Arc<ObservableSource>> {
        self.bound.lock().get(key).map(|b| Arc::clone(&b.source))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bound.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bound.lock().is_empty()
    }

    fn swap(&self, key: String, source: &Arc<ObservableSource>, flag: Option<u32>) -> bool {
        let Some(observer) = self.observer.upgrade() else {
            return false;
        };
        // Bind and unbind run handlers; the table lock is not held across them.
        let previous = {
            let mut bound = self.bound.lock();
            if let Some(current) = bound.get(&key)
                && Arc::ptr_eq(&current.source, source)
                && current.flag == flag
            {
                return false;
            }
            bound.insert(
                key.clone(),
                Bound {
                    source: Arc::clone(source),
                    flag,
                },
            )
        };
        if let Some(previous) = &previous {
            self.unbind(previous);
        }
        let count = match flag {
            Some(flag) => {
                source.bind_observer_with_flag::<S, R>(&self.registry, &observer, flag)
            }
            None => source.bind_observer::<S, R>(&self.registry, &observer),
        };
        tracing::debug!(
            key = %key,
            source_type = source.type_name(),
            bindings = count,
            replaced = previous.is_some(),
            "bound source"
        );
        true
    }

    fn unbind(&self, bound: &Bound) {
        let Some(observer) = self.observer.upgrade() else {
            return;
        };
        match bound.flag {
            Some(flag) => {
                bound
                    .source
                    .unbind_observer_with_flag::<S, R>(&self.registry, &observer, flag);
            }
            None => {
                bound.source.unbind_observer::<S, R>(&self.registry, &observer);
            }
        }
    }
}

fn flag_key(source: &ObservableSource, flag: u32) -> String {
    format!("{}_{flag}", source.type_name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeExt;
    use crate::field::FieldDecl;
    use courier_core::{BindingDecl, Intent};

    struct Session;

    impl ObservableFields for Session {
        fn fields() -> Vec<FieldDecl> {
            vec![
                FieldDecl::scalar("user", String::new()),
                FieldDecl::scalar("online", false),
            ]
        }
    }

    #[derive(Default)]
    struct Header {
        users: Mutex<Vec<String>>,
        online: Mutex<Vec<bool>>,
    }

    impl Observer<Session> for Header {
        fn observations() -> Vec<BindingDecl<Self>> {
            vec![
                BindingDecl::new("user", "on_user", |h: &Header, intent: &Intent| {
                    if let Some(user) = intent.new_value::<String>() {
                        h.users.lock().push(user.clone());
                    }
                }),
                BindingDecl::new("online", "on_online", |h: &Header, intent: &Intent| {
                    if let Some(online) = intent.new_value::<bool>() {
                        h.online.lock().push(*online);
                    }
                })
                .with_flags(2),
            ]
        }
    }

    fn session(registry: &Registry, user: &str) -> Arc<ObservableSource> {
        let source = ObservableSource::new::<Session>(registry);
        source.set("user", user.to_string());
        source
    }

    #[test]
    fn rebinding_moves_to_the_new_source() {
        let registry = Arc::new(Registry::new());
        let header = Arc::new(Header::default());
        let binder = SourceBinder::<Session, Header>::new(Arc::clone(&registry), &header);
        let a = session(&registry, "ada");
        let b = session(&registry, "bob");

        assert!(binder.bind_single("current", &a));
        assert!(!binder.bind_single("current", &a));
        assert!(binder.bind_single("current", &b));
        assert!(!a.has_subscribers());

        a.set("user", String::from("ada2"));
        b.set("user", String::from("bob2"));
        assert_eq!(*header.users.lock(), ["ada", "bob", "bob2"]);
    }

    #[test]
    fn flag_binding_selects_declarations() {
        let registry = Arc::new(Registry::new());
        let header = Arc::new(Header::default());
        let binder = SourceBinder::<Session, Header>::new(Arc::clone(&registry), &header);
        let a = session(&registry, "ada");

        assert!(binder.bind_source_with_flag(&a, 2));
        assert_eq!(a.subscriber_count("online"), 1);
        assert_eq!(a.subscriber_count("user"), 0);
        assert!(binder.get(&flag_key(&a, 2)).is_some());

        a.set("online", true);
        assert_eq!(*header.online.lock(), [false, true]);

        assert!(binder.clear_with_flag(&a, 2));
        assert!(!a.has_subscribers());
        assert!(binder.is_empty());
    }

    #[test]
    fn clear_all_unbinds_every_key() {
        let registry = Arc::new(Registry::new());
        let header = Arc::new(Header::default());
        let binder = SourceBinder::<Session, Header>::new(Arc::clone(&registry), &header);
        let a = session(&registry, "ada");
        let b = session(&registry, "bob");

        binder.bind_source(&a);
        binder.bind_single("other", &b);
        assert_eq!(binder.len(), 2);

        binder.clear_all();
        assert!(!a.has_subscribers());
        assert!(!b.has_subscribers());
        assert!(!binder.clear("other"));
    }

    #[test]
    fn dead_observer_binds_nothing() {
        let registry = Arc::new(Registry::new());
        let header = Arc::new(Header::default());
        let binder = SourceBinder::<Session, Header>::new(Arc::clone(&registry), &header);
        drop(header);
        let a = session(&registry, "ada");
        assert!(!binder.bind_source(&a));
        assert!(!a.has_subscribers());
    }
}
