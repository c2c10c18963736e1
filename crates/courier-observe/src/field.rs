#![forbid(unsafe_code)]

//! Field declarations and the per-type field table.
//!
//! An observable type implements [`ObservableFields`] and returns one
//! [`FieldDecl`] per field. The table built from it is a pure function of the
//! type, cached once in the [`Registry`](courier_core::Registry) and shared by
//! every instance.
//!
//! | Kind | Channel flags |
//! |---|---|
//! | scalar | none |
//! | list | `FORCE_SYNC \| FORCE_MAIN_THREAD` |
//! | map, set | `FORCE_SYNC` |

use std::any::Any;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use courier_core::{Arg, Channel, ChannelFlags};
use rustc_hash::FxHashMap;

use crate::list::ObservableList;
use crate::map::ObservableMap;
use crate::set::ObservableSet;
use crate::source::ObservableSource;

/// Channel kind of observable fields.
pub const FIELD_KIND: &str = "field";

/// A value that can live in an observable field.
///
/// Implemented for every `PartialEq + Debug` type that is `Send + Sync`.
pub trait FieldValue: Any + Send + Sync + fmt::Debug {
    /// Value equality against a field value of any type. Different types are
    /// never equal.
    fn value_eq(&self, other: &dyn FieldValue) -> bool;
    fn as_any(&self) -> &dyn Any;
    fn into_arg(self: Arc<Self>) -> Arg;
    fn value_type_name(&self) -> &'static str;
}

impl<T> FieldValue for T
where
    T: PartialEq + fmt::Debug + Any + Send + Sync,
{
    fn value_eq(&self, other: &dyn FieldValue) -> bool {
        other.as_any().downcast_ref::<T>() == Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_arg(self: Arc<Self>) -> Arg {
        self
    }

    fn value_type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Shared, immutable field value. Writes replace the whole `Arc`.
pub type SharedValue = Arc<dyn FieldValue>;

type FieldInit = Arc<dyn Fn(&Weak<ObservableSource>, &'static str) -> SharedValue + Send + Sync>;

/// Shape of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Scalar,
    List,
    Map,
    Set,
}

impl FieldKind {
    #[must_use]
    pub fn channel_flags(self) -> ChannelFlags {
        match self {
            Self::Scalar => ChannelFlags::empty(),
            Self::List => ChannelFlags::FORCE_SYNC | ChannelFlags::FORCE_MAIN_THREAD,
            Self::Map | Self::Set => ChannelFlags::FORCE_SYNC,
        }
    }
}

/// One declared field.
#[derive(Clone)]
pub struct FieldDecl {
    name: &'static str,
    kind: FieldKind,
    init: FieldInit,
}

impl FieldDecl {
    /// A scalar field starting at `initial`.
    #[must_use]
    pub fn scalar<V: FieldValue>(name: &'static str, initial: V) -> Self {
        let initial: SharedValue = Arc::new(initial);
        Self {
            name,
            kind: FieldKind::Scalar,
            init: Arc::new(move |_: &Weak<ObservableSource>, _: &'static str| Arc::clone(&initial)),
        }
    }

    /// An empty list field.
    #[must_use]
    pub fn list<T: Clone + Send + Sync + 'static>(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::List,
            init: Arc::new(|source: &Weak<ObservableSource>, field: &'static str| -> SharedValue {
                Arc::new(ObservableList::<T>::attached(source, field))
            }),
        }
    }

    /// An empty map field.
    #[must_use]
    pub fn map<K, V>(name: &'static str) -> Self
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        Self {
            name,
            kind: FieldKind::Map,
            init: Arc::new(|source: &Weak<ObservableSource>, field: &'static str| -> SharedValue {
                Arc::new(ObservableMap::<K, V>::attached(source, field))
            }),
        }
    }

    /// An empty set field.
    #[must_use]
    pub fn set<T>(name: &'static str) -> Self
    where
        T: Eq + Hash + Clone + Send + Sync + 'static,
    {
        Self {
            name,
            kind: FieldKind::Set,
            init: Arc::new(|source: &Weak<ObservableSource>, field: &'static str| -> SharedValue {
                Arc::new(ObservableSet::<T>::attached(source, field))
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn kind(&self) -> FieldKind {
        self.kind
    }
}

impl fmt::Debug for FieldDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDecl")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Field table of an observable type.
pub trait ObservableFields: Any + Send + Sync + Sized {
    fn fields() -> Vec<FieldDecl>;
}

/// A resolved field: name, kind, derived channel and slot index.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    name: &'static str,
    kind: FieldKind,
    channel: Channel,
    index: usize,
}

impl FieldDescriptor {
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    #[must_use]
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Per-type field metadata.
pub struct FieldTable {
    type_name: &'static str,
    fields: Vec<FieldDescriptor>,
    inits: Vec<FieldInit>,
    by_name: FxHashMap<&'static str, usize>,
}

impl FieldTable {
    /// Resolve the declarations of `T`. A repeated name keeps the first
    /// declaration and logs a warning.
    #[must_use]
    pub fn build<T: ObservableFields>() -> Self {
        let type_name = std::any::type_name::<T>();
        let mut table = Self {
            type_name,
            fields: Vec::new(),
            inits: Vec::new(),
            by_name: FxHashMap::default(),
        };
        for decl in T::fields() {
            if table.by_name.contains_key(decl.name) {
                tracing::warn!(
                    source_type = type_name,
                    field = decl.name,
                    "duplicate observable field; keeping the first declaration"
                );
                continue;
            }
            let index = table.fields.len();
            table.by_name.insert(decl.name, index);
            table.fields.push(FieldDescriptor {
                name: decl.name,
                kind: decl.kind,
                channel: Channel::with_kind(FIELD_KIND, decl.name, decl.kind.channel_flags()),
                index,
            });
            table.inits.push(decl.init);
        }
        tracing::debug!(source_type = type_name, fields = table.fields.len(), "built field table");
        table
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }

    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Initial values for a new instance, index-aligned with the fields.
    pub(crate) fn initial_values(&self, source: &Weak<ObservableSource>) -> Vec<SharedValue> {
        self.fields
            .iter()
            .zip(&self.inits)
            .map(|(field, init)| init(source, field.name))
            .collect()
    }
}

impl fmt::Debug for FieldTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldTable")
            .field("type_name", &self.type_name)
            .field("fields", &self.fields)
            .finish()
    }
}
