#![forbid(unsafe_code)]

//! Observable state on top of `courier-core`.
//!
//! # Role in courier
//! A type declares its observable fields once ([`ObservableFields`]); each
//! instance gets an [`ObservableSource`] whose fields are dispatcher
//! channels. Writes notify only on real change, binding replays the current
//! value, and collection fields publish what changed.
//!
//! # Primary responsibilities
//! - **ObservableSource**: get/set/notify of declared fields, observer binding.
//! - **ObservableList**: structured [`ListChange`] per mutation.
//! - **ObservableMap / ObservableSet**: unqualified change per mutation.
//! - **SourceBinder**: one bound source per key, replaced on rebind.
//! - **PageList**: offset-paginated accumulation with observable cursor.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use courier_core::{BindingDecl, Intent, Registry};
//! use courier_observe::{ChangeExt, FieldDecl, ObservableFields, ObservableSource, Observer};
//!
//! struct Player;
//!
//! impl ObservableFields for Player {
//!     fn fields() -> Vec<FieldDecl> {
//!         vec![FieldDecl::scalar("score", 0_u32)]
//!     }
//! }
//!
//! #[derive(Default)]
//! struct Hud {
//!     shown: std::sync::Mutex<u32>,
//! }
//!
//! impl Observer<Player> for Hud {
//!     fn observations() -> Vec<BindingDecl<Self>> {
//!         vec![BindingDecl::new("score", "on_score", |hud: &Hud, intent: &Intent| {
//!             if let (Some(score), Ok(mut shown)) = (intent.new_value::<u32>(), hud.shown.lock()) {
//!                 *shown = *score;
//!             }
//!         })]
//!     }
//! }
//!
//! let registry = Registry::new();
//! let player = ObservableSource::new::<Player>(&registry);
//! let hud = Arc::new(Hud::default());
//! player.bind_observer::<Player, Hud>(&registry, &hud);
//!
//! player.set("score", 42_u32);
//! assert_eq!(*hud.shown.lock().unwrap(), 42);
//! ```

pub mod binder;
pub mod change;
pub mod error;
pub mod field;
pub mod list;
pub mod map;
pub mod page;
pub mod set;
pub mod source;

pub use binder::SourceBinder;
pub use change::{CHANGE, ChangeExt, ChangeKind, ChangeRange, ListChange, NEW_VALUE, OLD_VALUE};
pub use error::{CollectionError, FieldError};
pub use field::{
    FIELD_KIND, FieldDecl, FieldDescriptor, FieldKind, FieldTable, FieldValue, ObservableFields,
    SharedValue,
};
pub use list::ObservableList;
pub use map::ObservableMap;
pub use page::{PageInfo, PageList, PageOutcome, SnapshotPolicy};
pub use set::ObservableSet;
pub use source::{ObservableSource, Observer};
