#![forbid(unsafe_code)]

//! Core: in-process publish/subscribe dispatch.
//!
//! # Role in courier
//! `courier-core` is the dispatch primitive. Producers build an [`Intent`] on
//! a [`Channel`] and hand it to a [`Dispatcher`], which fans it out to the
//! channel's [`SubscriberSet`] in priority order. `courier-observe` builds its
//! observable fields and collections on top of the same dispatcher.
//!
//! # Primary responsibilities
//! - **Dispatcher**: channel table, bind/unbind, notify, trim of empty channels.
//! - **SubscriberSet**: priority ordering, sticky replay, done short-circuit,
//!   opportunistic sweep of dead owners.
//! - **Subscriber**: weakly-owned handler, inline or posted to a [`Scheduler`],
//!   panic containment per [`FailurePolicy`].
//! - **Registry**: per-type binding tables ([`Bindings`]), interned channels
//!   and named schedulers.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use courier_core::{Channel, Dispatcher, Intent, Subscriber};
//!
//! struct Screen;
//!
//! let dispatcher = Dispatcher::new();
//! let channel = Channel::sticky("net.state");
//! dispatcher.notify(Intent::new(channel.clone()).with_keyed("online", true));
//!
//! let screen = Arc::new(Screen);
//! dispatcher.add_binding(
//!     &channel,
//!     Subscriber::new(&screen, "on_net", |_: &Screen, intent: &Intent| {
//!         assert_eq!(intent.get::<bool>("online"), Some(&true));
//!     }),
//! );
//! ```

pub mod bundle;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod intent;
pub mod metadata;
pub mod scheduler;
pub mod subscriber;
pub mod subscriber_set;

#[cfg(feature = "logging")]
pub mod logging;

pub use bundle::{Arg, Bundle};
pub use channel::{Channel, ChannelFlags};
pub use config::{ConfigError, DEFAULT_SWEEP_THRESHOLD, DispatchConfig, FailurePolicy};
pub use dispatcher::Dispatcher;
pub use error::{DispatchError, panic_message};
pub use intent::{Intent, IntentFlags, Sender};
pub use metadata::{BindingDecl, Bindings, Registry, TypeCache};
pub use scheduler::{InlineScheduler, Scheduler, SchedulerId, Task};
pub use subscriber::{Handler, HandlerId, Subscriber};
pub use subscriber_set::{BindReplay, SubscriberSet};
