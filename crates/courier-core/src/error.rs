#![forbid(unsafe_code)]

//! Dispatch failure taxonomy.
//!
//! None of these are returned from [`Dispatcher::notify`](crate::Dispatcher::notify):
//! failures local to one subscriber never abort a pass. They are logged, and
//! under [`FailurePolicy::Strict`](crate::FailurePolicy::Strict) the rendered
//! message becomes the panic payload.

use std::any::Any;
use std::fmt;

use crate::channel::Channel;
use crate::subscriber::HandlerId;

/// Why a dispatch-side operation did not go as planned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// An equal subscriber was already bound to the channel.
    DuplicateBinding { channel: Channel, handler: HandlerId },
    /// The subscriber's owner has been dropped.
    OwnerUnreachable { channel: Channel, handler: HandlerId },
    /// The handler panicked.
    HandlerPanicked {
        channel: Channel,
        handler: HandlerId,
        message: String,
    },
    /// A subscriber set grew past its sweep threshold.
    CapacityExceeded {
        channel: Channel,
        size: usize,
        threshold: usize,
    },
    /// A forced-sync or forced-main-thread channel was delivered the wrong way.
    ThreadDiscipline {
        channel: Channel,
        handler: HandlerId,
        rule: &'static str,
    },
    /// The scheduling backend refused the task.
    Rejected {
        channel: Channel,
        handler: HandlerId,
        scheduler: String,
    },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateBinding { channel, handler } => {
                write!(f, "{handler} is already bound to {channel}")
            }
            Self::OwnerUnreachable { channel, handler } => {
                write!(f, "owner of {handler} on {channel} has been dropped")
            }
            Self::HandlerPanicked {
                channel,
                handler,
                message,
            } => write!(f, "{handler} panicked on {channel}: {message}"),
            Self::CapacityExceeded {
                channel,
                size,
                threshold,
            } => write!(
                f,
                "{channel} has {size} subscribers (threshold {threshold}); sweeping dead owners"
            ),
            Self::ThreadDiscipline {
                channel,
                handler,
                rule,
            } => write!(f, "{handler} on {channel} violates {rule}"),
            Self::Rejected {
                channel,
                handler,
                scheduler,
            } => write!(f, "{scheduler} rejected {handler} on {channel}"),
        }
    }
}

impl std::error::Error for DispatchError {}

/// Render a panic payload as text.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
