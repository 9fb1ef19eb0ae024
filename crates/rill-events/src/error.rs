//! Error types for containers and the bus.

use std::error::Error;
use std::fmt;

use rill_core::{ContainerId, StreamId, SubscriberId, TickId};
use rill_stream::StreamError;

use crate::bus::BusKey;

/// Errors from [`EventContainer`](crate::EventContainer) and
/// [`EventBus`](crate::EventBus) operations.
///
/// Apart from `InvalidConfig` and a wrapped
/// [`StreamError::InvalidConfig`], every variant indicates a caller bug.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventError {
    /// An operation on an underlying stream failed.
    Stream(StreamError),
    /// A container configuration failed validation.
    InvalidConfig {
        /// Human-readable description of the problem.
        reason: String,
    },
    /// A producer session was handed to a container that did not create it.
    ForeignSession {
        /// Container that created the session.
        session: ContainerId,
        /// Container it was handed to.
        container: ContainerId,
    },
    /// A producer session outlived the tick that could still accept it.
    StaleSession {
        /// Tick the session was opened in.
        opened: TickId,
        /// The container's current tick.
        current: TickId,
    },
    /// A non-deferred producer completed after readers were handed out,
    /// so consumers were not scheduled after it.
    ProducerAfterSnapshot {
        /// The producer's stream.
        stream: StreamId,
    },
    /// Readers or end of tick requested while producers are still open.
    ProducersStillOpen {
        /// Open producer sessions.
        open: usize,
    },
    /// A consumer token was added while the container was not in read mode.
    NotInReadMode {
        /// The container's tick.
        tick: TickId,
    },
    /// The subscriber is not registered under the bus key.
    NotSubscribed {
        /// The bus scope.
        key: BusKey,
        /// The unknown subscriber.
        subscriber: SubscriberId,
    },
    /// The subscriber released a stream it does not hold.
    NotHolder {
        /// The bus scope.
        key: BusKey,
        /// The releasing subscriber.
        subscriber: SubscriberId,
        /// The stream.
        stream: StreamId,
    },
    /// A stream was published while an earlier publication is still held.
    AlreadyShared {
        /// The bus scope.
        key: BusKey,
        /// The stream.
        stream: StreamId,
    },
    /// The container is already attached to a bus.
    BusAlreadyAttached {
        /// Key of the existing attachment.
        key: BusKey,
    },
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream(e) => write!(f, "stream error: {e}"),
            Self::InvalidConfig { reason } => write!(f, "invalid container config: {reason}"),
            Self::ForeignSession { session, container } => {
                write!(f, "producer session from {session} handed to {container}")
            }
            Self::StaleSession { opened, current } => {
                write!(f, "producer session from tick {opened} completed at tick {current}")
            }
            Self::ProducerAfterSnapshot { stream } => {
                write!(f, "producer for {stream} completed after readers were handed out")
            }
            Self::ProducersStillOpen { open } => {
                write!(f, "{open} producer sessions still open")
            }
            Self::NotInReadMode { tick } => {
                write!(f, "consumer token added outside read mode at tick {tick}")
            }
            Self::NotSubscribed { key, subscriber } => {
                write!(f, "subscriber {subscriber} is not subscribed to bus key '{key}'")
            }
            Self::NotHolder {
                key,
                subscriber,
                stream,
            } => {
                write!(f, "subscriber {subscriber} does not hold {stream} on bus key '{key}'")
            }
            Self::AlreadyShared { key, stream } => {
                write!(f, "{stream} is already shared on bus key '{key}'")
            }
            Self::BusAlreadyAttached { key } => {
                write!(f, "container already attached to bus key '{key}'")
            }
        }
    }
}

impl Error for EventError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Stream(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StreamError> for EventError {
    fn from(e: StreamError) -> Self {
        Self::Stream(e)
    }
}
