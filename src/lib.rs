//! ptt-fix - push-to-talk from any input device button
//!
//! This library provides components for:
//! - Listening to raw kernel input devices (one thread per device, with retry)
//! - Aggregating their presses into ordered up/down events
//! - Input simulation (sending synthetic keys or mouse buttons via XTest)

pub mod app;
pub mod cli;
pub mod config;
pub mod device;
pub mod dispatcher;
pub mod event;
pub mod input_listener;
pub mod input_simulator;
pub mod keysym;
pub mod logging;
pub mod shutdown;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use event::{create_event_channel, Event, EventKind};
pub use input_listener::{Listener, ListenerGroup};
pub use input_simulator::{ActionSender, Symbol, XTestSender};
pub use shutdown::{Shutdown, TaskGroup};

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Main error type for ptt-fix
#[derive(Error, Debug)]
pub enum PttError {
    #[error("open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to initialize input simulation: {0}")]
    Sender(String),

    #[error("invalid symbol {symbol:?}: {reason}")]
    InvalidSymbol { symbol: String, reason: String },

    #[error("invalid event: {0:?}")]
    InvalidEvent(EventKind),

    #[error("all devices unavailable")]
    AllDevicesUnavailable,

    #[error("no input devices available")]
    NoDevices,

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("config line {line}: {message}")]
    Config { line: usize, message: String },

    #[error("{}: {source}", .path.display())]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0}")]
    Usage(String),

    #[error("failed to set signal handler: {0}")]
    Signal(#[from] ctrlc::Error),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("{0} thread panicked")]
    Panicked(String),
}

impl PttError {
    /// Whether this error only reports that the run was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PttError::Cancelled(_))
    }

    /// Whether this error means no device is left to listen to.
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, PttError::AllDevicesUnavailable | PttError::NoDevices)
    }
}

pub type Result<T, E = PttError> = std::result::Result<T, E>;
