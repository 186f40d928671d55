//! Events handed from the listeners to the dispatcher

use crossbeam_channel::{bounded, Receiver, Sender};

/// What happened on a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventKind {
    #[default]
    Invalid,
    /// The watched button was released
    Up,
    /// The watched button was pressed
    Down,
    /// The listener for this device has stopped for good
    Done,
}

impl EventKind {
    /// Classify a key event value. Auto-repeat (2) produces nothing.
    pub fn from_value(value: i32) -> Option<Self> {
        match value {
            2 => None,
            1 => Some(EventKind::Down),
            _ => Some(EventKind::Up),
        }
    }
}

/// Event sent by a listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    /// Configured path of the device that produced the event
    pub device: String,
}

impl Event {
    pub fn new(kind: EventKind, device: impl Into<String>) -> Self {
        Self {
            kind,
            device: device.into(),
        }
    }

    pub fn done(device: impl Into<String>) -> Self {
        Self::new(EventKind::Done, device)
    }
}

/// Create the shared event channel and return both ends.
///
/// The channel has no buffer: every send is a hand-off to the dispatcher, so
/// actions happen in the order the listeners read them.
pub fn create_event_channel() -> (Sender<Event>, Receiver<Event>) {
    bounded(0)
}
