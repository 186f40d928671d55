//! The single consumer of listener events

use crossbeam_channel::{select, Receiver};
use tracing::{debug, info};

use crate::event::{Event, EventKind};
use crate::input_simulator::{ActionSender, Symbol};
use crate::shutdown::Shutdown;
use crate::{PttError, Result};

/// Turn listener events into actions until cancelled or out of devices.
///
/// `connect` builds the action sender for `symbol`; its failure is returned
/// immediately. `devices` is the number of listeners that will each send one
/// [`EventKind::Done`]. Never returns `Ok`.
pub fn handle<F, S>(
    shutdown: &Shutdown,
    connect: F,
    symbol: &Symbol,
    devices: usize,
    events: &Receiver<Event>,
) -> Result<()>
where
    F: FnOnce(&Symbol) -> Result<S>,
    S: ActionSender,
{
    let mut sender = connect(symbol)?;
    let mut remaining = devices;

    loop {
        let event = select! {
            recv(shutdown.done()) -> _ => return Err(shutdown.err()),
            recv(events) -> event => match event {
                Ok(event) => event,
                // Every listener has dropped its end of the channel.
                Err(_) => return Err(PttError::AllDevicesUnavailable),
            },
        };

        match event.kind {
            EventKind::Down => {
                sender.down();
                debug!(device = %event.device, "activated");
            }
            EventKind::Up => {
                sender.up();
                debug!(device = %event.device, "deactivated");
            }
            EventKind::Done => {
                remaining = remaining.saturating_sub(1);
                info!(device = %event.device, remaining, "device unavailable");
                if remaining == 0 {
                    return Err(PttError::AllDevicesUnavailable);
                }
            }
            EventKind::Invalid => return Err(PttError::InvalidEvent(event.kind)),
        }
    }
}
