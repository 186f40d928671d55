//! Wiring of listeners and dispatcher into one run

use std::sync::Arc;

use tracing::info;

use crate::device::DeviceOpener;
use crate::dispatcher;
use crate::event::create_event_channel;
use crate::input_listener::{Listener, ListenerGroup, Timer};
use crate::input_simulator::{ActionSender, Symbol};
use crate::shutdown::{Shutdown, TaskGroup};
use crate::{Config, Result};

/// Listen to every device in `config` and send actions until cancelled.
///
/// Returns `Ok` only when the run was cancelled. Running out of devices or
/// failing to build the action sender is an error.
pub fn run<F, S>(
    shutdown: &Shutdown,
    config: &Config,
    opener: Arc<dyn DeviceOpener>,
    timer: Arc<dyn Timer>,
    connect: F,
) -> Result<()>
where
    F: FnOnce(&Symbol) -> Result<S> + Send + 'static,
    S: ActionSender,
{
    info!(
        key = config.key,
        sym = %config.sym,
        retry = ?config.retry,
        devices = config.devices.len(),
        "starting"
    );

    let (events_tx, events) = create_event_channel();
    let listeners: Vec<Listener> = config
        .devices
        .iter()
        .map(|device| {
            Listener::new(
                device.as_str(),
                config.key,
                config.retry,
                events_tx.clone(),
                Arc::clone(&opener),
            )
            .with_timer(Arc::clone(&timer))
        })
        .collect();
    drop(events_tx);

    let symbol = config.sym.clone();
    let count = listeners.len();

    let mut group = TaskGroup::new(shutdown.clone());
    group.spawn("listeners", move |shutdown| {
        ListenerGroup::new(listeners).run(shutdown)
    })?;
    let spawned = group.spawn("dispatcher", move |shutdown| {
        dispatcher::handle(shutdown, connect, &symbol, count, &events)
    });
    if let Err(err) = spawned {
        return Err(group.abort(err));
    }

    match group.wait() {
        Err(err) if err.is_cancelled() => Ok(()),
        result => result,
    }
}
