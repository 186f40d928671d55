//! Per-device input listening
//!
//! Each configured device gets a [`Listener`] running on its own thread. A
//! listener opens the device, filters its events down to the watched key and
//! forwards presses and releases to the dispatcher. Devices that vanish are
//! reopened after the configured retry delay.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use tracing::{debug, info, info_span, warn};

use crate::device::{self, DeviceHandle, DeviceOpener, ReadError, EV_KEY};
use crate::event::{Event, EventKind};
use crate::shutdown::Shutdown;
use crate::{PttError, Result};

/// Source of retry delays
pub trait Timer: Send + Sync {
    /// A channel that yields once `delay` has passed.
    fn after(&self, delay: Duration) -> Receiver<Instant>;
}

/// Wall-clock timer
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimer;

impl Timer for SystemTimer {
    fn after(&self, delay: Duration) -> Receiver<Instant> {
        crossbeam_channel::after(delay)
    }
}

/// How one listen session ended, when it did not fail outright
#[derive(Debug)]
enum Session {
    /// Stop listening to this device without an error.
    Finished,
    /// The device is unusable for now and may come back.
    Retry(PttError),
}

/// Watches one device for the configured key
pub struct Listener {
    device: String,
    key_code: u16,
    retry: Duration,
    events: Sender<Event>,
    opener: Arc<dyn DeviceOpener>,
    timer: Arc<dyn Timer>,
}

impl Listener {
    /// Create a listener for `device`. A zero `retry` disables reopening.
    pub fn new(
        device: impl Into<String>,
        key_code: u16,
        retry: Duration,
        events: Sender<Event>,
        opener: Arc<dyn DeviceOpener>,
    ) -> Self {
        Self {
            device: device.into(),
            key_code,
            retry,
            events,
            opener,
            timer: Arc::new(SystemTimer),
        }
    }

    /// Use a different timer for retry delays
    pub fn with_timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = timer;
        self
    }

    /// Run the listener, log how it ended and tell the dispatcher it is done.
    pub fn serve(&self, shutdown: &Shutdown) {
        let span = info_span!("listener", device = %self.device);
        let _entered = span.enter();

        match self.run(shutdown) {
            Ok(()) => info!("listener finished"),
            Err(err) if err.is_cancelled() => debug!("listener cancelled"),
            Err(err) => warn!(error = %err, "listener stopped"),
        }

        select! {
            send(self.events, Event::done(self.device.as_str())) -> _ => {},
            recv(shutdown.done()) -> _ => {},
        }
    }

    /// Listen until cancelled or until the device is permanently unusable.
    pub fn run(&self, shutdown: &Shutdown) -> Result<()> {
        loop {
            let err = match self.listen(shutdown)? {
                Session::Finished => return Ok(()),
                Session::Retry(err) => err,
            };
            if self.retry.is_zero() {
                return Err(err);
            }

            info!(error = %err, delay = ?self.retry, "waiting before retrying");
            select! {
                recv(shutdown.done()) -> _ => return Err(shutdown.err()),
                recv(self.timer.after(self.retry)) -> _ => {},
            }
        }
    }

    fn listen(&self, shutdown: &Shutdown) -> Result<Session> {
        let mut handle = match self.opener.open(&self.device) {
            Ok(handle) => handle,
            Err(err) if device::is_retryable_open(&err) => {
                return Ok(Session::Retry(PttError::Open {
                    path: self.device.clone(),
                    source: err,
                }));
            }
            Err(err) => {
                if device::is_permission_denied(&err) {
                    warn!("permission denied, add your user to the 'input' group");
                }
                warn!(error = %err, "ignoring device, open failed");
                return Ok(Session::Finished);
            }
        };

        let closer = handle.closer();
        let (stop, stopped) = bounded::<()>(0);

        thread::scope(|s| {
            s.spawn(|| {
                select! {
                    recv(shutdown.done()) -> _ => {
                        if let Err(err) = closer.close() {
                            debug!(error = %err, "close device");
                        }
                    },
                    recv(stopped) -> _ => {},
                }
            });

            let result = self.read_events(shutdown, &mut *handle);
            drop(stop);
            result
        })
    }

    fn read_events(&self, shutdown: &Shutdown, handle: &mut dyn DeviceHandle) -> Result<Session> {
        let info = handle.info();
        info!(
            name = %info.name,
            bus = format_args!("{:#x}", info.bus),
            vendor = format_args!("{:#x}", info.vendor),
            product = format_args!("{:#x}", info.product),
            "initialized device"
        );

        if !handle.has_event_code(EV_KEY, self.key_code) {
            info!(
                key = self.key_code,
                "ignoring device, incapable of sending requested key code"
            );
            return Ok(Session::Finished);
        }

        loop {
            let ev = match handle.next_event() {
                Ok(ev) => ev,
                Err(_) if shutdown.is_cancelled() => return Err(shutdown.err()),
                Err(ReadError::Closed) => {
                    warn!("device closed while reading");
                    return Ok(Session::Finished);
                }
                Err(ReadError::Io(err)) if device::is_disappeared(&err) => {
                    warn!(error = %err, "device disappeared while reading");
                    return Ok(Session::Retry(PttError::Read {
                        path: self.device.clone(),
                        source: err,
                    }));
                }
                Err(ReadError::Io(err)) => {
                    warn!(error = %err, "read event");
                    continue;
                }
            };

            if !ev.is(EV_KEY, self.key_code) {
                continue;
            }
            let Some(kind) = EventKind::from_value(ev.value) else {
                continue;
            };

            self.emit(shutdown, kind)?;
        }
    }

    fn emit(&self, shutdown: &Shutdown, kind: EventKind) -> Result<()> {
        select! {
            send(self.events, Event::new(kind, self.device.as_str())) -> res => {
                res.map_err(|_| shutdown.err())
            },
            recv(shutdown.done()) -> _ => Err(shutdown.err()),
        }
    }
}

/// Every configured listener, run together
pub struct ListenerGroup {
    listeners: Vec<Listener>,
}

impl ListenerGroup {
    pub fn new(listeners: Vec<Listener>) -> Self {
        Self { listeners }
    }

    /// Run all listeners and wait for them.
    ///
    /// Returns once every listener has stopped. If that happened without
    /// cancellation there are no devices left, which is an error.
    pub fn run(self, shutdown: &Shutdown) -> Result<()> {
        info!(count = self.listeners.len(), "starting listeners");

        thread::scope(|s| {
            for listener in &self.listeners {
                s.spawn(move || listener.serve(shutdown));
            }
        });

        if shutdown.is_cancelled() {
            return Err(shutdown.err());
        }
        Err(PttError::NoDevices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::create_event_channel;
    use crate::testing::{FakeDevice, FakeOpener, FakeTimer, Feed, TIMEOUT};
    use std::io;

    const KEY: u16 = 51;

    fn key(value: i32) -> Feed {
        Feed::Event(device::RawEvent::new(EV_KEY, KEY, value))
    }

    fn listener(opener: &Arc<FakeOpener>, retry: Duration, events: Sender<Event>) -> Listener {
        let opener: Arc<dyn DeviceOpener> = opener.clone();
        Listener::new("/dev/input/event7", KEY, retry, events, opener)
    }

    #[test]
    fn incapable_device_is_ignored() {
        let opener = Arc::new(FakeOpener::new());
        opener.push_device("/dev/input/event7", FakeDevice::new().with_feed(vec![key(1)]));
        let (tx, rx) = create_event_channel();

        let result = listener(&opener, Duration::ZERO, tx).run(&Shutdown::new());

        assert!(result.is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn translates_press_release_and_skips_repeat() {
        let opener = Arc::new(FakeOpener::new());
        opener.push_device(
            "/dev/input/event7",
            FakeDevice::new().with_key(KEY).with_feed(vec![
                key(1),
                key(2),
                key(2),
                Feed::Event(device::RawEvent::new(EV_KEY, KEY + 1, 1)),
                Feed::Event(device::RawEvent::new(0x04, KEY, 1)),
                key(0),
            ]),
        );
        let (tx, rx) = create_event_channel();
        let shutdown = Shutdown::new();
        let lis = listener(&opener, Duration::ZERO, tx);

        let handle = {
            let shutdown = shutdown.clone();
            thread::spawn(move || lis.run(&shutdown))
        };

        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap().kind, EventKind::Down);
        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap().kind, EventKind::Up);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        shutdown.cancel("test over");
        assert!(handle.join().unwrap().unwrap_err().is_cancelled());
    }

    #[test]
    fn retryable_error_without_retry_is_returned() {
        let opener = Arc::new(FakeOpener::new());
        opener.push_error("/dev/input/event7", io::ErrorKind::NotFound.into());
        let (tx, _rx) = create_event_channel();

        let err = listener(&opener, Duration::ZERO, tx)
            .run(&Shutdown::new())
            .unwrap_err();

        assert!(matches!(err, PttError::Open { .. }));
        assert_eq!(opener.opens("/dev/input/event7"), 1);
    }

    #[test]
    fn permission_denied_is_ignored() {
        let opener = Arc::new(FakeOpener::new());
        opener.push_error("/dev/input/event7", io::ErrorKind::PermissionDenied.into());
        let (tx, _rx) = create_event_channel();

        let result = listener(&opener, Duration::from_secs(1), tx).run(&Shutdown::new());

        assert!(result.is_ok());
        assert_eq!(opener.opens("/dev/input/event7"), 1);
    }

    #[test]
    fn retries_only_after_the_delay() {
        let opener = Arc::new(FakeOpener::new());
        opener.push_error("/dev/input/event7", io::ErrorKind::NotFound.into());
        opener.push_device(
            "/dev/input/event7",
            FakeDevice::new().with_key(KEY).with_feed(vec![key(1)]),
        );
        let timer = Arc::new(FakeTimer::new());
        let (tx, rx) = create_event_channel();
        let shutdown = Shutdown::new();
        let lis = listener(&opener, Duration::from_secs(3), tx).with_timer(timer.clone());

        let handle = {
            let shutdown = shutdown.clone();
            thread::spawn(move || lis.run(&shutdown))
        };

        assert!(timer.wait_pending(1, TIMEOUT));
        assert_eq!(timer.delays(), vec![Duration::from_secs(3)]);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(opener.opens("/dev/input/event7"), 1);

        timer.fire();
        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap().kind, EventKind::Down);
        assert_eq!(opener.opens("/dev/input/event7"), 2);

        shutdown.cancel("test over");
        assert!(handle.join().unwrap().unwrap_err().is_cancelled());
    }

    #[test]
    fn disappearing_device_is_retried() {
        let opener = Arc::new(FakeOpener::new());
        opener.push_device(
            "/dev/input/event7",
            FakeDevice::new()
                .with_key(KEY)
                .with_feed(vec![key(1), Feed::Error(libc::ENODEV)]),
        );
        opener.push_device(
            "/dev/input/event7",
            FakeDevice::new().with_key(KEY).with_feed(vec![key(0)]),
        );
        let timer = Arc::new(FakeTimer::new());
        let (tx, rx) = create_event_channel();
        let shutdown = Shutdown::new();
        let lis = listener(&opener, Duration::from_millis(250), tx).with_timer(timer.clone());

        let handle = {
            let shutdown = shutdown.clone();
            thread::spawn(move || lis.run(&shutdown))
        };

        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap().kind, EventKind::Down);
        assert!(timer.wait_pending(1, TIMEOUT));
        timer.fire();
        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap().kind, EventKind::Up);

        shutdown.cancel("test over");
        assert!(handle.join().unwrap().unwrap_err().is_cancelled());
    }

    #[test]
    fn soft_read_errors_keep_reading() {
        let opener = Arc::new(FakeOpener::new());
        opener.push_device(
            "/dev/input/event7",
            FakeDevice::new()
                .with_key(KEY)
                .with_feed(vec![Feed::Error(libc::EINTR), key(1)]),
        );
        let (tx, rx) = create_event_channel();
        let shutdown = Shutdown::new();
        let lis = listener(&opener, Duration::ZERO, tx);

        let handle = {
            let shutdown = shutdown.clone();
            thread::spawn(move || lis.run(&shutdown))
        };

        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap().kind, EventKind::Down);
        shutdown.cancel("test over");
        assert!(handle.join().unwrap().unwrap_err().is_cancelled());
        assert_eq!(opener.opens("/dev/input/event7"), 1);
    }

    #[test]
    fn cancellation_unblocks_a_pending_read() {
        let opener = Arc::new(FakeOpener::new());
        let device = FakeDevice::new().with_key(KEY);
        let closed = device.closed_flag();
        opener.push_device("/dev/input/event7", device);
        let (tx, _rx) = create_event_channel();
        let shutdown = Shutdown::new();
        let lis = listener(&opener, Duration::ZERO, tx);

        let (finished_tx, finished) = bounded(1);
        {
            let shutdown = shutdown.clone();
            thread::spawn(move || finished_tx.send(lis.run(&shutdown)));
        }

        assert!(opener.wait_opens("/dev/input/event7", 1, TIMEOUT));
        shutdown.cancel("interrupted");

        let result = finished.recv_timeout(TIMEOUT).unwrap();
        assert!(matches!(result, Err(PttError::Cancelled(cause)) if cause == "interrupted"));
        assert!(closed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn cancellation_interrupts_the_retry_wait() {
        let opener = Arc::new(FakeOpener::new());
        opener.push_error("/dev/input/event7", io::ErrorKind::NotFound.into());
        let timer = Arc::new(FakeTimer::new());
        let (tx, _rx) = create_event_channel();
        let shutdown = Shutdown::new();
        let lis = listener(&opener, Duration::from_secs(60), tx).with_timer(timer.clone());

        let handle = {
            let shutdown = shutdown.clone();
            thread::spawn(move || lis.run(&shutdown))
        };

        assert!(timer.wait_pending(1, TIMEOUT));
        shutdown.cancel("interrupted");
        assert!(handle.join().unwrap().unwrap_err().is_cancelled());
        assert_eq!(opener.opens("/dev/input/event7"), 1);
    }

    #[test]
    fn serve_signals_done_after_finishing() {
        let opener = Arc::new(FakeOpener::new());
        opener.push_error("/dev/input/event7", io::ErrorKind::PermissionDenied.into());
        let (tx, rx) = create_event_channel();
        let lis = listener(&opener, Duration::ZERO, tx);

        let handle = thread::spawn(move || lis.serve(&Shutdown::new()));

        let ev = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(ev, Event::done("/dev/input/event7"));
        handle.join().unwrap();
    }

    #[test]
    fn empty_group_reports_no_devices() {
        let err = ListenerGroup::new(Vec::new())
            .run(&Shutdown::new())
            .unwrap_err();
        assert!(matches!(err, PttError::NoDevices));
    }

    #[test]
    fn cancelled_group_reports_cancellation() {
        let opener = Arc::new(FakeOpener::new());
        opener.push_device("/dev/input/event7", FakeDevice::new().with_key(KEY));
        let (tx, _rx) = create_event_channel();
        let shutdown = Shutdown::new();
        let group = ListenerGroup::new(vec![listener(&opener, Duration::ZERO, tx)]);

        let handle = {
            let shutdown = shutdown.clone();
            thread::spawn(move || group.run(&shutdown))
        };

        assert!(opener.wait_opens("/dev/input/event7", 1, TIMEOUT));
        shutdown.cancel("interrupted");
        assert!(handle.join().unwrap().unwrap_err().is_cancelled());
    }
}
