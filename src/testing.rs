//! Fakes for devices, timers and senders used across the unit tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};

use crate::device::{Closer, DeviceHandle, DeviceInfo, DeviceOpener, RawEvent, ReadError, EV_KEY};
use crate::input_listener::Timer;
use crate::input_simulator::ActionSender;

pub const TIMEOUT: Duration = Duration::from_secs(5);

fn wait_until(timeout: Duration, mut ready: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if ready() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    ready()
}

/// What a fake device yields on its next read
#[derive(Debug, Clone, Copy)]
pub enum Feed {
    Event(RawEvent),
    Error(i32),
}

struct FakeCloser {
    closed: Arc<AtomicBool>,
    trigger: Mutex<Option<Sender<()>>>,
    done: Receiver<()>,
}

impl Closer for FakeCloser {
    fn close(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.trigger.lock().unwrap().take();
        Ok(())
    }
}

/// Device whose events come from a script. Once the script runs out, reads
/// block until the device is closed.
pub struct FakeDevice {
    info: DeviceInfo,
    caps: HashSet<(u16, u16)>,
    feed: Receiver<Feed>,
    feeder: Sender<Feed>,
    closer: Arc<FakeCloser>,
}

impl FakeDevice {
    pub fn new() -> Self {
        let (feeder, feed) = unbounded();
        let (trigger, done) = bounded(0);
        Self {
            info: DeviceInfo {
                name: "Fake Footswitch".to_string(),
                bus: 0x03,
                vendor: 0x1a86,
                product: 0xe026,
            },
            caps: HashSet::new(),
            feed,
            feeder,
            closer: Arc::new(FakeCloser {
                closed: Arc::new(AtomicBool::new(false)),
                trigger: Mutex::new(Some(trigger)),
                done,
            }),
        }
    }

    pub fn with_key(mut self, code: u16) -> Self {
        self.caps.insert((EV_KEY, code));
        self
    }

    pub fn with_feed(self, feed: Vec<Feed>) -> Self {
        for item in feed {
            self.feeder.send(item).unwrap();
        }
        self
    }

    pub fn closed_flag(&self) -> Arc<AtomicBool> {
        self.closer.closed.clone()
    }
}

impl DeviceHandle for FakeDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn has_event_code(&self, type_: u16, code: u16) -> bool {
        self.caps.contains(&(type_, code))
    }

    fn next_event(&mut self) -> Result<RawEvent, ReadError> {
        if self.closer.closed.load(Ordering::SeqCst) {
            return Err(ReadError::Closed);
        }
        select! {
            recv(self.closer.done) -> _ => Err(ReadError::Closed),
            recv(self.feed) -> feed => match feed {
                Ok(Feed::Event(ev)) => Ok(ev),
                Ok(Feed::Error(errno)) => Err(io::Error::from_raw_os_error(errno).into()),
                Err(_) => Err(io::Error::from_raw_os_error(libc::ENODEV).into()),
            },
        }
    }

    fn closer(&self) -> Arc<dyn Closer> {
        self.closer.clone()
    }
}

/// Hands out scripted open results per path. Paths without a script left
/// fail with a permission error, which makes the listener ignore them.
#[derive(Default)]
pub struct FakeOpener {
    scripts: Mutex<HashMap<String, VecDeque<io::Result<FakeDevice>>>>,
    opens: Mutex<HashMap<String, usize>>,
}

impl FakeOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_device(&self, path: &str, device: FakeDevice) {
        self.push(path, Ok(device));
    }

    pub fn push_error(&self, path: &str, err: io::Error) {
        self.push(path, Err(err));
    }

    fn push(&self, path: &str, result: io::Result<FakeDevice>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn opens(&self, path: &str) -> usize {
        self.opens.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn wait_opens(&self, path: &str, count: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.opens(path) >= count)
    }
}

impl DeviceOpener for FakeOpener {
    fn open(&self, path: &str) -> io::Result<Box<dyn DeviceHandle>> {
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(path)
            .and_then(VecDeque::pop_front);
        *self.opens.lock().unwrap().entry(path.to_string()).or_default() += 1;

        match next {
            Some(Ok(device)) => Ok(Box::new(device)),
            Some(Err(err)) => Err(err),
            None => Err(io::ErrorKind::PermissionDenied.into()),
        }
    }
}

/// Timer that only fires when told to
#[derive(Default)]
pub struct FakeTimer {
    pending: Mutex<Vec<Sender<Instant>>>,
    delays: Mutex<Vec<Duration>>,
}

impl FakeTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }

    pub fn wait_pending(&self, count: usize, timeout: Duration) -> bool {
        wait_until(timeout, || self.pending.lock().unwrap().len() >= count)
    }

    pub fn fire(&self) {
        for tx in self.pending.lock().unwrap().drain(..) {
            let _ = tx.send(Instant::now());
        }
    }
}

impl Timer for FakeTimer {
    fn after(&self, delay: Duration) -> Receiver<Instant> {
        let (tx, rx) = bounded(1);
        self.delays.lock().unwrap().push(delay);
        self.pending.lock().unwrap().push(tx);
        rx
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Down,
    Up,
}

/// Sender that reports every action on a channel
pub struct RecordingSender {
    actions: Sender<Action>,
}

impl ActionSender for RecordingSender {
    fn down(&mut self) {
        let _ = self.actions.send(Action::Down);
    }

    fn up(&mut self) {
        let _ = self.actions.send(Action::Up);
    }
}

pub fn recording_sender() -> (RecordingSender, Receiver<Action>) {
    let (actions, rx) = unbounded();
    (RecordingSender { actions }, rx)
}
