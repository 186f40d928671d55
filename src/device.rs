//! Raw input devices
//!
//! [`DeviceOpener`] and [`DeviceHandle`] are the seam between the listeners
//! and the kernel. The real implementation reads `/dev/input/event*` nodes
//! through the `evdev` crate.
//!
//! A blocking read cannot be cancelled directly. Instead each handle hands
//! out a [`Closer`] that another thread may call while a read is in flight;
//! the read then fails with [`ReadError::Closed`]. This is a deliberate race
//! to close the device, not a clean cancellation API.

use std::collections::VecDeque;
use std::fs;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use evdev::{AbsoluteAxisType, Device, EventType, Key, RelativeAxisType, SwitchType};
use thiserror::Error;

/// `EV_KEY` from linux/input-event-codes.h
pub const EV_KEY: u16 = 0x01;

/// `EVIOCREVOKE`: `_IOW('E', 0x91, int)`
const EVIOCREVOKE: u64 = 0x4004_4591;

/// One event as read from the kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub type_: u16,
    pub code: u16,
    pub value: i32,
}

impl RawEvent {
    pub fn new(type_: u16, code: u16, value: i32) -> Self {
        Self { type_, code, value }
    }

    pub fn is(&self, type_: u16, code: u16) -> bool {
        self.type_ == type_ && self.code == code
    }
}

/// Identity of an opened device, for logging
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub bus: u16,
    pub vendor: u16,
    pub product: u16,
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("device handle closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Closes a device from outside the thread reading it
pub trait Closer: Send + Sync {
    fn close(&self) -> io::Result<()>;
}

/// An opened input device
pub trait DeviceHandle: Send {
    fn info(&self) -> &DeviceInfo;

    /// Whether the device can produce events with this type and code.
    fn has_event_code(&self, type_: u16, code: u16) -> bool;

    /// Block until the next event arrives or the handle fails.
    fn next_event(&mut self) -> Result<RawEvent, ReadError>;

    fn closer(&self) -> Arc<dyn Closer>;
}

pub trait DeviceOpener: Send + Sync {
    fn open(&self, path: &str) -> io::Result<Box<dyn DeviceHandle>>;
}

/// Whether a failed open may succeed later, e.g. the device is not plugged
/// in yet. Any other failure means the device is ignored.
pub fn is_retryable_open(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::NotFound {
        return true;
    }
    matches!(
        err.raw_os_error(),
        Some(libc::ENOENT | libc::EAGAIN | libc::EBUSY | libc::ENODEV | libc::ENXIO | libc::EINTR)
    )
}

/// Whether a read failure means the device went away.
pub fn is_disappeared(err: &io::Error) -> bool {
    matches!(
        err.raw_os_error(),
        Some(libc::ENODEV | libc::ENXIO | libc::EIO | libc::ENOENT)
    )
}

pub fn is_permission_denied(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::PermissionDenied
}

/// List the `event*` nodes in an input directory, sorted by name.
pub fn scan_input_dir(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with("event") {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}

/// Opens devices through the `evdev` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct EvdevOpener;

impl DeviceOpener for EvdevOpener {
    fn open(&self, path: &str) -> io::Result<Box<dyn DeviceHandle>> {
        Ok(Box::new(EvdevDevice::open(path)?))
    }
}

#[derive(Debug, Default)]
struct RevokeState {
    revoked: bool,
    dropped: bool,
}

/// Revokes the descriptor so a blocked reader wakes up with `ENODEV`.
///
/// The state lock is held across the ioctl and across the drop of the
/// device, so the descriptor is never revoked after it has been closed and
/// possibly reused.
#[derive(Debug)]
struct Revoker {
    fd: RawFd,
    state: Mutex<RevokeState>,
}

impl Revoker {
    fn is_revoked(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .revoked
    }
}

impl Closer for Revoker {
    fn close(&self) -> io::Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.revoked || state.dropped {
            return Ok(());
        }

        // SAFETY: fd stays open while `dropped` is false and we hold the lock.
        let rc = unsafe { libc::ioctl(self.fd, EVIOCREVOKE as _, 0 as libc::c_int) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        state.revoked = true;
        Ok(())
    }
}

/// A kernel input device
pub struct EvdevDevice {
    device: Device,
    info: DeviceInfo,
    pending: VecDeque<RawEvent>,
    revoker: Arc<Revoker>,
}

impl EvdevDevice {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let device = Device::open(path)?;
        let id = device.input_id();
        let info = DeviceInfo {
            name: device.name().unwrap_or("unknown").to_string(),
            bus: id.bus_type().0,
            vendor: id.vendor(),
            product: id.product(),
        };
        let revoker = Arc::new(Revoker {
            fd: device.as_raw_fd(),
            state: Mutex::new(RevokeState::default()),
        });

        Ok(Self {
            device,
            info,
            pending: VecDeque::new(),
            revoker,
        })
    }
}

impl DeviceHandle for EvdevDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn has_event_code(&self, type_: u16, code: u16) -> bool {
        let type_ = EventType(type_);
        if type_ == EventType::KEY {
            self.device
                .supported_keys()
                .is_some_and(|keys| keys.contains(Key::new(code)))
        } else if type_ == EventType::RELATIVE {
            self.device
                .supported_relative_axes()
                .is_some_and(|axes| axes.contains(RelativeAxisType(code)))
        } else if type_ == EventType::ABSOLUTE {
            self.device
                .supported_absolute_axes()
                .is_some_and(|axes| axes.contains(AbsoluteAxisType(code)))
        } else if type_ == EventType::SWITCH {
            self.device
                .supported_switches()
                .is_some_and(|switches| switches.contains(SwitchType(code)))
        } else {
            false
        }
    }

    fn next_event(&mut self) -> Result<RawEvent, ReadError> {
        loop {
            if let Some(ev) = self.pending.pop_front() {
                return Ok(ev);
            }
            if self.revoker.is_revoked() {
                return Err(ReadError::Closed);
            }

            match self.device.fetch_events() {
                Ok(events) => self.pending.extend(
                    events.map(|ev| RawEvent::new(ev.event_type().0, ev.code(), ev.value())),
                ),
                Err(_) if self.revoker.is_revoked() => return Err(ReadError::Closed),
                Err(err) => return Err(ReadError::Io(err)),
            }
        }
    }

    fn closer(&self) -> Arc<dyn Closer> {
        self.revoker.clone()
    }
}

impl Drop for EvdevDevice {
    fn drop(&mut self) {
        // The descriptor itself is closed when `device` drops after this.
        self.revoker
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .dropped = true;
    }
}
