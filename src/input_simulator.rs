//! Input simulation using XTest
//!
//! Sends synthetic key and mouse button events to the X server through the
//! XTEST extension. The target symbol is resolved to keycodes once, when the
//! sender is created; sending afterwards is fire-and-forget.

use std::fmt;
use std::str::FromStr;

use tracing::{debug, info, warn};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{
    ConnectionExt as _, Keycode, Keysym, Window, BUTTON_PRESS_EVENT, BUTTON_RELEASE_EVENT,
    KEY_PRESS_EVENT, KEY_RELEASE_EVENT,
};
use x11rb::protocol::xtest::ConnectionExt as _;
use x11rb::rust_connection::RustConnection;

use crate::keysym;
use crate::{PttError, Result};

/// Something that can press and release the configured target
pub trait ActionSender {
    fn down(&mut self);
    fn up(&mut self);
}

/// What to send when the watched button changes state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Symbol {
    /// X keysym name, or several joined with `+` to form a chord.
    Key(String),
    /// X pointer button, counted from 1.
    MouseButton(u8),
}

impl Symbol {
    /// Build a symbol from a kind (`key` or `mouse`) and its value.
    pub fn parse(kind: &str, value: &str) -> Result<Self> {
        let invalid = |reason: String| PttError::InvalidSymbol {
            symbol: format!("{kind} {value}"),
            reason,
        };

        match kind {
            "key" => {
                if value.is_empty() || value.split('+').any(str::is_empty) {
                    return Err(invalid("empty key name".to_string()));
                }
                Ok(Symbol::Key(value.to_string()))
            }
            "mouse" => match value.parse::<u8>() {
                Ok(0) => Err(invalid("mouse buttons start at 1".to_string())),
                Ok(button) => Ok(Symbol::MouseButton(button)),
                Err(err) => Err(invalid(format!("parse mouse button: {err}"))),
            },
            other => Err(invalid(format!("unknown kind {other:?}"))),
        }
    }

    /// The individual key names of a key symbol.
    pub fn keys(&self) -> Vec<&str> {
        match self {
            Symbol::Key(keys) => keys.split('+').collect(),
            Symbol::MouseButton(_) => Vec::new(),
        }
    }
}

impl FromStr for Symbol {
    type Err = PttError;

    /// Accepts `key <name>`, `mouse <n>`, `mouse:<n>` or a bare key name.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(button) = s.strip_prefix("mouse:") {
            return Symbol::parse("mouse", button.trim());
        }
        match s.split_once(char::is_whitespace) {
            Some((kind, value)) => Symbol::parse(kind, value.trim()),
            None => Symbol::parse("key", s),
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Symbol::Key(keys) => write!(f, "key {keys}"),
            Symbol::MouseButton(button) => write!(f, "mouse {button}"),
        }
    }
}

#[derive(Debug)]
enum Target {
    Keys(Vec<Keycode>),
    Button(u8),
}

/// Sends the target symbol through XTest on the default display
pub struct XTestSender {
    conn: RustConnection,
    root: Window,
    target: Target,
}

impl XTestSender {
    /// Connect to the X server and resolve `symbol`.
    ///
    /// Requires a reachable `$DISPLAY` with the XTEST extension.
    pub fn connect(symbol: &Symbol) -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None)
            .map_err(|e| PttError::Sender(format!("Failed to connect to X11: {e}")))?;

        let version = conn
            .xtest_get_version(2, 2)
            .map_err(|e| PttError::Sender(format!("XTEST unavailable: {e}")))?
            .reply()
            .map_err(|e| PttError::Sender(format!("XTEST unavailable: {e}")))?;
        debug!(
            major = version.major_version,
            minor = version.minor_version,
            "XTEST extension"
        );

        let root = conn.setup().roots[screen_num].root;
        let target = match symbol {
            Symbol::Key(_) => Target::Keys(resolve_keycodes(&conn, symbol)?),
            Symbol::MouseButton(button) => Target::Button(*button),
        };

        info!(symbol = %symbol, "input simulator ready");
        Ok(Self { conn, root, target })
    }

    fn fake_input(&self, type_: u8, detail: u8) {
        let result = self
            .conn
            .xtest_fake_input(type_, detail, x11rb::CURRENT_TIME, self.root, 0, 0, 0)
            .map(drop)
            .and_then(|()| self.conn.flush());
        if let Err(e) = result {
            warn!(error = %e, "Failed to send input event");
        }
    }
}

impl ActionSender for XTestSender {
    fn down(&mut self) {
        match &self.target {
            Target::Keys(codes) => {
                for &code in codes {
                    self.fake_input(KEY_PRESS_EVENT, code);
                }
            }
            Target::Button(button) => self.fake_input(BUTTON_PRESS_EVENT, *button),
        }
    }

    fn up(&mut self) {
        match &self.target {
            Target::Keys(codes) => {
                for &code in codes.iter().rev() {
                    self.fake_input(KEY_RELEASE_EVENT, code);
                }
            }
            Target::Button(button) => self.fake_input(BUTTON_RELEASE_EVENT, *button),
        }
    }
}

/// Map every key of a key symbol to a keycode of the current keyboard.
fn resolve_keycodes(conn: &RustConnection, symbol: &Symbol) -> Result<Vec<Keycode>> {
    let setup = conn.setup();
    let (min, max) = (setup.min_keycode, setup.max_keycode);
    let mapping = conn
        .get_keyboard_mapping(min, max - min + 1)
        .map_err(|e| PttError::Sender(format!("get keyboard mapping: {e}")))?
        .reply()
        .map_err(|e| PttError::Sender(format!("get keyboard mapping: {e}")))?;

    let mut codes = Vec::new();
    for name in symbol.keys() {
        let sym = keysym::lookup(name).ok_or_else(|| PttError::InvalidSymbol {
            symbol: symbol.to_string(),
            reason: format!("unknown keysym {name:?}"),
        })?;
        let chord = chord_for(&mapping.keysyms, mapping.keysyms_per_keycode, min, sym)
            .ok_or_else(|| PttError::InvalidSymbol {
                symbol: symbol.to_string(),
                reason: format!("no key on this keyboard produces {name:?}"),
            })?;
        for code in chord {
            if !codes.contains(&code) {
                codes.push(code);
            }
        }
    }
    Ok(codes)
}

/// Keycodes to hold down, in press order, to type `sym`.
///
/// A keysym that only sits on the shifted level gets `Shift_L` in front.
fn chord_for(
    keysyms: &[Keysym],
    per_keycode: u8,
    min: Keycode,
    sym: Keysym,
) -> Option<Vec<Keycode>> {
    let (code, level) = find_keycode(keysyms, per_keycode, min, sym)?;
    if level == 0 {
        return Some(vec![code]);
    }
    let shift = keysym::lookup("Shift_L")?;
    match find_keycode(keysyms, per_keycode, min, shift)? {
        (shift, 0) => Some(vec![shift, code]),
        _ => None,
    }
}

/// Find the keycode and shift level (0 or 1) that produce `sym`.
///
/// Unshifted matches win over shifted ones. Levels past the first group are
/// not considered.
fn find_keycode(
    keysyms: &[Keysym],
    per_keycode: u8,
    min: Keycode,
    sym: Keysym,
) -> Option<(Keycode, usize)> {
    if per_keycode == 0 {
        return None;
    }
    let rows = || keysyms.chunks(usize::from(per_keycode));
    (0..usize::from(per_keycode).min(2)).find_map(|level| {
        let index = rows().position(|row| row.get(level) == Some(&sym))?;
        let code = min.checked_add(u8::try_from(index).ok()?)?;
        Some((code, level))
    })
}
