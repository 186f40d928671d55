//! Configuration management for ptt-fix
//!
//! The config file is a list of directives, one per line:
//!
//! ```text
//! key 51
//! sym key comma
//! retry 3s
//! device /dev/input/by-id/usb-*-event-kbd
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::device;
use crate::input_simulator::Symbol;
use crate::{PttError, Result};

/// Where devices are looked for when none are configured
pub const INPUT_DIR: &str = "/dev/input";

/// `KEY_COMMA`
const DEFAULT_KEY: u16 = 51;

const DEFAULT_FILE: &str = "\
# ptt-fix configuration

# Key code to watch for, as listed in linux/input-event-codes.h.
# 51 is KEY_COMMA.
key 51

# What to send while the key is held: \"key <keysym>\" or \"mouse <button>\".
# Keysyms may be chained with + to press several keys, e.g. ctrl+F13.
sym key comma

# How long to wait before reopening a device that is missing or was
# unplugged. 0 disables reopening.
retry 3s

# Devices to watch. Shell patterns (*, ? and [...]) are expanded. May be
# given more than once. Without any device line every device in /dev/input
# is watched.
#device /dev/input/by-id/usb-*-event-kbd
";

/// Configuration for push-to-talk
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Key code to watch on the input devices
    pub key: u16,

    /// Symbol to send to the focused window
    pub sym: Symbol,

    /// Delay before reopening a vanished device, zero to give up instead
    pub retry: Duration,

    /// Device paths to watch
    pub devices: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            key: DEFAULT_KEY,
            sym: Symbol::Key(String::from("comma")),
            retry: Duration::ZERO,
            devices: Vec::new(),
        }
    }
}

impl Config {
    /// Watch a different key code
    pub fn with_key(mut self, key: u16) -> Self {
        self.key = key;
        self
    }

    /// Send a different symbol
    pub fn with_sym(mut self, sym: Symbol) -> Self {
        self.sym = sym;
        self
    }

    /// Set the retry delay
    pub fn with_retry(mut self, retry: Duration) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the device list
    pub fn with_devices<I, S>(mut self, devices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.devices = devices.into_iter().map(Into::into).collect();
        self
    }

    /// Text of the config file written on first start
    pub fn default_file() -> &'static str {
        DEFAULT_FILE
    }

    /// `<user config dir>/ptt-fix/config`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("ptt-fix").join("config"))
    }

    /// Read and parse a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| PttError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Load the config at the default path, writing the default file there
    /// first if there is none.
    pub fn load_or_create_default() -> Result<Self> {
        let Some(path) = Self::default_path() else {
            warn!("no user config directory, using built-in defaults");
            return Self::parse(DEFAULT_FILE);
        };

        if !path.exists() {
            write_default(&path).map_err(|source| PttError::ConfigIo {
                path: path.clone(),
                source,
            })?;
            info!(path = %path.display(), "wrote default config");
        }
        Self::load(&path)
    }

    /// Parse config directives. Anything not set keeps its default.
    pub fn parse(text: &str) -> Result<Self> {
        let mut parser = Parser::default();
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            parser.directive(line).map_err(|message| PttError::Config {
                line: i + 1,
                message,
            })?;
        }

        let defaults = Config::default();
        Ok(Config {
            key: parser.key.unwrap_or(defaults.key),
            sym: parser.sym.unwrap_or(defaults.sym),
            retry: parser.retry.unwrap_or(defaults.retry),
            devices: parser.devices,
        })
    }

    /// The configured devices, or every device in [`INPUT_DIR`] if none are.
    pub fn resolve_devices(&self) -> Result<Vec<String>> {
        if !self.devices.is_empty() {
            return Ok(self.devices.clone());
        }

        let found = device::scan_input_dir(Path::new(INPUT_DIR)).map_err(|source| {
            PttError::ConfigIo {
                path: PathBuf::from(INPUT_DIR),
                source,
            }
        })?;
        info!(count = found.len(), dir = INPUT_DIR, "no devices configured, watching all");
        Ok(found
            .into_iter()
            .map(|path| path.to_string_lossy().into_owned())
            .collect())
    }
}

fn write_default(path: &Path) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, DEFAULT_FILE)
}

#[derive(Default)]
struct Parser {
    key: Option<u16>,
    sym: Option<Symbol>,
    retry: Option<Duration>,
    devices: Vec<String>,
}

impl Parser {
    fn directive(&mut self, line: &str) -> Result<(), String> {
        let (name, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(name, rest)| (name, rest.trim()));

        match name {
            "key" => {
                let key = parse_uint(rest).map_err(|e| format!("parse key: {e}"))?;
                set_once(&mut self.key, key, "key")
            }
            "sym" => {
                let sym = rest.parse::<Symbol>().map_err(|e| e.to_string())?;
                set_once(&mut self.sym, sym, "sym")
            }
            "retry" => {
                let retry = parse_duration(rest).map_err(|e| format!("parse retry: {e}"))?;
                set_once(&mut self.retry, retry, "retry")
            }
            "device" => {
                if rest.is_empty() {
                    return Err("device needs a path".to_string());
                }
                let found = expand_device(rest).map_err(|e| format!("find devices: {e}"))?;
                if found.is_empty() {
                    warn!(pattern = rest, "device pattern matched nothing");
                }
                self.devices.extend(found);
                Ok(())
            }
            other => Err(format!("unknown directive {other:?}")),
        }
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T, name: &str) -> Result<(), String> {
    if slot.is_some() {
        return Err(format!("attempted to set {name} twice"));
    }
    *slot = Some(value);
    Ok(())
}

/// Parse an unsigned key code. Accepts `0x`, `0o` and `0b` prefixes, a
/// leading `0` for octal and `_` between digits, so `063` is 51.
fn parse_uint(s: &str) -> Result<u16, String> {
    let (digits, radix, prefixed) = match s.get(..2) {
        Some("0x" | "0X") => (&s[2..], 16, true),
        Some("0o" | "0O") => (&s[2..], 8, true),
        Some("0b" | "0B") => (&s[2..], 2, true),
        _ if s.len() > 1 && s.starts_with('0') => (&s[1..], 8, true),
        _ => (s, 10, false),
    };
    let misplaced_underscore = digits.ends_with('_')
        || digits.contains("__")
        || (!prefixed && digits.starts_with('_'));
    if digits.starts_with('+') || misplaced_underscore {
        return Err(format!("{s:?}: invalid syntax"));
    }
    let digits: String = digits.chars().filter(|&c| c != '_').collect();
    u16::from_str_radix(&digits, radix).map_err(|e| format!("{s:?}: {e}"))
}

/// Parse a duration such as `3s`, `500ms`, `1m30s` or `1.5s`. A bare `0` is
/// allowed without a unit.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total_ns = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration {s:?}"))?;
        if number_len == 0 {
            return Err(format!("invalid duration {s:?}"));
        }
        let value: f64 = rest[..number_len]
            .parse()
            .map_err(|_| format!("invalid duration {s:?}"))?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            unit => return Err(format!("unknown unit {unit:?} in duration {s:?}")),
        };
        rest = &rest[unit_len..];
        total_ns += value * scale;
    }

    if total_ns > u64::MAX as f64 {
        return Err(format!("duration {s:?} is too long"));
    }
    Ok(Duration::from_nanos(total_ns.round() as u64))
}

/// Expand a shell pattern (`*`, `?`, `[...]`) into the paths it matches.
/// Paths without pattern characters are returned as they are, even if they
/// do not exist yet.
fn expand_device(pattern: &str) -> Result<Vec<String>, glob::PatternError> {
    if !pattern.contains(|c: char| matches!(c, '*' | '?' | '[')) {
        return Ok(vec![pattern.to_string()]);
    }

    let mut found = Vec::new();
    for entry in glob::glob(pattern)? {
        match entry {
            Ok(path) => found.push(path.to_string_lossy().into_owned()),
            Err(err) => warn!(error = %err, "skipping unreadable path"),
        }
    }
    found.sort();
    Ok(found)
}
