//! Command line arguments

use std::path::PathBuf;

use crate::{PttError, Result, Symbol};

pub const USAGE: &str = "\
Usage: ptt-fix [options] [/dev/input/by-id/<device>...]

Options:
  -c, --config PATH         read configuration from PATH
  -s, --sym SYMBOL          send SYMBOL instead of the configured one
  -v, --verbose             log every press and release
      --print-default-config
                            print the default configuration and exit
  -h, --help                show this help";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Args {
    pub config: Option<PathBuf>,
    pub sym: Option<Symbol>,
    pub verbose: bool,
    pub print_default_config: bool,
    pub help: bool,
    /// Devices given on the command line replace the configured ones.
    pub devices: Vec<String>,
}

impl Args {
    /// Parse arguments, not including the program name.
    pub fn parse<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Args::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" | "-config" => {
                    let path = args
                        .next()
                        .ok_or_else(|| PttError::Usage(format!("{arg} needs a path")))?;
                    parsed.config = Some(PathBuf::from(path));
                }
                "-s" | "--sym" => {
                    let value = args
                        .next()
                        .ok_or_else(|| PttError::Usage(format!("{arg} needs a symbol")))?;
                    let sym = value
                        .parse()
                        .map_err(|e| PttError::Usage(format!("{arg}: {e}")))?;
                    parsed.sym = Some(sym);
                }
                "-v" | "--verbose" => parsed.verbose = true,
                "--print-default-config" => parsed.print_default_config = true,
                "-h" | "--help" => parsed.help = true,
                "--" => parsed.devices.extend(args.by_ref()),
                flag if flag.starts_with('-') && flag.len() > 1 => {
                    return Err(PttError::Usage(format!("unknown option {flag:?}")));
                }
                other => parsed.devices.push(other.to_string()),
            }
        }

        Ok(parsed)
    }
}
