//! Log output setup

use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `verbose`. When running under systemd the journal
/// adds its own timestamps, so colours and times are left out.
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let journal = std::env::var_os("JOURNAL_STREAM").is_some();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(!journal)
        .compact();

    if journal {
        builder.without_time().init();
    } else {
        builder.init();
    }
}
