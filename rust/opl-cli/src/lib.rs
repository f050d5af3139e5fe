//! OPL CLI library.
//!
//! Shared pieces of the `opl` binary: argument parsing, configuration,
//! diagnostics and the command implementations.

pub mod colors;
pub mod commands;
pub mod config;
pub mod error_chain;

use tracing_subscriber::EnvFilter;

/// Environment variable holding a `tracing` filter, e.g. `OPL_LOG=opl_vm=trace`.
pub const LOG_ENV: &str = "OPL_LOG";

/// Default filter when `OPL_LOG` is unset.
pub fn default_log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the stderr log subscriber.
pub fn init_logging(verbose: u8) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_log_level(verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
