//! Diagnostics on stderr.
//!
//! Library code logs through the `log` facade; this installs a
//! `tracing-subscriber` formatter that also picks up `log` records.

use std::{env, io};
use tracing_subscriber::EnvFilter;

/// Initialise logging. The filter comes from `EMERG_SHUTDOWN_LOG` or
/// `RUST_LOG`, defaulting to warnings and errors only.
pub fn init() {
    let env_filter = match env::var("EMERG_SHUTDOWN_LOG").or_else(|_| env::var("RUST_LOG")) {
        Ok(s) => EnvFilter::new(s),
        Err(_) => EnvFilter::new("warn"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .init();
}
