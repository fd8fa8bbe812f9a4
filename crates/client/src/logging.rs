//! Logging for the socket client.
//!
//! Crate code logs through the `log_*!` macros, which forward to `tracing`
//! under the `tether` target so applications can filter socket traffic
//! independently of their own output.

use tracing_subscriber::EnvFilter;

/// Install a `tracing` fmt subscriber.
///
/// Uses `RUST_LOG` when set, otherwise `default_filter`
/// (e.g. `"tether=debug"`). Does nothing if a global subscriber is already
/// installed.
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

pub fn log_info_impl(msg: &str) {
    tracing::info!(target: "tether", "{}", msg);
}

pub fn log_error_impl(msg: &str) {
    tracing::error!(target: "tether", "{}", msg);
}

pub fn log_warn_impl(msg: &str) {
    tracing::warn!(target: "tether", "{}", msg);
}

pub fn log_debug_impl(msg: &str) {
    tracing::debug!(target: "tether", "{}", msg);
}

/// Log an info message
#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log_info_impl(&format!($($arg)*))
    };
}

/// Log an error message
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log_error_impl(&format!($($arg)*))
    };
}

/// Log a warning message
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logging::log_warn_impl(&format!($($arg)*))
    };
}

/// Log a debug message
#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::log_debug_impl(&format!($($arg)*))
    };
}
