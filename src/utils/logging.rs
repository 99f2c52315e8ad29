//! Module-gated logging macros.
//!
//! Every module that logs through these macros declares two constants:
//! ```rust,ignore
//! const ENABLE_LOGS: bool = true;
//! const LOG_TAG: &str = "hub";
//! ```
//! Messages are prefixed with `[LOG_TAG]` so interleaved output from the
//! sensor, hub and session tasks stays readable. Flip `ENABLE_LOGS` to silence
//! a chatty module without touching `RUST_LOG`.

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!("[{}] {}", LOG_TAG, format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!("[{}] {}", LOG_TAG, format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!("[{}] {}", LOG_TAG, format_args!($($arg)*));
        }
    };
}

/// Errors are never gated: they only fire for transport and permission
/// failures that the user will see anyway.
#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        log::error!("[{}] {}", LOG_TAG, format_args!($($arg)*));
    };
}
