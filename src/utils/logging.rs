//! Switchable logging macros keyed off a module-level `ENABLE_LOGS` flag.
//!
//! Modules that drive sessions define:
//! ```rust,ignore
//! const ENABLE_LOGS: bool = true;
//! use crate::{log_debug, log_info, log_warn};
//! ```
//! and flip the flag to silence themselves without touching the global filter.

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

/// Used for swallowed failures (stream stop, late responses).
#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}

/// Initializes `env_logger` for the binary. `RUST_LOG` still wins when set.
pub fn init_logging(debug: bool) {
    let level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .try_init();
}
