//! Logging setup plus per-module gated macros.
//!
//! A module opts in by declaring its own flag and importing the macros from
//! the crate root:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//! use crate::{log_info, log_warn};
//! ```

use std::sync::Once;

static INIT: Once = Once::new();

/// Environment switch that lowers this crate's default level to `Debug`.
pub const DEBUG_ENV: &str = "LIVETRACK_DEBUG";

/// Install the `env_logger` backend. `RUST_LOG` still wins over the defaults.
/// Safe to call more than once.
pub fn init_logging() {
    INIT.call_once(|| {
        let debug_mode = std::env::var(DEBUG_ENV)
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let level = if debug_mode {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        };

        let _ = env_logger::Builder::new()
            .filter_level(log::LevelFilter::Warn)
            .filter_module("livetrack_lib", level)
            .filter_module("livetrack", level)
            .parse_default_env()
            .try_init();
    });
}

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
