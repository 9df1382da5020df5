//! # bytewire-logkit
//!
//! Logging and configuration for the bytewire framework:
//!
//! - [`IniReader`] — re-read-per-query INI accessor (`;` comments, trimmed
//!   values, `true|false|1|0` booleans).
//! - [`Logger`] — level-gated line logger; stdout plus a ring-buffered
//!   async mirror flushed to date+index rotated files, with a config
//!   watcher thread for hot reload.
//! - `log_msg!` / `log_info!` / `log_warn!` / `log_debug!` / `log_error!` /
//!   `log_frames!` — call-site macros over the process-wide instance.

pub mod ini;
pub mod logger;

pub use ini::IniReader;
pub use logger::{global, init, shutdown, Level, LogKitError, Logger};
