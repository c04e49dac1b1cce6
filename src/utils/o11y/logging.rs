//! Error-logging helpers.
//!
//! `log_error!` emits an ERROR event carrying both the display and debug forms
//! of an error. `as_error!` wraps it in a closure for `Result::inspect_err`:
//!
//! ```ignore
//! let consumer: StreamConsumer = client_config
//!     .create()
//!     .inspect_err(as_error!("failed to create consumer"))?;
//! ```

/// Log an error at the ERROR level with `error.message` and `error.details`.
#[macro_export]
macro_rules! log_error {
    ($error:expr, $($arg:tt)+) => {
        ::tracing::error!(
            error.message = %$error,
            error.details = ?$error,
            $($arg)+
        )
    };
}

/// Build a closure that logs its error argument, for use with `inspect_err`.
#[macro_export]
macro_rules! as_error {
    ($($arg:tt)+) => {
        |error| $crate::log_error!(error, $($arg)+)
    };
}

/// Log an error at the WARN level with `error.message` and `error.details`.
#[macro_export]
macro_rules! log_warning {
    ($error:expr, $($arg:tt)+) => {
        ::tracing::warn!(
            error.message = %$error,
            error.details = ?$error,
            $($arg)+
        )
    };
}

pub use crate::{as_error, log_error, log_warning};
