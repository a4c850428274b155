//! Crate-internal logging macros.
//!
//! Backend precedence:
//! 1) `tracing` feature => `tracing` events
//! 2) `logging` feature (default) => `log` records
//! 3) neither => no-op; format arguments are still type-checked

#[allow(unused_macros)]
macro_rules! emit {
    ($level:ident, $($arg:tt)+) => {{
        #[cfg(feature = "tracing")]
        {
            ::tracing::$level!($($arg)+);
        }

        #[cfg(all(feature = "logging", not(feature = "tracing")))]
        {
            ::log::$level!($($arg)+);
        }

        #[cfg(not(any(feature = "logging", feature = "tracing")))]
        {
            let _ = ::core::format_args!($($arg)+);
        }
    }};
}

#[allow(unused_macros)]
macro_rules! log_debug {
    ($($arg:tt)+) => { $crate::observability::emit!(debug, $($arg)+) };
}

#[allow(unused_macros)]
macro_rules! log_info {
    ($($arg:tt)+) => { $crate::observability::emit!(info, $($arg)+) };
}

#[allow(unused_macros)]
macro_rules! log_warn {
    ($($arg:tt)+) => { $crate::observability::emit!(warn, $($arg)+) };
}

#[allow(unused_macros)]
macro_rules! log_error {
    ($($arg:tt)+) => { $crate::observability::emit!(error, $($arg)+) };
}

pub(crate) use emit;
#[allow(unused_imports)]
pub(crate) use {log_debug, log_error, log_info, log_warn};
