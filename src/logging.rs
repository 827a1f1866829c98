//! Log macros forwarding to `defmt` when the `defmt` feature is active.
//!
//! On the host (tests, tooling) the macros compile to nothing but still
//! type-check their arguments, so log sites cannot rot. Only plain `{}`
//! placeholders with primitive arguments are used throughout the crate,
//! keeping call sites valid for both `defmt` and `core::format_args`.

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::info!($($arg)*);
        #[cfg(not(feature = "defmt"))]
        { let _ = ::core::format_args!($($arg)*); }
    }};
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::warn!($($arg)*);
        #[cfg(not(feature = "defmt"))]
        { let _ = ::core::format_args!($($arg)*); }
    }};
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        ::defmt::debug!($($arg)*);
        #[cfg(not(feature = "defmt"))]
        { let _ = ::core::format_args!($($arg)*); }
    }};
}
