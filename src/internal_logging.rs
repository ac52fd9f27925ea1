#![allow(unused_macros)]
//! Macros for crate-internal diagnostics.
//!
//! These are intended for use **within tracekit code** and custom reporters,
//! samplers or finished-span handlers. They are not a general application
//! logging facility. Events are emitted through [`tracing`] with the crate
//! name as target, so hosts can filter them like any other `tracing` source.

// TODO: drop the `name` attribute duplication once `tracing::Fmt` can display
// the event name. See https://github.com/tokio-rs/tracing/issues/2774
macro_rules! trace_info {
    (name: $name:expr $(,)?) => {
        tracing::info!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name, "");
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        tracing::info!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name, $($key = $value),+, "");
    };
}

macro_rules! trace_warn {
    (name: $name:expr $(,)?) => {
        tracing::warn!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name, "");
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        tracing::warn!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name, $($key = $value),+, "");
    };
}

macro_rules! trace_debug {
    (name: $name:expr $(,)?) => {
        tracing::debug!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name, "");
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        tracing::debug!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name, $($key = $value),+, "");
    };
}

macro_rules! trace_error {
    (name: $name:expr $(,)?) => {
        tracing::error!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name, "");
    };
    (name: $name:expr, $($key:ident = $value:expr),+ $(,)?) => {
        tracing::error!(name: $name, target: env!("CARGO_PKG_NAME"), name = $name, $($key = $value),+, "");
    };
}

pub(crate) use {trace_debug, trace_error, trace_info, trace_warn};
