//! Sensord — privileged registry of IPC-exposed sensor devices.
//!
//! Single Rust binary. Callers talk to it over a Unix socket; registration
//! of a device is gated by an external authorization authority and fails
//! closed on any ambiguity. See `DESIGN.md` for architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod authority;
pub mod config;
pub mod device;
pub mod ipc;
pub mod logging;
pub mod manager;
pub mod registry;
