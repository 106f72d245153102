//! HearthLink OTA installer library.
//!
//! Fetches a signed firmware image from a remote repository over HTTP(S),
//! verifies it against the compiled-in release key and commits it to the
//! alternate flash slot for the bootloader to pick up.
//!
//! Exposes the pure-logic modules for integration testing and external
//! inspection. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module; on other targets the
//! simulation backends (plaintext TCP, in-memory flash and boot record)
//! stand in.

#![deny(unused_must_use)]

pub mod bootslot;
pub mod config;
pub mod download;
pub mod flash;
pub mod http;
pub mod location;
pub mod resolver;
pub mod session;
pub mod updater;
pub mod verify;

pub mod error;
