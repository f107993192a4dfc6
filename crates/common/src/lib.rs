//! Common utilities for simple-usb
//!
//! This crate provides the ambient pieces shared by the protocol and client
//! crates: the error type used outside the core library, tracing setup, a hex
//! dumper for descriptor bytes, and descriptor byte builders for tests.

pub mod error;
pub mod hexdump;
pub mod logging;
pub mod test_utils;

pub use error::{Error, Result};
pub use hexdump::hex_dump;
pub use logging::setup_logging;
