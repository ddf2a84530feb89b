//! Library integration tests.
//!
//! End-to-end runs use host sandboxes driven by a stand-in interpreter, so
//! they need a Unix shell and a Linux target matching the host.

#[cfg(target_os = "linux")]
mod common;
mod config_tests;
#[cfg(target_os = "linux")]
mod orchestrate_tests;
