//! CLI integration tests.
//!
//! Full builds run host sandboxes with a stand-in interpreter script, so they
//! need a Unix shell and a Linux host.

#[cfg(target_os = "linux")]
mod build_tests;
#[cfg(target_os = "linux")]
mod common;
