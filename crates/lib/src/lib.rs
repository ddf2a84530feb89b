//! morphpack-lib: build pipeline that turns one Python program into
//! standalone executables for several target environments.
//!
//! - `config`: the `morphpack.toml` build configuration
//! - `target`: target identities and export filenames
//! - `locate`: build-time resolution of package data directories
//! - `bundle`: one standalone single-file bundler run
//! - `sandbox`: isolated per-target build environments (container or host)
//! - `orchestrate`: parallel sandboxes, failure policy and export

pub mod bundle;
pub mod config;
pub mod consts;
pub mod locate;
pub mod orchestrate;
pub mod platform;
pub mod process;
pub mod sandbox;
pub mod target;
pub mod util;
