//! Build targets.
//!
//! A target is one OS / C-runtime / architecture combination the payload is
//! compiled for. Targets are declared explicitly in configuration and never
//! change once orchestration starts.

pub mod template;
pub mod types;

pub use template::{TemplateError, render_filename};
pub use types::{RuntimeFamily, TargetEnvironment, TargetId};
