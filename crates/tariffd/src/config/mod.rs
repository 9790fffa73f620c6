//! Configuration file parsing and structures.
//!
//! tariffd uses TOML for declarative configuration. Several files can be given
//! (and can `imports = [...]` each other); they are merged first-wins and then
//! validated, with every problem reported together.

// Private module - allowed by clippy.toml allow-private-module-inception
#[allow(clippy::module_inception)]
mod config;
mod diagnostics;
mod partial;

pub use config::*;
pub use diagnostics::{format_diagnostics, Diagnostic, Diagnostics, LoadError};
