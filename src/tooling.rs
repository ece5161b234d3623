//! Tooling & Integration Layer
//!
//! The `zygote` command tree and the administrative operations it drives.

pub mod admin;
pub mod cli;

pub use admin::OutputFormat;
pub use cli::{Cli, CliContext, Commands};
