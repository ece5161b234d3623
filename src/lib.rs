//! Zygote: Personal Automation Hub
//!
//! A frame broker that authenticates agents by token and fans their frames
//! out across named spaces, an agent runtime that turns one hub connection
//! into a declarative program of handlers, hooks and scheduled jobs, and a
//! supervisor that keeps every agent process alive.

pub mod agents;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod frame;
pub mod hub;
pub mod logging;
pub mod runtime;
pub mod store;
pub mod supervisor;
pub mod tooling;
pub mod types;
