//! Integration tests for the zygote hub, agent runtime and supervisor

mod config_sync;
mod end_to_end;
mod hub_routing;
mod scheduler;
mod support;
#[cfg(unix)]
mod supervisor_recovery;
