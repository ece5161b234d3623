//! `hello`: greets every joined space on startup and once a minute.

use crate::error::RuntimeError;
use crate::runtime::{AgentHandle, AgentRuntime, Interval, JobOptions};
use crate::types::Data;
use serde_json::json;
use std::time::Duration;

pub const NAME: &str = "hello";
pub const EVENT: &str = "hello";

fn greeting() -> Data {
    let mut data = Data::new();
    data.insert("message".to_string(), json!("Hello, world!"));
    data
}

async fn greet(agent: AgentHandle) -> anyhow::Result<()> {
    agent.emit(EVENT, greeting())?;
    Ok(())
}

pub fn runtime() -> Result<AgentRuntime, RuntimeError> {
    let mut runtime = AgentRuntime::new(NAME);
    runtime.on_startup(Duration::ZERO, greet);
    runtime.on_interval(Interval::minutes(1), JobOptions::id("hello/greet"), greet)?;
    Ok(runtime)
}
