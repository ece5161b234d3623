//! `log_to_file`: appends every received event as one JSON line.

use crate::frame::settings::{ConfigSchema, FieldType};
use crate::frame::Frame;
use crate::runtime::{AgentHandle, AgentRuntime, WILDCARD};
use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub const NAME: &str = "log_to_file";
pub const LOG_FILE_KEY: &str = "log_file";
pub const DEFAULT_LOG_FILE: &str = "zygote_frames.log";

pub fn schema() -> ConfigSchema {
    ConfigSchema::new().field(LOG_FILE_KEY, FieldType::String, DEFAULT_LOG_FILE)
}

pub fn runtime() -> AgentRuntime {
    let mut runtime = AgentRuntime::new(NAME).with_schema(schema());
    // one writer at a time so lines never interleave
    let lock = Arc::new(Mutex::new(()));
    runtime.on_event(WILDCARD, move |agent, frame| {
        let lock = Arc::clone(&lock);
        async move {
            let _guard = lock.lock().await;
            append_frame(&agent, &frame).await
        }
    });
    runtime
}

async fn append_frame(agent: &AgentHandle, frame: &Frame) -> anyhow::Result<()> {
    let path: PathBuf = agent
        .config_value::<String>(LOG_FILE_KEY)
        .unwrap_or_else(|| DEFAULT_LOG_FILE.to_string())
        .into();
    let mut line = serde_json::to_string(frame)?;
    line.push('\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    file.write_all(line.as_bytes())
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    file.flush().await?;
    Ok(())
}
