//! Process Supervisor
//!
//! Keeps a named set of worker processes alive. A monitor task polls every
//! worker on a fixed period and relaunches whatever is not running, with no
//! backoff and no restart ceiling. Workers talk to the hub only through the
//! frame protocol; the supervisor itself can only start, terminate and
//! observe them.

pub mod process;

pub use process::{ProcessSpec, SupervisedProcess};

use crate::error::SupervisorError;
use futures::FutureExt;
use parking_lot::Mutex as SyncMutex;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type ProcessTable = Arc<Mutex<BTreeMap<String, SupervisedProcess>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    /// Monitor tick
    pub poll_interval: Duration,
    /// Wait after SIGTERM before killing
    pub stop_timeout: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

struct Monitor {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct Supervisor {
    processes: ProcessTable,
    settings: SupervisorSettings,
    monitor: SyncMutex<Option<Monitor>>,
}

impl Supervisor {
    pub fn new(settings: SupervisorSettings) -> Self {
        Self {
            processes: Arc::new(Mutex::new(BTreeMap::new())),
            settings,
            monitor: SyncMutex::new(None),
        }
    }

    pub fn settings(&self) -> SupervisorSettings {
        self.settings
    }

    /// Register a worker; `start` launches it right away
    pub async fn add_process(&self, name: &str, spec: ProcessSpec, start: bool) -> Result<(), SupervisorError> {
        let mut processes = self.processes.lock().await;
        if processes.contains_key(name) {
            return Err(SupervisorError::DuplicateProcess(name.to_string()));
        }
        let mut process = SupervisedProcess::new(name, spec);
        if start {
            process.spawn()?;
        }
        info!(process = %name, started = start, "Process registered");
        processes.insert(name.to_string(), process);
        Ok(())
    }

    /// Terminate and forget a worker; absent names are a no-op
    pub async fn remove_process(&self, name: &str) -> Result<(), SupervisorError> {
        let removed = self.processes.lock().await.remove(name);
        let Some(mut process) = removed else {
            return Ok(());
        };
        process.terminate(self.settings.stop_timeout).await?;
        info!(process = %name, "Process removed");
        Ok(())
    }

    /// Launch every registered worker not yet started, then begin monitoring
    pub async fn start(&self) -> Result<(), SupervisorError> {
        {
            let mut processes = self.processes.lock().await;
            for process in processes.values_mut().filter(|p| !p.is_started()) {
                process.spawn()?;
            }
        }

        let mut monitor = self.monitor.lock();
        if monitor.is_none() {
            let cancel = CancellationToken::new();
            let task = tokio::spawn(monitor_loop(
                Arc::clone(&self.processes),
                self.settings.poll_interval,
                cancel.clone(),
            ));
            *monitor = Some(Monitor { cancel, task });
            info!(
                poll_ms = self.settings.poll_interval.as_millis() as u64,
                "Supervisor started"
            );
        }
        Ok(())
    }

    /// Stop monitoring, then terminate every worker
    pub async fn stop(&self) {
        let monitor = self.monitor.lock().take();
        if let Some(Monitor { cancel, task }) = monitor {
            cancel.cancel();
            if let Err(e) = task.await {
                error!(error = %e, "Supervisor monitor task failed");
            }
        }

        let mut processes = self.processes.lock().await;
        for process in processes.values_mut() {
            if let Err(e) = process.terminate(self.settings.stop_timeout).await {
                error!(process = %process.name(), error = %e, "Failed to stop process");
            }
        }
        info!(processes = processes.len(), "Supervisor stopped");
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitor.lock().is_some()
    }

    pub async fn is_alive(&self, name: &str) -> bool {
        let mut processes = self.processes.lock().await;
        match processes.get_mut(name) {
            Some(process) => process.poll().unwrap_or(false),
            None => false,
        }
    }

    pub async fn pid(&self, name: &str) -> Option<u32> {
        self.processes.lock().await.get(name).and_then(SupervisedProcess::pid)
    }

    pub async fn restart_count(&self, name: &str) -> Option<u32> {
        self.processes
            .lock()
            .await
            .get(name)
            .map(SupervisedProcess::restart_count)
    }

    pub async fn names(&self) -> Vec<String> {
        self.processes.lock().await.keys().cloned().collect()
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        // children are kill_on_drop; releasing the monitor's table reference kills them
        if let Some(monitor) = self.monitor.get_mut().take() {
            monitor.cancel.cancel();
        }
    }
}

async fn monitor_loop(processes: ProcessTable, period: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let tick = AssertUnwindSafe(check_processes(&processes)).catch_unwind();
        if let Err(panic) = tick.await {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(panic = %message, "Supervisor monitor tick panicked, continuing");
        }
    }
    debug!("Supervisor monitor exited");
}

/// One monitor tick: relaunch every worker that is not running
async fn check_processes(processes: &Mutex<BTreeMap<String, SupervisedProcess>>) {
    let mut processes = processes.lock().await;
    for process in processes.values_mut() {
        match process.poll() {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                error!(process = %process.name(), error = %e, "Failed to poll process");
                continue;
            }
        }

        match process.exit_status() {
            Some(status) => error!(process = %process.name(), %status, "Process died, restarting"),
            None => warn!(process = %process.name(), "Process was never started, launching"),
        }
        match process.spawn() {
            Ok(()) => info!(
                process = %process.name(),
                pid = ?process.pid(),
                restarts = process.restart_count(),
                "Process relaunched"
            ),
            Err(e) => error!(process = %process.name(), error = %e, "Relaunch failed, retrying next tick"),
        }
    }
}
