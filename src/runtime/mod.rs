//! Agent Runtime
//!
//! Turns one hub connection into a declarative frame-driven program. Handlers,
//! hooks and jobs are registered up front; [`AgentRuntime::run`] then walks
//! the lifecycle:
//!
//! 1. `connecting`: open the link; a rejected token stops the agent for good.
//! 2. `configuring`: send schema defaults as `config`, wait for the merge.
//!    Events arriving meanwhile are buffered.
//! 3. `running`: start jobs, run the startup hook, dispatch frames.
//! 4. `draining`: shutdown hook (once, bounded), stop jobs, close the link.

pub mod handle;
pub mod lifecycle;
pub mod scheduler;
pub mod transport;
pub mod trigger;

pub use handle::AgentHandle;
pub use lifecycle::LifecycleState;
pub use scheduler::{JobId, JobOptions, JobStats};
pub use transport::{Connector, Link, WsConnector};
pub use trigger::{CronTrigger, Interval};

use crate::error::{RuntimeError, TransportError};
use crate::frame::settings::ConfigSchema;
use crate::frame::{Channel, Envelope, Frame, Identity, CONFIG_COMMAND, IDENTITY_COMMAND};
use futures::future::BoxFuture;
use futures::FutureExt;
use lifecycle::Lifecycle;
use scheduler::{JobFn, Scheduler};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Name that matches every event
pub const WILDCARD: &str = "*";

pub type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;
pub type FrameHandler = Arc<dyn Fn(AgentHandle, Frame) -> HandlerFuture + Send + Sync>;
pub type Hook = Arc<dyn Fn(AgentHandle) -> HandlerFuture + Send + Sync>;

/// Timeouts applied by the run loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Wait for the initial `config` reply
    pub config_timeout: Duration,
    /// Wait for replies to `config-update` and `identity` requests
    pub request_timeout: Duration,
    /// Budget for the shutdown hook and for in-flight handlers while draining
    pub shutdown_timeout: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            config_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

struct StartupHook {
    delay: Duration,
    hook: Hook,
}

/// Builder and run loop for one agent process
pub struct AgentRuntime {
    name: String,
    schema: ConfigSchema,
    settings: RuntimeSettings,
    events: HashMap<String, Vec<FrameHandler>>,
    commands: HashMap<String, Vec<FrameHandler>>,
    startup: Option<StartupHook>,
    shutdown: Option<Hook>,
    scheduler: Scheduler<AgentHandle>,
    lifecycle: Lifecycle,
}

fn frame_handler<F, Fut>(handler: F) -> FrameHandler
where
    F: Fn(AgentHandle, Frame) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |agent, frame| handler(agent, frame).boxed())
}

fn hook<F, Fut>(hook: F) -> Hook
where
    F: Fn(AgentHandle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |agent| hook(agent).boxed())
}

impl AgentRuntime {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            lifecycle: Lifecycle::new(name.clone()),
            name,
            schema: ConfigSchema::new(),
            settings: RuntimeSettings::default(),
            events: HashMap::new(),
            commands: HashMap::new(),
            startup: None,
            shutdown: None,
            scheduler: Scheduler::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_schema(mut self, schema: ConfigSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Handle events named `name`, or every event with [`WILDCARD`]
    pub fn on_event<F, Fut>(&mut self, name: &str, handler: F) -> &mut Self
    where
        F: Fn(AgentHandle, Frame) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.events
            .entry(name.to_string())
            .or_default()
            .push(frame_handler(handler));
        self
    }

    /// Handle hub commands other than `identity` and `config`
    pub fn on_command<F, Fut>(&mut self, name: &str, handler: F) -> &mut Self
    where
        F: Fn(AgentHandle, Frame) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.commands
            .entry(name.to_string())
            .or_default()
            .push(frame_handler(handler));
        self
    }

    /// Run once after the config sync, after `delay`
    pub fn on_startup<F, Fut>(&mut self, delay: Duration, startup: F) -> &mut Self
    where
        F: Fn(AgentHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if self.startup.is_some() {
            warn!(agent = %self.name, "Replacing previously registered startup hook");
        }
        self.startup = Some(StartupHook {
            delay,
            hook: hook(startup),
        });
        self
    }

    /// Run exactly once on every termination path after connecting
    pub fn on_shutdown<F, Fut>(&mut self, shutdown: F) -> &mut Self
    where
        F: Fn(AgentHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if self.shutdown.is_some() {
            warn!(agent = %self.name, "Replacing previously registered shutdown hook");
        }
        self.shutdown = Some(hook(shutdown));
        self
    }

    pub fn on_interval<F, Fut>(&mut self, interval: Interval, options: JobOptions, job: F) -> Result<JobId, RuntimeError>
    where
        F: Fn(AgentHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let job: JobFn<AgentHandle> = scheduler::job_fn(job);
        Ok(self.scheduler.add_interval(interval, options, job)?)
    }

    pub fn on_cron<F, Fut>(&mut self, cron: CronTrigger, options: JobOptions, job: F) -> Result<JobId, RuntimeError>
    where
        F: Fn(AgentHandle) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let job: JobFn<AgentHandle> = scheduler::job_fn(job);
        Ok(self.scheduler.add_cron(cron, options, job)?)
    }

    pub fn job_stats(&self, id: &str) -> Option<JobStats> {
        self.scheduler.stats(id)
    }

    pub fn state(&self) -> watch::Receiver<LifecycleState> {
        self.lifecycle.subscribe()
    }

    /// Connect with `token` and run until `cancel` fires or the hub goes away
    pub async fn run(
        mut self,
        connector: &dyn Connector,
        token: &str,
        cancel: CancellationToken,
    ) -> Result<(), RuntimeError> {
        self.schema.check()?;
        let agent = AgentHandle::new(self.name.clone(), self.schema.clone(), self.settings.request_timeout);

        self.lifecycle.advance(LifecycleState::Connecting);
        let link = match connector.connect(token).await {
            Ok(link) => link,
            Err(TransportError::Rejected) => {
                error!(agent = %self.name, "Hub rejected the agent token");
                self.lifecycle.advance(LifecycleState::Stopped);
                return Err(RuntimeError::Authentication);
            }
            Err(e) => {
                error!(agent = %self.name, error = %e, "Failed to connect to hub");
                self.lifecycle.advance(LifecycleState::Stopped);
                return Err(e.into());
            }
        };
        let Link { sender, mut receiver } = link;
        agent.attach(sender);

        self.lifecycle.advance(LifecycleState::Configuring);
        let mut backlog = VecDeque::new();
        let configured = tokio::select! {
            _ = cancel.cancelled() => None,
            result = self.configure(&agent, &mut receiver, &mut backlog) => Some(result),
        };

        let tracker = TaskTracker::new();
        let outcome = match configured {
            None => Ok(()),
            Some(Err(e)) => {
                error!(agent = %self.name, error = %e, "Config sync failed");
                Err(e)
            }
            Some(Ok(())) => {
                self.lifecycle.advance(LifecycleState::Running);
                info!(agent = %self.name, "Agent running");
                self.scheduler.start(agent.clone());
                if let Some(startup) = &self.startup {
                    let hook = Arc::clone(&startup.hook);
                    let delay = startup.delay;
                    let handle = agent.clone();
                    let cancel = cancel.clone();
                    tracker.spawn(async move {
                        tokio::select! {
                            _ = cancel.cancelled() => return,
                            _ = tokio::time::sleep(delay) => {}
                        }
                        if let Err(e) = hook(handle.clone()).await {
                            warn!(agent = %handle.name(), error = %e, "Startup hook failed");
                        }
                    });
                }
                for envelope in backlog.drain(..) {
                    self.route(&agent, envelope, &tracker);
                }
                self.dispatch_loop(&agent, &mut receiver, &tracker, &cancel).await
            }
        };

        self.drain(&agent, receiver, tracker).await;
        outcome
    }

    /// Send local defaults and wait for the merged config
    async fn configure(
        &self,
        agent: &AgentHandle,
        receiver: &mut mpsc::UnboundedReceiver<Envelope>,
        backlog: &mut VecDeque<Envelope>,
    ) -> Result<(), RuntimeError> {
        let request = agent.config_request();
        agent.send_frame(&request)?;

        let wait = async {
            loop {
                let Some(envelope) = receiver.recv().await else {
                    return Err(RuntimeError::Disconnected);
                };
                match envelope.parse_channel() {
                    Channel::CommandReply => {
                        let frame = Frame::from_payload(&envelope.channel, envelope.payload)?;
                        match frame.name.as_str() {
                            IDENTITY_COMMAND => agent.set_identity(Identity::from_frame(&frame)?),
                            CONFIG_COMMAND if frame.reply_to.is_none() || frame.reply_to == request.uuid => {
                                agent.apply_config(frame.data)?;
                                debug!(agent = %agent.name(), "Config synced");
                                return Ok(());
                            }
                            other => debug!(agent = %agent.name(), command = %other, "Deferring command until running"),
                        }
                    }
                    Channel::Error => {
                        return Err(RuntimeError::ConfigSync(envelope.payload.to_string()));
                    }
                    _ => backlog.push_back(envelope),
                }
            }
        };

        tokio::time::timeout(self.settings.config_timeout, wait)
            .await
            .map_err(|_| RuntimeError::Timeout("config reply"))?
    }

    async fn dispatch_loop(
        &self,
        agent: &AgentHandle,
        receiver: &mut mpsc::UnboundedReceiver<Envelope>,
        tracker: &TaskTracker,
        cancel: &CancellationToken,
    ) -> Result<(), RuntimeError> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(agent = %self.name, "Shutdown requested");
                    return Ok(());
                }
                envelope = receiver.recv() => match envelope {
                    Some(envelope) => self.route(agent, envelope, tracker),
                    None => {
                        warn!(agent = %self.name, "Hub connection closed");
                        return Err(RuntimeError::Disconnected);
                    }
                }
            }
        }
    }

    /// Deliver one inbound envelope
    fn route(&self, agent: &AgentHandle, envelope: Envelope, tracker: &TaskTracker) {
        let channel = envelope.parse_channel();
        let frame = match channel {
            Channel::Event(_) | Channel::CommandReply => {
                match Frame::from_payload(&envelope.channel, envelope.payload) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(agent = %self.name, error = %e, "Dropping malformed frame");
                        return;
                    }
                }
            }
            Channel::Error => {
                warn!(agent = %self.name, error = %envelope.payload, "Hub reported an error");
                return;
            }
            Channel::Command(_) | Channel::Unknown(_) => {
                debug!(agent = %self.name, channel = %envelope.channel, "Ignoring envelope");
                return;
            }
        };

        match channel {
            Channel::Event(_) => {
                let handlers = self
                    .events
                    .get(&frame.name)
                    .into_iter()
                    .chain(self.events.get(WILDCARD))
                    .flatten();
                self.spawn_handlers(handlers, agent, frame, tracker);
            }
            _ => {
                let Some(frame) = agent.resolve_reply(frame) else {
                    return;
                };
                match frame.name.as_str() {
                    IDENTITY_COMMAND => match Identity::from_frame(&frame) {
                        Ok(identity) => agent.set_identity(identity),
                        Err(e) => warn!(agent = %self.name, error = %e, "Malformed identity"),
                    },
                    CONFIG_COMMAND => {
                        if let Err(e) = agent.apply_config(frame.data) {
                            error!(agent = %self.name, error = %e, "Rejected config from hub");
                        }
                    }
                    name => {
                        let handlers = self.commands.get(name).into_iter().flatten();
                        self.spawn_handlers(handlers, agent, frame, tracker);
                    }
                }
            }
        }
    }

    fn spawn_handlers<'a, I>(&self, handlers: I, agent: &AgentHandle, frame: Frame, tracker: &TaskTracker)
    where
        I: Iterator<Item = &'a FrameHandler>,
    {
        for handler in handlers {
            let invocation = handler(agent.clone(), frame.clone());
            let agent_name = self.name.clone();
            let frame_name = frame.name.clone();
            tracker.spawn(async move {
                if let Err(e) = invocation.await {
                    warn!(agent = %agent_name, frame = %frame_name, error = %e, "Handler failed");
                }
            });
        }
    }

    /// Shutdown hook, then jobs, then the link
    async fn drain(&mut self, agent: &AgentHandle, receiver: mpsc::UnboundedReceiver<Envelope>, tracker: TaskTracker) {
        self.lifecycle.advance(LifecycleState::Draining);
        let budget = self.settings.shutdown_timeout;

        if let Some(shutdown) = self.shutdown.take() {
            match tokio::time::timeout(budget, shutdown(agent.clone())).await {
                Ok(Ok(())) => debug!(agent = %self.name, "Shutdown hook finished"),
                Ok(Err(e)) => warn!(agent = %self.name, error = %e, "Shutdown hook failed"),
                Err(_) => warn!(
                    agent = %self.name,
                    timeout_ms = budget.as_millis() as u64,
                    "Shutdown hook timed out, abandoning it"
                ),
            }
        }

        self.scheduler.stop(budget).await;
        tracker.close();
        if tokio::time::timeout(budget, tracker.wait()).await.is_err() {
            warn!(agent = %self.name, "Abandoning in-flight handlers");
        }

        agent.detach();
        drop(receiver);
        self.lifecycle.advance(LifecycleState::Stopped);
        info!(agent = %self.name, "Agent stopped");
    }
}
