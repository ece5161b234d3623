//! CLI Tooling
//!
//! Command-line interface for the hub, the agent processes it supervises and
//! the administrative storage operations.

use crate::agents;
use crate::bootstrap::{self, AGENT_TOKEN_ENV};
use crate::config::{ConfigLoader, ZygoteConfig};
use crate::error::ApiError;
use crate::hub::{Hub, HubServer};
use crate::logging::LoggingConfig;
use crate::runtime::WsConnector;
use crate::store::{SledStorage, Storage};
use crate::supervisor::Supervisor;
use crate::tooling::admin::{self, OutputFormat};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Zygote - personal automation hub
#[derive(Parser)]
#[command(name = "zygote")]
#[command(about = "Frame broker, agent runtime and process supervisor")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file path (overrides default config loading)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr, both)
    #[arg(long, global = true)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the hub, provision agents and supervise them
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one built-in agent against a hub
    Agent {
        /// Built-in agent name
        name: String,
        /// Hub WebSocket URL (default: derived from hub config)
        #[arg(long)]
        url: Option<String>,
        /// Agent token
        #[arg(long, env = AGENT_TOKEN_ENV, hide_env_values = true)]
        token: Option<String>,
    },
    /// Inspect agents
    Agents {
        #[command(subcommand)]
        command: AgentsCommands,
    },
    /// Inspect and edit space membership
    Spaces {
        #[command(subcommand)]
        command: SpacesCommands,
    },
    /// Mint and revoke agent tokens
    Token {
        #[command(subcommand)]
        command: TokenCommands,
    },
}

#[derive(Subcommand)]
pub enum AgentsCommands {
    List {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

#[derive(Subcommand)]
pub enum SpacesCommands {
    List {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Add an agent to a space (created if missing)
    Join { agent: String, space: String },
    /// Remove an agent from a space
    Leave { agent: String, space: String },
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Print a new token for an agent
    Mint { agent: String },
    Revoke { token: String },
}

/// Loaded configuration plus the operations behind each command
pub struct CliContext {
    config: ZygoteConfig,
}

impl CliContext {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ApiError> {
        let config = match &config_path {
            Some(path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load()?,
        };
        config.validate()?;
        Ok(Self { config })
    }

    pub fn with_config(config: ZygoteConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ZygoteConfig {
        &self.config
    }

    /// Config logging section with command-line overrides applied
    pub fn logging_config(&self, cli: &Cli) -> LoggingConfig {
        let mut logging = self.config.logging.clone();
        if let Some(level) = &cli.log_level {
            logging.level = level.clone();
        }
        if let Some(format) = &cli.log_format {
            logging.format = format.clone();
        }
        if let Some(output) = &cli.log_output {
            logging.output = output.clone();
        }
        if let Some(file) = &cli.log_file {
            logging.file = Some(file.clone());
        }
        logging
    }

    /// Execute a CLI command
    pub async fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Serve { host, port } => self.serve(host.clone(), *port).await,
            Commands::Agent { name, url, token } => self.run_agent(name, url.clone(), token.clone()).await,
            Commands::Agents { command } => {
                let storage = self.open_storage()?;
                match command {
                    AgentsCommands::List { format } => admin::list_agents(&storage, OutputFormat::parse(format)?),
                }
            }
            Commands::Spaces { command } => {
                let storage = self.open_storage()?;
                let output = match command {
                    SpacesCommands::List { format } => admin::list_spaces(&storage, OutputFormat::parse(format)?),
                    SpacesCommands::Join { agent, space } => admin::join_space(&storage, agent, space),
                    SpacesCommands::Leave { agent, space } => admin::leave_space(&storage, agent, space),
                }?;
                storage.flush()?;
                Ok(output)
            }
            Commands::Token { command } => {
                let storage = self.open_storage()?;
                let output = match command {
                    TokenCommands::Mint { agent } => admin::mint_token(&storage, agent),
                    TokenCommands::Revoke { token } => admin::revoke_token(&storage, token),
                }?;
                storage.flush()?;
                Ok(output)
            }
        }
    }

    fn open_storage(&self) -> Result<SledStorage, ApiError> {
        Ok(SledStorage::open(&self.config.hub.database_path())?)
    }

    async fn serve(&self, host: Option<String>, port: Option<u16>) -> Result<String, ApiError> {
        let mut config = self.config.clone();
        if let Some(host) = host {
            config.hub.host = host;
        }
        if let Some(port) = port {
            config.hub.port = port;
        }

        let storage = Arc::new(self.open_storage()?);
        let hub = Arc::new(Hub::new(storage.clone() as Arc<dyn Storage>));
        let server = HubServer::bind(hub, &config.hub.bind_address()).await?;
        // port 0 binds an ephemeral port; agents need the real one
        config.hub.port = server.local_addr()?.port();
        info!(url = %config.hub.url(), "Hub listening");

        let supervisor = Supervisor::new((&config.supervisor).into());
        let exe = std::env::current_exe()?;
        bootstrap::bootstrap(&config, storage.as_ref(), &supervisor, &exe).await?;

        let cancel = CancellationToken::new();
        let mut server_task = tokio::spawn(server.serve(cancel.clone()));
        supervisor.start().await?;

        tokio::select! {
            _ = shutdown_signal() => info!("Shutdown requested"),
            result = &mut server_task => {
                warn!("Hub server exited on its own");
                supervisor.stop().await;
                result.map_err(|e| ApiError::ConfigError(format!("hub server task failed: {}", e)))??;
                return Ok("Hub stopped".to_string());
            }
        }

        supervisor.stop().await;
        cancel.cancel();
        match server_task.await {
            Ok(result) => result?,
            Err(e) => error!(error = %e, "Hub server task failed"),
        }
        storage.flush()?;
        Ok("Hub stopped".to_string())
    }

    async fn run_agent(&self, name: &str, url: Option<String>, token: Option<String>) -> Result<String, ApiError> {
        let token = token.ok_or_else(|| {
            ApiError::ConfigError(format!("agent token missing: pass --token or set {}", AGENT_TOKEN_ENV))
        })?;
        let url = url.unwrap_or_else(|| self.config.hub.url());
        let runtime = agents::build(name)?.with_settings((&self.config.runtime).into());
        let connector = WsConnector::new(url);
        let cancel = CancellationToken::new();

        let run = runtime.run(&connector, &token, cancel.clone());
        tokio::pin!(run);
        tokio::select! {
            result = &mut run => {
                result?;
                return Ok(String::new());
            }
            _ = shutdown_signal() => {
                info!(agent = %name, "Draining; signal again to force exit");
                cancel.cancel();
            }
        }
        tokio::select! {
            result = &mut run => result?,
            _ = shutdown_signal() => warn!(agent = %name, "Forced exit"),
        }
        Ok(String::new())
    }
}

/// Ctrl-C, or SIGTERM from the supervisor
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
