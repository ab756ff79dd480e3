//! llm-gateway
//!
//! Process bootstrap for the gateway core. Loads configuration, installs
//! logging, builds the [`Gateway`] and then either answers a single query
//! from the command line or serves newline-delimited JSON on a Unix socket.
//!
//! # Usage
//!
//! ```bash
//! # One query, routed by importance
//! llm-gateway ask --importance critical "prove that sqrt(2) is irrational"
//!
//! # Which query type would this be?
//! llm-gateway classify "write a haiku about rust"
//!
//! # Pool and classifier health as JSON
//! llm-gateway health
//!
//! # Socket server
//! llm-gateway serve --socket /tmp/gateway.sock
//! ```
//!
//! # Signals
//!
//! - SIGTERM / SIGINT: stop accepting, drain connections, remove the socket

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use gateway_core::config::CacheStoreKind;
use gateway_core::{load_config_from_path, ConfigOverrides, Gateway, GatewayRequest, Importance};

mod server;

use server::GatewayServer;

/// LLM inference gateway
#[derive(Parser, Debug)]
#[command(name = "llm-gateway")]
#[command(author, version, about = "Rate-limited, cached, model-aware LLM gateway", long_about = None)]
struct Args {
    /// Configuration file (defaults to $XDG_CONFIG_HOME/llm-gateway/gateway.toml)
    #[arg(short, long, global = true, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info", env = "GATEWAY_LOG_LEVEL")]
    log_level: String,

    /// Override the big pool URL
    #[arg(long, global = true)]
    big_pool_url: Option<String>,

    /// Override the fast pool URL
    #[arg(long, global = true)]
    fast_pool_url: Option<String>,

    /// Override the classification model
    #[arg(long, global = true)]
    classifier_model: Option<String>,

    /// Disable per-caller rate limiting
    #[arg(long, global = true)]
    no_rate_limit: bool,

    /// Remote cache store (none, memory)
    #[arg(long, global = true)]
    cache_store: Option<CacheStoreKind>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Answer one query and print the response
    Ask {
        /// Query text
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Routing hint (normal, fast, critical)
        #[arg(short, long, default_value = "normal")]
        importance: Importance,

        /// System prompt passed to the model
        #[arg(short, long)]
        system: Option<String>,

        /// Caller identity for rate limiting
        #[arg(long, default_value = "cli")]
        caller: String,

        /// Print the full response with routing decision as JSON
        #[arg(long)]
        json: bool,
    },

    /// Classify a query without answering it
    Classify {
        /// Query text
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },

    /// Print pool and classifier health as JSON
    Health,

    /// Serve newline-delimited JSON requests on a Unix socket
    Serve {
        /// Socket path (defaults to $XDG_RUNTIME_DIR/llm-gateway/gateway.sock)
        #[arg(short, long, env = "GATEWAY_SOCKET")]
        socket: Option<PathBuf>,
    },
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new();
        if let Some(ref url) = self.big_pool_url {
            overrides = overrides.with_big_pool_url(url.clone());
        }
        if let Some(ref url) = self.fast_pool_url {
            overrides = overrides.with_fast_pool_url(url.clone());
        }
        if let Some(ref model) = self.classifier_model {
            overrides = overrides.with_classifier_model(model.clone());
        }
        if self.no_rate_limit {
            overrides = overrides.with_rate_limit_enabled(false);
        }
        if let Some(store) = self.cache_store {
            overrides = overrides.with_cache_store(store);
        }
        overrides
    }
}

/// Default socket path, private to the current user
fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir)
            .join("llm-gateway")
            .join("gateway.sock")
    } else {
        // SAFETY: getuid has no preconditions and cannot fail
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/llm-gateway-{uid}")).join("gateway.sock")
    }
}

/// Initialize logging on stderr so stdout stays machine-readable
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("gateway_daemon={level},gateway_core={level}"))
    });

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))?;

    Ok(())
}

fn build_gateway(args: &Args) -> Result<Gateway> {
    let mut config =
        load_config_from_path(args.config.clone()).context("Failed to load configuration")?;
    args.overrides()
        .apply(&mut config)
        .context("Invalid command line override")?;

    info!(source = %config.source(), "Configuration loaded");

    Gateway::from_config(&config).context("Failed to build gateway")
}

/// Resolves when SIGTERM or SIGINT arrives, then flips the shutdown flag
async fn watch_signals(shutdown: watch::Sender<bool>) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
        _ = sigint.recv() => info!("Received SIGINT, initiating shutdown"),
    }

    let _ = shutdown.send(true);
    Ok(())
}

async fn run(args: Args) -> Result<ExitCode> {
    let gateway = build_gateway(&args)?;

    match args.command {
        Command::Ask {
            query,
            importance,
            system,
            caller,
            json,
        } => {
            let mut request = GatewayRequest::new(caller, query.join(" ")).with_importance(importance);
            if let Some(system) = system {
                request = request.with_system_prompt(system);
            }

            let answer = gateway.route(&request).await.context("Query failed")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else if answer.response.is_empty() {
                error!("Every model call failed; no answer");
                return Ok(ExitCode::FAILURE);
            } else {
                println!("{}", answer.response);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Classify { query } => {
            let classification = gateway.classify(&query.join(" ")).await;
            println!("{}", serde_json::to_string_pretty(&classification)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Health => {
            let report = gateway.health_check().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.is_serving() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }
        Command::Serve { socket } => {
            let socket_path = socket.unwrap_or_else(default_socket_path);
            info!(socket_path = ?socket_path, "Socket path");

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if let Err(e) = watch_signals(shutdown_tx).await {
                    error!(error = %e, "Signal handling unavailable");
                }
            });

            let server = GatewayServer::new(socket_path, Arc::new(gateway));
            match server.run(shutdown_rx).await {
                Ok(()) => {
                    info!("Gateway server stopped cleanly");
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => {
                    error!(error = %e, "Gateway server stopped with error");
                    Err(e)
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    init_logging(&args.log_level)?;

    info!(version = env!("CARGO_PKG_VERSION"), pid = std::process::id(), "llm-gateway starting");

    run(args).await
}
