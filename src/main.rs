use anyhow::Result;
use clap::{Parser, Subcommand};
use credbroker::{load_config, BrokerConfig, BrokerError, ConnectionManager, ConnectionStatus};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "credbroker.toml";

#[derive(Parser, Debug)]
#[command(
    name = "credbroker",
    version,
    about = "Connects to the cloud account through local CLI profiles and brokers CRM access tokens"
)]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a profile, locate the CRM secret and persist the connection
    Connect,
    /// Show the persisted connection status
    Status,
    /// Re-run the identity probe for the persisted connection
    Refresh,
    /// Drop held credentials and connect again
    Reconnect,
    /// Forget the connection and every held credential
    Disconnect,
    /// List workspaces with a persisted status
    Workspaces,
    /// Acquire a CRM access token
    Token {
        /// Print the bearer token value instead of a summary
        #[arg(long)]
        raw: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "credbroker=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = resolve_config(cli.config.as_deref())?;
    let manager = ConnectionManager::from_config(&config)?;

    info!(workspace = %config.storage.workspace, command = ?cli.command, "credbroker starting");

    if let Err(e) = run(&manager, cli.command).await {
        eprintln!("error: {}", e);
        eprintln!("hint: {}", e.remediation());
        std::process::exit(1);
    }

    Ok(())
}

fn resolve_config(path: Option<&Path>) -> Result<BrokerConfig> {
    let mut config = match path {
        Some(path) => load_config(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => load_config(DEFAULT_CONFIG_FILE)?,
        None => {
            debug!("No config file found, using defaults");
            BrokerConfig::default()
        }
    };
    config.apply_env();
    Ok(config)
}

async fn run(manager: &ConnectionManager, command: Command) -> Result<(), BrokerError> {
    match command {
        Command::Connect => print_status(&manager.connect().await?),
        Command::Reconnect => print_status(&manager.reconnect().await?),
        Command::Status => print_status(&manager.load_persisted().await?),
        Command::Refresh => {
            manager.load_persisted().await?;
            print_status(&manager.refresh_status().await?);
        }
        Command::Disconnect => {
            manager.disconnect().await?;
            println!("state: disconnected");
        }
        Command::Workspaces => {
            for workspace in manager.known_workspaces()? {
                println!("{}", workspace);
            }
        }
        Command::Token { raw } => {
            manager.resume().await?;
            let token = manager.token().await?;
            if raw {
                println!("{}", token.value);
            } else {
                let prefix: String = token.value.chars().take(6).collect();
                println!("token: {}…", prefix);
                println!("instance_url: {}", token.instance_url);
                println!("expires_at: {}", token.expires_at().to_rfc3339());
            }
        }
    }
    Ok(())
}

fn print_status(status: &ConnectionStatus) {
    println!("state: {:?}", status.state);
    let fields = [
        ("profile", &status.profile),
        ("account", &status.account),
        ("region", &status.region),
        ("soft_error", &status.soft_error),
        ("last_error", &status.last_error),
    ];
    for (label, value) in fields {
        if let Some(value) = value {
            println!("{}: {}", label, value);
        }
    }
    println!("secret_access_ok: {}", status.secret_access_ok);
    if let Some(expiry) = status.session_expiry_estimate {
        println!("session_expires: {}", expiry.to_rfc3339());
    }
    if let Some(updated) = status.updated_at {
        println!("updated_at: {}", updated.to_rfc3339());
    }
}
