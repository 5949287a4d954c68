//! sessionguard - admin CLI for a credential and session state file

use clap::{Parser, Subcommand};
use sessionguard::config::{Config, ExpirationPolicy};
use sessionguard::digest::password_digest;
use sessionguard::{AuthStore, JsonFilePersister, StoreError, Sweeper};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default state file when neither config nor CLI names one
const DEFAULT_STATE_FILE: &str = "sessionguard.json";

/// sessionguard - manage users and sessions in a sessionguard state file
#[derive(Parser, Debug)]
#[command(name = "sessionguard")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// State file (overrides config)
    #[arg(short, long, value_name = "FILE")]
    state_file: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a new user
    AddUser {
        username: String,
        #[arg(long, env = "SG_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Change a user's password (revokes their sessions by default)
    Passwd {
        username: String,
        #[arg(long, env = "SG_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Remove a user
    RemoveUser { username: String },
    /// Check a username/password pair
    Verify {
        username: String,
        #[arg(long, env = "SG_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// List registered users
    ListUsers,
    /// Verify credentials and print a new session token
    Login {
        username: String,
        #[arg(long, env = "SG_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Check whether a session token is valid
    Check { token: String },
    /// Destroy a session
    Logout { token: String },
    /// Remove expired sessions once
    Sweep,
    /// Print counts and metrics
    Stats,
    /// Run the expiry sweeper until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = if let Some(ref path) = cli.config {
        Config::from_file(path)?
    } else {
        Config::load()
    };
    config.validate()?;

    // CLI overrides
    if let Some(ref path) = cli.state_file {
        config.state_file = Some(path.clone());
    }

    // Initialize tracing
    let log_level = if cli.verbose {
        "sessionguard=trace".to_string()
    } else {
        config.log_level.clone()
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let state_file = config
        .state_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE));
    info!(
        "sessionguard {} (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("SG_BUILD_TIME")
    );
    info!("  State file: {}", state_file.display());
    info!("  Expiration: {:?}", config.expiration);
    if config.digest_key.is_none() {
        warn!("  No digest_key configured; password digests are unkeyed");
    }

    // A failed load aborts here rather than running on partial state.
    let persister = Arc::new(JsonFilePersister::new(state_file));
    let store = Arc::new(AuthStore::open(&config, persister)?);
    let key = config.digest_key.clone().unwrap_or_default();

    if let Err(e) = execute(cli.command, &config, store, key.as_bytes()).await {
        match e.downcast_ref::<StoreError>() {
            Some(store_err) => error!(code = store_err.code(), "{}", store_err),
            None => error!("{}", e),
        }
        return Err(e);
    }

    Ok(())
}

async fn execute(
    command: Command,
    config: &Config,
    store: Arc<AuthStore>,
    key: &[u8],
) -> Result<(), Box<dyn std::error::Error>> {
    let digest = |username: &str, password: &str| password_digest(key, username, password);

    match command {
        Command::AddUser { username, password } => {
            store.add_user(&username, digest(&username, &password))?;
            store.flush()?;
            println!("added {}", username);
        }
        Command::Passwd { username, password } => {
            store.set_password(&username, digest(&username, &password))?;
            store.flush()?;
            println!("password changed for {}", username);
        }
        Command::RemoveUser { username } => {
            if store.remove_user(&username) {
                store.flush()?;
                println!("removed {}", username);
            } else {
                println!("no such user: {}", username);
            }
        }
        Command::Verify { username, password } => {
            if store.verify_credentials(&username, digest(&username, &password).as_bytes()) {
                println!("ok");
            } else {
                return Err("credentials rejected".into());
            }
        }
        Command::ListUsers => {
            for name in store.usernames() {
                println!("{}", name);
            }
        }
        Command::Login { username, password } => {
            if !store.verify_credentials(&username, digest(&username, &password).as_bytes()) {
                return Err("credentials rejected".into());
            }
            let token = store.create_session(&username)?;
            store.flush()?;
            println!("{}", token);
        }
        Command::Check { token } => match store.validate_session(&token) {
            Some(session) => {
                if matches!(store.expiration_policy(), ExpirationPolicy::Sliding { .. }) {
                    store.flush()?;
                }
                println!(
                    "valid: user={} expires_at={}",
                    session.username,
                    session.expires_at.to_rfc3339()
                );
            }
            None => return Err("session not valid".into()),
        },
        Command::Logout { token } => {
            store.destroy_session(&token);
            store.flush()?;
            println!("logged out");
        }
        Command::Sweep => {
            let removed = store.sweep_expired();
            store.flush()?;
            println!("removed {} expired sessions", removed);
        }
        Command::Stats => {
            println!("users: {}", store.user_count());
            println!("sessions: {}", store.session_count());
            print!("{}", store.metrics().render()?);
        }
        Command::Watch => {
            let sweeper = Sweeper::spawn(store.clone(), config.sweep_interval);
            shutdown_signal().await;
            sweeper.shutdown().await;
            store.flush()?;
            info!("Sweeper shutdown complete");
        }
    }

    Ok(())
}

/// Handle shutdown signals (SIGINT, SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, stopping sweeper...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, stopping sweeper...");
        }
    }
}
