use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use dashstream_core::{
    Config, Server,
    auth::password::hash_password,
    config::{AuthConfig, RateLimitConfig},
};
use std::{path::PathBuf, time::Duration};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "dashstream", about = "Live telemetry dashboard backend for a ledger node")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,

    /// Tracing filter, e.g. `info` or `dashstream_core=debug`
    #[arg(long, env = "RUST_LOG", default_value = "info", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the argon2id hash of a password for --auth-password-hash
    HashPassword {
        #[arg(long, env = "DASHSTREAM_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

#[derive(Args)]
struct RunArgs {
    /// HTTP bind address
    #[arg(long, env = "DASHSTREAM_BIND_ADDRESS", default_value = "localhost:8081")]
    bind_address: String,

    /// Base URL of the node REST API
    #[arg(long, env = "DASHSTREAM_NODE_URL", default_value = "http://localhost:14265")]
    node_url: String,

    #[arg(long, env = "DASHSTREAM_AUTH_USERNAME", default_value = "admin")]
    auth_username: String,

    /// PHC string of the admin password
    #[arg(long, env = "DASHSTREAM_AUTH_PASSWORD_HASH", hide_env_values = true)]
    auth_password_hash: Option<String>,

    #[arg(long, env = "DASHSTREAM_AUTH_SESSION_TIMEOUT", default_value = "72h", value_parser = humantime::parse_duration)]
    auth_session_timeout: Duration,

    /// PEM file holding the Ed25519 signing key, created if missing
    #[arg(long, env = "DASHSTREAM_AUTH_IDENTITY_FILE", default_value = "identity.key")]
    auth_identity_file: PathBuf,

    /// Hex encoded Ed25519 private key, must match the identity file if both exist
    #[arg(
        long,
        env = "DASHSTREAM_AUTH_IDENTITY_PRIVATE_KEY",
        default_value = "",
        hide_env_values = true,
        hide_default_value = true
    )]
    auth_identity_private_key: String,

    #[arg(long, env = "DASHSTREAM_AUTH_RATE_LIMIT_ENABLED", default_value_t = true, action = clap::ArgAction::Set)]
    auth_rate_limit_enabled: bool,

    #[arg(long, env = "DASHSTREAM_AUTH_RATE_LIMIT_PERIOD", default_value = "1m", value_parser = humantime::parse_duration)]
    auth_rate_limit_period: Duration,

    #[arg(long, env = "DASHSTREAM_AUTH_RATE_LIMIT_MAX_REQUESTS", default_value_t = 20)]
    auth_rate_limit_max_requests: u32,

    #[arg(long, env = "DASHSTREAM_AUTH_RATE_LIMIT_MAX_BURST", default_value_t = 30)]
    auth_rate_limit_max_burst: u32,

    /// Deadline for each websocket send and broadcast
    #[arg(long, env = "DASHSTREAM_WEBSOCKET_WRITE_TIMEOUT", default_value = "5s", value_parser = humantime::parse_duration)]
    websocket_write_timeout: Duration,
}

impl RunArgs {
    fn into_config(self) -> Config {
        Config {
            bind_address: self.bind_address,
            node_url: self.node_url,
            websocket_write_timeout: self.websocket_write_timeout,
            auth: AuthConfig {
                username: self.auth_username,
                password_hash: self.auth_password_hash.filter(|hash| !hash.is_empty()),
                session_timeout: self.auth_session_timeout,
                identity_file: self.auth_identity_file,
                identity_private_key: self.auth_identity_private_key,
                rate_limit: RateLimitConfig {
                    enabled: self.auth_rate_limit_enabled,
                    period: self.auth_rate_limit_period,
                    max_requests: self.auth_rate_limit_max_requests,
                    max_burst: self.auth_rate_limit_max_burst,
                },
            },
            ..Config::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&cli.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli.command {
        Some(Commands::HashPassword { password }) => {
            let hash = hash_password(&password).context("failed to hash password")?;
            println!("{hash}");
            Ok(())
        }
        None => run(cli.run.into_config()).await,
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "starting dashstream");

    let server = match Server::new(config) {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "startup failed");
            return Err(e.into());
        }
    };

    if let Err(e) = server.run().await {
        error!(error = %e, "server stopped with error");
        return Err(e.into());
    }

    info!("dashstream stopped");
    Ok(())
}
