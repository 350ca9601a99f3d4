//! tillit: risk profile lookup CLI
//!
//! Thin wrapper over `DataClient` for checking a deployment by hand.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tillit::config::Config;
use tillit::{DataClient, DataClientBuilder, ProfileRequest};

/// Tillit CLI client
#[derive(Parser)]
#[command(name = "tillit")]
#[command(version = tillit::PKG_VERSION)]
#[command(about = "Fetch customer risk profiles from the risk service")]
struct Args {
    /// Config file (default: ~/.tillit/config.toml, then /etc/tillit/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Service base URL; overrides the config file
    #[arg(short, long, env = "TILLIT_BASE_URL")]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check service health
    Health,

    /// Fetch a customer's risk profile
    Fetch {
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        order_id: Option<String>,
        #[arg(long)]
        checkout_token: Option<String>,
        /// Session token to authenticate with
        #[arg(long, env = "TILLIT_SESSION_TOKEN", hide_env_values = true)]
        session_token: Option<String>,
        /// Bypass the response cache
        #[arg(long)]
        force: bool,
    },
}

fn build_client(args: &Args) -> tillit::Result<DataClient> {
    let builder = match (&args.config, &args.base_url) {
        (None, Some(url)) => DataClientBuilder::new().base_url(url.clone()),
        (path, url) => {
            let config = Config::load(path.as_deref())?;
            let builder = DataClientBuilder::from_config(&config)?;
            match url {
                Some(url) => builder.base_url(url.clone()),
                None => builder,
            }
        }
    };
    builder.build()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();
    let client = build_client(&args)?;

    match args.command {
        Command::Health => {
            let status = client.health_check().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
            if !status.healthy {
                std::process::exit(1);
            }
        }
        Command::Fetch {
            phone,
            email,
            order_id,
            checkout_token,
            session_token,
            force,
        } => {
            if let (Some(token), Some(auth)) = (session_token.as_deref(), client.auth()) {
                if let Err(e) = auth.initialize_with_session_token(token).await {
                    eprintln!("warning: authentication failed: {e}");
                }
            }

            let request = ProfileRequest {
                phone,
                email,
                order_id,
                checkout_token,
                force_refresh: force,
                ..Default::default()
            };
            let result = client.fetch_profile(&request).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if result.is_fallback() {
                std::process::exit(2);
            }
        }
    }

    Ok(())
}
