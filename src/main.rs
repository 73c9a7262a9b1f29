//! # Niche Scout CLI (`scout`)
//!
//! The `scout` binary runs the server and acts as its client.
//!
//! ## Usage
//!
//! ```bash
//! scout --config ./config/scout.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scout init` | Create the SQLite database and run schema migrations |
//! | `scout serve` | Start the HTTP server |
//! | `scout ping` | Report Keepa token status through the server |
//! | `scout search "<keyword>"` | Search, score, and filter Amazon products |
//! | `scout recent` | Show the latest searches and saved results |
//! | `scout watch <searches\|results>` | Follow a live view |
//! | `scout store-check` | Write a fixed test document to the store |
//!
//! Server commands read the config file. Client commands read
//! `SCOUT_SERVER_URL` and `SCOUT_TOKEN` from the environment.
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! scout init --config ./config/scout.toml
//!
//! # Start the server
//! KEEPA_KEY=... scout serve --config ./config/scout.toml
//!
//! # Search for kitchen tools between $10 and $25, saving one result
//! scout search "silicone spatula" --min-price 1000 --max-price 2500 --save B00EXAMPLE
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use niche_scout::client::{self, ClientConfig, ScoutClient};
use niche_scout::models::SearchRequest;
use niche_scout::store::Collection;
use niche_scout::{config, migrate, server};

/// Niche Scout: Amazon product niche research backed by Keepa.
#[derive(Parser)]
#[command(
    name = "scout",
    about = "Niche Scout: search, score, and save Amazon products via Keepa",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/scout.toml`. Only `init` and `serve` read it.
    #[arg(long, global = true, default_value = "./config/scout.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Start the HTTP server.
    Serve,

    /// Check Keepa connectivity and remaining tokens.
    Ping,

    /// Search products by keyword.
    Search {
        /// Search keyword.
        keyword: String,

        /// Minimum buy-box price in cents (inclusive).
        #[arg(long)]
        min_price: Option<i64>,

        /// Maximum buy-box price in cents (inclusive).
        #[arg(long)]
        max_price: Option<i64>,

        /// Maximum number of results to return.
        #[arg(long, default_value_t = 10)]
        max_results: usize,

        /// ASIN from the results to save. Repeatable.
        #[arg(long = "save")]
        save: Vec<String>,
    },

    /// Show the ten most recent searches and saved results.
    Recent,

    /// Follow a live view until interrupted.
    Watch {
        /// `searches` or `results`.
        collection: Collection,
    },

    /// Write the fixed `testDoc` search document.
    StoreCheck,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("niche_scout=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => {
            let cfg = config::load_config(&cli.config)?;
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            let cfg = config::load_config(&cli.config)?;
            server::run_server(&cfg).await?;
        }
        command => {
            let remote = ScoutClient::new(&ClientConfig::from_env()?)?;
            match command {
                Commands::Ping => client::run_ping(&remote).await?,
                Commands::Search {
                    keyword,
                    min_price,
                    max_price,
                    max_results,
                    save,
                } => {
                    let request = SearchRequest {
                        keyword,
                        min_price,
                        max_price,
                        max_results,
                    };
                    client::run_search(&remote, request, &save).await?;
                }
                Commands::Recent => client::run_recent(&remote).await?,
                Commands::Watch { collection } => client::run_watch(&remote, collection).await?,
                Commands::StoreCheck => client::run_store_check(&remote).await?,
                Commands::Init | Commands::Serve => unreachable!(),
            }
        }
    }

    Ok(())
}
