use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use tracing::{info, Level};

mod commands;

use commands::{BucketsCommand, CredentialsCommand, ObjectsCommand};

#[derive(Parser)]
#[command(
    name = "sts-broker",
    about = "Exchange a service account token for MinIO tenant credentials",
    version = env!("CARGO_PKG_VERSION"),
    author = "ktruck"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Exchange the token and print the issued credentials
    Credentials(CredentialsCommand),
    /// List the buckets visible to the tenant credentials
    Buckets(BucketsCommand),
    /// List objects in a bucket
    Objects(ObjectsCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays scriptable
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        cli.log_level.parse().unwrap_or(Level::INFO)
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Commands::Credentials(cmd) => {
            info!("Requesting tenant credentials");
            cmd.run().await?;
        }
        Commands::Buckets(cmd) => {
            info!("Listing buckets");
            cmd.run().await?;
        }
        Commands::Objects(cmd) => {
            info!("Listing objects");
            cmd.run().await?;
        }
    }

    let _ = io::stdout().flush();
    Ok(())
}
