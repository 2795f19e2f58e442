//! `stowage` command line entry point.

mod cli;
mod error;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::{execute, load_config, Cli};
use crate::error::CliError;

fn init_logging(json: bool) -> Result<(), CliError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("stowage=info"));
    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
    result.map_err(|e| CliError::Logging(e.to_string()))
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    init_logging(cli.json_logs)?;

    let config = load_config(&cli)?;
    let output = execute(cli.command, config).await?;
    println!("{}", output);
    Ok(())
}
