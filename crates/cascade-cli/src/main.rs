//! Cascade CI CLI entrypoint.

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod handlers;

use commands::{Commands, LogFormat};
use config::CascadeConfig;

#[derive(Parser)]
#[command(name = "cascade")]
#[command(author, version, about = "Cascade CI job scheduler", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, env = "CASCADE_CONFIG", default_value = "cascade.yaml")]
    config: PathBuf,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.log_format);
    let config = CascadeConfig::load(&cli.config)?;

    match cli.command {
        Commands::Validate { path } => handlers::validate(&path).await?,
        Commands::Migrate => handlers::migrate(&config).await?,
        Commands::Plan(args) => handlers::plan(&config, args).await?,
        Commands::Complete {
            job_id,
            status,
            repo,
            workflow,
        } => handlers::complete(&config, &job_id, status, &repo, workflow.as_deref()).await?,
        Commands::Jobs { batch_id, json } => handlers::list_jobs(&config, &batch_id, json).await?,
    }

    Ok(())
}
