//! Contract Compilation
//!
//! Runs the compile jobs of `config/compile.toml` in parallel worker
//! processes and fails if any job fails.

use anyhow::Result;
use clap::Parser;
use deployer::compile::{CompileConfig, WorkerPool};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "compile_contracts")]
#[command(about = "Compile contracts with a bounded pool of worker processes")]
struct Args {
    /// Path to the compile configuration (default: config/compile.toml or COMPILE_CONFIG_PATH env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Overrides max_workers from the configuration
    #[arg(short = 'j', long)]
    max_workers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();

    let config = CompileConfig::load_from_path(args.config.as_deref())?;
    let pool = WorkerPool::new(args.max_workers.unwrap_or(config.max_workers));
    info!(
        "Compiling {} jobs with {} workers",
        config.jobs.len(),
        pool.max_workers()
    );

    if let Err(e) = pool.run(config.jobs).await {
        error!("❌ {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
