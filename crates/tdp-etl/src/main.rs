//! tdp-etl - batch ETL for remote tabular files

use anyhow::Result;
use clap::Parser;
use tdp_common::logging::{init_logging, LogConfig, LogLevel};
use tracing::{info, warn};

use tdp_etl::config::{PipelineConfig, DEFAULT_CONFIG_PATH};
use tdp_etl::load::{MySqlLoader, TableSink, WriteStrategy};
use tdp_etl::pipeline::{Pipeline, RunOptions};

#[derive(Parser, Debug)]
#[command(name = "tdp-etl")]
#[command(author, version, about = "Batch ETL for remote tabular files")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Path to the pipeline configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Run the full extract-normalize-load pipeline
    Run {
        /// Override the configured write strategy
        #[arg(long, value_enum)]
        strategy: Option<WriteStrategy>,

        /// Override the configured insert batch size
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Validate configuration and sink connectivity
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Environment-driven logging config; the verbose flag raises the level
    let mut log_config = LogConfig::from_env().unwrap_or_default();
    log_config.log_file_prefix = "tdp-etl".to_string();
    if cli.verbose {
        log_config.level = LogLevel::Debug;
    }
    init_logging(&log_config)?;

    let config = PipelineConfig::load(&cli.config)?;

    match cli.command {
        Command::Run {
            strategy,
            batch_size,
        } => {
            let mut options = RunOptions::from_config(&config);
            if let Some(strategy) = strategy {
                options.strategy = strategy;
            }
            if let Some(batch_size) = batch_size {
                options.batch_size = batch_size;
            }

            let sink = MySqlLoader::connect(&config.mysql).await?;
            let pipeline = Pipeline::from_config(&config, sink, options);
            let summary = pipeline.run().await?;

            for failure in &summary.failures {
                warn!(source = %failure.source, error = %failure.error, "Source failed this run");
            }
            if summary.is_degraded() {
                warn!("{}", summary.summary());
            } else {
                info!("{}", summary.summary());
            }
            pipeline.sink().close().await;
        },
        Command::Check => {
            info!(
                sources = config.sources.len(),
                strategy = %config.load_strategy,
                "Configuration OK"
            );
            let sink = MySqlLoader::connect(&config.mysql).await?;
            sink.test_connection().await?;
            info!("Sink connection OK");
            sink.close().await;
        },
    }

    Ok(())
}
