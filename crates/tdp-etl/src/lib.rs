//! TDP ETL Library
//!
//! Batch ETL for remote tabular files: extract CSV files from configured
//! FTP/SFTP servers, normalize each table through a declarative rule set,
//! merge and deduplicate across sources, and bulk-load the result into
//! MySQL.
//!
//! # Example
//!
//! ```no_run
//! use tdp_etl::config::PipelineConfig;
//! use tdp_etl::load::MySqlLoader;
//! use tdp_etl::pipeline::{Pipeline, RunOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = PipelineConfig::load("config/servers.yaml")?;
//!     let sink = MySqlLoader::connect(&config.mysql).await?;
//!     let options = RunOptions::from_config(&config);
//!     let summary = Pipeline::from_config(&config, sink, options).run().await?;
//!     println!("{}", summary.summary());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod extract;
pub mod load;
pub mod normalize;
pub mod pipeline;
pub mod table;
