//! Pipeline run controller
//!
//! Sequences per-source extraction and normalization, isolates per-source
//! failures, merges the surviving tables, deduplicates across sources, and
//! drives the sink. One source's failure never aborts the run; an
//! unreachable sink or a failed load does.

use tracing::{error, info, warn};

use tdp_common::{EtlError, Result};

use crate::config::PipelineConfig;
use crate::extract::{self, Extractor};
use crate::load::{TableSink, WriteStrategy};
use crate::normalize::Normalizer;
use crate::table::Table;

/// Run-level policies, from configuration with optional CLI overrides
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Write strategy for the final load
    pub strategy: WriteStrategy,
    /// Rows per bulk-insert batch
    pub batch_size: usize,
    /// Column to deduplicate the merged table on; full-row dedup when unset
    pub dedup_key: Option<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            strategy: WriteStrategy::default(),
            batch_size: crate::config::DEFAULT_BATCH_SIZE,
            dedup_key: None,
        }
    }
}

impl RunOptions {
    /// Options as configured, before CLI overrides
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            strategy: config.load_strategy,
            batch_size: config.mysql.batch_size,
            dedup_key: config.dedup_key.clone(),
        }
    }
}

/// The ETL pipeline: ordered sources, one normalizer, one sink
pub struct Pipeline<S: TableSink> {
    extractors: Vec<Box<dyn Extractor>>,
    normalizer: Normalizer,
    sink: S,
    options: RunOptions,
}

impl<S: TableSink> Pipeline<S> {
    pub fn new(
        extractors: Vec<Box<dyn Extractor>>,
        normalizer: Normalizer,
        sink: S,
        options: RunOptions,
    ) -> Self {
        Self {
            extractors,
            normalizer,
            sink,
            options,
        }
    }

    /// Build a pipeline with real transport extractors from configuration
    pub fn from_config(config: &PipelineConfig, sink: S, options: RunOptions) -> Self {
        let extractors = config.sources.iter().map(extract::for_source).collect();
        Self::new(extractors, Normalizer::new(config.rules.clone()), sink, options)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Execute one full run
    ///
    /// The sink must be reachable before any source is touched. Each source
    /// is extracted and normalized in configured order; failures are
    /// recorded and the loop continues. With zero successes the run ends
    /// degraded without a load. Otherwise the tables are merged,
    /// deduplicated, and loaded under the configured strategy.
    pub async fn run(&self) -> Result<RunSummary> {
        info!(sources = self.extractors.len(), "Starting ETL run");

        self.sink.test_connection().await?;

        let mut tables: Vec<Table> = Vec::new();
        let mut failures: Vec<SourceFailure> = Vec::new();

        for extractor in &self.extractors {
            let source = extractor.name().to_string();
            match self.process_source(extractor.as_ref()).await {
                Ok(table) => {
                    info!(source = %source, rows = table.num_rows(), "Source processed");
                    tables.push(table);
                },
                Err(e) => {
                    error!(source = %source, error = %e, "Skipping source");
                    failures.push(SourceFailure {
                        source,
                        error: e.to_string(),
                    });
                },
            }
        }

        let sources_attempted = self.extractors.len();

        if tables.is_empty() {
            warn!("No data extracted from any source");
            return Ok(RunSummary {
                outcome: RunOutcome::Degraded,
                sources_attempted,
                failures,
                rows_loaded: 0,
            });
        }

        let mut merged = Table::merge(tables);
        let removed = match &self.options.dedup_key {
            Some(key) => merged.dedup_by_column(key)?,
            None => merged.dedup_rows(),
        };
        info!(
            rows = merged.num_rows(),
            removed = removed,
            "Merged tables from all successful sources"
        );

        let rows_loaded = self
            .sink
            .load(&merged, self.options.strategy, self.options.batch_size)
            .await?;

        info!(rows = rows_loaded, "ETL run completed successfully");
        Ok(RunSummary {
            outcome: RunOutcome::Completed,
            sources_attempted,
            failures,
            rows_loaded,
        })
    }

    /// Extract and normalize one source; any error is attributed to it
    async fn process_source(&self, extractor: &dyn Extractor) -> Result<Table> {
        let raw = extractor
            .extract()
            .await
            .map_err(|e| EtlError::extraction(extractor.name(), format!("{:#}", e)))?;
        self.normalizer.normalize(raw)
    }
}

/// Terminal outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Data was merged and loaded
    Completed,
    /// Zero sources succeeded; nothing was loaded
    Degraded,
}

/// One recorded per-source failure
#[derive(Debug, Clone)]
pub struct SourceFailure {
    pub source: String,
    pub error: String,
}

/// Externally observable result of a run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub sources_attempted: usize,
    pub failures: Vec<SourceFailure>,
    pub rows_loaded: u64,
}

impl RunSummary {
    pub fn sources_succeeded(&self) -> usize {
        self.sources_attempted - self.failures.len()
    }

    pub fn is_degraded(&self) -> bool {
        self.outcome == RunOutcome::Degraded
    }

    /// One-line human-readable summary
    pub fn summary(&self) -> String {
        match self.outcome {
            RunOutcome::Degraded => format!(
                "Run degraded: all {} sources failed, nothing loaded",
                self.sources_attempted
            ),
            RunOutcome::Completed => format!(
                "Run completed: {}/{} sources succeeded, {} rows loaded",
                self.sources_succeeded(),
                self.sources_attempted,
                self.rows_loaded
            ),
        }
    }
}
