//! Pipeline controller tests
//!
//! Drive the controller through static extractors and a recording sink to
//! exercise failure isolation, the degraded path, cross-source merge and
//! deduplication, and the connectivity gate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use async_trait::async_trait;

use tdp_common::EtlError;
use tdp_etl::extract::Extractor;
use tdp_etl::load::{TableSink, WriteStrategy};
use tdp_etl::normalize::{NormalizeRules, Normalizer};
use tdp_etl::pipeline::{Pipeline, RunOptions, RunOutcome};
use tdp_etl::table::{CsvOptions, Table, Value};

/// Extractor returning a fixed CSV payload, or failing like a dead server
struct StaticExtractor {
    name: String,
    csv: Option<&'static str>,
    calls: Arc<AtomicUsize>,
}

impl StaticExtractor {
    fn ok(name: &str, csv: &'static str, calls: &Arc<AtomicUsize>) -> Box<dyn Extractor> {
        Box::new(Self {
            name: name.to_string(),
            csv: Some(csv),
            calls: Arc::clone(calls),
        })
    }

    fn failing(name: &str, calls: &Arc<AtomicUsize>) -> Box<dyn Extractor> {
        Box::new(Self {
            name: name.to_string(),
            csv: None,
            calls: Arc::clone(calls),
        })
    }
}

#[async_trait]
impl Extractor for StaticExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn extract(&self) -> anyhow::Result<Table> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.csv {
            Some(csv) => Ok(Table::from_csv(csv.as_bytes(), &CsvOptions::default())?),
            None => Err(anyhow!("connection refused")),
        }
    }
}

/// Sink that records loads instead of writing anywhere
#[derive(Default)]
struct RecordingSink {
    fail_connection: bool,
    loads: Mutex<Vec<(Table, WriteStrategy, usize)>>,
}

#[async_trait]
impl TableSink for RecordingSink {
    async fn test_connection(&self) -> tdp_common::Result<()> {
        if self.fail_connection {
            Err(EtlError::load("sink unreachable"))
        } else {
            Ok(())
        }
    }

    async fn load(
        &self,
        table: &Table,
        strategy: WriteStrategy,
        batch_size: usize,
    ) -> tdp_common::Result<u64> {
        let rows = table.num_rows() as u64;
        self.loads
            .lock()
            .unwrap()
            .push((table.clone(), strategy, batch_size));
        Ok(rows)
    }

    async fn execute(&self, _statement: &str) -> tdp_common::Result<u64> {
        Ok(0)
    }
}

fn pipeline(
    extractors: Vec<Box<dyn Extractor>>,
    options: RunOptions,
) -> Pipeline<RecordingSink> {
    Pipeline::new(
        extractors,
        Normalizer::new(NormalizeRules::default()),
        RecordingSink::default(),
        options,
    )
}

#[tokio::test]
async fn test_one_failed_source_does_not_abort_the_run() {
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = pipeline(
        vec![
            StaticExtractor::ok("partner-a", "id,v\n1,a\n2,b\n", &calls),
            StaticExtractor::failing("partner-b", &calls),
            StaticExtractor::ok("partner-c", "id,v\n3,c\n", &calls),
        ],
        RunOptions::default(),
    );

    let summary = pipeline.run().await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Completed);
    assert_eq!(summary.sources_attempted, 3);
    assert_eq!(summary.sources_succeeded(), 2);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].source, "partner-b");
    assert!(summary.failures[0].error.contains("connection refused"));

    // only rows from the two successful sources are loaded
    assert_eq!(summary.rows_loaded, 3);
    let loads = pipeline.sink().loads.lock().unwrap();
    assert_eq!(loads.len(), 1);
    let (loaded, strategy, _) = &loads[0];
    assert_eq!(*strategy, WriteStrategy::Replace);
    assert_eq!(loaded.num_rows(), 3);
    assert_eq!(loaded.value("id", 0), Some(&Value::Text("1".to_string())));
    assert_eq!(loaded.value("id", 2), Some(&Value::Text("3".to_string())));
}

#[tokio::test]
async fn test_all_sources_failed_is_degraded_without_load() {
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = pipeline(
        vec![
            StaticExtractor::failing("partner-a", &calls),
            StaticExtractor::failing("partner-b", &calls),
        ],
        RunOptions::default(),
    );

    // a fully-failed run completes without raising
    let summary = pipeline.run().await.unwrap();

    assert_eq!(summary.outcome, RunOutcome::Degraded);
    assert_eq!(summary.rows_loaded, 0);
    assert_eq!(summary.failures.len(), 2);
    assert!(pipeline.sink().loads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_unreachable_sink_aborts_before_extraction() {
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = Pipeline::new(
        vec![StaticExtractor::ok("partner-a", "id\n1\n", &calls)],
        Normalizer::new(NormalizeRules::default()),
        RecordingSink {
            fail_connection: true,
            ..RecordingSink::default()
        },
        RunOptions::default(),
    );

    let result = pipeline.run().await;

    assert!(matches!(result, Err(EtlError::Load(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_dedup_key_keeps_first_seen_row_in_source_order() {
    let calls = Arc::new(AtomicUsize::new(0));
    let options = RunOptions {
        dedup_key: Some("id".to_string()),
        ..RunOptions::default()
    };
    let pipeline = pipeline(
        vec![
            StaticExtractor::ok("partner-a", "id,v\n1,first\n", &calls),
            StaticExtractor::ok("partner-b", "id,v\n1,second\n2,x\n", &calls),
        ],
        options,
    );

    let summary = pipeline.run().await.unwrap();

    assert_eq!(summary.rows_loaded, 2);
    let loads = pipeline.sink().loads.lock().unwrap();
    let (loaded, _, _) = &loads[0];
    assert_eq!(loaded.num_rows(), 2);
    // id 1 keeps the row from the earlier-configured source
    assert_eq!(loaded.value("v", 0), Some(&Value::Text("first".to_string())));
    assert_eq!(loaded.value("id", 1), Some(&Value::Text("2".to_string())));
}

#[tokio::test]
async fn test_dedup_key_missing_from_merged_table_is_config_error() {
    let calls = Arc::new(AtomicUsize::new(0));
    let options = RunOptions {
        dedup_key: Some("id".to_string()),
        ..RunOptions::default()
    };
    let pipeline = pipeline(
        vec![StaticExtractor::ok("partner-a", "v\nx\n", &calls)],
        options,
    );

    let result = pipeline.run().await;
    assert!(matches!(result, Err(EtlError::Config(_))));
    assert!(pipeline.sink().loads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_merge_preserves_column_union_across_sources() {
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = pipeline(
        vec![
            StaticExtractor::ok("partner-a", "id,x\n1,a\n", &calls),
            StaticExtractor::ok("partner-b", "id,y\n2,b\n", &calls),
        ],
        RunOptions::default(),
    );

    pipeline.run().await.unwrap();

    let loads = pipeline.sink().loads.lock().unwrap();
    let (loaded, _, _) = &loads[0];
    assert!(loaded.has_column("x"));
    assert!(loaded.has_column("y"));
    assert_eq!(loaded.value("y", 0), Some(&Value::Null));
    assert_eq!(loaded.value("x", 1), Some(&Value::Null));
}

#[tokio::test]
async fn test_strategy_and_batch_size_reach_the_sink() {
    let calls = Arc::new(AtomicUsize::new(0));
    let options = RunOptions {
        strategy: WriteStrategy::Append,
        batch_size: 250,
        dedup_key: None,
    };
    let pipeline = pipeline(
        vec![StaticExtractor::ok("partner-a", "id\n1\n", &calls)],
        options,
    );

    pipeline.run().await.unwrap();

    let loads = pipeline.sink().loads.lock().unwrap();
    let (_, strategy, batch_size) = &loads[0];
    assert_eq!(*strategy, WriteStrategy::Append);
    assert_eq!(*batch_size, 250);
}
