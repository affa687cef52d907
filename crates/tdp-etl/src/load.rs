//! MySQL sink adapter
//!
//! Bulk-writes normalized tables under a configurable write strategy,
//! batching inserts to bound transaction size and memory. The target table
//! is created from the loaded table's inferred column types.

use std::time::Duration;

use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::{MySql, QueryBuilder, Row};
use tracing::{debug, info};

use tdp_common::{EtlError, Result};

use crate::config::MysqlConfig;
use crate::table::{Column, Table, Value};

/// Default maximum connections in the sink pool.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default connection acquire timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Policy governing how a table is merged into existing sink state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WriteStrategy {
    /// Insert rows, never touching existing data
    Append,
    /// Drop and recreate the target table with this run's rows
    #[default]
    Replace,
    /// Error if the target already holds data
    Fail,
}

impl std::fmt::Display for WriteStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteStrategy::Append => write!(f, "append"),
            WriteStrategy::Replace => write!(f, "replace"),
            WriteStrategy::Fail => write!(f, "fail"),
        }
    }
}

impl std::str::FromStr for WriteStrategy {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "append" => Ok(WriteStrategy::Append),
            "replace" => Ok(WriteStrategy::Replace),
            "fail" => Ok(WriteStrategy::Fail),
            _ => Err(EtlError::config(format!("invalid write strategy: {}", s))),
        }
    }
}

/// Narrow interface the pipeline controller drives the sink through
#[async_trait]
pub trait TableSink: Send + Sync {
    /// Verify the sink is reachable
    async fn test_connection(&self) -> Result<()>;

    /// Bulk-write a table, returning the number of rows written
    async fn load(&self, table: &Table, strategy: WriteStrategy, batch_size: usize) -> Result<u64>;

    /// Execute a raw statement, returning the number of affected rows
    async fn execute(&self, statement: &str) -> Result<u64>;
}

/// MySQL implementation of [`TableSink`]
pub struct MySqlLoader {
    pool: MySqlPool,
    table_name: String,
}

impl MySqlLoader {
    /// Build a connection pool for the configured sink
    pub async fn connect(config: &MysqlConfig) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .connect(&config.url())
            .await
            .map_err(|e| EtlError::load(format!("failed to connect to MySQL: {}", e)))?;

        info!(
            host = %config.host,
            database = %config.database,
            table = %config.table,
            "MySQL connection pool created"
        );

        Ok(Self {
            pool,
            table_name: config.table.clone(),
        })
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Close the pool, waiting for in-flight connections to finish
    pub async fn close(&self) {
        self.pool.close().await;
        debug!("MySQL connection pool closed");
    }

    async fn target_row_count(&self) -> Result<Option<u64>> {
        let exists: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_name = ?",
        )
        .bind(&self.table_name)
        .fetch_one(&self.pool)
        .await
        .and_then(|row| row.try_get("n"))
        .map_err(|e| EtlError::load(format!("failed to inspect target table: {}", e)))?;

        if exists == 0 {
            return Ok(None);
        }

        let count: i64 = sqlx::query(&format!("SELECT COUNT(*) AS n FROM `{}`", self.table_name))
            .fetch_one(&self.pool)
            .await
            .and_then(|row| row.try_get("n"))
            .map_err(|e| EtlError::load(format!("failed to count target rows: {}", e)))?;

        Ok(Some(count as u64))
    }

    /// Create or reset the target table according to the write strategy
    async fn prepare_target(&self, table: &Table, strategy: WriteStrategy) -> Result<()> {
        match strategy {
            WriteStrategy::Replace => {
                debug!(table = %self.table_name, "Replacing target table");
                self.execute(&format!("DROP TABLE IF EXISTS `{}`", self.table_name))
                    .await?;
                self.execute(&create_table_sql(&self.table_name, table))
                    .await?;
            },
            WriteStrategy::Append => {
                self.execute(&create_table_if_missing_sql(&self.table_name, table))
                    .await?;
            },
            WriteStrategy::Fail => {
                if let Some(rows) = self.target_row_count().await? {
                    if rows > 0 {
                        return Err(EtlError::load(format!(
                            "target table '{}' already holds {} rows",
                            self.table_name, rows
                        )));
                    }
                } else {
                    self.execute(&create_table_sql(&self.table_name, table))
                        .await?;
                }
            },
        }
        Ok(())
    }
}

#[async_trait]
impl TableSink for MySqlLoader {
    async fn test_connection(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| EtlError::load(format!("MySQL connection check failed: {}", e)))?;
        info!("MySQL connection successful");
        Ok(())
    }

    async fn load(&self, table: &Table, strategy: WriteStrategy, batch_size: usize) -> Result<u64> {
        if batch_size == 0 {
            return Err(EtlError::config("batch_size must be greater than 0"));
        }
        if table.num_columns() == 0 || table.num_rows() == 0 {
            info!(table = %self.table_name, "Nothing to load");
            return Ok(0);
        }

        info!(
            rows = table.num_rows(),
            table = %self.table_name,
            strategy = %strategy,
            "Loading table"
        );

        self.prepare_target(table, strategy).await?;

        let insert_prefix = insert_prefix(&self.table_name, table.columns());
        let mut written: u64 = 0;

        for (start, end) in batch_ranges(table.num_rows(), batch_size) {
            let mut builder: QueryBuilder<MySql> = QueryBuilder::new(insert_prefix.as_str());
            builder.push_values(start..end, |mut row, i| {
                for column in table.columns() {
                    match &column.values[i] {
                        Value::Null => row.push_bind(None::<String>),
                        Value::Text(s) => row.push_bind(s.clone()),
                        Value::Number(n) => row.push_bind(*n),
                        Value::Timestamp(ts) => row.push_bind(*ts),
                    };
                }
            });

            let result = builder
                .build()
                .execute(&self.pool)
                .await
                .map_err(|e| EtlError::load(format!("bulk insert failed: {}", e)))?;

            written += result.rows_affected();
            debug!(rows = end - start, total = written, "Inserted batch");
        }

        info!(rows = written, table = %self.table_name, "Load complete");
        Ok(written)
    }

    async fn execute(&self, statement: &str) -> Result<u64> {
        let result = sqlx::query(statement)
            .execute(&self.pool)
            .await
            .map_err(|e| EtlError::load(format!("statement execution failed: {}", e)))?;
        Ok(result.rows_affected())
    }
}

/// Half-open row ranges of at most `batch_size` rows each
fn batch_ranges(rows: usize, batch_size: usize) -> Vec<(usize, usize)> {
    (0..rows)
        .step_by(batch_size.max(1))
        .map(|start| (start, (start + batch_size).min(rows)))
        .collect()
}

/// Infer the SQL type for a column from its non-null values
fn sql_type(column: &Column) -> &'static str {
    let mut saw_number = false;
    let mut saw_timestamp = false;
    let mut saw_text = false;
    for value in &column.values {
        match value {
            Value::Null => {},
            Value::Number(_) => saw_number = true,
            Value::Timestamp(_) => saw_timestamp = true,
            Value::Text(_) => saw_text = true,
        }
    }
    match (saw_number, saw_timestamp, saw_text) {
        (true, false, false) => "DOUBLE",
        (false, true, false) => "DATETIME",
        _ => "TEXT",
    }
}

fn column_definitions(table: &Table) -> String {
    table
        .columns()
        .iter()
        .map(|c| format!("`{}` {}", c.name, sql_type(c)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn create_table_sql(name: &str, table: &Table) -> String {
    format!("CREATE TABLE `{}` ({})", name, column_definitions(table))
}

fn create_table_if_missing_sql(name: &str, table: &Table) -> String {
    format!("CREATE TABLE IF NOT EXISTS `{}` ({})", name, column_definitions(table))
}

fn insert_prefix(name: &str, columns: &[Column]) -> String {
    let column_list = columns
        .iter()
        .map(|c| format!("`{}`", c.name))
        .collect::<Vec<_>>()
        .join(", ");
    format!("INSERT INTO `{}` ({}) ", name, column_list)
}
