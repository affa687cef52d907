//! Pipeline configuration
//!
//! The declarative YAML config file names the MySQL sink, the ordered list
//! of remote sources, the normalization rule set, and the run-level
//! policies (dedup key, load strategy). `${VAR}` strings anywhere in the
//! file are resolved against the process environment before typed
//! deserialization; unresolved references pass through literally.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use tdp_common::{EtlError, Result};

use crate::load::WriteStrategy;
use crate::normalize::NormalizeRules;
use crate::table::CsvOptions;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "config/servers.yaml";

/// Default MySQL port.
pub const DEFAULT_MYSQL_PORT: u16 = 3306;

/// Default FTP port.
pub const DEFAULT_FTP_PORT: u16 = 21;

/// Default SFTP port.
pub const DEFAULT_SFTP_PORT: u16 = 22;

/// Default target table name.
pub const DEFAULT_TABLE_NAME: &str = "etl_data";

/// Default number of rows per bulk-insert batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Top-level pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Sink connection parameters
    pub mysql: MysqlConfig,
    /// Ordered list of remote sources
    #[serde(rename = "ftp_servers")]
    pub sources: Vec<SourceConfig>,
    /// Normalization rule set applied to every source
    #[serde(default)]
    pub rules: NormalizeRules,
    /// Column to deduplicate the merged table on; full-row dedup when unset
    #[serde(default)]
    pub dedup_key: Option<String>,
    /// Write strategy for the final load
    #[serde(default)]
    pub load_strategy: WriteStrategy,
}

/// MySQL sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MysqlConfig {
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    /// Target table name
    #[serde(default = "default_table_name")]
    pub table: String,
    /// Rows per bulk-insert batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl MysqlConfig {
    /// Connection URL for the pool
    pub fn url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

/// Transport selector on a source descriptor
///
/// An unrecognized value fails deserialization of the whole config, before
/// any network attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Ftp,
    Sftp,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Ftp => write!(f, "ftp"),
            TransportKind::Sftp => write!(f, "sftp"),
        }
    }
}

/// One remote source: where to connect, how to authenticate, what to fetch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Unique name, used for logging and error attribution
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TransportKind,
    pub host: String,
    /// Defaults to 21 for FTP, 22 for SFTP
    #[serde(default)]
    pub port: Option<u16>,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Private key path for SFTP key authentication
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    /// Remote path of the file to extract
    pub file_path: String,
    /// Parse options for the raw file
    #[serde(default, rename = "csv_params")]
    pub csv: CsvOptions,
}

impl SourceConfig {
    /// Configured port, or the transport default
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(match self.kind {
            TransportKind::Ftp => DEFAULT_FTP_PORT,
            TransportKind::Sftp => DEFAULT_SFTP_PORT,
        })
    }
}

impl PipelineConfig {
    /// Load and validate configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EtlError::config(format!("failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let mut value: serde_yaml::Value = serde_yaml::from_str(raw)
            .map_err(|e| EtlError::config(format!("invalid YAML: {}", e)))?;
        resolve_env_vars(&mut value);
        let config: PipelineConfig = serde_yaml::from_value(value)
            .map_err(|e| EtlError::config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.mysql.host.is_empty() {
            return Err(EtlError::config("mysql.host cannot be empty"));
        }
        if self.mysql.database.is_empty() {
            return Err(EtlError::config("mysql.database cannot be empty"));
        }
        if self.mysql.batch_size == 0 {
            return Err(EtlError::config("mysql.batch_size must be greater than 0"));
        }

        let mut names = std::collections::HashSet::new();
        for source in &self.sources {
            if source.name.is_empty() {
                return Err(EtlError::config("source name cannot be empty"));
            }
            if !names.insert(source.name.as_str()) {
                return Err(EtlError::config(format!(
                    "duplicate source name: '{}'",
                    source.name
                )));
            }
            if source.host.is_empty() {
                return Err(EtlError::config(format!(
                    "source '{}' has an empty host",
                    source.name
                )));
            }
            if source.kind == TransportKind::Sftp
                && source.password.is_none()
                && source.key_file.is_none()
            {
                return Err(EtlError::config(format!(
                    "SFTP source '{}' needs a password or a key_file",
                    source.name
                )));
            }
        }

        Ok(())
    }
}

/// Replace `${NAME}` strings with values from the process environment.
/// Only whole-string references are interpolated; unresolved references
/// pass through literally.
fn resolve_env_vars(value: &mut serde_yaml::Value) {
    match value {
        serde_yaml::Value::String(s) => {
            if let Some(name) = s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
                if let Ok(resolved) = std::env::var(name) {
                    *s = resolved;
                }
            }
        },
        serde_yaml::Value::Sequence(seq) => {
            for item in seq {
                resolve_env_vars(item);
            }
        },
        serde_yaml::Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                resolve_env_vars(item);
            }
        },
        _ => {},
    }
}

fn default_mysql_port() -> u16 {
    DEFAULT_MYSQL_PORT
}

fn default_table_name() -> String {
    DEFAULT_TABLE_NAME.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
mysql:
  host: localhost
  database: warehouse
  user: etl
  password: secret

ftp_servers:
  - name: partner-a
    type: ftp
    host: ftp.partner-a.example.com
    user: etl
    password: hunter2
    file_path: /outgoing/transactions.csv
  - name: partner-b
    type: sftp
    host: sftp.partner-b.example.com
    port: 2222
    user: etl
    key_file: ~/.ssh/partner_b
    file_path: /exports/daily.csv

rules:
  required_columns: [id, transaction_date]
  date_columns: [transaction_date]
  column_mapping:
    transaction_id: id

dedup_key: id
"#;

    #[test]
    fn test_parse_sample_config() {
        let config = PipelineConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.mysql.port, DEFAULT_MYSQL_PORT);
        assert_eq!(config.mysql.table, DEFAULT_TABLE_NAME);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.sources[0].kind, TransportKind::Ftp);
        assert_eq!(config.sources[0].port(), DEFAULT_FTP_PORT);
        assert_eq!(config.sources[1].kind, TransportKind::Sftp);
        assert_eq!(config.sources[1].port(), 2222);
        assert_eq!(config.dedup_key.as_deref(), Some("id"));
        assert_eq!(config.load_strategy, WriteStrategy::Replace);
        assert_eq!(config.rules.column_mapping["transaction_id"], "id");
    }

    #[test]
    fn test_unknown_transport_kind_fails() {
        let raw = SAMPLE.replace("type: ftp", "type: gopher");
        let result = PipelineConfig::from_yaml(&raw);
        assert!(matches!(result, Err(EtlError::Config(_))));
    }

    #[test]
    fn test_env_interpolation() {
        std::env::set_var("TDP_TEST_PASSWORD", "from-env");
        let raw = SAMPLE.replace("password: secret", "password: ${TDP_TEST_PASSWORD}");
        let config = PipelineConfig::from_yaml(&raw).unwrap();
        assert_eq!(config.mysql.password, "from-env");
        std::env::remove_var("TDP_TEST_PASSWORD");
    }

    #[test]
    fn test_env_interpolation_unresolved_passes_through() {
        std::env::remove_var("TDP_TEST_MISSING");
        let raw = SAMPLE.replace("password: secret", "password: ${TDP_TEST_MISSING}");
        let config = PipelineConfig::from_yaml(&raw).unwrap();
        assert_eq!(config.mysql.password, "${TDP_TEST_MISSING}");
    }

    #[test]
    fn test_duplicate_source_names_rejected() {
        let raw = SAMPLE.replace("name: partner-b", "name: partner-a");
        assert!(matches!(PipelineConfig::from_yaml(&raw), Err(EtlError::Config(_))));
    }

    #[test]
    fn test_sftp_without_credentials_rejected() {
        let raw = SAMPLE.replace("    key_file: ~/.ssh/partner_b\n", "");
        assert!(matches!(PipelineConfig::from_yaml(&raw), Err(EtlError::Config(_))));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let raw = format!("{}\n", SAMPLE).replace(
            "  password: secret",
            "  password: secret\n  batch_size: 0",
        );
        assert!(matches!(PipelineConfig::from_yaml(&raw), Err(EtlError::Config(_))));
    }

    #[test]
    fn test_strategy_from_config() {
        let raw = format!("{}\nload_strategy: append\n", SAMPLE);
        let config = PipelineConfig::from_yaml(&raw).unwrap();
        assert_eq!(config.load_strategy, WriteStrategy::Append);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.yaml");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.sources.len(), 2);

        let missing = dir.path().join("nope.yaml");
        assert!(matches!(PipelineConfig::load(&missing), Err(EtlError::Config(_))));
    }
}
