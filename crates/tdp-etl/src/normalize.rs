//! Rule-driven table normalization engine
//!
//! Applies a fixed, ordered series of cleaning steps to one extracted
//! table. The order is a contract: renames see standardized names, default
//! fills see renamed columns, and so on. Malformed individual values never
//! fail a run; they become null.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use tdp_common::{EtlError, Result};

use crate::table::{Table, Value};

/// Name of the audit column stamped on every normalized table
pub const AUDIT_COLUMN: &str = "etl_loaded_at";

/// Date layouts tried, in order, after RFC 3339
const DATE_TIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S"];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d/%m/%Y"];

/// A fill value for null cells, as written in configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FillValue {
    Number(f64),
    Text(String),
}

impl FillValue {
    fn to_value(&self) -> Value {
        match self {
            FillValue::Number(n) => Value::Number(*n),
            FillValue::Text(s) => Value::Text(s.clone()),
        }
    }
}

/// Declarative cleaning rules applied to every extracted table
///
/// All fields are optional and default to empty. Column names in
/// `required_columns`, `date_columns`, `numeric_columns` and the keys of
/// `column_mapping` refer to standardized (pre-rename) names; keys of
/// `default_values` refer to post-rename names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NormalizeRules {
    /// Rows null in every one of these columns are dropped
    pub required_columns: Vec<String>,
    /// Columns parsed as date-times; unparsable values become null
    pub date_columns: Vec<String>,
    /// Columns parsed as numbers; unparsable values become null
    pub numeric_columns: Vec<String>,
    /// Renames applied after type conversions
    pub column_mapping: BTreeMap<String, String>,
    /// Null-fill values applied after renaming
    pub default_values: BTreeMap<String, FillValue>,
}

/// Rule interpreter over one table
pub struct Normalizer {
    rules: NormalizeRules,
}

impl Normalizer {
    pub fn new(rules: NormalizeRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &NormalizeRules {
        &self.rules
    }

    /// Apply the full cleaning sequence to a table
    ///
    /// Steps, in order: standardize column names, drop exact-duplicate
    /// rows, drop rows null in all required columns, parse dates, parse
    /// numbers, trim text, rename columns, fill defaults, stamp the audit
    /// column. Fails only on structural problems (ragged input upstream,
    /// ambiguous names after standardization).
    pub fn normalize(&self, mut table: Table) -> Result<Table> {
        info!(rows = table.num_rows(), "Starting normalization");

        standardize_column_names(&mut table)?;

        let removed = table.dedup_rows();
        info!(removed = removed, "Removed duplicate rows");

        self.drop_all_null_required(&mut table);
        self.parse_date_columns(&mut table);
        self.parse_numeric_columns(&mut table);
        trim_text_values(&mut table);
        self.rename_columns(&mut table)?;
        self.fill_defaults(&mut table);
        stamp_audit_column(&mut table)?;

        info!(rows = table.num_rows(), "Normalization complete");
        Ok(table)
    }

    /// Drop rows that are null in every required column. Required columns
    /// absent from the table are ignored; with none present, nothing is
    /// filtered.
    fn drop_all_null_required(&self, table: &mut Table) {
        let present: Vec<&str> = self
            .rules
            .required_columns
            .iter()
            .map(String::as_str)
            .filter(|name| table.has_column(name))
            .collect();
        if present.is_empty() {
            return;
        }

        let rows = table.num_rows();
        let keep: Vec<bool> = (0..rows)
            .map(|i| {
                present.iter().any(|name| {
                    table
                        .value(name, i)
                        .map(|v| !v.is_null())
                        .unwrap_or(false)
                })
            })
            .collect();
        table.retain_rows(&keep);
        if table.num_rows() != rows {
            debug!(dropped = rows - table.num_rows(), "Dropped rows null in all required columns");
        }
    }

    fn parse_date_columns(&self, table: &mut Table) {
        for name in &self.rules.date_columns {
            if let Some(column) = table.column_mut(name) {
                for value in &mut column.values {
                    let parsed = match value {
                        Value::Timestamp(_) | Value::Null => continue,
                        Value::Text(s) => parse_timestamp(s).map_or(Value::Null, Value::Timestamp),
                        Value::Number(_) => Value::Null,
                    };
                    *value = parsed;
                }
            }
        }
    }

    fn parse_numeric_columns(&self, table: &mut Table) {
        for name in &self.rules.numeric_columns {
            if let Some(column) = table.column_mut(name) {
                for value in &mut column.values {
                    let parsed = match value {
                        Value::Number(_) | Value::Null => continue,
                        Value::Text(s) => s.trim().parse::<f64>().map_or(Value::Null, Value::Number),
                        Value::Timestamp(_) => Value::Null,
                    };
                    *value = parsed;
                }
            }
        }
    }

    /// Apply `column_mapping`; entries whose source column is absent are
    /// ignored. A rename onto an existing column is a schema conflict.
    fn rename_columns(&self, table: &mut Table) -> Result<()> {
        for (from, to) in &self.rules.column_mapping {
            if !table.has_column(from) {
                continue;
            }
            if table.has_column(to) {
                return Err(EtlError::SchemaConflict(format!(
                    "cannot rename column '{}' to '{}': target already exists",
                    from, to
                )));
            }
            if let Some(column) = table.column_mut(from) {
                column.name = to.clone();
            }
        }
        Ok(())
    }

    fn fill_defaults(&self, table: &mut Table) {
        for (name, fill) in &self.rules.default_values {
            if let Some(column) = table.column_mut(name) {
                for value in &mut column.values {
                    if value.is_null() {
                        *value = fill.to_value();
                    }
                }
            }
        }
    }
}

/// Trim, lowercase, and underscore every column name; collisions after
/// standardization are ambiguous and fail with a schema conflict.
fn standardize_column_names(table: &mut Table) -> Result<()> {
    let mut seen: HashMap<String, String> = HashMap::new();
    for column in table.columns() {
        let standardized = standardize_name(&column.name);
        if let Some(previous) = seen.insert(standardized.clone(), column.name.clone()) {
            return Err(EtlError::SchemaConflict(format!(
                "columns '{}' and '{}' both standardize to '{}'",
                previous, column.name, standardized
            )));
        }
    }
    for column in table.columns_mut() {
        column.name = standardize_name(&column.name);
    }
    Ok(())
}

fn standardize_name(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// Trim surrounding whitespace from every text value; nulls and typed
/// values pass through unchanged.
fn trim_text_values(table: &mut Table) {
    for column in table.columns_mut() {
        for value in &mut column.values {
            if let Value::Text(s) = value {
                let trimmed = s.trim().to_string();
                *s = trimmed;
            }
        }
    }
}

/// Stamp the audit column with one wall-clock timestamp, uniform across
/// the table.
fn stamp_audit_column(table: &mut Table) -> Result<()> {
    let now = Utc::now();
    let rows = table.num_rows();
    table.set_column(AUDIT_COLUMN, vec![Value::Timestamp(now); rows])
}

/// Lenient timestamp parsing: RFC 3339 first, then common date-time and
/// date-only layouts. Returns None for anything unrecognized.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in DATE_TIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt.and_utc());
        }
    }

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
        }
    }

    None
}
