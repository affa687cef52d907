//! In-memory columnar table model
//!
//! A [`Table`] is an ordered sequence of named columns sharing one row
//! count. Tables are produced by extraction (CSV decoding) or by merging,
//! mutated in place by normalization, and handed to the sink for loading.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tdp_common::{EtlError, Result};

/// A single cell value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Number(f64),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Append a stable, type-tagged key fragment used for row equality
    /// during deduplication. Number uses the bit pattern so that equal
    /// floats key identically regardless of display formatting.
    fn write_key(&self, out: &mut String) {
        match self {
            Value::Null => out.push('_'),
            Value::Text(s) => {
                out.push_str("t:");
                out.push_str(s);
            },
            Value::Number(n) => {
                out.push_str("n:");
                out.push_str(&format!("{:016x}", n.to_bits()));
            },
            Value::Timestamp(ts) => {
                out.push_str("d:");
                out.push_str(&ts.to_rfc3339());
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Text(s) => write!(f, "{}", s),
            Value::Number(n) => write!(f, "{}", n),
            Value::Timestamp(ts) => write!(f, "{}", ts.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

/// A named column of values
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// CSV parse options carried on a source descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CsvOptions {
    /// Field delimiter
    pub delimiter: char,
    /// Whether the first record is a header row. Without headers, columns
    /// are named `column_0`, `column_1`, ...
    pub has_headers: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            has_headers: true,
        }
    }
}

/// Ordered named columns with a shared row count
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    /// Build a table from columns, validating the shared row count
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        if let Some(first) = columns.first() {
            let rows = first.values.len();
            for column in &columns {
                if column.values.len() != rows {
                    return Err(EtlError::parse(format!(
                        "ragged table: column '{}' has {} rows, expected {}",
                        column.name,
                        column.values.len(),
                        rows
                    )));
                }
            }
        }
        Ok(Self { columns })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Decode CSV bytes into a table of text values
    ///
    /// Empty fields become [`Value::Null`]; everything else is kept as text
    /// for the normalization engine to type. Ragged records are a
    /// structural error.
    pub fn from_csv(data: &[u8], options: &CsvOptions) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(options.delimiter as u8)
            .has_headers(options.has_headers)
            .from_reader(data);

        let mut names: Vec<String> = Vec::new();
        if options.has_headers {
            let headers = reader
                .headers()
                .map_err(|e| EtlError::parse(format!("invalid CSV header: {}", e)))?;
            names = headers.iter().map(|h| h.to_string()).collect();
        }

        let mut rows: Vec<Vec<Value>> = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| EtlError::parse(format!("invalid CSV record: {}", e)))?;
            if names.is_empty() {
                names = (0..record.len()).map(|i| format!("column_{}", i)).collect();
            }
            if record.len() != names.len() {
                return Err(EtlError::parse(format!(
                    "ragged CSV record: {} fields, expected {}",
                    record.len(),
                    names.len()
                )));
            }
            rows.push(
                record
                    .iter()
                    .map(|field| {
                        if field.is_empty() {
                            Value::Null
                        } else {
                            Value::Text(field.to_string())
                        }
                    })
                    .collect(),
            );
        }

        let columns = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| Column::new(name, rows.iter().map(|r| r[i].clone()).collect()))
            .collect();

        Ok(Self { columns })
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, |c| c.values.len())
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn columns_mut(&mut self) -> &mut [Column] {
        &mut self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Cell accessor, mostly for tests
    pub fn value(&self, name: &str, row: usize) -> Option<&Value> {
        self.column(name).and_then(|c| c.values.get(row))
    }

    /// One row in column order
    pub fn row(&self, index: usize) -> Vec<&Value> {
        self.columns.iter().map(|c| &c.values[index]).collect()
    }

    /// Append a column, replacing any existing column of the same name
    pub fn set_column(&mut self, name: impl Into<String>, values: Vec<Value>) -> Result<()> {
        let name = name.into();
        if self.num_columns() > 0 && values.len() != self.num_rows() {
            return Err(EtlError::parse(format!(
                "column '{}' has {} rows, table has {}",
                name,
                values.len(),
                self.num_rows()
            )));
        }
        if let Some(existing) = self.column_mut(&name) {
            existing.values = values;
        } else {
            self.columns.push(Column::new(name, values));
        }
        Ok(())
    }

    /// Keep only the rows whose mask entry is true
    pub fn retain_rows(&mut self, keep: &[bool]) {
        for column in &mut self.columns {
            let mut it = keep.iter();
            column.values.retain(|_| *it.next().unwrap_or(&false));
        }
    }

    fn row_key(&self, index: usize) -> String {
        let mut key = String::new();
        for column in &self.columns {
            column.values[index].write_key(&mut key);
            key.push('\u{1f}');
        }
        key
    }

    /// Collapse rows that are identical across all columns, keeping the
    /// first occurrence. Returns the number of rows removed.
    pub fn dedup_rows(&mut self) -> usize {
        let rows = self.num_rows();
        let mut seen = HashSet::with_capacity(rows);
        let keep: Vec<bool> = (0..rows).map(|i| seen.insert(self.row_key(i))).collect();
        self.retain_rows(&keep);
        rows - self.num_rows()
    }

    /// Collapse rows sharing a value in the named column, keeping the first
    /// occurrence. Null cells count as one shared key value.
    pub fn dedup_by_column(&mut self, name: &str) -> Result<usize> {
        let rows = self.num_rows();
        let keep: Vec<bool> = {
            let column = self.column(name).ok_or_else(|| {
                EtlError::config(format!("dedup key column '{}' not present in merged table", name))
            })?;
            let mut seen = HashSet::with_capacity(rows);
            column
                .values
                .iter()
                .map(|v| {
                    let mut key = String::new();
                    v.write_key(&mut key);
                    seen.insert(key)
                })
                .collect()
        };
        self.retain_rows(&keep);
        Ok(rows - self.num_rows())
    }

    /// Concatenate tables into one, preserving the union of columns in
    /// first-seen order. Columns absent from a table contribute nulls for
    /// that table's rows; row order follows the input order.
    pub fn merge(tables: Vec<Table>) -> Table {
        let mut union: Vec<String> = Vec::new();
        for table in &tables {
            for name in table.column_names() {
                if !union.iter().any(|u| u == name) {
                    union.push(name.to_string());
                }
            }
        }

        let total_rows: usize = tables.iter().map(|t| t.num_rows()).sum();
        let mut columns: Vec<Column> = union
            .into_iter()
            .map(|name| Column::new(name, Vec::with_capacity(total_rows)))
            .collect();

        for table in &tables {
            let rows = table.num_rows();
            for column in &mut columns {
                match table.column(&column.name) {
                    Some(source) => column.values.extend(source.values.iter().cloned()),
                    None => column.values.extend(std::iter::repeat(Value::Null).take(rows)),
                }
            }
        }

        Table { columns }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Value {
        Value::Text(s.to_string())
    }

    fn table(columns: Vec<(&str, Vec<Value>)>) -> Table {
        Table::new(
            columns
                .into_iter()
                .map(|(name, values)| Column::new(name, values))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_ragged_table_rejected() {
        let result = Table::new(vec![
            Column::new("a", vec![text("1"), text("2")]),
            Column::new("b", vec![text("1")]),
        ]);
        assert!(matches!(result, Err(EtlError::Parse(_))));
    }

    #[test]
    fn test_from_csv_with_headers() {
        let data = b"id,name\n1,alpha\n2,\n";
        let t = Table::from_csv(data, &CsvOptions::default()).unwrap();
        assert_eq!(t.num_rows(), 2);
        assert_eq!(t.column_names().collect::<Vec<_>>(), vec!["id", "name"]);
        assert_eq!(t.value("name", 0), Some(&text("alpha")));
        // empty fields decode as null
        assert_eq!(t.value("name", 1), Some(&Value::Null));
    }

    #[test]
    fn test_from_csv_without_headers() {
        let options = CsvOptions {
            has_headers: false,
            ..CsvOptions::default()
        };
        let t = Table::from_csv(b"1;alpha\n2;beta\n", &CsvOptions {
            delimiter: ';',
            ..options
        })
        .unwrap();
        assert_eq!(t.column_names().collect::<Vec<_>>(), vec!["column_0", "column_1"]);
        assert_eq!(t.num_rows(), 2);
    }

    #[test]
    fn test_from_csv_ragged_record_is_error() {
        let data = b"a,b\n1,2\n3\n";
        assert!(Table::from_csv(data, &CsvOptions::default()).is_err());
    }

    #[test]
    fn test_dedup_rows_keeps_first_occurrence() {
        let mut t = table(vec![
            ("id", vec![text("1"), text("2"), text("1")]),
            ("v", vec![text("a"), text("b"), text("a")]),
        ]);
        assert_eq!(t.dedup_rows(), 1);
        assert_eq!(t.num_rows(), 2);
        assert_eq!(t.value("id", 0), Some(&text("1")));
        assert_eq!(t.value("id", 1), Some(&text("2")));
    }

    #[test]
    fn test_dedup_rows_is_idempotent() {
        let mut t = table(vec![(
            "id",
            vec![text("1"), text("1"), text("2")],
        )]);
        t.dedup_rows();
        let after_first = t.num_rows();
        assert_eq!(t.dedup_rows(), 0);
        assert_eq!(t.num_rows(), after_first);
    }

    #[test]
    fn test_dedup_distinguishes_null_from_empty_text() {
        let mut t = table(vec![("a", vec![Value::Null, text("")])]);
        assert_eq!(t.dedup_rows(), 0);
        assert_eq!(t.num_rows(), 2);
    }

    #[test]
    fn test_dedup_by_column() {
        let mut t = table(vec![
            ("id", vec![text("1"), text("2"), text("1")]),
            ("v", vec![text("first"), text("b"), text("later")]),
        ]);
        assert_eq!(t.dedup_by_column("id").unwrap(), 1);
        assert_eq!(t.value("v", 0), Some(&text("first")));
    }

    #[test]
    fn test_dedup_by_missing_column_is_config_error() {
        let mut t = table(vec![("a", vec![text("1")])]);
        assert!(matches!(t.dedup_by_column("id"), Err(EtlError::Config(_))));
    }

    #[test]
    fn test_merge_column_union() {
        let a = table(vec![
            ("id", vec![text("1")]),
            ("x", vec![text("a")]),
        ]);
        let b = table(vec![
            ("id", vec![text("2")]),
            ("y", vec![text("b")]),
        ]);
        let merged = Table::merge(vec![a, b]);
        assert_eq!(merged.num_rows(), 2);
        assert_eq!(merged.column_names().collect::<Vec<_>>(), vec!["id", "x", "y"]);
        // column absent from a source is null for that source's rows
        assert_eq!(merged.value("y", 0), Some(&Value::Null));
        assert_eq!(merged.value("x", 1), Some(&Value::Null));
        // row order follows input order
        assert_eq!(merged.value("id", 0), Some(&text("1")));
        assert_eq!(merged.value("id", 1), Some(&text("2")));
    }

    #[test]
    fn test_set_column_replaces_existing() {
        let mut t = table(vec![("a", vec![text("1")])]);
        t.set_column("a", vec![text("2")]).unwrap();
        assert_eq!(t.num_columns(), 1);
        assert_eq!(t.value("a", 0), Some(&text("2")));
    }

    #[test]
    fn test_set_column_length_mismatch() {
        let mut t = table(vec![("a", vec![text("1"), text("2")])]);
        assert!(t.set_column("b", vec![text("x")]).is_err());
    }
}
