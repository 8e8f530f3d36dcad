//! Tabular documents: a header row followed by records, read from and written to CSV or Excel.
//!
//! Every converter treats the first row of its input as the header and writes the header as
//! the first row of its output.

mod csv;
mod excel;

pub use self::csv::CsvDocument;
pub use self::excel::ExcelDocument;

use serde_json::{Map, Value};
use std::io::{Read, Write};
use std::str::FromStr;
use thiserror::Error;

pub const ERROR_STATUS: &str = "errorStatus";
pub const ERROR_MESSAGE: &str = "errorMessage";

#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("unable to read file: {0}")]
    Read(String),
    #[error("{0}")]
    Header(String),
    #[error("row {row} has {found} fields, header has {expected}")]
    Shape { row: usize, expected: usize, found: usize },
    #[error("document exceeds sheet limits at row {row}, column {column}")]
    Limit { row: usize, column: usize },
    #[error("csv: {0}")]
    Csv(#[from] ::csv::Error),
    #[error("excel: {0}")]
    Excel(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type HeaderValidator<'a> = &'a dyn Fn(&[String]) -> Result<(), String>;
pub type RecordValidator<'a> = &'a dyn Fn(&[String], &[String]) -> Result<(), String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocumentKind {
    #[default]
    Csv,
    Excel,
}

impl FromStr for DocumentKind {
    type Err = std::convert::Infallible;

    /// `"excel"` selects Excel; anything else falls back to CSV.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if s.trim().eq_ignore_ascii_case("excel") {
            DocumentKind::Excel
        } else {
            DocumentKind::Csv
        })
    }
}

impl DocumentKind {
    pub fn create(self) -> Box<dyn Document> {
        match self {
            DocumentKind::Csv => Box::new(CsvDocument::default()),
            DocumentKind::Excel => Box::new(ExcelDocument::default()),
        }
    }
}

/// In-memory contents shared by every converter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub header: Vec<String>,
    pub records: Vec<Vec<String>>,
}

impl Table {
    fn from_rows(rows: Vec<Vec<String>>) -> Self {
        let mut rows = rows.into_iter();
        Table {
            header: rows.next().unwrap_or_default(),
            records: rows.collect(),
        }
    }

    fn rows(&self) -> Vec<Vec<String>> {
        std::iter::once(self.header.clone())
            .chain(self.records.iter().cloned())
            .collect()
    }
}

fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Format-specific reading and writing; everything else is provided on top of the [`Table`].
pub trait Document: Send + Sync {
    fn kind(&self) -> DocumentKind;
    fn table(&self) -> &Table;
    fn table_mut(&mut self) -> &mut Table;
    fn read_rows(&self, reader: &mut dyn Read) -> Result<Vec<Vec<String>>, DocumentError>;
    fn write_rows(&self, rows: &[Vec<String>], writer: &mut dyn Write) -> Result<(), DocumentError>;

    /// Load `reader`, check the header, then mark each record. The header gains
    /// `errorStatus` and `errorMessage`; each record gains `"true", ""` or `"false", <reason>`.
    /// A rejected header stops validation and leaves the document empty.
    fn validate(
        &mut self,
        reader: &mut dyn Read,
        header_validator: HeaderValidator<'_>,
        record_validator: RecordValidator<'_>,
    ) -> Result<(), DocumentError> {
        *self.table_mut() = Table::default();
        let rows = self.read_rows(reader).map_err(|e| {
            tracing::warn!(error = %e, "unable to read document");
            DocumentError::Read(e.to_string())
        })?;
        let mut rows = rows.into_iter();
        let Some(mut header) = rows.next() else {
            return Ok(());
        };
        header_validator(&header).map_err(DocumentError::Header)?;
        let records = rows
            .map(|mut record| {
                match record_validator(&header, &record) {
                    Ok(()) => record.extend(["true".to_string(), String::new()]),
                    Err(reason) => record.extend(["false".to_string(), reason]),
                }
                record
            })
            .collect();
        header.extend([ERROR_STATUS.to_string(), ERROR_MESSAGE.to_string()]);
        *self.table_mut() = Table { header, records };
        Ok(())
    }

    fn import(&mut self, reader: &mut dyn Read) -> Result<(), DocumentError> {
        let rows = self.read_rows(reader)?;
        *self.table_mut() = Table::from_rows(rows);
        Ok(())
    }

    /// Header first (omitted when empty), then records. Nothing is written if any row fails.
    fn export(&self, writer: &mut dyn Write) -> Result<(), DocumentError> {
        let table = self.table();
        let rows: Vec<Vec<String>> = if table.header.is_empty() {
            table.records.clone()
        } else {
            table.rows()
        };
        self.write_rows(&rows, writer)
    }

    /// Header row followed by the records.
    fn to_slice(&self) -> Vec<Vec<String>> {
        self.table().rows()
    }

    fn from_slice(&mut self, data: Vec<Vec<String>>) {
        *self.table_mut() = Table::from_rows(data);
    }

    /// One object per record keyed by header title. Every record must match the header width.
    fn to_map(&self) -> Result<Vec<Map<String, Value>>, DocumentError> {
        let table = self.table();
        table
            .records
            .iter()
            .enumerate()
            .map(|(row, record)| {
                if record.len() != table.header.len() {
                    return Err(DocumentError::Shape {
                        row: row + 1,
                        expected: table.header.len(),
                        found: record.len(),
                    });
                }
                Ok(table
                    .header
                    .iter()
                    .cloned()
                    .zip(record.iter().map(|v| Value::String(v.clone())))
                    .collect())
            })
            .collect()
    }

    /// Header is the union of keys in first-seen order; missing or null values become empty
    /// cells and non-string values their JSON text.
    fn from_map(&mut self, data: &[Map<String, Value>]) {
        let mut header: Vec<String> = Vec::new();
        for key in data.iter().flat_map(|datum| datum.keys()) {
            if !header.contains(key) {
                header.push(key.clone());
            }
        }
        let records = data
            .iter()
            .map(|datum| header.iter().map(|key| cell_text(datum.get(key))).collect())
            .collect();
        *self.table_mut() = Table { header, records };
    }

    fn header(&self) -> &[String] {
        &self.table().header
    }

    fn records(&self) -> &[Vec<String>] {
        &self.table().records
    }

    /// Rows read or set, header included.
    fn row_count(&self) -> usize {
        let table = self.table();
        table.records.len() + usize::from(!table.header.is_empty())
    }
}
