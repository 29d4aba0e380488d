//! `RecordSink` implementations.

use crate::core::store::RecordSink;
use crate::domain::error::{LinkError, LinkResult};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Keeps records in memory
#[derive(Debug, Default)]
pub struct MemoryRecordSink {
    records: Mutex<Vec<Vec<String>>>,
}

impl MemoryRecordSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record appended so far
    pub fn records(&self) -> Vec<Vec<String>> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RecordSink for MemoryRecordSink {
    fn append(&self, fields: &[String]) -> LinkResult<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(fields.to_vec());
        Ok(())
    }
}

/// Appends one CSV line per record
#[derive(Debug)]
pub struct CsvRecordSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl CsvRecordSink {
    /// Open `path` for appending, creating it if needed
    pub fn open(path: impl Into<PathBuf>) -> LinkResult<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| LinkError::sink(format!("Failed to open {}: {}", path.display(), e)))?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSink for CsvRecordSink {
    fn append(&self, fields: &[String]) -> LinkResult<()> {
        let line = csv_line(fields);
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);

        file.write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| {
                LinkError::sink(format!("Failed to append to {}: {}", self.path.display(), e))
            })
    }
}

/// One CSV row, newline-terminated
pub fn csv_line(fields: &[String]) -> String {
    let mut line = fields
        .iter()
        .map(|field| escape_field(field))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

fn escape_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
