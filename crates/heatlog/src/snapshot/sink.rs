use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::WriteError;

/// Append-only row storage, one table per worksheet title.
///
/// This trait allows the spreadsheet backend to be swapped for an
/// in-memory sink in tests.
#[async_trait]
pub trait RowSink: Send + Sync {
    /// Append one row to the end of `worksheet`.
    async fn append_row(&self, worksheet: &str, row: Vec<Value>) -> Result<(), WriteError>;
}

/// A resolved destination: one worksheet of a sink.
#[derive(Clone)]
pub struct Worksheet {
    title: String,
    sink: Arc<dyn RowSink>,
}

impl Worksheet {
    pub fn new(title: impl Into<String>, sink: Arc<dyn RowSink>) -> Self {
        Self {
            title: title.into(),
            sink,
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub async fn append_row(&self, row: Vec<Value>) -> Result<(), WriteError> {
        self.sink.append_row(&self.title, row).await
    }
}

impl std::fmt::Debug for Worksheet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worksheet")
            .field("title", &self.title)
            .finish_non_exhaustive()
    }
}

/// In-memory sink for tests
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemorySink {
    /// Worksheets that exist; appends elsewhere fail as missing
    pub worksheets: Vec<String>,
    /// Worksheets whose appends are rejected
    pub failing: Vec<String>,
    pub rows: std::sync::Mutex<Vec<(String, Vec<Value>)>>,
}

#[cfg(test)]
impl MemorySink {
    pub fn new(worksheets: &[&str]) -> Self {
        Self {
            worksheets: worksheets.iter().map(|w| w.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Reject every append to `worksheet`.
    pub fn failing(mut self, worksheet: &str) -> Self {
        self.failing.push(worksheet.to_string());
        self
    }

    /// Rows appended to `worksheet`, oldest first.
    pub fn rows_for(&self, worksheet: &str) -> Vec<Vec<Value>> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|(w, _)| w == worksheet)
            .map(|(_, row)| row.clone())
            .collect()
    }
}

#[cfg(test)]
#[async_trait]
impl RowSink for MemorySink {
    async fn append_row(&self, worksheet: &str, row: Vec<Value>) -> Result<(), WriteError> {
        if !self.worksheets.iter().any(|w| w == worksheet) {
            return Err(WriteError::MissingWorksheet(worksheet.to_string()));
        }
        if self.failing.iter().any(|w| w == worksheet) {
            return Err(WriteError::Rejected {
                worksheet: worksheet.to_string(),
                status: reqwest::StatusCode::TOO_MANY_REQUESTS,
                body: "quota exceeded".to_string(),
            });
        }

        self.rows
            .lock()
            .unwrap()
            .push((worksheet.to_string(), row));
        Ok(())
    }
}
