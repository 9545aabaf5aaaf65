use crate::filter::Filter;
use crate::record::Record;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read records from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("record at line {line} is not a valid grievance: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Read side of the grievance record store.
pub trait RecordStore: Send + Sync {
    fn find(&self, filter: &Filter) -> Result<Vec<Record>, StoreError>;
    fn count(&self) -> usize;
}

/// Records held in memory, in insertion order.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    records: Vec<Record>,
}

impl MemoryStore {
    pub fn new() -> Self { Self { records: Vec::new() } }

    pub fn from_records(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn push(&mut self, record: Record) -> usize {
        self.records.push(record);
        self.records.len() - 1
    }

    pub fn push_line(&mut self, line: &str) -> Result<usize, StoreError> {
        let rec: Record = serde_json::from_str(line).map_err(|source| StoreError::Parse { line: self.records.len() + 1, source })?;
        Ok(self.push(rec))
    }

    /// Parse a JSON array of records, or one record per line.
    pub fn from_json_str(content: &str) -> Result<Self, StoreError> {
        let trimmed = content.trim_start();
        if trimmed.starts_with('[') {
            let records: Vec<Record> = serde_json::from_str(trimmed).map_err(|source| StoreError::Parse { line: 1, source })?;
            return Ok(Self { records });
        }
        let mut store = Self::new();
        for (i, line) in content.lines().enumerate() {
            if line.trim().is_empty() { continue; }
            let rec: Record = serde_json::from_str(line).map_err(|source| StoreError::Parse { line: i + 1, source })?;
            store.push(rec);
        }
        Ok(store)
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let content = fs::read_to_string(path).map_err(|source| StoreError::Io { path: path.display().to_string(), source })?;
        let store = Self::from_json_str(&content)?;
        debug!(path = %path.display(), records = store.records.len(), "loaded record store");
        Ok(store)
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }
}

impl RecordStore for MemoryStore {
    fn find(&self, filter: &Filter) -> Result<Vec<Record>, StoreError> {
        Ok(self.records.iter().filter(|r| filter.matches(r)).cloned().collect())
    }

    fn count(&self) -> usize {
        self.records.len()
    }
}
