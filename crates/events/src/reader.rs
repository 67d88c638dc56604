//! JSONL journal reader - sequential reader for replay

use crate::error::EventError;
use crate::record::EventRecord;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Sequential journal reader for replay.
pub struct EventReader {
    files: Vec<std::path::PathBuf>,
}

impl EventReader {
    /// Create a new reader over all JSONL files in a directory.
    pub fn from_directory(path: impl AsRef<Path>) -> Result<Self, EventError> {
        let path = path.as_ref();
        let mut files = Vec::new();

        if path.exists() {
            for entry in std::fs::read_dir(path)? {
                let entry = entry?;
                let file_path = entry.path();
                if file_path.extension().is_some_and(|ext| ext == "jsonl") {
                    files.push(file_path);
                }
            }
        }

        files.sort();

        Ok(Self { files })
    }

    /// Read all records from all files in journal order.
    pub fn read_all(&self) -> Result<Vec<EventRecord>, EventError> {
        let mut records = Vec::new();

        for file_path in &self.files {
            let file = File::open(file_path)?;
            let reader = BufReader::new(file);

            for line in reader.lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: EventRecord = serde_json::from_str(&line)?;
                records.push(record);
            }
        }

        Ok(records)
    }

    /// Get the last sequence number across all files.
    pub fn last_sequence(&self) -> Result<Option<u64>, EventError> {
        let Some(last_file) = self.files.last() else {
            return Ok(None);
        };

        let file = File::open(last_file)?;
        let reader = BufReader::new(file);

        let mut last_seq = None;
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: EventRecord = serde_json::from_str(&line)?;
            last_seq = Some(record.sequence);
        }

        Ok(last_seq)
    }

    /// Count total records across all files.
    pub fn count(&self) -> Result<usize, EventError> {
        let mut count = 0;

        for file_path in &self.files {
            let file = File::open(file_path)?;
            let reader = BufReader::new(file);

            for line in reader.lines() {
                let line = line?;
                if !line.trim().is_empty() {
                    count += 1;
                }
            }
        }

        Ok(count)
    }
}
