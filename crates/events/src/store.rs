//! JSONL journal - append-only writer

use crate::error::EventError;
use crate::reader::EventReader;
use crate::record::EventRecord;
use cbi_ledger::LoanEvent;
use chrono::Utc;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Append-only JSONL journal with daily file rotation.
///
/// Assigns each appended event the next sequence number, resuming from the
/// highest sequence already on disk.
pub struct EventStore {
    base_path: PathBuf,
    current_file: Option<BufWriter<File>>,
    current_date: Option<String>,
    next_sequence: u64,
}

impl EventStore {
    /// Open (or create) a journal at the given directory.
    pub fn new(base_path: impl AsRef<Path>) -> Result<Self, EventError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;

        let next_sequence = EventReader::from_directory(&base_path)?
            .last_sequence()?
            .map_or(1, |seq| seq + 1);

        Ok(Self {
            base_path,
            current_file: None,
            current_date: None,
            next_sequence,
        })
    }

    /// Append a lifecycle event, assigning it the next sequence number.
    pub fn append(&mut self, event: &LoanEvent) -> Result<EventRecord, EventError> {
        let record = EventRecord {
            sequence: self.next_sequence,
            recorded_at: Utc::now(),
            event: event.clone(),
        };

        let date = record.recorded_at.format("%Y-%m-%d").to_string();
        if self.current_date.as_ref() != Some(&date) {
            self.rotate_file(&date)?;
        }

        if let Some(ref mut writer) = self.current_file {
            let json = serde_json::to_string(&record)?;
            writeln!(writer, "{}", json)?;
            writer.flush()?;
        }

        self.next_sequence += 1;
        Ok(record)
    }

    /// Sequence the next append will receive.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Sequence of the last appended record, 0 if the journal is empty.
    pub fn last_sequence(&self) -> u64 {
        self.next_sequence - 1
    }

    fn rotate_file(&mut self, date: &str) -> Result<(), EventError> {
        if let Some(ref mut writer) = self.current_file {
            writer.flush()?;
        }

        let file_path = self.base_path.join(format!("{}.jsonl", date));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)?;

        self.current_file = Some(BufWriter::new(file));
        self.current_date = Some(date.to_string());

        Ok(())
    }

    /// List all JSONL files in the journal, sorted.
    pub fn list_files(&self) -> Result<Vec<PathBuf>, EventError> {
        let mut files = Vec::new();

        for entry in fs::read_dir(&self.base_path)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "jsonl") {
                files.push(path);
            }
        }

        files.sort();
        Ok(files)
    }

    /// Flush and close the current file.
    pub fn close(&mut self) -> Result<(), EventError> {
        if let Some(ref mut writer) = self.current_file {
            writer.flush()?;
        }
        self.current_file = None;
        self.current_date = None;
        Ok(())
    }
}

impl Drop for EventStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
