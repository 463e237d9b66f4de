use serde::{Serialize, Deserialize};
use std::path::{Path, PathBuf};
use std::fs::{OpenOptions, File};
use std::io::{BufReader, BufWriter, Write, BufRead};
use anyhow::{Result, Context};
use chrono::Utc;
use uuid::Uuid;

use crate::logger::Logger;
use crate::protocol::{FileEntry, Revision};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullStatus {
    Completed,
    Failed,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PullLogEntry {
    pub timestamp: String,
    pub session_id: String,
    pub address: String,
    pub revision: Revision,
    pub file: String,
    pub index: u8,
    pub status: PullStatus,
    pub frames: usize,
    pub bytes: usize,
    pub error: Option<String>,
}

/// JSONL record of every file a run pulled or failed to pull.
pub struct PullJournal {
    log_file_path: PathBuf,
    session_id: String,
    address: String,
    revision: Revision,
}

impl PullJournal {
    pub fn new(path: &Path, address: &str, revision: Revision) -> Self {
        PullJournal {
            log_file_path: path.to_path_buf(),
            session_id: Uuid::new_v4().to_string(),
            address: address.to_string(),
            revision,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn entry(&self, file: &FileEntry, status: PullStatus) -> PullLogEntry {
        PullLogEntry {
            timestamp: Utc::now().to_rfc3339(),
            session_id: self.session_id.clone(),
            address: self.address.clone(),
            revision: self.revision,
            file: file.name.clone(),
            index: file.index,
            status,
            frames: 0,
            bytes: 0,
            error: None,
        }
    }

    pub fn add_entry(&self, entry: PullLogEntry) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file_path)
            .context("Failed to open pull journal")?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_log(&self) -> Result<Vec<PullLogEntry>> {
        if !self.log_file_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.log_file_path)
            .context("Failed to open pull journal for reading")?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: PullLogEntry = serde_json::from_str(&line)?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

impl Logger for PullJournal {
    fn pulled(&self, file: &FileEntry, frames: usize, bytes: usize) {
        let mut e = self.entry(file, PullStatus::Completed);
        e.frames = frames;
        e.bytes = bytes;
        if let Err(err) = self.add_entry(e) {
            eprintln!("journal: {:#}", err);
        }
    }

    fn failed(&self, file: &FileEntry, msg: &str) {
        let mut e = self.entry(file, PullStatus::Failed);
        e.error = Some(msg.to_string());
        if let Err(err) = self.add_entry(e) {
            eprintln!("journal: {:#}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_round_trips_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pulls.jsonl");
        let journal = PullJournal::new(&path, "1.2.3.4:420", Revision::V3);
        assert!(journal.read_log().unwrap().is_empty());

        journal.pulled(&FileEntry::new(1, "lab.pkt"), 6, 1210);
        journal.failed(&FileEntry::new(2, "cut.pkt"), "truncated transfer");

        let entries = journal.read_log().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].status, PullStatus::Completed);
        assert_eq!(entries[0].frames, 6);
        assert_eq!(entries[0].revision, Revision::V3);
        assert_eq!(entries[1].status, PullStatus::Failed);
        assert_eq!(entries[1].index, 2);
        assert_eq!(entries[1].error.as_deref(), Some("truncated transfer"));
        assert!(entries.iter().all(|e| e.session_id == journal.session_id()));
    }
}
