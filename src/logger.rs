use anyhow::Result;
use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::protocol::FileEntry;

/// Session event hooks. Every method defaults to a no-op so sinks only
/// implement what they care about.
pub trait Logger: Send + Sync {
    fn connected(&self, _addr: &str) {}
    fn listed(&self, _entries: &[FileEntry]) {}
    fn malformed_record(&self, _position: usize, _len: usize) {}
    fn requesting(&self, _entry: &FileEntry) {}
    fn received(&self, _entry: &FileEntry, _chunk: usize, _total: usize) {}
    fn frame(&self, _entry: &FileEntry, _record: usize, _len: usize) {}
    fn pulled(&self, _entry: &FileEntry, _frames: usize, _bytes: usize) {}
    fn failed(&self, _entry: &FileEntry, _msg: &str) {}
    fn error(&self, _context: &str, _msg: &str) {}
    fn done(&self, _files: u64, _frames: u64, _seconds: f64) {}
}

pub struct NoopLogger;
impl Logger for NoopLogger {}

pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        if let Ok(mut f) = self.file.lock() {
            let _ = writeln!(f, "[{}] {}", Utc::now().to_rfc3339(), s);
        }
    }
}

impl Logger for TextLogger {
    fn connected(&self, addr: &str) {
        self.line(&format!("CONNECT addr={}", addr));
    }
    fn listed(&self, entries: &[FileEntry]) {
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        self.line(&format!("LIST count={} files={}", entries.len(), names.join(",")));
    }
    fn malformed_record(&self, position: usize, len: usize) {
        self.line(&format!("SKIP record={} len={}", position, len));
    }
    fn requesting(&self, entry: &FileEntry) {
        self.line(&format!("REQUEST index={} file={}", entry.index, entry.name));
    }
    fn pulled(&self, entry: &FileEntry, frames: usize, bytes: usize) {
        self.line(&format!(
            "PULL file={} frames={} bytes={}",
            entry.name, frames, bytes
        ));
    }
    fn failed(&self, entry: &FileEntry, msg: &str) {
        self.line(&format!("FAIL file={} msg={}", entry.name, msg));
    }
    fn error(&self, context: &str, msg: &str) {
        self.line(&format!("ERROR ctx={} msg={}", context, msg));
    }
    fn done(&self, files: u64, frames: u64, seconds: f64) {
        self.line(&format!(
            "DONE files={files} frames={frames} seconds={seconds:.3}"
        ));
    }
}

/// Forwards every event to each inner logger in order.
#[derive(Default)]
pub struct MultiLogger {
    sinks: Vec<Arc<dyn Logger>>,
}

impl MultiLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: Arc<dyn Logger>) {
        self.sinks.push(sink);
    }
}

impl Logger for MultiLogger {
    fn connected(&self, addr: &str) {
        self.sinks.iter().for_each(|s| s.connected(addr));
    }
    fn listed(&self, entries: &[FileEntry]) {
        self.sinks.iter().for_each(|s| s.listed(entries));
    }
    fn malformed_record(&self, position: usize, len: usize) {
        self.sinks
            .iter()
            .for_each(|s| s.malformed_record(position, len));
    }
    fn requesting(&self, entry: &FileEntry) {
        self.sinks.iter().for_each(|s| s.requesting(entry));
    }
    fn received(&self, entry: &FileEntry, chunk: usize, total: usize) {
        self.sinks.iter().for_each(|s| s.received(entry, chunk, total));
    }
    fn frame(&self, entry: &FileEntry, record: usize, len: usize) {
        self.sinks.iter().for_each(|s| s.frame(entry, record, len));
    }
    fn pulled(&self, entry: &FileEntry, frames: usize, bytes: usize) {
        self.sinks.iter().for_each(|s| s.pulled(entry, frames, bytes));
    }
    fn failed(&self, entry: &FileEntry, msg: &str) {
        self.sinks.iter().for_each(|s| s.failed(entry, msg));
    }
    fn error(&self, context: &str, msg: &str) {
        self.sinks.iter().for_each(|s| s.error(context, msg));
    }
    fn done(&self, files: u64, frames: u64, seconds: f64) {
        self.sinks.iter().for_each(|s| s.done(files, frames, seconds));
    }
}
