//! Cargo-style progress display
//!
//! Per-file lines scroll above a spinner that carries the current status.

use crossterm::style::{Color, Stylize};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

use crate::logger::Logger;
use crate::protocol::FileEntry;

pub struct PullProgress {
    spinner: ProgressBar,
    start_time: Instant,
    show_frames: bool,
}

impl PullProgress {
    pub fn new(verbose: bool) -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        spinner.enable_steady_tick(Duration::from_millis(100));

        Self {
            spinner,
            start_time: Instant::now(),
            show_frames: verbose,
        }
    }

    /// Print an operation above the spinner line
    pub fn print_op(&self, operation: &str, detail: &str, color: Color) {
        self.spinner.suspend(|| {
            println!("  {} {}", operation.with(color).bold(), detail);
        });
    }

    pub fn set_status(&self, stage: &str, details: &str) {
        self.spinner.set_message(format!(
            "{} {} ({:.1}s)",
            stage.with(Color::Green).bold(),
            details,
            self.start_time.elapsed().as_secs_f64()
        ));
    }

    pub fn finish_error(&self, msg: &str) {
        self.spinner
            .finish_with_message(format!("{} {}", "Failed".with(Color::Red).bold(), msg));
    }
}

impl Logger for PullProgress {
    fn connected(&self, addr: &str) {
        self.print_op("Connected", addr, Color::Green);
        self.set_status("Listing", addr);
    }

    fn listed(&self, entries: &[FileEntry]) {
        if entries.is_empty() {
            self.print_op("Listed", "no packet dumps on device", Color::Yellow);
        }
        for e in entries {
            self.print_op("Found", &e.to_string(), Color::Cyan);
        }
    }

    fn malformed_record(&self, position: usize, len: usize) {
        self.print_op(
            "Skipped",
            &format!("listing record {} ({} of 33 bytes)", position, len),
            Color::Yellow,
        );
    }

    fn requesting(&self, entry: &FileEntry) {
        self.set_status("Requesting", &entry.name);
    }

    fn received(&self, entry: &FileEntry, _chunk: usize, total: usize) {
        self.set_status("Receiving", &format!("{} {} bytes", entry.name, total));
    }

    fn frame(&self, entry: &FileEntry, record: usize, len: usize) {
        if self.show_frames {
            self.print_op(
                "Frame",
                &format!("{} #{} {} bytes", entry.name, record, len),
                Color::DarkGrey,
            );
        }
    }

    fn pulled(&self, entry: &FileEntry, frames: usize, bytes: usize) {
        self.print_op(
            "Pulled",
            &format!("{} ({} frames, {} bytes)", entry.name, frames, bytes),
            Color::Green,
        );
    }

    fn failed(&self, entry: &FileEntry, msg: &str) {
        self.print_op("Failed", &format!("{}: {}", entry.name, msg), Color::Red);
    }

    fn error(&self, context: &str, msg: &str) {
        self.print_op("Warning", &format!("{}: {}", context, msg), Color::Yellow);
    }

    fn done(&self, files: u64, frames: u64, seconds: f64) {
        self.spinner.finish_with_message(format!(
            "{} {} files, {} frames in {:.1}s",
            "Completed".with(Color::Green).bold(),
            files,
            frames,
            seconds
        ));
    }
}
