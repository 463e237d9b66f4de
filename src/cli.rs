//! Command-line surface. Every flag overrides the matching config file key.

use anyhow::Result;
use clap::{ArgAction, Parser};
use std::path::PathBuf;

use crate::config::Config;
use crate::protocol::Revision;

#[derive(Parser, Debug, Default)]
#[command(
    author,
    version,
    about = "Pull 802.11 packet dumps from a sniffer's file server into a pcap file"
)]
pub struct Args {
    /// File server address (host:port) [default: 192.168.4.1:420]
    #[arg(short, long)]
    pub address: Option<String>,

    /// Server protocol revision [default: v3]
    #[arg(short, long, value_enum)]
    pub revision: Option<Revision>,

    /// Capture file frames are appended to [default: capture.pcap]
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Only pull the named dump (repeatable)
    #[arg(short = 'f', long = "file", action = ArgAction::Append)]
    pub files: Vec<String>,

    /// Print the listing without requesting anything
    #[arg(short, long)]
    pub list_only: bool,

    /// Keep pulling the remaining files after one fails
    #[arg(short = 'k', long)]
    pub keep_going: bool,

    /// Report every frame written
    #[arg(short, long)]
    pub verbose: bool,

    /// No progress output
    #[arg(short, long)]
    pub quiet: bool,

    /// Substring marking a packet dump in the listing [default: .pkt]
    #[arg(long)]
    pub marker: Option<String>,

    /// Bytes stripped from the end of each frame (overrides the revision)
    #[arg(long)]
    pub trailer_trim: Option<usize>,

    /// Listing poll wait in milliseconds
    #[arg(long)]
    pub listing_poll_ms: Option<u64>,

    /// Give up on a silent transfer after this many milliseconds
    #[arg(long)]
    pub idle_timeout_ms: Option<u64>,

    /// TOML config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Append timestamped session events to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Append a JSONL record per pulled file
    #[arg(long)]
    pub journal: Option<PathBuf>,
}

impl Args {
    /// Load the config file (if any) and layer these flags over it.
    pub fn resolve(&self) -> Result<Config> {
        let mut cfg = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        self.apply(&mut cfg);
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply(&self, cfg: &mut Config) {
        if let Some(a) = &self.address {
            cfg.address = a.clone();
        }
        if let Some(r) = self.revision {
            cfg.revision = r;
        }
        if let Some(o) = &self.output {
            cfg.output = o.clone();
        }
        if !self.files.is_empty() {
            cfg.files = self.files.clone();
        }
        cfg.list_only |= self.list_only;
        cfg.keep_going |= self.keep_going;
        cfg.verbose |= self.verbose;
        if let Some(m) = &self.marker {
            cfg.marker = m.clone();
        }
        if self.trailer_trim.is_some() {
            cfg.trailer_trim = self.trailer_trim;
        }
        if let Some(ms) = self.listing_poll_ms {
            cfg.listing_poll_ms = ms;
        }
        if let Some(ms) = self.idle_timeout_ms {
            cfg.idle_timeout_ms = ms;
        }
        if self.log_file.is_some() {
            cfg.log_file = self.log_file.clone();
        }
        if self.journal.is_some() {
            cfg.journal = self.journal.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pktpull.toml");
        std::fs::write(
            &path,
            "address = \"10.0.0.9:420\"\nrevision = \"v1\"\noutput = \"from-file.pcap\"\n",
        )
        .unwrap();
        let args = Args::parse_from([
            "pktpull",
            "--config",
            path.to_str().unwrap(),
            "-r",
            "v2",
            "-f",
            "a.pkt",
            "-f",
            "b.pkt",
            "--trailer-trim",
            "0",
        ]);

        let cfg = args.resolve().unwrap();

        assert_eq!(cfg.address, "10.0.0.9:420");
        assert_eq!(cfg.revision, Revision::V2);
        assert_eq!(cfg.output, PathBuf::from("from-file.pcap"));
        assert_eq!(cfg.files, vec!["a.pkt", "b.pkt"]);
        assert_eq!(cfg.trailer_trim, Some(0));
    }

    #[test]
    fn no_flags_gives_defaults() {
        let cfg = Args::parse_from(["pktpull"]).resolve().unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn invalid_override_rejected() {
        let args = Args::parse_from(["pktpull", "--idle-timeout-ms", "0"]);
        assert!(args.resolve().is_err());
    }
}
