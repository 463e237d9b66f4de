//! Run configuration: TOML file, then command-line overrides.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::demux::FrameLayout;
use crate::net::SessionTimeouts;
use crate::protocol::{timeouts, Revision, DEFAULT_ADDRESS, PACKET_DUMP_MARKER};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Device file server (host:port)
    pub address: String,
    pub revision: Revision,
    /// Capture container frames are appended to
    pub output: PathBuf,
    /// Substring that marks a packet dump in the listing
    pub marker: String,
    /// Only pull these names (empty = every dump listed)
    pub files: Vec<String>,
    pub list_only: bool,
    /// Log a failed file and move on instead of aborting the run
    pub keep_going: bool,
    pub verbose: bool,
    /// Overrides the revision's per-frame trailer size
    pub trailer_trim: Option<usize>,
    pub listing_poll_ms: u64,
    pub idle_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub connect_retries: u32,
    pub log_file: Option<PathBuf>,
    pub journal: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            revision: Revision::default(),
            output: PathBuf::from("capture.pcap"),
            marker: PACKET_DUMP_MARKER.to_string(),
            files: Vec::new(),
            list_only: false,
            keep_going: false,
            verbose: false,
            trailer_trim: None,
            listing_poll_ms: timeouts::LISTING_POLL_MS,
            idle_timeout_ms: timeouts::IDLE_READ_MS,
            connect_timeout_ms: timeouts::CONNECT_MS,
            connect_retries: 1,
            log_file: None,
            journal: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let cfg: Config =
            toml::from_str(&data).with_context(|| format!("parse config {}", path.display()))?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            bail!("address must not be empty");
        }
        if self.marker.is_empty() {
            bail!("marker must not be empty");
        }
        // A zero read timeout means "block forever" to the socket layer
        if self.listing_poll_ms == 0 || self.idle_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            bail!("timeouts must be greater than zero");
        }
        Ok(())
    }

    pub fn layout(&self) -> FrameLayout {
        let layout = FrameLayout::for_revision(self.revision);
        match self.trailer_trim {
            Some(trim) => layout.with_trailer_trim(trim),
            None => layout,
        }
    }

    pub fn session_timeouts(&self) -> SessionTimeouts {
        SessionTimeouts {
            listing_poll: Duration::from_millis(self.listing_poll_ms),
            idle: Duration::from_millis(self.idle_timeout_ms),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
