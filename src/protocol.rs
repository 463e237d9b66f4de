//! Shared protocol constants for the sniffer's TCP file server

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

// Listing records: 1-byte index + 32-byte name in the counted revision,
// a newline-terminated name read 33 bytes at a time in the polled ones.
pub const LISTING_RECORD_LEN: usize = 33;
pub const NAME_FIELD_LEN: usize = 32;

// Transfer read sizes. The polled server streams 256-byte chunks and
// signals end-of-file with a short one.
pub const POLLED_CHUNK_LEN: usize = 256;
pub const COUNTED_CHUNK_LEN: usize = 1024;

// Dumps on the device are named "<ssid>.pkt"
pub const PACKET_DUMP_MARKER: &str = ".pkt";

pub const DEFAULT_ADDRESS: &str = "192.168.4.1:420";

// Upper bound on one transfer buffer. A dump is at most 6 frames of 256 bytes
// plus the length table, so this only trips on a runaway peer.
pub const MAX_TRANSFER_SIZE: usize = 1024 * 1024;

pub mod timeouts {
    // Bounded wait per listing poll (ms)
    pub const LISTING_POLL_MS: u64 = 3_000;

    // Maximum silence on a transfer read (ms)
    pub const IDLE_READ_MS: u64 = 10_000;

    // Connection establishment timeout (ms)
    pub const CONNECT_MS: u64 = 5_000;

    // Pause before the single connect retry (ms)
    pub const CONNECT_RETRY_DELAY_MS: u64 = 500;
}

/// Server protocol revision.
///
/// The device firmware went through three incompatible iterations of the
/// same protocol; the tag selects every revision-dependent behaviour.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Revision {
    /// Polled listing, request by name, 4 frames per dump.
    V1,
    /// Polled listing, request by name, 6 frames per dump.
    V2,
    /// Counted listing, request by index, 6 frames with a 4-byte trailer each.
    #[default]
    V3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListingMode {
    /// Server streams names until it goes quiet.
    Polled,
    /// Count byte, echoed ack, then exactly that many records.
    Counted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndOfData {
    /// A read shorter than the chunk size ends the body.
    ShortChunk,
    /// The peer half-closes after the body.
    PeerClose,
}

impl Revision {
    pub fn listing_mode(self) -> ListingMode {
        match self {
            Revision::V1 | Revision::V2 => ListingMode::Polled,
            Revision::V3 => ListingMode::Counted,
        }
    }

    pub fn end_of_data(self) -> EndOfData {
        match self {
            Revision::V1 | Revision::V2 => EndOfData::ShortChunk,
            Revision::V3 => EndOfData::PeerClose,
        }
    }

    /// True when a file is requested by its index byte rather than its name.
    pub fn requests_by_index(self) -> bool {
        self == Revision::V3
    }

    pub fn chunk_len(self) -> usize {
        match self.end_of_data() {
            EndOfData::ShortChunk => POLLED_CHUNK_LEN,
            EndOfData::PeerClose => COUNTED_CHUNK_LEN,
        }
    }

    pub fn record_count(self) -> usize {
        match self {
            Revision::V1 => 4,
            Revision::V2 | Revision::V3 => 6,
        }
    }

    pub fn trailer_trim(self) -> usize {
        match self {
            Revision::V1 | Revision::V2 => 0,
            Revision::V3 => 4,
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Revision::V1 => "v1",
            Revision::V2 => "v2",
            Revision::V3 => "v3",
        };
        f.write_str(s)
    }
}

/// One retrievable file as announced by the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub index: u8,
    pub name: String,
}

impl FileEntry {
    pub fn new(index: u8, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
        }
    }
}

impl fmt::Display for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.index, self.name)
    }
}

fn decode_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim().to_string()
}

/// Parse one counted-listing record (index byte + NUL-padded name).
///
/// Returns `None` unless the record is exactly `LISTING_RECORD_LEN` bytes.
pub fn parse_counted_record(raw: &[u8]) -> Option<FileEntry> {
    if raw.len() != LISTING_RECORD_LEN {
        return None;
    }
    let field = &raw[1..];
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    Some(FileEntry::new(raw[0], decode_name(&field[..end])))
}

/// Reassembles newline-terminated names from polled listing reads.
///
/// Reads are capped at one record but TCP may split or merge the server's
/// writes, so a name without its terminator is carried into the next push.
#[derive(Debug, Default)]
pub struct NameAssembler {
    pending: Vec<u8>,
}

impl NameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes, returning every name completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut names = Vec::new();
        for &b in bytes {
            if b == b'\n' || b == 0 {
                if let Some(name) = self.take() {
                    names.push(name);
                }
            } else {
                self.pending.push(b);
            }
        }
        names
    }

    /// Flush a trailing name the server never terminated.
    pub fn finish(mut self) -> Option<String> {
        self.take()
    }

    fn take(&mut self) -> Option<String> {
        let name = decode_name(&self.pending);
        self.pending.clear();
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }
}

pub fn is_packet_dump(name: &str, marker: &str) -> bool {
    name.contains(marker)
}

/// Keep only entries whose name carries the dump marker, order preserved.
pub fn filter_listing(entries: Vec<FileEntry>, marker: &str) -> Vec<FileEntry> {
    entries
        .into_iter()
        .filter(|e| is_packet_dump(&e.name, marker))
        .collect()
}

/// Request payload for the name-addressed revisions.
pub fn name_request(name: &str) -> Vec<u8> {
    let mut bytes = name.trim_end_matches(['\n', '\r']).as_bytes().to_vec();
    bytes.truncate(NAME_FIELD_LEN);
    bytes
}
