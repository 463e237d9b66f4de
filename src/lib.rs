//! pktpull library
//!
//! Client for the packet-dump file server on an ESP32 802.11 sniffer: lists
//! the dumps the device holds, pulls them over TCP and splits each one into
//! the captured frames, appended to a pcap file.

pub mod capture;
pub mod cli;
pub mod config;
pub mod demux;
pub mod error;
pub mod log;
pub mod logger;
pub mod net;
pub mod progress;
pub mod protocol;
pub mod pull;

pub use error::PullError;
