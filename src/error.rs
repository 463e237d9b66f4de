//! Protocol error conditions callers need to tell apart.
//!
//! Everything else travels as `anyhow::Error` with context; these are the
//! root causes worth a `downcast_ref`.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PullError {
    /// Length table or a declared frame runs past the end of the buffer.
    #[error("truncated transfer: need {needed} bytes, have {available}")]
    TruncatedTransfer { needed: usize, available: usize },

    /// Declared length cannot hold the fixed per-frame trailer.
    #[error("record {record} declares {len} bytes, shorter than the {trailer}-byte trailer")]
    RecordShorterThanTrailer {
        record: usize,
        len: usize,
        trailer: usize,
    },

    /// No bytes arrived within the idle timeout.
    #[error("transfer stalled after {received} bytes (idle {idle_ms} ms)")]
    TransferStalled { received: usize, idle_ms: u64 },

    /// Counted server answered a request with a different file.
    #[error("requested index {requested}, server echoed {echoed}")]
    EchoMismatch { requested: u8, echoed: u8 },

    #[error("transfer exceeds {limit} bytes")]
    TransferTooLarge { limit: usize },

    /// Peer went away before the protocol step completed.
    #[error("connection closed by peer during {0}")]
    ConnectionClosed(&'static str),
}

pub type Result<T> = std::result::Result<T, PullError>;
