//! Error types for rank communication.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("rank {rank} is outside a world of {size}")]
    InvalidRank { rank: usize, size: usize },

    #[error("channel to rank {rank} closed")]
    Closed { rank: usize },

    #[error("rank {rank} unresponsive after {waited:?}")]
    WorkerUnresponsive { rank: usize, waited: Duration },

    #[error("barrier not reached by all ranks within {waited:?}")]
    BarrierTimeout { waited: Duration },

    #[error("operation cancelled")]
    Cancelled,

    #[error("decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid world configuration: {0}")]
    Config(String),
}
