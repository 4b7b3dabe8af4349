//! Error types for Strassen multiplication.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("comm error: {0}")]
    Comm(#[from] strassen_comm::Error),

    #[error("matrix dimension mismatch: left is {0}x{0}, right is {1}x{1}")]
    DimensionMismatch(usize, usize),

    #[error("block of side {size} at ({row}, {col}) does not fit a parent of side {parent}")]
    BlockOutOfBounds {
        size: usize,
        row: usize,
        col: usize,
        parent: usize,
    },

    #[error("buffer of length {len} cannot hold a {side}x{side} matrix")]
    BufferLength { len: usize, side: usize },

    #[error("row {row} has {len} entries, expected {side}")]
    Ragged { row: usize, len: usize, side: usize },

    #[error("side {side} does not halve evenly down to the cutover of {cutover}")]
    NotPowerOfTwo { side: usize, cutover: usize },

    #[error("distributed topology needs exactly {expected} workers, got {actual}")]
    Topology { expected: usize, actual: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("{strategy} result differs from {reference}")]
    Divergence {
        strategy: &'static str,
        reference: &'static str,
    },

    #[error("protocol error: {0}")]
    Protocol(String),
}
