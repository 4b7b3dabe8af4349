//! Run configuration shared by every strategy.

use std::num::NonZeroUsize;
use std::time::Duration;

use strassen_comm::CommOptions;

use crate::Error;
use crate::algorithm::{DEFAULT_CUTOVER, StrassenCore};
use crate::distributed::WORKERS;

const DEFAULT_CHUNK_LEN: usize = 1024;
const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Side at or below which products are computed directly.
    pub cutover: usize,
    /// Threads in the parallel evaluator's pool.
    pub pool_size: usize,
    /// Ranks requested for the distributed evaluator. Only 8 is accepted.
    pub workers: usize,
    /// Elements per broadcast chunk.
    pub chunk_len: usize,
    /// Longest silence tolerated from a rank during a receive or the barrier.
    /// Busy ranks pulse, so this does not cap compute time. `None` waits
    /// forever.
    pub recv_timeout: Option<Duration>,
    /// Zero-pad sides that do not halve down to the cutover.
    pub pad: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cutover: DEFAULT_CUTOVER,
            pool_size: default_pool_size(),
            workers: WORKERS,
            chunk_len: DEFAULT_CHUNK_LEN,
            recv_timeout: Some(DEFAULT_RECV_TIMEOUT),
            pad: true,
        }
    }
}

impl Config {
    /// Rejects settings no strategy could run with. The worker count is
    /// checked when the distributed strategy is started.
    pub fn validate(&self) -> Result<(), Error> {
        if self.cutover == 0 {
            return Err(Error::Config("cutover must be at least 1".to_string()));
        }
        if self.pool_size == 0 {
            return Err(Error::Config("pool size must be at least 1".to_string()));
        }
        if self.chunk_len == 0 {
            return Err(Error::Config("chunk length must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn core(&self) -> Result<StrassenCore, Error> {
        StrassenCore::new(self.cutover)
    }

    pub fn comm_options(&self) -> CommOptions {
        CommOptions {
            chunk_len: self.chunk_len,
            timeout: self.recv_timeout,
        }
    }
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}
