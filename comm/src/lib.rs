//! Fixed-topology message passing between in-process ranks.
//!
//! `strassen-comm` gives each participant of a computation (a *rank*) an
//! [`Endpoint`] it owns exclusively. Ranks share no memory: everything they
//! exchange is a prost-encoded byte payload travelling over a dedicated
//! channel per ordered pair of ranks.
//!
//! # Primitives
//!
//! - Point-to-point tagged `send`/`recv`; messages with a different tag are
//!   held back until someone asks for them
//! - Chunked `broadcast` of integer buffers from a root rank
//! - A collective `barrier`
//! - A world-wide cancellation signal
//! - Liveness pulses, sent by a [`Pacemaker`] while its rank is busy
//!
//! Every blocking primitive is bounded by the world's deadline, measured as
//! silence since the last message or pulse, and returns early with
//! [`Error::Cancelled`] once any rank cancels.
//!
//! # Example
//!
//! ```no_run
//! use strassen_comm::{CommOptions, World};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut endpoints = World::build(2, CommOptions::default())?;
//!     let mut second = endpoints.pop().unwrap();
//!     let mut first = endpoints.pop().unwrap();
//!
//!     let peer = tokio::spawn(async move { second.broadcast(0, None).await });
//!     first.broadcast(0, Some(&[1, 2, 3])).await?;
//!     assert_eq!(peer.await??, vec![1, 2, 3]);
//!
//!     Ok(())
//! }
//! ```

mod error;
mod mailbox;
mod pulse;
mod signal;
mod world;

pub use error::Error;
pub use pulse::Pacemaker;
pub use signal::CancelHandle;
pub use world::{CommOptions, Endpoint, World};
