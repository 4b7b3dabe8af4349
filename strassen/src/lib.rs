//! Strassen matrix multiplication under three concurrency strategies.
//!
//! One recursive algorithm, [`StrassenCore`], splits both operands into
//! quadrants and asks a [`ProductEvaluator`] for the seven sub-products.
//! The evaluator is the only thing that varies:
//!
//! - [`SequentialEvaluator`] recurses inline, one product after another
//! - [`ParallelEvaluator`] runs the seven products as tasks on a bounded
//!   rayon pool, recursively, until the cutover
//! - [`DistributedEvaluator`] maps the top-level products onto eight ranks
//!   that exchange flattened matrices over `strassen-comm`
//!
//! Elements are `i32` and wrap on overflow, so every strategy produces the
//! same bits as the cubic definition.
//!
//! # Example
//!
//! ```
//! use strassen::{Matrix, SequentialEvaluator, StrassenCore};
//!
//! let a = Matrix::from_rows(vec![vec![1, 2], vec![3, 4]])?;
//! let b = Matrix::from_rows(vec![vec![5, 6], vec![7, 8]])?;
//!
//! let core = StrassenCore::new(1)?;
//! let product = SequentialEvaluator.multiply(&core, &a, &b)?;
//! assert_eq!(product, Matrix::from_rows(vec![vec![19, 22], vec![43, 50]])?);
//! # Ok::<(), strassen::Error>(())
//! ```

mod algorithm;
mod config;
mod distributed;
mod error;
pub mod matrix;
mod orchestrator;
mod parallel;
mod sequential;

pub use algorithm::{
    DEFAULT_CUTOVER, OperandPair, ProductEvaluator, Quadrants, StrassenCore, SubProduct, recombine,
};
pub use config::Config;
pub use distributed::{DistributedEvaluator, Session, WORKERS};
pub use error::Error;
pub use matrix::{Element, Matrix};
pub use orchestrator::{Orchestrator, Report, Strategy, random_pair};
pub use parallel::ParallelEvaluator;
pub use sequential::SequentialEvaluator;
