//! Drives one multiplication end to end: padding, strategy selection,
//! timing and result checking.

use std::fmt;
use std::time::{Duration, Instant};

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{debug, info};

use crate::Error;
use crate::algorithm::StrassenCore;
use crate::config::Config;
use crate::distributed::{DistributedEvaluator, Session};
use crate::matrix::{self, Matrix};
use crate::parallel::ParallelEvaluator;
use crate::sequential::SequentialEvaluator;

/// How the seven sub-products of each step are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Sequential,
    Parallel,
    Distributed,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [
        Strategy::Sequential,
        Strategy::Parallel,
        Strategy::Distributed,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Strategy::Sequential => "sequential",
            Strategy::Parallel => "parallel",
            Strategy::Distributed => "distributed",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one run.
#[derive(Debug, Clone)]
pub struct Report {
    pub strategy: Strategy,
    /// Side of the inputs and of `product`.
    pub side: usize,
    /// Side the evaluator actually worked on after padding.
    pub padded_side: usize,
    /// Untimed preparation before the evaluator starts: starting the ranks
    /// and broadcasting the operands. Zero for the local strategies.
    pub setup: Duration,
    /// Wall-clock time spent inside the evaluator.
    pub elapsed: Duration,
    pub product: Matrix,
}

enum Prepared {
    Sequential,
    Parallel(ParallelEvaluator),
    Distributed(DistributedEvaluator),
}

/// An evaluator with its operands in place, ready to be timed.
enum Staged {
    Sequential(Matrix, Matrix),
    Parallel(ParallelEvaluator, Matrix, Matrix),
    Distributed(Session),
}

pub struct Orchestrator {
    config: Config,
    core: StrassenCore,
}

impl Orchestrator {
    pub fn new(config: Config) -> Result<Self, Error> {
        config.validate()?;
        let core = config.core()?;
        Ok(Self { config, core })
    }

    /// Multiplies `a` by `b` with `strategy`, timing only the evaluator.
    ///
    /// Any failure aborts the run; no partial product is returned.
    pub async fn run(&self, strategy: Strategy, a: &Matrix, b: &Matrix) -> Result<Report, Error> {
        if a.side() != b.side() {
            return Err(Error::DimensionMismatch(a.side(), b.side()));
        }
        let side = a.side();
        let padded_side = if self.config.pad {
            self.core.padded_side(side)
        } else {
            side
        };

        // Pools and topologies are checked before any work is timed.
        let prepared = match strategy {
            Strategy::Sequential => Prepared::Sequential,
            Strategy::Parallel => {
                Prepared::Parallel(ParallelEvaluator::new(self.config.pool_size)?)
            }
            Strategy::Distributed => Prepared::Distributed(DistributedEvaluator::new(
                self.core,
                self.config.workers,
                self.config.comm_options(),
            )?),
        };

        let (a, b) = if padded_side != side {
            debug!(side, padded_side, "zero-padding operands");
            (matrix::pad_to(a, padded_side)?, matrix::pad_to(b, padded_side)?)
        } else {
            (a.clone(), b.clone())
        };

        let (staged, setup) = match prepared {
            Prepared::Sequential => (Staged::Sequential(a, b), Duration::ZERO),
            Prepared::Parallel(evaluator) => (Staged::Parallel(evaluator, a, b), Duration::ZERO),
            Prepared::Distributed(evaluator) => {
                let setup_started = Instant::now();
                let session = evaluator.prepare(&a, &b).await?;
                (Staged::Distributed(session), setup_started.elapsed())
            }
        };

        let core = self.core;
        let started = Instant::now();
        let product = match staged {
            Staged::Sequential(a, b) => {
                tokio::task::spawn_blocking(move || SequentialEvaluator.multiply(&core, &a, &b))
                    .await??
            }
            Staged::Parallel(evaluator, a, b) => {
                tokio::task::spawn_blocking(move || evaluator.multiply(&core, &a, &b)).await??
            }
            Staged::Distributed(session) => session.finish().await?,
        };
        let elapsed = started.elapsed();

        let product = if padded_side != side {
            matrix::truncate(&product, side)?
        } else {
            product
        };

        info!(
            %strategy,
            side,
            setup_ms = setup.as_secs_f64() * 1000.0,
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "multiplication finished"
        );
        Ok(Report {
            strategy,
            side,
            padded_side,
            setup,
            elapsed,
            product,
        })
    }

    /// Runs every strategy on the same inputs and checks the products are
    /// bit-identical.
    pub async fn compare(&self, a: &Matrix, b: &Matrix) -> Result<Vec<Report>, Error> {
        let mut reports: Vec<Report> = Vec::with_capacity(Strategy::ALL.len());
        for strategy in Strategy::ALL {
            let report = self.run(strategy, a, b).await?;
            if let Some(reference) = reports.first() {
                if reference.product != report.product {
                    return Err(Error::Divergence {
                        strategy: strategy.name(),
                        reference: reference.strategy.name(),
                    });
                }
            }
            reports.push(report);
        }
        Ok(reports)
    }
}

/// Two random operands of side `side`, reproducible when `seed` is given.
pub fn random_pair(side: usize, seed: Option<u64>) -> (Matrix, Matrix) {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let a = Matrix::random(side, &mut rng);
    let b = Matrix::random(side, &mut rng);
    (a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> Config {
        Config {
            cutover: 4,
            pool_size: 2,
            ..Config::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn pads_awkward_sides_and_truncates_back() {
        let orchestrator = Orchestrator::new(small_config()).unwrap();
        let (a, b) = random_pair(10, Some(1));
        let report = orchestrator.run(Strategy::Sequential, &a, &b).await.unwrap();
        assert_eq!(report.side, 10);
        assert_eq!(report.padded_side, 16);
        assert_eq!(report.setup, Duration::ZERO);
        assert_eq!(report.product, matrix::naive_multiply(&a, &b).unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn distributed_timing_leaves_out_the_broadcast() {
        // One element per chunk makes the broadcast the slow part of the run.
        let config = Config {
            chunk_len: 1,
            ..small_config()
        };
        let orchestrator = Orchestrator::new(config).unwrap();
        let (a, b) = random_pair(32, Some(4));

        let outer = Instant::now();
        let report = orchestrator
            .run(Strategy::Distributed, &a, &b)
            .await
            .unwrap();
        let total = outer.elapsed();

        assert!(report.setup > Duration::ZERO);
        assert!(report.setup + report.elapsed <= total);
        assert_eq!(report.product, matrix::naive_multiply(&a, &b).unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn without_padding_awkward_sides_fail() {
        let config = Config {
            pad: false,
            ..small_config()
        };
        let orchestrator = Orchestrator::new(config).unwrap();
        let (a, b) = random_pair(10, Some(1));
        assert!(matches!(
            orchestrator.run(Strategy::Parallel, &a, &b).await,
            Err(Error::NotPowerOfTwo { side: 10, cutover: 4 })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn distributed_with_four_workers_fails_fast() {
        let config = Config {
            workers: 4,
            ..small_config()
        };
        let orchestrator = Orchestrator::new(config).unwrap();
        let (a, b) = random_pair(8, Some(2));
        assert!(matches!(
            orchestrator.run(Strategy::Distributed, &a, &b).await,
            Err(Error::Topology { expected: 8, actual: 4 })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn compare_runs_every_strategy() {
        let orchestrator = Orchestrator::new(small_config()).unwrap();
        let (a, b) = random_pair(16, Some(3));
        let reports = orchestrator.compare(&a, &b).await.unwrap();
        let strategies: Vec<_> = reports.iter().map(|r| r.strategy).collect();
        assert_eq!(strategies, Strategy::ALL.to_vec());
    }

    #[test]
    fn seeded_pairs_are_reproducible() {
        let (a1, b1) = random_pair(8, Some(42));
        let (a2, b2) = random_pair(8, Some(42));
        assert_eq!(a1, a2);
        assert_eq!(b1, b2);
        assert!(a1.as_slice().iter().all(|v| (0..10).contains(v)));
    }

    #[test]
    fn strategy_names_round_trip_through_display() {
        for strategy in Strategy::ALL {
            assert_eq!(strategy.to_string(), strategy.name());
        }
    }
}
