//! Task-parallel evaluation on a bounded rayon pool.
//!
//! Every recursive step above the cutover spawns its seven sub-products as
//! independent tasks and blocks until all of them finish. Each task recurses
//! back through [`StrassenCore`], so the task tree widens sevenfold per level
//! until the cutover stops it. All tasks share one pool.

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::debug;

use crate::Error;
use crate::algorithm::{OperandPair, ProductEvaluator, StrassenCore, into_seven};
use crate::matrix::Matrix;

/// Evaluates sub-products concurrently on a fixed-size thread pool.
pub struct ParallelEvaluator {
    pool: ThreadPool,
}

impl ParallelEvaluator {
    /// Builds a pool of `threads` workers.
    pub fn new(threads: usize) -> Result<Self, Error> {
        if threads == 0 {
            return Err(Error::Config("thread pool needs at least one thread".to_string()));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("strassen-worker-{i}"))
            .build()?;
        debug!(threads, "parallel pool ready");
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs the whole multiplication inside the pool.
    pub fn multiply(&self, core: &StrassenCore, a: &Matrix, b: &Matrix) -> Result<Matrix, Error> {
        self.pool.install(|| core.multiply(a, b, self))
    }
}

impl ProductEvaluator for ParallelEvaluator {
    fn evaluate(&self, core: &StrassenCore, pairs: [OperandPair; 7]) -> Result<[Matrix; 7], Error> {
        let mut slots: [Option<Result<Matrix, Error>>; 7] = Default::default();

        // The scope returns only after all seven tasks have completed.
        self.pool.scope(|scope| {
            for (pair, slot) in pairs.into_iter().zip(slots.iter_mut()) {
                scope.spawn(move |_| {
                    *slot = Some(core.multiply(&pair.left, &pair.right, self));
                });
            }
        });

        let products = slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(Error::Protocol("sub-product task did not run".to_string()))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        into_seven(products)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SequentialEvaluator;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn zero_threads_is_a_config_error() {
        assert!(matches!(ParallelEvaluator::new(0), Err(Error::Config(_))));
    }

    #[test]
    fn matches_sequential_for_fixed_seed() {
        let mut rng = StdRng::seed_from_u64(64);
        let core = StrassenCore::default();
        let a = Matrix::random(64, &mut rng);
        let b = Matrix::random(64, &mut rng);

        let parallel = ParallelEvaluator::new(4).unwrap();
        assert_eq!(parallel.threads(), 4);
        assert_eq!(
            parallel.multiply(&core, &a, &b).unwrap(),
            SequentialEvaluator.multiply(&core, &a, &b).unwrap()
        );
    }

    #[test]
    fn single_thread_pool_still_completes_deep_recursion() {
        let mut rng = StdRng::seed_from_u64(5);
        let core = StrassenCore::new(2).unwrap();
        let a = Matrix::random(32, &mut rng);
        let b = Matrix::random(32, &mut rng);

        let parallel = ParallelEvaluator::new(1).unwrap();
        assert_eq!(
            parallel.multiply(&core, &a, &b).unwrap(),
            crate::matrix::naive_multiply(&a, &b).unwrap()
        );
    }

    #[test]
    fn errors_from_tasks_propagate() {
        let core = StrassenCore::new(1).unwrap();
        let parallel = ParallelEvaluator::new(2).unwrap();
        // 6 -> 3 is odd above the cutover of 1, detected before any task runs.
        let a = Matrix::zeros(6);
        assert!(matches!(
            parallel.multiply(&core, &a, &a),
            Err(Error::NotPowerOfTwo { side: 6, cutover: 1 })
        ));
    }
}
