//! Fixed-topology distributed evaluation over eight ranks.
//!
//! Rank 0 coordinates; ranks 1 to 7 each own exactly one Strassen
//! sub-product. A call proceeds as follows:
//!
//! 1. Rank 0 broadcasts the side length, then A, then B, flattened and
//!    chunked. Every rank ends up with the full operands and meets the others
//!    at a barrier. This is the untimed [`DistributedEvaluator::prepare`].
//! 2. Each owning rank splits A and B itself, derives its operand pair from
//!    the role table, multiplies it sequentially and sends the flattened
//!    product to rank 0 as a [`SubProductResult`].
//! 3. Rank 0 receives the seven results in rank order, then every rank meets
//!    at a barrier and rank 0 recombines.
//!
//! Steps 2 and 3 make up [`Session::finish`]. Busy ranks pulse while they
//! work, so the receive deadline only fires on a rank that has gone silent.
//!
//! Distribution covers the top level only; the sub-products themselves are
//! computed with [`SequentialEvaluator`].

use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::join_all;
use strassen_comm::{CancelHandle, CommOptions, Endpoint, World};
use strassen_types::tags;
use strassen_types::wire::SubProductResult;
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::Error;
use crate::SequentialEvaluator;
use crate::algorithm::{
    OperandPair, ProductEvaluator, Quadrants, StrassenCore, SubProduct, into_seven,
};
use crate::matrix::{self, Matrix};

/// Number of ranks the topology is built for.
pub const WORKERS: usize = 8;

const COORDINATOR: usize = 0;

/// Maps each non-coordinator rank to the sub-product it owns.
#[derive(Debug, Clone, Copy)]
struct Role {
    rank: usize,
    product: SubProduct,
}

const ROLES: [Role; 7] = [
    Role { rank: 1, product: SubProduct::M1 },
    Role { rank: 2, product: SubProduct::M2 },
    Role { rank: 3, product: SubProduct::M3 },
    Role { rank: 4, product: SubProduct::M4 },
    Role { rank: 5, product: SubProduct::M5 },
    Role { rank: 6, product: SubProduct::M6 },
    Role { rank: 7, product: SubProduct::M7 },
];

fn role_of(rank: usize) -> Option<Role> {
    ROLES.iter().copied().find(|role| role.rank == rank)
}

/// Distributed Strassen multiplication on an in-process world of eight ranks.
///
/// Ranks run as separate tokio tasks and share nothing but their channels.
/// Any rank that fails cancels the world, so the others stop waiting and the
/// root-cause error is returned.
///
/// # Example
///
/// ```no_run
/// use strassen::{DistributedEvaluator, Matrix, StrassenCore};
/// use strassen_comm::CommOptions;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let distributed =
///         DistributedEvaluator::new(StrassenCore::default(), 8, CommOptions::default())?;
///
///     let a = Matrix::identity(64);
///     let product = distributed.multiply(&a, &a).await?;
///     assert_eq!(product, a);
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DistributedEvaluator {
    core: StrassenCore,
    options: CommOptions,
}

impl DistributedEvaluator {
    /// Fails with [`Error::Topology`] unless `workers` is exactly [`WORKERS`].
    pub fn new(core: StrassenCore, workers: usize, options: CommOptions) -> Result<Self, Error> {
        if workers != WORKERS {
            return Err(Error::Topology {
                expected: WORKERS,
                actual: workers,
            });
        }
        Ok(Self { core, options })
    }

    /// Computes `a * b` across the eight ranks.
    pub async fn multiply(&self, a: &Matrix, b: &Matrix) -> Result<Matrix, Error> {
        self.prepare(a, b).await?.finish().await
    }

    /// Starts the ranks and puts both operands on every one of them.
    ///
    /// Returns once all eight ranks hold A and B, before any sub-product is
    /// computed.
    pub async fn prepare(&self, a: &Matrix, b: &Matrix) -> Result<Session, Error> {
        if a.side() != b.side() {
            return Err(Error::DimensionMismatch(a.side(), b.side()));
        }
        self.core.check_side(a.side())?;

        let mut endpoints = World::build(WORKERS, self.options.clone())?;
        let peers = endpoints.split_off(COORDINATOR + 1);
        let mut coordinator = endpoints
            .pop()
            .ok_or_else(|| Error::Protocol("world has no coordinator".to_string()))?;

        let core = self.core;
        let workers = peers
            .into_iter()
            .map(|endpoint| tokio::spawn(run_worker(endpoint, core)))
            .collect();
        let cancel = coordinator.cancel_handle();

        if let Err(error) = distribute_operands(&mut coordinator, a, b).await {
            warn!(%error, "distributing operands failed");
            cancel.cancel();
            let mut errors = vec![error];
            join_workers(workers, &mut errors).await;
            return Err(root_cause(errors)
                .unwrap_or_else(|| Error::Protocol("setup failed without a cause".to_string())));
        }

        Ok(Session {
            core,
            staged: Some((coordinator, a.clone(), b.clone())),
            workers,
            cancel,
        })
    }
}

/// A distributed multiplication whose operands already sit on every rank.
///
/// Dropping a session without [`finish`](Session::finish)ing it cancels the
/// world.
pub struct Session {
    core: StrassenCore,
    staged: Option<(Endpoint, Matrix, Matrix)>,
    workers: Vec<JoinHandle<Result<(), Error>>>,
    cancel: CancelHandle,
}

impl Session {
    /// Computes the sub-products on their ranks and recombines them on rank 0.
    pub async fn finish(mut self) -> Result<Matrix, Error> {
        let workers = std::mem::take(&mut self.workers);
        let Some((coordinator, a, b)) = self.staged.take() else {
            return Err(Error::Protocol("session was already finished".to_string()));
        };

        let mut errors = Vec::new();
        let product = match run_coordinator(coordinator, self.core, a, b).await {
            Ok(product) => Some(product),
            Err(error) => {
                errors.push(error);
                None
            }
        };
        join_workers(workers, &mut errors).await;

        match (product, root_cause(errors)) {
            (_, Some(error)) => Err(error),
            (Some(product), None) => Ok(product),
            (None, None) => Err(Error::Protocol("coordinator produced no result".to_string())),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.staged.is_some() {
            self.cancel.cancel();
        }
    }
}

/// Waits for every worker, adding the failures to `errors`.
async fn join_workers(workers: Vec<JoinHandle<Result<(), Error>>>, errors: &mut Vec<Error>) {
    for joined in join_all(workers).await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(error)) => errors.push(error),
            Err(error) => errors.push(Error::Join(error)),
        }
    }
}

/// Picks the first error that is not a mere echo of someone else's cancellation.
fn root_cause(errors: Vec<Error>) -> Option<Error> {
    let is_echo = |error: &Error| matches!(error, Error::Comm(strassen_comm::Error::Cancelled));
    let position = errors.iter().position(|error| !is_echo(error)).unwrap_or(0);
    errors.into_iter().nth(position)
}

/// Rank 0's half of the setup: broadcast n, A and B, then wait until every
/// rank has them.
async fn distribute_operands(endpoint: &mut Endpoint, a: &Matrix, b: &Matrix) -> Result<(), Error> {
    endpoint
        .broadcast_dim(COORDINATOR, Some(a.side() as u64))
        .await?;
    endpoint.broadcast(COORDINATOR, Some(a.as_slice())).await?;
    endpoint.broadcast(COORDINATOR, Some(b.as_slice())).await?;
    endpoint.barrier().await?;
    debug!(side = a.side(), "operands on every rank");
    Ok(())
}

/// Rank 0: run the core with remote sub-products and meet the other ranks
/// at the barrier.
async fn run_coordinator(
    endpoint: Endpoint,
    core: StrassenCore,
    a: Matrix,
    b: Matrix,
) -> Result<Matrix, Error> {
    let cancel = endpoint.cancel_handle();
    let side = a.side();

    let result = async {
        let remote = RemoteProducts::new(endpoint, Handle::current());
        let (product, remote) = tokio::task::spawn_blocking(move || {
            let product = core.multiply(&a, &b, &remote);
            (product, remote)
        })
        .await?;
        let product = product?;

        let collected = remote.collected();
        let mut endpoint = remote.into_endpoint();
        if !collected {
            // Below the cutover the evaluator never ran, so its barrier did not either.
            endpoint.barrier().await?;
        }
        info!(side, distributed = collected, "coordinator finished");
        Ok::<_, Error>(product)
    }
    .await;

    if let Err(error) = &result {
        warn!(%error, "coordinator failed");
        cancel.cancel();
    }
    result
}

/// Ranks 1..7: receive the operands, compute the owned sub-product and send
/// it to the coordinator.
async fn run_worker(mut endpoint: Endpoint, core: StrassenCore) -> Result<(), Error> {
    let cancel = endpoint.cancel_handle();
    let rank = endpoint.rank();

    let result = async {
        let role = role_of(rank)
            .ok_or_else(|| Error::Protocol(format!("rank {rank} has no role")))?;

        let side = endpoint.broadcast_dim(COORDINATOR, None).await? as usize;
        let a = matrix::unflatten(endpoint.broadcast(COORDINATOR, None).await?, side)?;
        let b = matrix::unflatten(endpoint.broadcast(COORDINATOR, None).await?, side)?;
        endpoint.barrier().await?;

        if core.is_base_case(side) {
            debug!(rank, side, "at or below cutover, nothing to compute");
            endpoint.barrier().await?;
            return Ok(());
        }

        let compute = tokio::task::spawn_blocking(move || -> Result<Matrix, Error> {
            let pair = role
                .product
                .derive(&Quadrants::split(&a)?, &Quadrants::split(&b)?)?;
            core.multiply(&pair.left, &pair.right, &SequentialEvaluator)
        });
        let product = endpoint.pacemaker().keep_alive(compute).await??;

        let message = SubProductResult {
            index: role.product.index() as u32,
            side: product.side() as u64,
            values: product.into_flat(),
        };
        endpoint
            .send_message(COORDINATOR, tags::SUB_PRODUCT, &message)
            .await?;
        debug!(rank, product = ?role.product, "sub-product sent");

        endpoint.barrier().await?;
        Ok::<_, Error>(())
    }
    .await;

    if let Err(error) = &result {
        warn!(rank, %error, "worker failed");
        cancel.cancel();
    }
    result
}

/// Coordinator-side evaluator: the operand pairs rank 0 derived are dropped,
/// and the products are collected from the ranks that own them.
struct RemoteProducts {
    endpoint: Mutex<Endpoint>,
    runtime: Handle,
    collected: AtomicBool,
}

impl RemoteProducts {
    fn new(endpoint: Endpoint, runtime: Handle) -> Self {
        Self {
            endpoint: Mutex::new(endpoint),
            runtime,
            collected: AtomicBool::new(false),
        }
    }

    fn collected(&self) -> bool {
        self.collected.load(Ordering::SeqCst)
    }

    fn into_endpoint(self) -> Endpoint {
        self.endpoint.into_inner()
    }
}

impl ProductEvaluator for RemoteProducts {
    fn evaluate(
        &self,
        _core: &StrassenCore,
        pairs: [OperandPair; 7],
    ) -> Result<[Matrix; 7], Error> {
        let half = pairs[0].left.side();
        drop(pairs);

        if self.collected.swap(true, Ordering::SeqCst) {
            return Err(Error::Protocol(
                "distributed evaluation only spans the top level".to_string(),
            ));
        }

        // Runs on a blocking thread, so parking on the runtime is allowed here.
        let mut endpoint = self.endpoint.blocking_lock();
        let pacemaker = endpoint.pacemaker();
        self.runtime.block_on(async {
            // Workers that are done wait at the barrier while slower ones finish.
            let products = pacemaker
                .keep_alive(collect_products(&mut endpoint, half))
                .await?;
            endpoint.barrier().await?;
            Ok::<_, Error>(products)
        })
    }
}

/// Receives M1..M7 from their owning ranks, in rank order.
async fn collect_products(endpoint: &mut Endpoint, half: usize) -> Result<[Matrix; 7], Error> {
    let mut products = Vec::with_capacity(ROLES.len());
    for role in ROLES {
        let message: SubProductResult =
            endpoint.recv_message(role.rank, tags::SUB_PRODUCT).await?;
        if message.index as usize != role.product.index() || message.side as usize != half {
            return Err(Error::Protocol(format!(
                "rank {} sent M{} of side {}, expected M{} of side {half}",
                role.rank,
                message.index,
                message.side,
                role.product.index()
            )));
        }
        products.push(matrix::unflatten(message.values, half)?);
        debug!(rank = role.rank, "sub-product received");
    }
    into_seven(products)
}
