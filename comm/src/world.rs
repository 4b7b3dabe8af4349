//! Rank endpoints and the collective operations built on them.

use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::try_join_all;
use prost::Message;
use strassen_types::tags;
use strassen_types::wire::{Chunk, ChunkHeader, Dimension};
use tokio::sync::{Barrier, mpsc};
use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::mailbox::Mailbox;
use crate::pulse::{Pacemaker, any_pulse, next_pulse};
use crate::signal::{CancelHandle, Signal};

const CHANNEL_DEPTH: usize = 64;
const DEFAULT_CHUNK_LEN: usize = 1024;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const MIN_PULSE_PERIOD: Duration = Duration::from_millis(1);

/// Tuning shared by every endpoint of a world.
#[derive(Debug, Clone)]
pub struct CommOptions {
    /// Number of elements carried by one broadcast chunk.
    pub chunk_len: usize,
    /// Longest silence tolerated from a peer during any blocking wait.
    /// Pulses from a [`Pacemaker`] count as signs of life. `None` waits
    /// forever.
    pub timeout: Option<Duration>,
}

impl CommOptions {
    /// How often a pacemaker beats: four times per deadline window.
    pub fn pulse_period(&self) -> Option<Duration> {
        self.timeout.map(|limit| (limit / 4).max(MIN_PULSE_PERIOD))
    }
}

impl Default for CommOptions {
    fn default() -> Self {
        Self {
            chunk_len: DEFAULT_CHUNK_LEN,
            timeout: Some(DEFAULT_TIMEOUT),
        }
    }
}

struct Envelope {
    tag: i32,
    payload: Vec<u8>,
}

/// What ended one deadline window.
enum Wake<T> {
    Done(T),
    Pulse,
}

type Lanes<T> = Vec<Vec<Option<T>>>;

fn lanes<T>(size: usize) -> Lanes<T> {
    (0..size).map(|_| (0..size).map(|_| None).collect()).collect()
}

/// Factory for a fully connected set of endpoints.
pub struct World;

impl World {
    /// Creates `size` endpoints, one per rank, connected pairwise.
    ///
    /// The returned vector is indexed by rank. Each endpoint is meant to be
    /// moved into the task that plays that rank.
    pub fn build(size: usize, options: CommOptions) -> Result<Vec<Endpoint>, Error> {
        if size == 0 {
            return Err(Error::Config("a world needs at least one rank".to_string()));
        }
        if options.chunk_len == 0 {
            return Err(Error::Config("chunk length must be positive".to_string()));
        }

        let mut outboxes: Lanes<mpsc::Sender<Envelope>> = lanes(size);
        let mut inboxes: Lanes<mpsc::Receiver<Envelope>> = lanes(size);
        let mut pulse_outs: Lanes<mpsc::Sender<()>> = lanes(size);
        let mut pulse_ins: Lanes<mpsc::Receiver<()>> = lanes(size);

        for source in 0..size {
            for dest in 0..size {
                if source == dest {
                    continue;
                }
                let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
                outboxes[source][dest] = Some(tx);
                inboxes[dest][source] = Some(rx);

                let (tx, rx) = mpsc::channel(1);
                pulse_outs[source][dest] = Some(tx);
                pulse_ins[dest][source] = Some(rx);
            }
        }

        let barrier = Arc::new(Barrier::new(size));
        let signal = Signal::new();

        let endpoints = outboxes
            .into_iter()
            .zip(inboxes)
            .zip(pulse_outs.into_iter().zip(pulse_ins))
            .enumerate()
            .map(|(rank, ((outbox, inbox), (pulse_out, pulse_in)))| Endpoint {
                rank,
                size,
                outbox,
                inbox,
                pulse_out,
                pulse_in,
                mailbox: Mailbox::new(),
                barrier: Arc::clone(&barrier),
                signal: signal.clone(),
                options: options.clone(),
            })
            .collect();

        debug!(size, chunk_len = options.chunk_len, timeout = ?options.timeout, "world built");
        Ok(endpoints)
    }
}

/// One rank's exclusive view of the world.
///
/// Receiving needs `&mut self` because out-of-order messages are parked in
/// the endpoint's own mailbox; sending only needs `&self`.
pub struct Endpoint {
    rank: usize,
    size: usize,
    outbox: Vec<Option<mpsc::Sender<Envelope>>>,
    inbox: Vec<Option<mpsc::Receiver<Envelope>>>,
    pulse_out: Vec<Option<mpsc::Sender<()>>>,
    pulse_in: Vec<Option<mpsc::Receiver<()>>>,
    mailbox: Mailbox,
    barrier: Arc<Barrier>,
    signal: Signal,
    options: CommOptions,
}

impl Endpoint {
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Sends `payload` to `dest`, labelled with `tag`.
    pub async fn send(&self, dest: usize, tag: i32, payload: Vec<u8>) -> Result<(), Error> {
        let sender = self
            .outbox
            .get(dest)
            .and_then(Option::as_ref)
            .ok_or(Error::InvalidRank {
                rank: dest,
                size: self.size,
            })?;

        trace!(from = self.rank, to = dest, tag, bytes = payload.len(), "send");
        let envelope = Envelope { tag, payload };
        guarded(
            &self.signal,
            self.options.timeout,
            |waited| Error::WorkerUnresponsive { rank: dest, waited },
            async {
                sender
                    .send(envelope)
                    .await
                    .map_err(|_| Error::Closed { rank: dest })
            },
        )
        .await
    }

    /// Blocks until a message tagged `tag` arrives from `source`.
    ///
    /// The deadline restarts whenever `source` pulses, so a peer that is
    /// still working is never reported as unresponsive.
    pub async fn recv(&mut self, source: usize, tag: i32) -> Result<Vec<u8>, Error> {
        if let Some(payload) = self.mailbox.take(source, tag) {
            return Ok(payload);
        }

        let size = self.size;
        let rank = self.rank;
        let Self {
            inbox,
            pulse_in,
            mailbox,
            signal,
            options,
            ..
        } = self;
        let receiver = inbox
            .get_mut(source)
            .and_then(Option::as_mut)
            .ok_or(Error::InvalidRank { rank: source, size })?;

        loop {
            let wake = guarded(
                signal,
                options.timeout,
                |waited| Error::WorkerUnresponsive {
                    rank: source,
                    waited,
                },
                async {
                    tokio::select! {
                        biased;
                        envelope = receiver.recv() => envelope
                            .map(Wake::Done)
                            .ok_or(Error::Closed { rank: source }),
                        () = next_pulse(&mut pulse_in[source]) => Ok(Wake::Pulse),
                    }
                },
            )
            .await?;

            match wake {
                Wake::Done(envelope) if envelope.tag == tag => {
                    trace!(at = rank, from = source, tag, "recv");
                    return Ok(envelope.payload);
                }
                Wake::Done(envelope) => {
                    mailbox.stash(source, envelope.tag, envelope.payload);
                    trace!(
                        at = rank,
                        from = source,
                        tag = envelope.tag,
                        pending = mailbox.len(),
                        "parked out-of-order message"
                    );
                }
                Wake::Pulse => trace!(at = rank, from = source, "peer still working"),
            }
        }
    }

    pub async fn send_message<M: Message>(
        &self,
        dest: usize,
        tag: i32,
        message: &M,
    ) -> Result<(), Error> {
        self.send(dest, tag, message.encode_to_vec()).await
    }

    pub async fn recv_message<M: Message + Default>(
        &mut self,
        source: usize,
        tag: i32,
    ) -> Result<M, Error> {
        let payload = self.recv(source, tag).await?;
        Ok(M::decode(payload.as_slice())?)
    }

    /// Broadcasts a side length from `root`. Only the root passes `Some`.
    pub async fn broadcast_dim(&mut self, root: usize, side: Option<u64>) -> Result<u64, Error> {
        if self.rank == root {
            let side = side
                .ok_or_else(|| Error::Protocol("root must supply the dimension".to_string()))?;
            let message = Dimension { side };
            self.fan_out(root, tags::DIMENSION, &message).await?;
            return Ok(side);
        }
        let message: Dimension = self.recv_message(root, tags::DIMENSION).await?;
        Ok(message.side)
    }

    /// Broadcasts an integer buffer from `root` in chunks of
    /// [`CommOptions::chunk_len`] elements. Only the root passes `Some`.
    ///
    /// Every rank returns the full buffer.
    pub async fn broadcast(
        &mut self,
        root: usize,
        data: Option<&[i32]>,
    ) -> Result<Vec<i32>, Error> {
        if root >= self.size {
            return Err(Error::InvalidRank {
                rank: root,
                size: self.size,
            });
        }

        if self.rank == root {
            let data =
                data.ok_or_else(|| Error::Protocol("root must supply the buffer".to_string()))?;
            let chunk_len = self.options.chunk_len;
            let header = ChunkHeader {
                total_len: data.len() as u64,
                chunk_count: data.len().div_ceil(chunk_len) as u64,
            };
            self.fan_out(root, tags::CHUNK_HEADER, &header).await?;

            for (index, values) in data.chunks(chunk_len).enumerate() {
                let chunk = Chunk {
                    offset: (index * chunk_len) as u64,
                    values: values.to_vec(),
                };
                self.fan_out(root, tags::CHUNK, &chunk).await?;
            }
            debug!(root, elements = data.len(), chunks = header.chunk_count, "broadcast sent");
            return Ok(data.to_vec());
        }

        let header: ChunkHeader = self.recv_message(root, tags::CHUNK_HEADER).await?;
        let total = header.total_len as usize;
        let mut buffer = Vec::with_capacity(total);
        for _ in 0..header.chunk_count {
            let chunk: Chunk = self.recv_message(root, tags::CHUNK).await?;
            if chunk.offset as usize != buffer.len() {
                return Err(Error::Protocol(format!(
                    "chunk at offset {} arrived while expecting offset {}",
                    chunk.offset,
                    buffer.len()
                )));
            }
            if buffer.len() + chunk.values.len() > total {
                return Err(Error::Protocol(format!(
                    "broadcast overran its announced length of {total}"
                )));
            }
            buffer.extend_from_slice(&chunk.values);
        }
        if buffer.len() != total {
            return Err(Error::Protocol(format!(
                "broadcast delivered {} of {total} elements",
                buffer.len()
            )));
        }
        trace!(at = self.rank, root, elements = total, "broadcast received");
        Ok(buffer)
    }

    /// Waits until every rank of the world has reached the barrier.
    ///
    /// A pulse from any rank restarts the deadline.
    pub async fn barrier(&mut self) -> Result<(), Error> {
        trace!(at = self.rank, "entering barrier");
        let Self {
            barrier,
            pulse_in,
            signal,
            options,
            ..
        } = self;

        // Created once: abandoning a barrier wait would leave its arrival counted.
        let mut arrival = pin!(barrier.wait());
        loop {
            let wake = guarded(
                signal,
                options.timeout,
                |waited| Error::BarrierTimeout { waited },
                async {
                    tokio::select! {
                        biased;
                        _ = &mut arrival => Ok(Wake::Done(())),
                        () = any_pulse(pulse_in.as_mut_slice()) => Ok(Wake::Pulse),
                    }
                },
            )
            .await?;
            if let Wake::Done(()) = wake {
                return Ok(());
            }
        }
    }

    /// A pacemaker that pulses every other rank on this endpoint's behalf.
    pub fn pacemaker(&self) -> Pacemaker {
        let peers = self.pulse_out.iter().flatten().cloned().collect();
        Pacemaker::new(self.rank, peers, self.options.pulse_period())
    }

    /// Tells every rank to abandon its current and future waits.
    pub fn cancel(&self) {
        warn!(rank = self.rank, "cancelling world");
        self.signal.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// A handle that can cancel this world after the endpoint has moved on.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(self.signal.clone())
    }

    async fn fan_out<M: Message>(&self, root: usize, tag: i32, message: &M) -> Result<(), Error> {
        let payload = message.encode_to_vec();
        try_join_all(
            (0..self.size)
                .filter(|&dest| dest != root)
                .map(|dest| self.send(dest, tag, payload.clone())),
        )
        .await?;
        Ok(())
    }
}

/// Runs `operation` unless the world is cancelled or the deadline passes.
async fn guarded<T, F>(
    signal: &Signal,
    timeout: Option<Duration>,
    on_timeout: impl FnOnce(Duration) -> Error,
    operation: F,
) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    if signal.is_cancelled() {
        return Err(Error::Cancelled);
    }

    let bounded = async {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, operation).await {
                Ok(result) => result,
                Err(_) => {
                    let error = on_timeout(limit);
                    warn!(%error, "wait timed out");
                    Err(error)
                }
            },
            None => operation.await,
        }
    };

    tokio::select! {
        biased;
        _ = signal.cancelled() => Err(Error::Cancelled),
        result = bounded => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world(size: usize, chunk_len: usize, timeout: Option<Duration>) -> Vec<Endpoint> {
        World::build(size, CommOptions { chunk_len, timeout }).unwrap()
    }

    #[test]
    fn rejects_empty_world_and_zero_chunks() {
        assert!(matches!(
            World::build(0, CommOptions::default()),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            World::build(2, CommOptions { chunk_len: 0, timeout: None }),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn endpoints_know_their_rank_and_world_size() {
        let endpoints = world(3, 8, None);
        for (index, endpoint) in endpoints.iter().enumerate() {
            assert_eq!(endpoint.rank(), index);
            assert_eq!(endpoint.size(), 3);
        }
    }

    #[test]
    fn pulse_period_follows_the_deadline() {
        let options = CommOptions {
            chunk_len: 8,
            timeout: Some(Duration::from_millis(100)),
        };
        assert_eq!(options.pulse_period(), Some(Duration::from_millis(25)));

        let tiny = CommOptions {
            chunk_len: 8,
            timeout: Some(Duration::from_micros(10)),
        };
        assert_eq!(tiny.pulse_period(), Some(Duration::from_millis(1)));

        let unbounded = CommOptions {
            chunk_len: 8,
            timeout: None,
        };
        assert_eq!(unbounded.pulse_period(), None);
    }

    #[tokio::test]
    async fn recv_matches_tags_out_of_order() {
        let mut endpoints = world(2, 4, Some(Duration::from_secs(5)));
        let mut receiver = endpoints.pop().unwrap();
        let sender = endpoints.pop().unwrap();

        sender.send(1, 20, vec![2]).await.unwrap();
        sender.send(1, 10, vec![1]).await.unwrap();

        assert_eq!(receiver.recv(0, 10).await.unwrap(), vec![1]);
        assert_eq!(receiver.recv(0, 20).await.unwrap(), vec![2]);
    }

    #[tokio::test]
    async fn send_to_self_or_outside_world_fails() {
        let endpoints = world(2, 4, None);
        assert!(matches!(
            endpoints[0].send(0, 1, vec![]).await,
            Err(Error::InvalidRank { rank: 0, size: 2 })
        ));
        assert!(matches!(
            endpoints[0].send(5, 1, vec![]).await,
            Err(Error::InvalidRank { rank: 5, size: 2 })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn broadcast_reaches_every_rank_in_chunks() {
        let mut endpoints = world(4, 3, Some(Duration::from_secs(5)));
        let data: Vec<i32> = (0..10).collect();

        let mut handles = Vec::new();
        for mut endpoint in endpoints.drain(1..) {
            handles.push(tokio::spawn(async move {
                let side = endpoint.broadcast_dim(0, None).await?;
                let buffer = endpoint.broadcast(0, None).await?;
                Ok::<_, Error>((side, buffer))
            }));
        }

        let mut root = endpoints.pop().unwrap();
        assert_eq!(root.broadcast_dim(0, Some(10)).await.unwrap(), 10);
        assert_eq!(root.broadcast(0, Some(&data)).await.unwrap(), data);

        for handle in handles {
            let (side, buffer) = handle.await.unwrap().unwrap();
            assert_eq!(side, 10);
            assert_eq!(buffer, data);
        }
    }

    #[tokio::test]
    async fn empty_broadcast_round_trips() {
        let mut endpoints = world(2, 8, Some(Duration::from_secs(5)));
        let mut peer = endpoints.pop().unwrap();
        let mut root = endpoints.pop().unwrap();

        let handle = tokio::spawn(async move { peer.broadcast(0, None).await });
        assert!(root.broadcast(0, Some(&[])).await.unwrap().is_empty());
        assert!(handle.await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let mut endpoints = world(2, 8, Some(Duration::from_millis(50)));
        let _silent = endpoints.pop().unwrap();
        let mut root = endpoints.pop().unwrap();

        match root.recv(1, 10).await {
            Err(Error::WorkerUnresponsive { rank, waited }) => {
                assert_eq!(rank, 1);
                assert_eq!(waited, Duration::from_millis(50));
            }
            other => panic!("expected timeout, got {:?}", other.map(|p| p.len())),
        }
    }

    #[tokio::test]
    async fn barrier_times_out_when_a_rank_is_missing() {
        let mut endpoints = world(3, 8, Some(Duration::from_millis(50)));
        assert!(matches!(
            endpoints[0].barrier().await,
            Err(Error::BarrierTimeout { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn busy_peer_that_pulses_outlives_the_deadline() {
        let mut endpoints = world(2, 8, Some(Duration::from_millis(50)));
        let peer = endpoints.pop().unwrap();
        let mut root = endpoints.pop().unwrap();

        let handle = tokio::spawn(async move {
            peer.pacemaker()
                .keep_alive(tokio::time::sleep(Duration::from_millis(300)))
                .await;
            peer.send(0, 10, vec![7]).await
        });

        assert_eq!(root.recv(1, 10).await.unwrap(), vec![7]);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn barrier_waits_for_a_pulsing_straggler() {
        let mut endpoints = world(2, 8, Some(Duration::from_millis(50)));
        let mut straggler = endpoints.pop().unwrap();
        let mut early = endpoints.pop().unwrap();

        let handle = tokio::spawn(async move {
            straggler
                .pacemaker()
                .keep_alive(tokio::time::sleep(Duration::from_millis(300)))
                .await;
            straggler.barrier().await
        });

        early.barrier().await.unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_releases_blocked_receivers() {
        let mut endpoints = world(3, 8, None);
        let canceller = endpoints.pop().unwrap();
        let mut waiting = endpoints.pop().unwrap();

        let handle = tokio::spawn(async move { waiting.recv(0, 1).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(endpoints[0].is_cancelled());
        assert!(endpoints[0].cancel_handle().is_cancelled());
    }

    #[tokio::test]
    async fn dropped_peer_closes_channel() {
        let mut endpoints = world(2, 8, Some(Duration::from_secs(5)));
        drop(endpoints.pop());
        let mut root = endpoints.pop().unwrap();
        assert!(matches!(root.recv(1, 1).await, Err(Error::Closed { rank: 1 })));
    }
}
