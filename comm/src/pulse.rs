//! Liveness pulses between ranks.
//!
//! A wait bounded by the world's deadline opens a fresh window whenever a
//! pulse arrives, so the deadline measures silence rather than total work.

use std::future::{Future, pending};
use std::pin::pin;
use std::time::Duration;

use futures_util::future::select_all;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tracing::trace;

/// Beats on behalf of one rank while it is busy.
#[derive(Clone)]
pub struct Pacemaker {
    rank: usize,
    peers: Vec<mpsc::Sender<()>>,
    period: Option<Duration>,
}

impl Pacemaker {
    pub(crate) fn new(rank: usize, peers: Vec<mpsc::Sender<()>>, period: Option<Duration>) -> Self {
        Self {
            rank,
            peers,
            period,
        }
    }

    /// Sends one pulse to every peer. A peer that still holds an unread
    /// pulse, or has already left, is skipped.
    pub fn beat(&self) {
        for peer in &self.peers {
            let _ = peer.try_send(());
        }
        trace!(rank = self.rank, "pulse");
    }

    /// Drives `work` to completion, beating once per period meanwhile.
    ///
    /// Without a deadline nobody is listening for silence, so `work` simply
    /// runs.
    pub async fn keep_alive<F: Future>(&self, work: F) -> F::Output {
        let Some(period) = self.period else {
            return work.await;
        };

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut work = pin!(work);
        loop {
            tokio::select! {
                biased;
                output = &mut work => return output,
                _ = ticker.tick() => self.beat(),
            }
        }
    }
}

/// Resolves on the next pulse in `slot`. Once the sending side is gone the
/// slot is cleared and the future never resolves.
pub(crate) async fn next_pulse(slot: &mut Option<mpsc::Receiver<()>>) {
    while let Some(pulses) = slot.as_mut() {
        if pulses.recv().await.is_some() {
            return;
        }
        *slot = None;
    }
    pending::<()>().await
}

/// Resolves on the next pulse from any rank.
pub(crate) async fn any_pulse(slots: &mut [Option<mpsc::Receiver<()>>]) {
    let waits: Vec<_> = slots
        .iter_mut()
        .filter(|slot| slot.is_some())
        .map(|slot| Box::pin(next_pulse(slot)))
        .collect();
    if waits.is_empty() {
        return pending::<()>().await;
    }
    select_all(waits).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keep_alive_beats_until_work_finishes() {
        let (tx, mut rx) = mpsc::channel(1);
        let pacemaker = Pacemaker::new(0, vec![tx], Some(Duration::from_millis(5)));

        let output = pacemaker
            .keep_alive(async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                7
            })
            .await;

        assert_eq!(output, 7);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn closed_slot_is_cleared() {
        let (tx, rx) = mpsc::channel::<()>(1);
        drop(tx);
        let mut slot = Some(rx);

        let waited = tokio::time::timeout(Duration::from_millis(20), next_pulse(&mut slot)).await;
        assert!(waited.is_err());
        assert!(slot.is_none());
    }
}
