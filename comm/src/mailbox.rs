//! Holding area for messages that arrived before anyone asked for their tag.

use std::collections::{HashMap, VecDeque};

#[derive(Default)]
pub struct Mailbox {
    pending: HashMap<(usize, i32), VecDeque<Vec<u8>>>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stash(&mut self, source: usize, tag: i32, payload: Vec<u8>) {
        self.pending
            .entry((source, tag))
            .or_default()
            .push_back(payload);
    }

    /// Removes the oldest message from `source` carrying `tag`.
    pub fn take(&mut self, source: usize, tag: i32) -> Option<Vec<u8>> {
        let queue = self.pending.get_mut(&(source, tag))?;
        let payload = queue.pop_front();
        if queue.is_empty() {
            self.pending.remove(&(source, tag));
        }
        payload
    }

    pub fn len(&self) -> usize {
        self.pending.values().map(VecDeque::len).sum()
    }
}
