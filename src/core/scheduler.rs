use std::collections::{HashSet, VecDeque};
use super::types::ItemId;

/// Barrier-style chunk planner.
///
/// A run partitions the pending ids into chunks of `max_in_flight` up front.
/// The next chunk is only released once every member of the current one has
/// reported back, whatever its outcome.
#[derive(Debug)]
pub struct ChunkScheduler {
    max_in_flight: usize,
    chunks: VecDeque<Vec<ItemId>>,
    in_flight: HashSet<ItemId>,
    running: bool,
    dispatched_chunks: usize,
}

impl ChunkScheduler {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight: max_in_flight.max(1),
            chunks: VecDeque::new(),
            in_flight: HashSet::new(),
            running: false,
            dispatched_chunks: 0,
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Starts a run over `pending`, in order. Returns the planned chunk sizes.
    pub fn plan(&mut self, pending: Vec<ItemId>) -> Vec<usize> {
        self.chunks = pending
            .chunks(self.max_in_flight)
            .map(<[ItemId]>::to_vec)
            .collect();
        self.in_flight.clear();
        self.dispatched_chunks = 0;
        self.running = !self.chunks.is_empty();

        self.chunks.iter().map(Vec::len).collect()
    }

    /// Releases the next chunk once the current one has settled.
    ///
    /// Members for which `still_pending` is false (cancelled or removed while
    /// waiting) are dropped; chunks left empty are skipped.
    pub fn next_chunk<F>(&mut self, still_pending: F) -> Option<Vec<ItemId>>
    where
        F: Fn(&ItemId) -> bool,
    {
        if !self.running || !self.in_flight.is_empty() {
            return None;
        }

        while let Some(chunk) = self.chunks.pop_front() {
            let chunk: Vec<ItemId> = chunk.into_iter().filter(|id| still_pending(id)).collect();
            if chunk.is_empty() {
                continue;
            }

            self.in_flight.extend(chunk.iter().copied());
            self.dispatched_chunks += 1;
            return Some(chunk);
        }

        None
    }

    /// Withdraws an id that was released but could not be dispatched
    pub fn withdraw(&mut self, id: &ItemId) {
        self.in_flight.remove(id);
    }

    /// Records that a dispatched item reported its outcome.
    /// Returns true if that settled the current chunk.
    pub fn settle(&mut self, id: &ItemId) -> bool {
        self.in_flight.remove(id) && self.in_flight.is_empty()
    }

    /// Drops every chunk not yet released. In-flight members still have to settle.
    pub fn abandon(&mut self) {
        self.chunks.clear();
    }

    /// Ends the run once nothing is in flight and no chunk is left.
    /// Returns true exactly once per run.
    pub fn try_finish(&mut self) -> bool {
        if self.running && self.in_flight.is_empty() && self.chunks.is_empty() {
            self.running = false;
            return true;
        }

        false
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_in_flight(&self, id: &ItemId) -> bool {
        self.in_flight.contains(id)
    }

    pub fn remaining_chunks(&self) -> usize {
        self.chunks.len()
    }

    pub fn dispatched_chunks(&self) -> usize {
        self.dispatched_chunks
    }
}
