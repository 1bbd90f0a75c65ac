//! Per-route pending batches with a size bound.

use std::collections::{HashMap, VecDeque};

use crate::route::RouteKey;

/// URL-encoded `,` placed between events of a batch.
pub const EVENT_SEPARATOR: &str = "%2C";

/// A batch detached from the pending map, waiting to be sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadyBatch {
    pub route: RouteKey,
    pub data: String,
    pub events: usize,
}

#[derive(Debug, Default)]
struct Pending {
    data: String,
    events: usize,
}

/// Accumulates encoded events per route key.
///
/// Batches detached by the size bound, or put back after a failed send, wait
/// in a ready queue that is always drained before the pending map.
#[derive(Debug)]
pub struct PendingBatches {
    pending: HashMap<RouteKey, Pending>,
    ready: VecDeque<ReadyBatch>,
    max_len: usize,
}

impl PendingBatches {
    pub fn new(max_len: usize) -> Self {
        Self {
            pending: HashMap::new(),
            ready: VecDeque::new(),
            max_len,
        }
    }

    /// Append an encoded event to the route's batch.
    ///
    /// If the request would reach `max_len` (counting `base_len` of fixed
    /// request overhead), the current non-empty batch is detached first and
    /// the event starts a fresh one. Returns true when a batch was detached.
    pub fn append(&mut self, route: RouteKey, encoded: &str, base_len: usize) -> bool {
        let mut detached = false;
        let current_len = self.pending.get(&route).map_or(0, |p| p.data.len());

        if current_len > 0 && base_len + current_len + encoded.len() >= self.max_len {
            if let Some(batch) = self.detach(&route) {
                self.ready.push_back(batch);
                detached = true;
            }
        }

        let pending = self.pending.entry(route).or_default();
        if !pending.data.is_empty() {
            pending.data.push_str(EVENT_SEPARATOR);
        }
        pending.data.push_str(encoded);
        pending.events += 1;

        detached
    }

    fn detach(&mut self, route: &RouteKey) -> Option<ReadyBatch> {
        let pending = self.pending.remove(route)?;
        Some(ReadyBatch {
            route: route.clone(),
            data: pending.data,
            events: pending.events,
        })
    }

    /// Remove every batch for sending: ready queue first, then pending
    /// batches ordered by route key.
    pub fn take_all(&mut self) -> Vec<ReadyBatch> {
        let mut batches: Vec<ReadyBatch> = self.ready.drain(..).collect();

        let mut routes: Vec<RouteKey> = self.pending.keys().cloned().collect();
        routes.sort();
        batches.extend(routes.iter().filter_map(|route| self.detach(route)));

        batches
    }

    /// Remove only the batches detached by the size bound or requeued.
    pub fn take_ready(&mut self) -> Vec<ReadyBatch> {
        self.ready.drain(..).collect()
    }

    /// Put batches back at the front of the ready queue, keeping their order.
    pub fn requeue(&mut self, batches: Vec<ReadyBatch>) {
        for batch in batches.into_iter().rev() {
            self.ready.push_front(batch);
        }
    }

    #[cfg(test)]
    pub fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.pending.is_empty()
    }

    /// Encoded contents of the route's pending (not yet detached) batch.
    pub fn pending(&self, route: &RouteKey) -> Option<&str> {
        self.pending.get(route).map(|p| p.data.as_str())
    }

    /// Total number of events held, pending or ready.
    pub fn event_count(&self) -> usize {
        self.pending.values().map(|p| p.events).sum::<usize>()
            + self.ready.iter().map(|b| b.events).sum::<usize>()
    }
}
