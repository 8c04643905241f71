//! Replay Buffer
//!
//! The most recent update batches per component, kept so a client that
//! lost some of them can catch up without a full reset. Each component gets
//! a fixed-capacity FIFO; the oldest batch is evicted first.

use super::ComponentId;
use crate::communication::UpdateBatch;
use ahash::AHashMap;
use std::collections::VecDeque;

pub struct ReplayBuffer {
    cap: usize,
    batches: AHashMap<ComponentId, VecDeque<UpdateBatch>>,
}

impl ReplayBuffer {
    /// With `cap` 0 nothing is kept and every resync is a reset
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            batches: AHashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Remember a batch, evicting the component's oldest when full
    pub fn record(&mut self, component: ComponentId, batch: UpdateBatch) {
        if self.cap == 0 {
            return;
        }
        let cap = self.cap;
        let buf = self
            .batches
            .entry(component)
            .or_insert_with(|| VecDeque::with_capacity(cap.min(1024)));
        if buf.len() == cap {
            buf.pop_front();
        }
        buf.push_back(batch);
    }

    /// Batches issued after `last_applied`, oldest first
    ///
    /// `None` when some of them were already evicted. `latest` is the id of
    /// the component's most recent batch.
    pub fn missed_since(
        &self,
        component: ComponentId,
        last_applied: u64,
        latest: u64,
    ) -> Option<Vec<UpdateBatch>> {
        if last_applied >= latest {
            return Some(Vec::new());
        }
        let buf = self.batches.get(&component)?;
        let oldest = buf.front()?.update_id;
        if oldest > last_applied + 1 {
            return None;
        }
        Some(
            buf.iter()
                .filter(|batch| batch.update_id > last_applied)
                .cloned()
                .collect(),
        )
    }

    /// Drop everything kept for a component
    pub fn forget(&mut self, component: ComponentId) {
        self.batches.remove(&component);
    }

    pub fn len(&self, component: ComponentId) -> usize {
        self.batches.get(&component).map_or(0, VecDeque::len)
    }
}
