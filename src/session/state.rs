//! Session
//!
//! All components of one client and the turn loop that serves it. A turn
//! applies the client's messages in order, then flushes every component in
//! handle order. Nothing else touches the components in between, so they
//! need no locking of their own.

use super::{
    ClientCall, ClientMessage, ClientResponse, Component, ComponentArena, ComponentId,
    ComponentUpdate, ReplayBuffer,
};
use crate::config::SessionConfig;
use crate::error::Result;
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Counters for one session
#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
    pub started_at: DateTime<Utc>,
    pub last_turn_at: Option<DateTime<Utc>>,
    pub turns: u64,
    pub messages: u64,
    /// Client calls dropped because they failed
    pub dropped_calls: u64,
    /// Range requests superseded by a later one in the same turn
    pub coalesced_ranges: u64,
}

impl SessionStats {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            last_turn_at: None,
            turns: 0,
            messages: 0,
            dropped_calls: 0,
            coalesced_ranges: 0,
        }
    }
}

pub struct Session {
    id: Uuid,
    config: SessionConfig,
    arena: ComponentArena,
    replay: ReplayBuffer,
    stats: SessionStats,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        let id = Uuid::new_v4();
        debug!("Session {} created", id);
        Self {
            id,
            replay: ReplayBuffer::new(config.replay_buffer),
            config,
            arena: ComponentArena::new(),
            stats: SessionStats::new(),
        }
    }

    // ==================== Getters ====================

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn component_count(&self) -> usize {
        self.arena.len()
    }

    // ==================== Components ====================

    pub fn add(&mut self, component: impl Component) -> ComponentId {
        let id = self.arena.insert(component);
        debug!("Session {}: component {} attached", self.id, id);
        id
    }

    pub fn remove(&mut self, id: ComponentId) -> bool {
        self.replay.forget(id);
        self.arena.remove(id).is_some()
    }

    pub fn component<C: Component>(&self, id: ComponentId) -> Result<&C> {
        self.arena.get(id)
    }

    pub fn component_mut<C: Component>(&mut self, id: ComponentId) -> Result<&mut C> {
        self.arena.get_mut(id)
    }

    // ==================== Turns ====================

    /// Apply client messages and collect every component's updates
    ///
    /// Failing client calls are logged and dropped; they never abort the turn.
    pub fn handle_turn(&mut self, messages: Vec<ClientMessage>) -> ClientResponse {
        let received = messages.len();
        let messages = self.coalesce_ranges(messages);
        trace!(
            "Session {}: turn with {} message(s), {} after coalescing",
            self.id,
            received,
            messages.len()
        );

        let mut response = ClientResponse::default();
        for ClientMessage { component, call } in messages {
            match call {
                ClientCall::Resync { last_applied } => {
                    self.resync(component, last_applied, &mut response)
                }
                call => self.dispatch(component, call),
            }
        }
        self.flush_into(&mut response);

        self.stats.turns += 1;
        self.stats.messages += received as u64;
        self.stats.last_turn_at = Some(Utc::now());
        response
    }

    /// Collect pending updates without client input, e.g. after server-side changes
    pub fn flush(&mut self) -> ClientResponse {
        self.handle_turn(Vec::new())
    }

    /// Only the last range request per component survives
    fn coalesce_ranges(&mut self, messages: Vec<ClientMessage>) -> Vec<ClientMessage> {
        let mut last: AHashMap<ComponentId, usize> = AHashMap::new();
        for (index, message) in messages.iter().enumerate() {
            if matches!(message.call, ClientCall::SetRequestedRange { .. }) {
                last.insert(message.component, index);
            }
        }
        let before = messages.len();
        let kept: Vec<ClientMessage> = messages
            .into_iter()
            .enumerate()
            .filter(|(index, message)| {
                !matches!(message.call, ClientCall::SetRequestedRange { .. })
                    || last.get(&message.component) == Some(index)
            })
            .map(|(_, message)| message)
            .collect();
        self.stats.coalesced_ranges += (before - kept.len()) as u64;
        kept
    }

    fn dispatch(&mut self, id: ComponentId, call: ClientCall) {
        let Some(component) = self.arena.get_dyn_mut(id) else {
            warn!("Session {}: call for unknown component {} dropped", self.id, id);
            self.stats.dropped_calls += 1;
            return;
        };
        if let Err(err) = component.handle_call(call) {
            if err.is_client_recoverable() {
                warn!("Session {}: client call to {} dropped: {}", self.id, id, err);
            } else {
                error!("Session {}: client call to {} failed: {}", self.id, id, err);
            }
            self.stats.dropped_calls += 1;
        }
    }

    /// Replay batches the client missed, or reset it when they are gone
    fn resync(&mut self, id: ComponentId, last_applied: u64, response: &mut ClientResponse) {
        let Some(component) = self.arena.get_dyn_mut(id) else {
            warn!("Session {}: resync for unknown component {} dropped", self.id, id);
            self.stats.dropped_calls += 1;
            return;
        };
        let latest = component.last_update_id();
        match self.replay.missed_since(id, last_applied, latest) {
            Some(batches) => {
                debug!(
                    "Session {}: replaying {} batch(es) to {} after {}",
                    self.id,
                    batches.len(),
                    id,
                    last_applied
                );
                response.updates.extend(
                    batches
                        .into_iter()
                        .map(|batch| ComponentUpdate { component: id, batch }),
                );
            }
            None => {
                info!(
                    "Session {}: batches after {} for {} are gone, resetting client",
                    self.id, last_applied, id
                );
                self.replay.forget(id);
                component.reset_client();
            }
        }
    }

    fn flush_into(&mut self, response: &mut ClientResponse) {
        for (id, component) in self.arena.iter_mut() {
            if let Some(batch) = component.flush() {
                self.replay.record(id, batch.clone());
                response.updates.push(ComponentUpdate { component: id, batch });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::arena::tests::Recorder;
    use super::*;
    use crate::config::GridConfig;
    use crate::communication::UpdateOp;
    use crate::data::ListDataProvider;
    use crate::grid::{Column, Grid};

    fn config(replay_buffer: usize) -> SessionConfig {
        SessionConfig {
            replay_buffer,
            ..SessionConfig::default()
        }
    }

    fn range(component: ComponentId, start: usize, length: usize) -> ClientMessage {
        ClientMessage::new(component, ClientCall::SetRequestedRange { start, length })
    }

    #[test]
    fn test_ranges_coalesce_last_write_wins() {
        let mut session = Session::new(config(4));
        let id = session.add(Recorder::default());
        session.handle_turn(vec![
            range(id, 0, 10),
            ClientMessage::new(id, ClientCall::Select { key: "1".into() }),
            range(id, 5, 10),
        ]);
        let recorder = session.component::<Recorder>(id).expect("recorder");
        assert_eq!(
            recorder.calls,
            vec![
                ClientCall::Select { key: "1".into() },
                ClientCall::SetRequestedRange {
                    start: 5,
                    length: 10
                },
            ]
        );
        assert_eq!(session.stats().coalesced_ranges, 1);
    }

    #[test]
    fn test_failed_calls_are_dropped() {
        let mut session = Session::new(config(4));
        let id = session.add(Recorder::default());
        let response = session.handle_turn(vec![
            ClientMessage::new(id, ClientCall::Select { key: "missing".into() }),
            ClientMessage::new(ComponentId::new(7), ClientCall::SelectAll),
            ClientMessage::new(id, ClientCall::DeselectAll),
        ]);
        assert_eq!(session.stats().dropped_calls, 2);
        assert_eq!(session.component::<Recorder>(id).expect("recorder").calls.len(), 1);
        assert_eq!(response.updates.len(), 1);
    }

    #[test]
    fn test_flush_follows_handle_order() {
        let mut session = Session::new(config(4));
        let a = session.add(Recorder::default());
        let b = session.add(Recorder::default());
        let response = session.handle_turn(vec![
            ClientMessage::new(b, ClientCall::SelectAll),
            ClientMessage::new(a, ClientCall::SelectAll),
        ]);
        let order: Vec<ComponentId> = response.updates.iter().map(|u| u.component).collect();
        assert_eq!(order, vec![a, b]);
    }

    #[test]
    fn test_resync_replays_missed_batches() {
        let mut session = Session::new(config(4));
        let id = session.add(Recorder::default());
        for _ in 0..3 {
            session.handle_turn(vec![ClientMessage::new(id, ClientCall::SelectAll)]);
        }
        let response = session.handle_turn(vec![ClientMessage::new(
            id,
            ClientCall::Resync { last_applied: 1 },
        )]);
        let ids: Vec<u64> = response.for_component(id).map(|b| b.update_id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(session.component::<Recorder>(id).expect("recorder").resets, 0);
    }

    #[test]
    fn test_resync_resets_when_batches_are_gone() {
        let mut session = Session::new(config(1));
        let id = session.add(Recorder::default());
        for _ in 0..3 {
            session.handle_turn(vec![ClientMessage::new(id, ClientCall::SelectAll)]);
        }
        let response = session.handle_turn(vec![ClientMessage::new(
            id,
            ClientCall::Resync { last_applied: 1 },
        )]);
        let recorder = session.component::<Recorder>(id).expect("recorder");
        assert_eq!(recorder.resets, 1);
        let ids: Vec<u64> = response.for_component(id).map(|b| b.update_id).collect();
        assert_eq!(ids, vec![4]);
    }

    #[test]
    fn test_grid_turn_applies_only_last_range() {
        let mut session = Session::new(config(4));
        let mut grid = Grid::new(
            ListDataProvider::new((0u32..100).collect()),
            GridConfig {
                page_size: 10,
                ..GridConfig::default()
            },
        );
        grid.add_column(Column::text("n", |n: &u32| n.to_string()))
            .expect("column");
        let id = session.add(grid);

        let response = session.handle_turn(vec![range(id, 0, 10), range(id, 40, 10)]);
        let batch = response.for_component(id).next().expect("batch");
        let indices: Vec<usize> = batch.rows().map(|(index, _)| index).collect();
        assert_eq!(indices, (40..50).collect::<Vec<_>>());
        assert_eq!(batch.size(), Some(100));

        let update_id = batch.update_id;
        let response = session.handle_turn(vec![ClientMessage::new(
            id,
            ClientCall::ConfirmUpdate { update_id },
        )]);
        assert!(response.is_empty());
    }

    #[test]
    fn test_grid_resync_after_reset_resends_window() {
        let mut session = Session::new(config(0));
        let grid = Grid::new(
            ListDataProvider::new((0u32..30).collect()),
            GridConfig {
                page_size: 5,
                ..GridConfig::default()
            },
        );
        let id = session.add(grid);
        session.handle_turn(vec![range(id, 0, 5)]);

        let response = session.handle_turn(vec![ClientMessage::new(
            id,
            ClientCall::Resync { last_applied: 0 },
        )]);
        let batch = response.for_component(id).next().expect("resent");
        assert_eq!(batch.size(), Some(30));
        assert_eq!(batch.rows().count(), 5);
        assert!(matches!(batch.ops.last(), Some(UpdateOp::Confirm { .. })));
    }
}
