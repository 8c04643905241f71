//! Grid Events
//!
//! Event payloads and a small listener registry. Listeners run
//! synchronously inside the turn that raised the event.

use crate::data::SortDirection;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Handle returned when registering a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<E> = Box<dyn FnMut(&E) + Send>;

/// Ordered listeners for one event type
pub struct EventBus<E> {
    next_id: u64,
    listeners: Vec<(ListenerId, Listener<E>)>,
}

impl<E> EventBus<E> {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            listeners: Vec::new(),
        }
    }

    pub fn add(&mut self, listener: impl FnMut(&E) + Send + 'static) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    /// Call every listener in registration order
    pub fn emit(&mut self, event: &E) {
        for (_, listener) in &mut self.listeners {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Sort by one column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GridSortOrder {
    pub column: String,
    pub direction: SortDirection,
}

impl GridSortOrder {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Ascending,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: SortDirection::Descending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SortEvent {
    pub orders: Vec<GridSortOrder>,
    pub from_client: bool,
}

#[derive(Debug, Clone)]
pub struct ExpandEvent<T> {
    pub items: Vec<T>,
    pub from_client: bool,
}

#[derive(Debug, Clone)]
pub struct CollapseEvent<T> {
    pub items: Vec<T>,
    pub from_client: bool,
}
