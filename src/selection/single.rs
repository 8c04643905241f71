//! Single selection
//!
//! At most one item is selected. Selecting another item replaces it in one
//! event.

use super::SelectionEvent;
use crate::data::GridItem;
use tracing::debug;

#[derive(Debug)]
pub struct SingleSelection<T: GridItem> {
    selected: Option<T>,
    deselect_allowed: bool,
}

impl<T: GridItem> SingleSelection<T> {
    pub fn new() -> Self {
        Self {
            selected: None,
            deselect_allowed: true,
        }
    }

    /// Whether the client may clear the selection by deselecting the row
    pub fn set_deselect_allowed(&mut self, allowed: bool) {
        self.deselect_allowed = allowed;
    }

    pub fn is_deselect_allowed(&self) -> bool {
        self.deselect_allowed
    }

    pub fn selected(&self) -> Option<&T> {
        self.selected.as_ref()
    }

    pub fn is_selected(&self, item: &T) -> bool {
        self.selected
            .as_ref()
            .is_some_and(|selected| selected.id() == item.id())
    }

    pub fn select(&mut self, item: T, from_client: bool) -> Option<SelectionEvent<T>> {
        if self.is_selected(&item) {
            return None;
        }
        let removed: Vec<T> = self.selected.replace(item.clone()).into_iter().collect();
        Some(SelectionEvent::new(vec![item], removed, from_client))
    }

    pub fn deselect(&mut self, item: &T, from_client: bool) -> Option<SelectionEvent<T>> {
        if !self.is_selected(item) {
            return None;
        }
        if from_client && !self.deselect_allowed {
            debug!("Client deselect of {:?} ignored, deselect not allowed", item);
            return None;
        }
        self.deselect_all(from_client)
    }

    pub fn deselect_all(&mut self, from_client: bool) -> Option<SelectionEvent<T>> {
        let removed = self.selected.take()?;
        Some(SelectionEvent::new(Vec::new(), vec![removed], from_client))
    }

    pub fn refresh_item(&mut self, item: &T) {
        if self.is_selected(item) {
            self.selected = Some(item.clone());
        }
    }
}

impl<T: GridItem> Default for SingleSelection<T> {
    fn default() -> Self {
        Self::new()
    }
}
