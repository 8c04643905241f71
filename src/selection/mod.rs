//! Selection Models
//!
//! Per-mode selection state. Models only track items and produce events;
//! checking that an item belongs to the grid's data is the grid's job.

mod multi;
mod single;

pub use multi::*;
pub use single::*;

use crate::data::GridItem;
use crate::error::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Selection behaviour of a grid
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    None,
    #[default]
    Single,
    Multi,
}

/// A change of the selected set
#[derive(Debug, Clone)]
pub struct SelectionEvent<T> {
    pub added: Vec<T>,
    pub removed: Vec<T>,
    /// Whether the user caused the change
    pub from_client: bool,
    /// State of the "select all" indicator after the change (multi mode only)
    pub all_selected: bool,
}

impl<T> SelectionEvent<T> {
    pub(crate) fn new(added: Vec<T>, removed: Vec<T>, from_client: bool) -> Self {
        Self {
            added,
            removed,
            from_client,
            all_selected: false,
        }
    }

    pub(crate) fn with_all_selected(mut self, all_selected: bool) -> Self {
        self.all_selected = all_selected;
        self
    }

    /// Whether the event changes anything
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// The selection model of one grid
#[derive(Debug)]
pub enum SelectionModel<T: GridItem> {
    None,
    Single(SingleSelection<T>),
    Multi(MultiSelection<T>),
}

impl<T: GridItem> SelectionModel<T> {
    pub fn new(mode: SelectionMode) -> Self {
        match mode {
            SelectionMode::None => SelectionModel::None,
            SelectionMode::Single => SelectionModel::Single(SingleSelection::new()),
            SelectionMode::Multi => SelectionModel::Multi(MultiSelection::new()),
        }
    }

    pub fn mode(&self) -> SelectionMode {
        match self {
            SelectionModel::None => SelectionMode::None,
            SelectionModel::Single(_) => SelectionMode::Single,
            SelectionModel::Multi(_) => SelectionMode::Multi,
        }
    }

    fn disabled() -> Error {
        Error::unsupported("Selection is disabled for this grid")
    }

    pub fn select(&mut self, item: T, from_client: bool) -> Result<Option<SelectionEvent<T>>> {
        match self {
            SelectionModel::None => Err(Self::disabled()),
            SelectionModel::Single(model) => Ok(model.select(item, from_client)),
            SelectionModel::Multi(model) => Ok(model.select(item, from_client)),
        }
    }

    pub fn deselect(&mut self, item: &T, from_client: bool) -> Result<Option<SelectionEvent<T>>> {
        match self {
            SelectionModel::None => Err(Self::disabled()),
            SelectionModel::Single(model) => Ok(model.deselect(item, from_client)),
            SelectionModel::Multi(model) => Ok(model.deselect(item, from_client)),
        }
    }

    pub fn deselect_all(&mut self, from_client: bool) -> Result<Option<SelectionEvent<T>>> {
        match self {
            SelectionModel::None => Err(Self::disabled()),
            SelectionModel::Single(model) => Ok(model.deselect_all(from_client)),
            SelectionModel::Multi(model) => Ok(model.deselect_all(from_client)),
        }
    }

    /// Select exactly `items`, the full data set; multi mode only
    pub fn select_all(&mut self, items: Vec<T>, from_client: bool) -> Result<Option<SelectionEvent<T>>> {
        match self {
            SelectionModel::Multi(model) => Ok(model.select_all(items, from_client)),
            _ => Err(Error::unsupported(format!(
                "select all requires multi selection, mode is {:?}",
                self.mode()
            ))),
        }
    }

    /// Add and remove items in one change; multi mode only
    pub fn update_selection(
        &mut self,
        add: Vec<T>,
        remove: Vec<T>,
        from_client: bool,
    ) -> Result<Option<SelectionEvent<T>>> {
        match self {
            SelectionModel::Multi(model) => Ok(model.update_selection(add, remove, from_client)),
            _ => Err(Error::unsupported(format!(
                "batch selection requires multi selection, mode is {:?}",
                self.mode()
            ))),
        }
    }

    // ==================== Getters ====================

    pub fn is_selected(&self, item: &T) -> bool {
        match self {
            SelectionModel::None => false,
            SelectionModel::Single(model) => model.is_selected(item),
            SelectionModel::Multi(model) => model.is_selected(item),
        }
    }

    /// Selected items; insertion order in multi mode
    pub fn selected_items(&self) -> Vec<T> {
        match self {
            SelectionModel::None => Vec::new(),
            SelectionModel::Single(model) => model.selected().into_iter().cloned().collect(),
            SelectionModel::Multi(model) => model.selected_items(),
        }
    }

    pub fn is_all_selected(&self) -> bool {
        match self {
            SelectionModel::Multi(model) => model.is_all_selected(),
            _ => false,
        }
    }

    // ==================== Data changes ====================

    /// Swap in an updated copy of a selected item; no event
    pub fn refresh_item(&mut self, item: &T) {
        match self {
            SelectionModel::None => {}
            SelectionModel::Single(model) => model.refresh_item(item),
            SelectionModel::Multi(model) => model.refresh_item(item),
        }
    }

    /// Drop a removed item; a server-side deselection when it was selected
    pub fn remove_item(&mut self, item: &T) -> Option<SelectionEvent<T>> {
        self.remove_items(std::slice::from_ref(item))
    }

    /// Drop removed items in one server-side deselection
    pub fn remove_items(&mut self, items: &[T]) -> Option<SelectionEvent<T>> {
        match self {
            SelectionModel::None => None,
            SelectionModel::Single(model) => {
                let selected = model.selected().cloned()?;
                if items.iter().any(|item| item.id() == selected.id()) {
                    model.deselect_all(false)
                } else {
                    None
                }
            }
            SelectionModel::Multi(model) => model.update_selection(Vec::new(), items.to_vec(), false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_mode_rejects_selection() {
        let mut model = SelectionModel::<u32>::new(SelectionMode::None);
        assert!(matches!(
            model.select(1, true),
            Err(Error::UnsupportedOperation { .. })
        ));
        assert!(model.selected_items().is_empty());
        assert!(model.remove_item(&1).is_none());
    }

    #[test]
    fn test_select_all_requires_multi() {
        let mut model = SelectionModel::<u32>::new(SelectionMode::Single);
        assert!(model.select_all(vec![1, 2], false).is_err());

        let mut model = SelectionModel::<u32>::new(SelectionMode::Multi);
        let event = model
            .select_all(vec![1, 2], false)
            .expect("multi")
            .expect("event");
        assert!(event.all_selected);
        assert!(model.is_all_selected());
    }

    #[test]
    fn test_remove_item_is_server_side() {
        let mut model = SelectionModel::<u32>::new(SelectionMode::Single);
        model.select(4, true).expect("select");
        let event = model.remove_item(&4).expect("event");
        assert!(!event.from_client);
        assert_eq!(event.removed, vec![4]);
        assert!(model.remove_item(&4).is_none());
    }

    #[test]
    fn test_remove_items_emits_one_event() {
        let mut model = SelectionModel::<u32>::new(SelectionMode::Multi);
        model
            .update_selection(vec![1, 2, 3], Vec::new(), true)
            .expect("multi");
        let event = model.remove_items(&[2, 3, 9]).expect("event");
        assert_eq!(event.removed, vec![2, 3]);
        assert!(!event.from_client);
        assert_eq!(model.selected_items(), vec![1]);

        let mut model = SelectionModel::<u32>::new(SelectionMode::Single);
        model.select(5, true).expect("select");
        assert!(model.remove_items(&[4, 6]).is_none());
        assert_eq!(model.remove_items(&[4, 5]).expect("event").removed, vec![5]);
    }

    #[test]
    fn test_mode_serializes_lowercase() {
        let json = serde_json::to_string(&SelectionMode::Multi).expect("serialize");
        assert_eq!(json, "\"multi\"");
    }
}
