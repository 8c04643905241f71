//! Grid
//!
//! The server-side grid component: columns, row decorators, selection,
//! sorting and hierarchy on top of a [`DataCommunicator`]. A grid over a
//! hierarchical provider is a tree grid.
//!
//! Programmatic calls validate their input and return errors; client calls
//! arrive by key through [`Component::handle_call`] and are marked
//! `from_client` in the events they raise.

use super::{
    CollapseEvent, Column, ColumnInfo, EventBus, ExpandEvent, GridSortOrder, ListenerId,
    SortEvent,
};
use crate::communication::{
    DataCommunicator, FlatRow, NodeState, RowData, RowDecorator, RowFields, RowPipeline,
    UpdateBatch,
};
use crate::config::GridConfig;
use crate::data::{Comparator, DataChange, DataProvider, Filter, GridItem, QuerySortOrder};
use crate::error::{Error, Result};
use crate::selection::{SelectionEvent, SelectionMode, SelectionModel};
use crate::session::{ClientCall, Component};
use std::any::Any;
use std::cmp::Ordering;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, warn};

/// Fills rows from columns, the decorator pipeline and the selection
struct GridRowDecorator<'a, T: GridItem> {
    columns: &'a [Column<T>],
    pipeline: &'a RowPipeline<T>,
    selection: &'a SelectionModel<T>,
}

impl<T: GridItem> RowDecorator<T> for GridRowDecorator<'_, T> {
    fn decorate(&self, item: &T, row: &mut RowData) {
        for column in self.columns {
            row.fields.extend(column.render(item));
        }
        self.pipeline.decorate(item, row);
        row.meta.selected = self.selection.is_selected(item);
    }
}

pub struct Grid<T: GridItem> {
    communicator: DataCommunicator<T>,
    columns: Vec<Column<T>>,
    pipeline: RowPipeline<T>,
    selection: SelectionModel<T>,
    sort_orders: Vec<GridSortOrder>,

    selection_listeners: EventBus<SelectionEvent<T>>,
    sort_listeners: EventBus<SortEvent>,
    expand_listeners: EventBus<ExpandEvent<T>>,
    collapse_listeners: EventBus<CollapseEvent<T>>,
}

impl<T: GridItem> Grid<T> {
    pub fn new(provider: impl DataProvider<T> + 'static, config: GridConfig) -> Self {
        Self {
            communicator: DataCommunicator::new(provider, config),
            columns: Vec::new(),
            pipeline: RowPipeline::new(),
            selection: SelectionModel::new(SelectionMode::default()),
            sort_orders: Vec::new(),
            selection_listeners: EventBus::new(),
            sort_listeners: EventBus::new(),
            expand_listeners: EventBus::new(),
            collapse_listeners: EventBus::new(),
        }
    }

    // ==================== Getters ====================

    pub fn communicator(&self) -> &DataCommunicator<T> {
        &self.communicator
    }

    pub fn communicator_mut(&mut self) -> &mut DataCommunicator<T> {
        &mut self.communicator
    }

    pub fn columns(&self) -> &[Column<T>] {
        &self.columns
    }

    pub fn column(&self, id: &str) -> Option<&Column<T>> {
        self.columns.iter().find(|column| column.id() == id)
    }

    /// Column descriptions for the client
    pub fn column_infos(&self) -> Vec<ColumnInfo> {
        let in_memory = self.communicator.is_in_memory();
        self.columns.iter().map(|column| column.info(in_memory)).collect()
    }

    pub fn selection_mode(&self) -> SelectionMode {
        self.selection.mode()
    }

    pub fn selection(&self) -> &SelectionModel<T> {
        &self.selection
    }

    pub fn selected_items(&self) -> Vec<T> {
        self.selection.selected_items()
    }

    pub fn is_selected(&self, item: &T) -> bool {
        self.selection.is_selected(item)
    }

    pub fn sort_orders(&self) -> &[GridSortOrder] {
        &self.sort_orders
    }

    /// Whether "select all" can be offered: multi selection over in-memory data
    pub fn is_select_all_available(&self) -> bool {
        self.selection.mode() == SelectionMode::Multi && self.communicator.is_in_memory()
    }

    /// Total row count, resolving the hierarchy as needed
    pub fn row_count(&mut self) -> Result<usize> {
        self.communicator.size()
    }

    /// Rows of a flat range as the client would see them
    pub fn rows(&mut self, range: Range<usize>) -> Result<Vec<FlatRow<T>>> {
        self.communicator.fetch_rows(range)
    }

    // ==================== Columns ====================

    pub fn add_column(&mut self, column: Column<T>) -> Result<()> {
        if self.column(column.id()).is_some() {
            return Err(Error::invalid_state(format!(
                "Column '{}' already exists",
                column.id()
            )));
        }
        debug!("Adding column '{}'", column.id());
        self.columns.push(column);
        self.communicator.refresh_visible();
        Ok(())
    }

    /// Remove a column; the sort order drops it too
    pub fn remove_column(&mut self, id: &str) -> bool {
        let before = self.columns.len();
        self.columns.retain(|column| column.id() != id);
        if self.columns.len() == before {
            return false;
        }
        if self.sort_orders.iter().any(|order| order.column == id) {
            let orders = self
                .sort_orders
                .iter()
                .filter(|order| order.column != id)
                .cloned()
                .collect();
            self.apply_sort(orders, false);
        }
        self.communicator.refresh_visible();
        true
    }

    /// Attach a named field generator to every row
    pub fn add_row_decorator(
        &mut self,
        name: impl Into<String>,
        decorator: impl Fn(&T) -> RowFields + Send + 'static,
    ) -> Result<()> {
        self.pipeline.add(name, decorator)?;
        self.communicator.refresh_visible();
        Ok(())
    }

    pub fn remove_row_decorator(&mut self, name: &str) -> bool {
        let removed = self.pipeline.remove(name);
        if removed {
            self.communicator.refresh_visible();
        }
        removed
    }

    // ==================== Listeners ====================

    pub fn add_selection_listener(
        &mut self,
        listener: impl FnMut(&SelectionEvent<T>) + Send + 'static,
    ) -> ListenerId {
        self.selection_listeners.add(listener)
    }

    pub fn remove_selection_listener(&mut self, id: ListenerId) -> bool {
        self.selection_listeners.remove(id)
    }

    pub fn add_sort_listener(&mut self, listener: impl FnMut(&SortEvent) + Send + 'static) -> ListenerId {
        self.sort_listeners.add(listener)
    }

    pub fn remove_sort_listener(&mut self, id: ListenerId) -> bool {
        self.sort_listeners.remove(id)
    }

    pub fn add_expand_listener(
        &mut self,
        listener: impl FnMut(&ExpandEvent<T>) + Send + 'static,
    ) -> ListenerId {
        self.expand_listeners.add(listener)
    }

    pub fn remove_expand_listener(&mut self, id: ListenerId) -> bool {
        self.expand_listeners.remove(id)
    }

    pub fn add_collapse_listener(
        &mut self,
        listener: impl FnMut(&CollapseEvent<T>) + Send + 'static,
    ) -> ListenerId {
        self.collapse_listeners.add(listener)
    }

    pub fn remove_collapse_listener(&mut self, id: ListenerId) -> bool {
        self.collapse_listeners.remove(id)
    }

    // ==================== Selection ====================

    /// Switch selection mode; the current selection is cleared first
    pub fn set_selection_mode(&mut self, mode: SelectionMode) {
        if mode == self.selection.mode() {
            return;
        }
        if let Ok(event) = self.selection.deselect_all(false) {
            self.fire_selection(event);
        }
        debug!("Selection mode {:?} -> {:?}", self.selection.mode(), mode);
        self.selection = SelectionModel::new(mode);
        self.communicator.refresh_visible();
    }

    /// Whether the client may deselect the selected row in single mode
    pub fn set_deselect_allowed(&mut self, allowed: bool) -> Result<()> {
        match &mut self.selection {
            SelectionModel::Single(model) => {
                model.set_deselect_allowed(allowed);
                Ok(())
            }
            _ => Err(Error::invalid_state(
                "deselect_allowed only applies to single selection",
            )),
        }
    }

    fn ensure_known(&self, item: &T) -> Result<()> {
        if self.communicator.is_known(item) {
            Ok(())
        } else {
            Err(Error::unknown_item(item))
        }
    }

    fn fire_selection(&mut self, event: Option<SelectionEvent<T>>) {
        let Some(event) = event else {
            return;
        };
        for item in event.added.iter().chain(event.removed.iter()) {
            self.communicator.refresh(item);
        }
        self.selection_listeners.emit(&event);
    }

    fn select_with(&mut self, item: T, from_client: bool) -> Result<()> {
        self.ensure_known(&item)?;
        let event = self.selection.select(item, from_client)?;
        self.fire_selection(event);
        Ok(())
    }

    fn deselect_with(&mut self, item: &T, from_client: bool) -> Result<()> {
        self.ensure_known(item)?;
        let event = self.selection.deselect(item, from_client)?;
        self.fire_selection(event);
        Ok(())
    }

    fn select_all_with(&mut self, from_client: bool) -> Result<()> {
        if !self.communicator.is_in_memory() {
            return Err(Error::unsupported(
                "select all needs an in-memory data provider",
            ));
        }
        if self.selection.mode() != SelectionMode::Multi {
            return Err(Error::unsupported("select all needs multi selection"));
        }
        let items = self.communicator.fetch_all_items()?;
        if let Some(event) = self.selection.select_all(items, from_client)? {
            self.communicator.refresh_visible();
            self.selection_listeners.emit(&event);
        }
        Ok(())
    }

    fn deselect_all_with(&mut self, from_client: bool) -> Result<()> {
        let event = self.selection.deselect_all(from_client)?;
        self.fire_selection(event);
        Ok(())
    }

    /// Select an item that is part of the data
    pub fn select(&mut self, item: T) -> Result<()> {
        self.select_with(item, false)
    }

    pub fn deselect(&mut self, item: &T) -> Result<()> {
        self.deselect_with(item, false)
    }

    /// Select every item; multi selection over in-memory data only
    pub fn select_all(&mut self) -> Result<()> {
        self.select_all_with(false)
    }

    pub fn deselect_all(&mut self) -> Result<()> {
        self.deselect_all_with(false)
    }

    /// Add and remove items in one selection change; multi selection only
    pub fn update_selection(&mut self, add: Vec<T>, remove: Vec<T>) -> Result<()> {
        for item in add.iter().chain(remove.iter()) {
            self.ensure_known(item)?;
        }
        let event = self.selection.update_selection(add, remove, false)?;
        self.fire_selection(event);
        Ok(())
    }

    // ==================== Sorting ====================

    fn apply_sort(&mut self, orders: Vec<GridSortOrder>, from_client: bool) {
        let mut comparators: Vec<(Comparator<T>, crate::data::SortDirection)> = Vec::new();
        let mut back_end: Vec<QuerySortOrder> = Vec::new();
        for order in &orders {
            let Some(column) = self.column(&order.column) else {
                continue;
            };
            if let Some(comparator) = column.comparator() {
                comparators.push((comparator, order.direction));
            }
            back_end.extend(column.sort_orders(order.direction));
        }

        let comparator: Option<Comparator<T>> = if comparators.is_empty() {
            None
        } else {
            Some(Arc::new(move |a: &T, b: &T| {
                comparators
                    .iter()
                    .map(|(compare, direction)| direction.apply(compare(a, b)))
                    .find(|ordering| *ordering != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            }))
        };
        self.communicator.set_in_memory_sorting(comparator);
        self.communicator.set_back_end_sorting(back_end);
        self.sort_orders = orders;

        let event = SortEvent {
            orders: self.sort_orders.clone(),
            from_client,
        };
        self.sort_listeners.emit(&event);
    }

    /// Sort by the given columns; an empty list restores provider order
    pub fn sort(&mut self, orders: Vec<GridSortOrder>) -> Result<()> {
        let in_memory = self.communicator.is_in_memory();
        for order in &orders {
            let column = self.column(&order.column).ok_or_else(|| {
                Error::invalid_state(format!("Cannot sort by unknown column '{}'", order.column))
            })?;
            if !column.can_sort(in_memory) {
                return Err(Error::invalid_state(format!(
                    "Column '{}' is not sortable",
                    order.column
                )));
            }
        }
        self.apply_sort(orders, false);
        Ok(())
    }

    /// Sorting requested by the client; columns that cannot sort are ignored
    fn sorters_changed(&mut self, sorters: Vec<GridSortOrder>) {
        let in_memory = self.communicator.is_in_memory();
        let orders: Vec<GridSortOrder> = sorters
            .into_iter()
            .filter(|order| match self.column(&order.column) {
                Some(column) if column.can_sort(in_memory) => true,
                _ => {
                    warn!("Ignoring client sort by column '{}'", order.column);
                    false
                }
            })
            .collect();
        self.apply_sort(orders, true);
    }

    // ==================== Data ====================

    /// Replace the provider; selection, expansion and keys start over
    pub fn set_data_provider(&mut self, provider: impl DataProvider<T> + 'static) {
        if let Ok(event) = self.selection.deselect_all(false) {
            self.fire_selection(event);
        }
        self.communicator.set_data_provider(provider);
    }

    pub fn set_filter(&mut self, filter: Option<Filter<T>>) {
        self.communicator.set_filter(filter);
    }

    pub fn set_config(&mut self, config: GridConfig) {
        self.communicator.set_config(config);
    }

    /// Apply a change the host made to the provider's data
    pub fn apply_change(&mut self, change: DataChange<T>) {
        match &change {
            DataChange::Removed { item, descendants } => {
                let gone: Vec<T> = self
                    .selection
                    .selected_items()
                    .into_iter()
                    .filter(|selected| {
                        let id = selected.id();
                        id == item.id()
                            || descendants.iter().any(|removed| removed.id() == id)
                            || self.communicator.is_cached_descendant(selected, item)
                            || self.communicator.provider().contains(selected) == Some(false)
                    })
                    .collect();
                if let Some(event) = self.selection.remove_items(&gone) {
                    self.selection_listeners.emit(&event);
                }
            }
            DataChange::Refresh { item, .. } => self.selection.refresh_item(item),
            DataChange::RefreshAll => {}
        }
        self.communicator.apply_change(change);
        self.fire_auto_collapsed();
    }

    /// Regenerate an item's row
    pub fn refresh_item(&mut self, item: T) {
        self.apply_change(DataChange::refresh(item));
    }

    pub fn refresh_all(&mut self) {
        self.apply_change(DataChange::RefreshAll);
    }

    // ==================== Hierarchy ====================

    fn fire_auto_collapsed(&mut self) {
        let items = self.communicator.take_auto_collapsed();
        if items.is_empty() {
            return;
        }
        debug!("{} item(s) collapsed for having no children", items.len());
        self.collapse_listeners.emit(&CollapseEvent {
            items,
            from_client: false,
        });
    }

    fn expand_with(&mut self, items: &[T], from_client: bool) -> Result<()> {
        let mut expanded = Vec::new();
        for item in items {
            if self.communicator.expand(item)? {
                expanded.push(item.clone());
            }
        }
        if !expanded.is_empty() {
            self.expand_listeners.emit(&ExpandEvent {
                items: expanded,
                from_client,
            });
        }
        self.fire_auto_collapsed();
        Ok(())
    }

    fn collapse_with(&mut self, items: &[T], from_client: bool) {
        let collapsed: Vec<T> = items
            .iter()
            .filter(|item| self.communicator.collapse(item))
            .cloned()
            .collect();
        if !collapsed.is_empty() {
            self.collapse_listeners.emit(&CollapseEvent {
                items: collapsed,
                from_client,
            });
        }
    }

    /// Expand items; leaves and already expanded items are skipped
    pub fn expand(&mut self, items: &[T]) -> Result<()> {
        self.expand_with(items, false)
    }

    /// Collapse items; descendants keep their expanded state
    pub fn collapse(&mut self, items: &[T]) {
        self.collapse_with(items, false)
    }

    /// Expand items and their descendants down to `depth` levels below them
    pub fn expand_recursively(&mut self, items: &[T], depth: usize) -> Result<()> {
        let expanded = self.communicator.expand_recursively(items, depth)?;
        if !expanded.is_empty() {
            self.expand_listeners.emit(&ExpandEvent {
                items: expanded,
                from_client: false,
            });
        }
        self.fire_auto_collapsed();
        Ok(())
    }

    /// Collapse items and their descendants down to `depth` levels below them
    pub fn collapse_recursively(&mut self, items: &[T], depth: usize) -> Result<()> {
        let collapsed = self.communicator.collapse_recursively(items, depth)?;
        if !collapsed.is_empty() {
            self.collapse_listeners.emit(&CollapseEvent {
                items: collapsed,
                from_client: false,
            });
        }
        Ok(())
    }

    pub fn is_expanded(&self, item: &T) -> bool {
        self.communicator.is_expanded(item)
    }

    pub fn node_state(&self, item: &T) -> NodeState {
        self.communicator.node_state(item)
    }

    pub fn expanded_items(&self) -> Vec<T> {
        self.communicator.expanded_items()
    }

    // ==================== Client ====================

    fn item_for_key(&self, key: &str) -> Result<T> {
        self.communicator.item_for_key(key)
    }

    fn toggle_expand(&mut self, key: &str) -> Result<()> {
        let item = self.item_for_key(key)?;
        if self.communicator.is_expanded(&item) {
            self.collapse_with(std::slice::from_ref(&item), true);
            Ok(())
        } else {
            self.expand_with(std::slice::from_ref(&item), true)
        }
    }

    /// Produce the client batch for everything that changed since the last flush
    pub fn flush_updates(&mut self) -> Option<UpdateBatch> {
        let decorator = GridRowDecorator {
            columns: &self.columns,
            pipeline: &self.pipeline,
            selection: &self.selection,
        };
        let batch = self.communicator.flush(&decorator);
        self.fire_auto_collapsed();
        batch
    }
}

impl<T: GridItem> Component for Grid<T> {
    fn handle_call(&mut self, call: ClientCall) -> Result<()> {
        match call {
            ClientCall::SetRequestedRange { start, length } => {
                self.communicator.set_requested_range(start, length);
                Ok(())
            }
            ClientCall::Select { key } => {
                let item = self.item_for_key(&key)?;
                self.select_with(item, true)
            }
            ClientCall::Deselect { key } => {
                let item = self.item_for_key(&key)?;
                self.deselect_with(&item, true)
            }
            ClientCall::SelectAll => self.select_all_with(true),
            ClientCall::DeselectAll => self.deselect_all_with(true),
            ClientCall::ToggleExpand { key } => self.toggle_expand(&key),
            ClientCall::SortersChanged { sorters } => {
                self.sorters_changed(sorters);
                Ok(())
            }
            ClientCall::ConfirmUpdate { update_id } => {
                self.communicator.confirm_update(update_id);
                Ok(())
            }
            ClientCall::Resync { .. } => Err(Error::invalid_state(
                "resync is handled by the session",
            )),
        }
    }

    fn flush(&mut self) -> Option<UpdateBatch> {
        self.flush_updates()
    }

    fn reset_client(&mut self) {
        self.communicator.request_resend();
    }

    fn last_update_id(&self) -> u64 {
        self.communicator.last_update_id()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::UpdateOp;
    use crate::data::{CallbackDataProvider, ListDataProvider, TreeData, TreeDataProvider};
    use std::sync::Mutex;

    fn config() -> GridConfig {
        GridConfig {
            page_size: 10,
            ..GridConfig::default()
        }
    }

    /// Three roots (100, 200, 300) with three children each
    fn tree_grid() -> Grid<u32> {
        let mut data = TreeData::new();
        for root in [100u32, 200, 300] {
            data.add_item(None, root).expect("root");
            for child in 1..=3 {
                data.add_item(Some(&root), root + child).expect("child");
            }
        }
        let mut grid = Grid::new(TreeDataProvider::new(data), config());
        grid.add_column(Column::text("name", |n: &u32| format!("node {n}")))
            .expect("column");
        grid
    }

    fn items(grid: &mut Grid<u32>, range: Range<usize>) -> Vec<u32> {
        grid.rows(range)
            .expect("rows")
            .into_iter()
            .map(|row| row.item)
            .collect()
    }

    fn key(grid: &Grid<u32>, item: u32) -> String {
        grid.communicator()
            .key_mapper()
            .key_of(&item)
            .expect("item is mapped")
            .to_string()
    }

    fn recorded<E: Clone + Send + 'static>(
        bus: impl FnOnce(Box<dyn FnMut(&E) + Send>) -> ListenerId,
    ) -> Arc<Mutex<Vec<E>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus(Box::new(move |event: &E| {
            sink.lock().expect("lock").push(event.clone())
        }));
        seen
    }

    #[test]
    fn test_expand_and_collapse_three_by_three() {
        let mut grid = tree_grid();
        let expands = recorded::<ExpandEvent<u32>>(|l| grid.add_expand_listener(l));
        assert_eq!(grid.row_count().expect("count"), 3);

        grid.expand(&[100]).expect("expand");
        assert_eq!(grid.row_count().expect("count"), 6);
        assert_eq!(items(&mut grid, 0..6), vec![100, 101, 102, 103, 200, 300]);
        assert_eq!(grid.node_state(&100), NodeState::ExpandedPopulated);

        grid.collapse(&[100]);
        assert_eq!(grid.row_count().expect("count"), 3);
        assert_eq!(items(&mut grid, 0..3), vec![100, 200, 300]);

        let expands = expands.lock().expect("lock");
        assert_eq!(expands.len(), 1);
        assert_eq!(expands[0].items, vec![100]);
        assert!(!expands[0].from_client);
    }

    #[test]
    fn test_expanding_leaf_raises_no_event() {
        let mut grid = tree_grid();
        let expands = recorded::<ExpandEvent<u32>>(|l| grid.add_expand_listener(l));
        grid.expand(&[101]).expect("expand");
        assert!(expands.lock().expect("lock").is_empty());
        assert!(!grid.is_expanded(&101));
    }

    #[test]
    fn test_client_toggle_expand() {
        let mut grid = tree_grid();
        let expands = recorded::<ExpandEvent<u32>>(|l| grid.add_expand_listener(l));
        let collapses = recorded::<CollapseEvent<u32>>(|l| grid.add_collapse_listener(l));
        grid.handle_call(ClientCall::SetRequestedRange { start: 0, length: 10 })
            .expect("range");
        let first = grid.flush().expect("first batch");
        assert_eq!(first.size(), Some(3));

        let root = key(&grid, 200);
        grid.handle_call(ClientCall::ToggleExpand { key: root.clone() })
            .expect("toggle");
        let batch = grid.flush().expect("batch");
        assert_eq!(batch.size(), Some(6));
        let expanded_row = batch
            .rows()
            .find(|(_, row)| row.key == root)
            .map(|(_, row)| row.meta.clone())
            .expect("row resent");
        assert_eq!(expanded_row.expanded, Some(true));
        assert_eq!(expanded_row.depth, Some(0));
        assert!(expands.lock().expect("lock")[0].from_client);

        grid.handle_call(ClientCall::ToggleExpand { key: root }).expect("toggle");
        assert_eq!(grid.flush().expect("batch").size(), Some(3));
        assert!(collapses.lock().expect("lock")[0].from_client);
    }

    #[test]
    fn test_select_all_then_toggle_one() {
        let mut grid = Grid::new(ListDataProvider::new((0u32..20).collect()), config());
        grid.set_selection_mode(SelectionMode::Multi);
        let events = recorded::<SelectionEvent<u32>>(|l| grid.add_selection_listener(l));

        grid.select_all().expect("select all");
        assert_eq!(grid.selected_items().len(), 20);
        assert!(grid.selection().is_all_selected());

        grid.handle_call(ClientCall::SetRequestedRange { start: 0, length: 10 })
            .expect("range");
        let batch = grid.flush().expect("batch");
        assert!(batch.rows().all(|(_, row)| row.meta.selected));

        let five = key(&grid, 5);
        grid.handle_call(ClientCall::Deselect { key: five.clone() })
            .expect("deselect");
        assert_eq!(grid.selected_items().len(), 19);
        assert!(!grid.is_selected(&5));
        assert!(grid.is_selected(&6));
        assert!(!grid.selection().is_all_selected());

        let events = events.lock().expect("lock");
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].removed, vec![5]);
        assert!(events[1].from_client);
        assert!(!events[1].all_selected);

        let batch = grid.flush().expect("row refreshed");
        let (_, row) = batch.rows().find(|(_, row)| row.key == five).expect("row");
        assert!(!row.meta.selected);
    }

    #[test]
    fn test_select_all_requires_in_memory_provider() {
        let provider = CallbackDataProvider::new(
            |q: &crate::data::Query<u32>| Ok((0u32..5).skip(q.offset).take(q.limit).collect()),
            |_| Ok(5),
        );
        let mut grid = Grid::new(provider, config());
        grid.set_selection_mode(SelectionMode::Multi);
        assert!(!grid.is_select_all_available());
        assert!(matches!(
            grid.select_all(),
            Err(Error::UnsupportedOperation { .. })
        ));
        grid.update_selection(vec![1, 2], Vec::new()).expect("multi select");
        assert_eq!(grid.selected_items(), vec![1, 2]);
    }

    #[test]
    fn test_single_selection_replaces() {
        let mut grid = Grid::new(ListDataProvider::new((0u32..5).collect()), config());
        let events = recorded::<SelectionEvent<u32>>(|l| grid.add_selection_listener(l));
        grid.select(1).expect("select");
        grid.select(3).expect("select");
        assert_eq!(grid.selected_items(), vec![3]);
        let events = events.lock().expect("lock");
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].added, vec![3]);
        assert_eq!(events[1].removed, vec![1]);
    }

    #[test]
    fn test_unknown_item_rejected() {
        let mut grid = Grid::new(ListDataProvider::new((0u32..5).collect()), config());
        assert!(matches!(grid.select(42), Err(Error::UnknownItem { .. })));
        assert!(matches!(grid.deselect(&42), Err(Error::UnknownItem { .. })));
        assert!(grid.selected_items().is_empty());
    }

    #[test]
    fn test_stale_client_key() {
        let mut grid = Grid::new(ListDataProvider::new((0u32..5).collect()), config());
        let result = grid.handle_call(ClientCall::Select { key: "999".into() });
        let err = result.expect_err("unknown key");
        assert!(matches!(err, Error::UnknownKey { .. }));
        assert!(err.is_client_recoverable());
    }

    #[test]
    fn test_none_mode_rejects_selection() {
        let mut grid = Grid::new(ListDataProvider::new((0u32..5).collect()), config());
        grid.set_selection_mode(SelectionMode::None);
        assert!(matches!(
            grid.select(1),
            Err(Error::UnsupportedOperation { .. })
        ));
    }

    #[test]
    fn test_mode_switch_clears_selection() {
        let mut grid = Grid::new(ListDataProvider::new((0u32..5).collect()), config());
        let events = recorded::<SelectionEvent<u32>>(|l| grid.add_selection_listener(l));
        grid.select(2).expect("select");
        grid.set_selection_mode(SelectionMode::Multi);
        assert!(grid.selected_items().is_empty());
        assert_eq!(events.lock().expect("lock")[1].removed, vec![2]);
    }

    #[test]
    fn test_removing_selected_item_deselects_once() {
        let provider = ListDataProvider::new((0u32..10).collect());
        let mut grid = Grid::new(provider.clone(), config());
        grid.set_selection_mode(SelectionMode::Multi);
        grid.update_selection(vec![3, 4], Vec::new()).expect("select");
        let events = recorded::<SelectionEvent<u32>>(|l| grid.add_selection_listener(l));

        provider.update(|items| items.retain(|n| *n != 3)).expect("update");
        grid.apply_change(DataChange::removed(3));

        let events = events.lock().expect("lock");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].removed, vec![3]);
        assert!(!events[0].from_client);
        assert_eq!(grid.selected_items(), vec![4]);
        assert_eq!(grid.row_count().expect("count"), 9);
    }

    #[test]
    fn test_removing_parent_deselects_its_subtree() {
        let mut data = TreeData::new();
        for root in [100u32, 200] {
            data.add_item(None, root).expect("root");
            for child in 1..=3 {
                data.add_item(Some(&root), root + child).expect("child");
            }
        }
        let provider = TreeDataProvider::new(data);
        let mut grid = Grid::new(provider.clone(), config());
        grid.set_selection_mode(SelectionMode::Multi);
        grid.update_selection(vec![101, 201], Vec::new()).expect("select");
        let events = recorded::<SelectionEvent<u32>>(|l| grid.add_selection_listener(l));

        provider
            .update(|data| data.remove_item(&100))
            .expect("lock")
            .expect("remove");
        grid.apply_change(DataChange::removed(100));

        let events = events.lock().expect("lock");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].removed, vec![101]);
        assert_eq!(grid.selected_items(), vec![201]);
    }

    #[test]
    fn test_removed_subtree_deselects_listed_descendants() {
        let provider = CallbackDataProvider::<u32>::fetch_only(|q| {
            Ok((0..10u32).skip(q.offset).take(q.limit).collect())
        });
        let mut grid = Grid::new(provider, config());
        grid.set_selection_mode(SelectionMode::Multi);
        grid.update_selection(vec![3, 7], Vec::new()).expect("select");
        let events = recorded::<SelectionEvent<u32>>(|l| grid.add_selection_listener(l));

        let change = DataChange::removed_subtree(vec![2, 3]).expect("change");
        grid.apply_change(change);

        let events = events.lock().expect("lock");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].removed, vec![3]);
        assert_eq!(grid.selected_items(), vec![7]);
        assert!(DataChange::<u32>::removed_subtree(Vec::new()).is_none());
    }

    #[test]
    fn test_sort_directions_reverse_each_other() {
        let mut grid = Grid::new(ListDataProvider::new(vec![5u32, 3, 9, 1, 7]), config());
        grid.add_column(Column::text("value", |n: &u32| n.to_string()).with_comparator(|a, b| a.cmp(b)))
            .expect("column");
        let sorts = recorded::<SortEvent>(|l| grid.add_sort_listener(l));

        grid.sort(vec![GridSortOrder::asc("value")]).expect("sort");
        let ascending = items(&mut grid, 0..5);
        grid.sort(vec![GridSortOrder::desc("value")]).expect("sort");
        let mut descending = items(&mut grid, 0..5);

        assert_eq!(ascending, vec![1, 3, 5, 7, 9]);
        descending.reverse();
        assert_eq!(ascending, descending);
        assert_eq!(sorts.lock().expect("lock").len(), 2);

        grid.sort(Vec::new()).expect("clear sort");
        assert_eq!(items(&mut grid, 0..5), vec![5, 3, 9, 1, 7]);
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Person {
        id: u32,
        team: &'static str,
    }

    impl GridItem for Person {
        type Id = u32;

        fn id(&self) -> u32 {
            self.id
        }
    }

    #[test]
    fn test_sort_is_stable_for_ties() {
        let people = vec![
            Person { id: 1, team: "b" },
            Person { id: 2, team: "a" },
            Person { id: 3, team: "b" },
            Person { id: 4, team: "a" },
        ];
        let mut grid = Grid::new(ListDataProvider::new(people), config());
        grid.add_column(Column::text("team", |p: &Person| p.team.to_string()))
            .expect("column");

        grid.sort(vec![GridSortOrder::asc("team")]).expect("sort");
        let ids: Vec<u32> = grid.rows(0..4).expect("rows").iter().map(|r| r.item.id).collect();
        assert_eq!(ids, vec![2, 4, 1, 3]);

        grid.sort(vec![GridSortOrder::desc("team")]).expect("sort");
        let ids: Vec<u32> = grid.rows(0..4).expect("rows").iter().map(|r| r.item.id).collect();
        assert_eq!(ids, vec![1, 3, 2, 4]);
    }

    #[test]
    fn test_sort_validation() {
        let mut grid = Grid::new(ListDataProvider::new((0u32..5).collect()), config());
        grid.add_column(Column::text("a", |n: &u32| n.to_string())).expect("column");
        grid.add_column(Column::text("b", |n: &u32| n.to_string()).with_sortable(false))
            .expect("column");
        let sorts = recorded::<SortEvent>(|l| grid.add_sort_listener(l));

        assert!(matches!(
            grid.sort(vec![GridSortOrder::asc("missing")]),
            Err(Error::InvalidState { .. })
        ));
        assert!(matches!(
            grid.sort(vec![GridSortOrder::asc("b")]),
            Err(Error::InvalidState { .. })
        ));

        grid.handle_call(ClientCall::SortersChanged {
            sorters: vec![GridSortOrder::asc("missing"), GridSortOrder::desc("a")],
        })
        .expect("client sort");
        assert_eq!(grid.sort_orders(), &[GridSortOrder::desc("a")]);
        let sorts = sorts.lock().expect("lock");
        assert_eq!(sorts.len(), 1);
        assert!(sorts[0].from_client);
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let mut grid = Grid::new(ListDataProvider::new(vec![1u32]), config());
        grid.add_column(Column::text("a", |n: &u32| n.to_string())).expect("column");
        assert!(matches!(
            grid.add_column(Column::text("a", |n: &u32| n.to_string())),
            Err(Error::InvalidState { .. })
        ));
        assert_eq!(grid.column_infos().len(), 1);
    }

    #[test]
    fn test_flush_renders_columns_decorators_and_selection() {
        let mut grid = Grid::new(ListDataProvider::new((0u32..3).collect()), config());
        grid.add_column(Column::text("label", |n: &u32| format!("#{n}"))).expect("column");
        grid.add_row_decorator("parity", |n: &u32| {
            let mut fields = RowFields::new();
            fields.insert("even".into(), serde_json::Value::from(n % 2 == 0));
            fields
        })
        .expect("decorator");
        grid.select(1).expect("select");
        grid.handle_call(ClientCall::SetRequestedRange { start: 0, length: 3 })
            .expect("range");

        let batch = grid.flush().expect("batch");
        assert!(matches!(batch.ops.last(), Some(UpdateOp::Confirm { .. })));
        let rows: Vec<_> = batch.rows().map(|(_, row)| row.clone()).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].fields["label"], "#1");
        assert_eq!(rows[1].fields["even"], false);
        assert!(rows[1].meta.selected);
        assert!(!rows[0].meta.selected);
        assert!(rows[0].meta.depth.is_none());
    }

    #[test]
    fn test_removing_sorted_column_clears_its_order() {
        let mut grid = Grid::new(ListDataProvider::new(vec![2u32, 1]), config());
        grid.add_column(Column::text("a", |n: &u32| n.to_string())).expect("column");
        grid.sort(vec![GridSortOrder::asc("a")]).expect("sort");
        assert_eq!(items(&mut grid, 0..2), vec![1, 2]);
        assert!(grid.remove_column("a"));
        assert!(grid.sort_orders().is_empty());
        assert_eq!(items(&mut grid, 0..2), vec![2, 1]);
    }

    #[test]
    fn test_empty_children_raise_collapse_event() {
        let provider = CallbackDataProvider::new(
            |q: &crate::data::Query<u32>| {
                Ok(match q.parent {
                    None => (0u32..3).skip(q.offset).take(q.limit).collect(),
                    Some(_) => Vec::new(),
                })
            },
            |q| Ok(if q.parent.is_none() { 3 } else { 0 }),
        )
        .with_children(|_| true);
        let mut grid = Grid::new(provider, config());
        let collapses = recorded::<CollapseEvent<u32>>(|l| grid.add_collapse_listener(l));
        grid.expand(&[1]).expect("expand");
        grid.flush();
        assert!(!grid.is_expanded(&1));
        let collapses = collapses.lock().expect("lock");
        assert_eq!(collapses.len(), 1);
        assert_eq!(collapses[0].items, vec![1]);
        assert!(!collapses[0].from_client);
    }

    #[test]
    fn test_new_provider_clears_selection_and_expansion() {
        let mut grid = tree_grid();
        grid.expand(&[100]).expect("expand");
        grid.select(100).expect("select");
        grid.set_data_provider(ListDataProvider::new(vec![1u32, 2]));
        assert!(grid.selected_items().is_empty());
        assert!(grid.expanded_items().is_empty());
        assert_eq!(grid.row_count().expect("count"), 2);
    }
}
