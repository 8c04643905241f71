//! DataCommunicator
//!
//! One grid's view of its provider. It owns the key mapping, the
//! hierarchy mapping, the range the client asked for and the rows the client
//! currently holds, and turns accumulated changes into one ordered
//! [`UpdateBatch`] per flush.
//!
//! Keys that leave the client's window are only released once the client
//! confirms the batch that dropped them, so calls carrying those keys in the
//! meantime still resolve.

use super::{
    DataSource, FlatRow, HierarchyMapper, KeyMapper, NodeState, RowData, RowDecorator,
    UpdateBatch, UpdateOp,
};
use crate::config::GridConfig;
use crate::data::{
    Comparator, DataChange, DataProvider, Filter, GridItem, Query, QuerySortOrder,
};
use crate::error::Result;
use ahash::AHashSet;
use std::collections::BTreeMap;
use std::ops::Range;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ResetKind {
    /// Positions changed (sorting, filtering); keys stay valid
    Structure,
    /// Everything changed; keys are dropped too
    Full,
}

/// Rows fetched for one requested range, not yet turned into client updates
#[derive(Debug)]
pub struct FetchedPage<T> {
    generation: u64,
    range: Range<usize>,
    size: usize,
    rows: Vec<FlatRow<T>>,
    refreshed: Vec<FlatRow<T>>,
    structural: bool,
}

impl<T> FetchedPage<T> {
    /// Range generation the page was fetched for
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn range(&self) -> &Range<usize> {
        &self.range
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn rows(&self) -> &[FlatRow<T>] {
        &self.rows
    }
}

/// Server side of one grid's data protocol
pub struct DataCommunicator<T: GridItem> {
    provider: Box<dyn DataProvider<T>>,
    config: GridConfig,
    keys: KeyMapper<T>,
    mapper: HierarchyMapper<T>,

    filter: Option<Filter<T>>,
    comparator: Option<Comparator<T>>,
    sort_orders: Vec<QuerySortOrder>,

    requested: Range<usize>,
    generation: u64,

    pending_reset: Option<ResetKind>,
    resend: bool,
    refreshed: AHashSet<T::Id>,

    /// Rows the client holds: flat index -> key
    active: BTreeMap<usize, String>,
    sent_size: Option<usize>,

    next_update_id: u64,
    last_confirmed: u64,
    /// Keys released by each unconfirmed update
    released: BTreeMap<u64, Vec<String>>,
}

impl<T: GridItem> DataCommunicator<T> {
    pub fn new(provider: impl DataProvider<T> + 'static, config: GridConfig) -> Self {
        let config = config.normalized();
        Self {
            provider: Box::new(provider),
            mapper: HierarchyMapper::new(&config),
            config,
            keys: KeyMapper::new(),
            filter: None,
            comparator: None,
            sort_orders: Vec::new(),
            requested: 0..0,
            generation: 0,
            pending_reset: None,
            resend: true,
            refreshed: AHashSet::new(),
            active: BTreeMap::new(),
            sent_size: None,
            next_update_id: 1,
            last_confirmed: 0,
            released: BTreeMap::new(),
        }
    }

    fn base_query(&self) -> Query<T> {
        let comparator = if self.provider.is_in_memory() {
            self.comparator.clone()
        } else {
            None
        };
        Query::all()
            .with_filter(self.filter.clone())
            .with_sorting(self.sort_orders.clone(), comparator)
    }

    fn with_source<R>(
        &mut self,
        f: impl FnOnce(&mut HierarchyMapper<T>, &DataSource<'_, T>) -> R,
    ) -> R {
        let base = self.base_query();
        let source = DataSource::new(self.provider.as_ref(), &base, self.config.page_size);
        f(&mut self.mapper, &source)
    }

    fn request_reset(&mut self, kind: ResetKind) {
        self.pending_reset = self.pending_reset.max(Some(kind));
    }

    // ==================== Getters ====================

    pub fn provider(&self) -> &dyn DataProvider<T> {
        self.provider.as_ref()
    }

    pub fn is_hierarchical(&self) -> bool {
        self.provider.is_hierarchical()
    }

    pub fn is_in_memory(&self) -> bool {
        self.provider.is_in_memory()
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    pub fn requested_range(&self) -> Range<usize> {
        self.requested.clone()
    }

    /// Bumped on every requested range change
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn key_mapper(&self) -> &KeyMapper<T> {
        &self.keys
    }

    /// Item behind a client key
    pub fn item_for_key(&self, key: &str) -> Result<T> {
        self.keys.get(key).cloned()
    }

    /// Keys of the rows the client currently holds, in row order
    pub fn active_keys(&self) -> impl Iterator<Item = &str> {
        self.active.values().map(String::as_str)
    }

    /// Id of the most recently issued update, 0 before the first
    pub fn last_update_id(&self) -> u64 {
        self.next_update_id - 1
    }

    pub fn last_confirmed_update(&self) -> u64 {
        self.last_confirmed
    }

    /// Whether an item can be part of the data: either mapped or not denied
    /// by the provider
    pub fn is_known(&self, item: &T) -> bool {
        self.keys.has(item) || self.provider.contains(item) != Some(false)
    }

    // ==================== Setters ====================

    /// Replace the provider; keys and expansion start over
    pub fn set_data_provider(&mut self, provider: impl DataProvider<T> + 'static) {
        self.provider = Box::new(provider);
        self.mapper.clear_expanded();
        self.keys.remove_all();
        self.request_reset(ResetKind::Full);
        debug!("Data provider replaced");
    }

    /// Apply new paging settings; a page size change resets the cache
    pub fn set_config(&mut self, config: GridConfig) {
        let config = config.normalized();
        if config.page_size != self.config.page_size {
            self.request_reset(ResetKind::Full);
        }
        self.mapper.apply_config(&config);
        self.config = config;
    }

    pub fn set_page_size(&mut self, page_size: usize) {
        let config = GridConfig {
            page_size,
            ..self.config.clone()
        };
        self.set_config(config);
    }

    /// The client's visible range
    pub fn set_requested_range(&mut self, start: usize, length: usize) {
        let range = start..start.saturating_add(length);
        if range == self.requested {
            return;
        }
        trace!("Requested range {:?} -> {:?}", self.requested, range);
        self.requested = range;
        self.generation += 1;
    }

    pub fn set_filter(&mut self, filter: Option<Filter<T>>) {
        self.filter = filter;
        self.request_reset(ResetKind::Structure);
    }

    /// Comparator used when the provider sorts in memory
    pub fn set_in_memory_sorting(&mut self, comparator: Option<Comparator<T>>) {
        self.comparator = comparator;
        self.request_reset(ResetKind::Structure);
    }

    /// Sort orders forwarded to providers that sort themselves
    pub fn set_back_end_sorting(&mut self, sort_orders: Vec<QuerySortOrder>) {
        self.sort_orders = sort_orders;
        self.request_reset(ResetKind::Structure);
    }

    pub fn sort_orders(&self) -> &[QuerySortOrder] {
        &self.sort_orders
    }

    // ==================== Data changes ====================

    /// Drop all cached data and key mappings; everything is resent
    pub fn reset(&mut self) {
        self.request_reset(ResetKind::Full);
    }

    /// Resend the whole window without touching the cache, e.g. after the
    /// client lost its state
    pub fn request_resend(&mut self) {
        self.resend = true;
        self.sent_size = None;
    }

    /// Regenerate an item's row
    pub fn refresh(&mut self, item: &T) {
        self.mapper.refresh_item(item);
        self.keys.refresh(item);
        self.refreshed.insert(item.id());
    }

    /// Regenerate every row the client holds, e.g. after a decorator change
    pub fn refresh_visible(&mut self) {
        let ids: Vec<T::Id> = self
            .active
            .values()
            .filter_map(|key| self.keys.get(key).ok())
            .map(GridItem::id)
            .collect();
        self.refreshed.extend(ids);
    }

    pub fn apply_change(&mut self, change: DataChange<T>) {
        match change {
            DataChange::RefreshAll => self.reset(),
            DataChange::Refresh {
                item,
                with_children,
            } => {
                self.refresh(&item);
                if with_children && self.mapper.invalidate_children(&item) {
                    self.resend = true;
                }
            }
            DataChange::Removed { item, descendants } => {
                self.mapper.remove_item(&item);
                for removed in std::iter::once(&item).chain(&descendants) {
                    self.keys.remove(removed);
                    self.refreshed.remove(&removed.id());
                }
                self.resend = true;
            }
        }
    }

    // ==================== Hierarchy ====================

    /// Expand an item; preloads its first children when it is near the viewport
    pub fn expand(&mut self, item: &T) -> Result<bool> {
        let viewport = self.requested.clone();
        let changed = self.with_source(|mapper, source| mapper.expand(source, item, Some(viewport)))?;
        if changed {
            self.resend = true;
        }
        Ok(changed)
    }

    pub fn collapse(&mut self, item: &T) -> bool {
        let changed = self.mapper.collapse(item);
        if changed {
            self.resend = true;
        }
        changed
    }

    pub fn expand_recursively(&mut self, items: &[T], depth: usize) -> Result<Vec<T>> {
        let changed =
            self.with_source(|mapper, source| mapper.expand_recursively(source, items, depth))?;
        if !changed.is_empty() {
            self.resend = true;
        }
        Ok(changed)
    }

    pub fn collapse_recursively(&mut self, items: &[T], depth: usize) -> Result<Vec<T>> {
        let changed =
            self.with_source(|mapper, source| mapper.collapse_recursively(source, items, depth))?;
        if !changed.is_empty() {
            self.resend = true;
        }
        Ok(changed)
    }

    pub fn is_expanded(&self, item: &T) -> bool {
        self.mapper.is_expanded(item)
    }

    pub fn node_state(&self, item: &T) -> NodeState {
        self.mapper.node_state(item)
    }

    pub fn expanded_items(&self) -> Vec<T> {
        self.mapper.expanded_items()
    }

    /// Whether `item` is cached somewhere below `ancestor`
    pub fn is_cached_descendant(&self, item: &T, ancestor: &T) -> bool {
        self.mapper.is_cached_descendant(item, ancestor)
    }

    /// Items collapsed because they turned out to have no children
    pub fn take_auto_collapsed(&mut self) -> Vec<T> {
        self.mapper.take_auto_collapsed()
    }

    // ==================== Fetching ====================

    fn apply_pending_reset(&mut self) {
        if let Some(kind) = self.pending_reset.take() {
            debug!("Resetting data communicator ({:?})", kind);
            self.mapper.reset();
            if kind == ResetKind::Full {
                self.keys.remove_all();
            }
            self.resend = true;
        }
    }

    /// Total row count
    pub fn size(&mut self) -> Result<usize> {
        self.apply_pending_reset();
        self.with_source(|mapper, source| mapper.row_count(source))
    }

    /// Resolved rows of a flat range
    pub fn fetch_rows(&mut self, range: Range<usize>) -> Result<Vec<FlatRow<T>>> {
        self.apply_pending_reset();
        self.with_source(|mapper, source| mapper.fetch_rows(source, range))
    }

    /// Flat row of an item, when it is cached
    pub fn flat_index_of(&mut self, item: &T) -> Result<Option<usize>> {
        self.apply_pending_reset();
        self.with_source(|mapper, source| mapper.flat_index_of(source, item))
    }

    /// Every item of the data set, filtered and sorted, depth first
    pub fn fetch_all_items(&self) -> Result<Vec<T>> {
        let base = self.base_query();
        DataSource::new(self.provider.as_ref(), &base, self.config.page_size).fetch_all_recursive()
    }

    /// Fetch the rows for the current requested range
    pub fn fetch_page(&mut self) -> Result<FetchedPage<T>> {
        self.apply_pending_reset();

        let structural = self.resend;
        let requested = self.requested.clone();
        let generation = self.generation;
        let page_size = self.config.page_size;

        // rows the client holds outside the requested range that need regenerating
        let mut stale: Vec<usize> = Vec::new();
        if !structural && !self.refreshed.is_empty() {
            let keys: AHashSet<&str> = self
                .refreshed
                .iter()
                .filter_map(|id| self.keys.key_of_id(id))
                .collect();
            stale = self
                .active
                .iter()
                .filter(|(index, key)| !requested.contains(*index) && keys.contains(key.as_str()))
                .map(|(index, _)| *index)
                .collect();
        }

        self.with_source(|mapper, source| {
            mapper.row_count(source)?;
            mapper.ensure_estimate(requested.end, page_size);
            let rows = mapper.fetch_rows(source, requested.clone())?;
            let mut refreshed = Vec::new();
            for index in stale {
                refreshed.extend(mapper.fetch_rows(source, index..index + 1)?);
            }
            let size = mapper.row_count(source)?;
            Ok(FetchedPage {
                generation,
                range: requested,
                size,
                rows,
                refreshed,
                structural,
            })
        })
    }

    /// Turn a fetched page into client updates
    ///
    /// A page fetched for an older requested range is discarded.
    pub fn apply_page(
        &mut self,
        page: FetchedPage<T>,
        decorator: &dyn RowDecorator<T>,
    ) -> Option<UpdateBatch> {
        if page.generation != self.generation {
            debug!(
                "Discarding rows for stale range {:?} (generation {} < {})",
                page.range, page.generation, self.generation
            );
            return None;
        }
        if self.pending_reset.is_some() || page.structural != self.resend {
            debug!("Discarding rows fetched before a structural change");
            return None;
        }

        let hierarchical = self.provider.is_hierarchical();
        let page_size = self.config.page_size;
        let mut ops = Vec::new();
        let mut released = Vec::new();

        if page.structural {
            if let Some(old) = self.sent_size
                && old > 0
                && !self.active.is_empty()
            {
                ops.push(UpdateOp::Clear {
                    start: 0,
                    length: old,
                });
            }
            released.extend(std::mem::take(&mut self.active).into_values());
        }
        if page.structural || self.sent_size != Some(page.size) {
            ops.push(UpdateOp::Size { size: page.size });
        }

        let window = page.range.start.saturating_sub(page_size)
            ..page.range.end.saturating_add(page_size).min(page.size);

        // rows leaving the window
        let leaving: Vec<usize> = self
            .active
            .keys()
            .copied()
            .filter(|index| !window.contains(index))
            .collect();
        for run in runs(&leaving) {
            ops.push(UpdateOp::Clear {
                start: run.start,
                length: run.len(),
            });
        }
        for index in leaving {
            if let Some(key) = self.active.remove(&index) {
                released.push(key);
            }
        }

        // rows to (re)send
        let mut outgoing: BTreeMap<usize, RowData> = BTreeMap::new();
        for row in page.rows.iter().chain(page.refreshed.iter()) {
            let current = self.active.get(&row.index);
            let needed = match current {
                None => true,
                Some(key) => {
                    self.refreshed.contains(&row.item.id())
                        || self.keys.key_of(&row.item) != Some(key.as_str())
                }
            };
            if !needed {
                continue;
            }
            let data = self.row_data(row, decorator, hierarchical);
            if let Some(old) = self.active.insert(row.index, data.key.clone())
                && old != data.key
            {
                released.push(old);
            }
            outgoing.insert(row.index, data);
        }
        let indices: Vec<usize> = outgoing.keys().copied().collect();
        for run in runs(&indices) {
            let rows = run.clone().filter_map(|index| outgoing.remove(&index)).collect();
            ops.push(UpdateOp::Set {
                start: run.start,
                rows,
            });
        }

        self.refreshed.clear();
        self.resend = false;
        self.sent_size = Some(page.size);
        self.mapper.evict_outside(window);

        if ops.is_empty() {
            return None;
        }

        let update_id = self.next_update_id;
        self.next_update_id += 1;
        ops.push(UpdateOp::Confirm { update_id });

        let still_active: AHashSet<&str> = self.active.values().map(String::as_str).collect();
        released.retain(|key| !still_active.contains(key.as_str()));
        if !released.is_empty() {
            self.released.insert(update_id, released);
        }
        trace!("Update {} with {} ops", update_id, ops.len());
        Some(UpdateBatch { update_id, ops })
    }

    /// Fetch and apply in one go; fetch failures are logged and leave the
    /// client's rows untouched
    pub fn flush(&mut self, decorator: &dyn RowDecorator<T>) -> Option<UpdateBatch> {
        match self.fetch_page() {
            Ok(page) => self.apply_page(page, decorator),
            Err(err) => {
                warn!("Fetching rows {:?} failed: {}", self.requested, err);
                None
            }
        }
    }

    fn row_data(
        &mut self,
        row: &FlatRow<T>,
        decorator: &dyn RowDecorator<T>,
        hierarchical: bool,
    ) -> RowData {
        let mut data = RowData::new(self.keys.key(&row.item));
        if hierarchical {
            data.meta.depth = Some(row.depth);
            data.meta.expanded = Some(row.expanded);
            data.meta.has_children = Some(row.has_children);
        }
        decorator.decorate(&row.item, &mut data);
        data
    }

    /// Client acknowledged an update; keys it released are dropped.
    ///
    /// Unknown and duplicate confirmations are ignored.
    pub fn confirm_update(&mut self, update_id: u64) -> bool {
        if update_id > self.last_update_id() {
            warn!("Ignoring confirmation of unknown update {}", update_id);
            return false;
        }
        if update_id <= self.last_confirmed {
            debug!("Ignoring repeated confirmation of update {}", update_id);
            return false;
        }
        let later = self.released.split_off(&(update_id + 1));
        let confirmed = std::mem::replace(&mut self.released, later);
        let active: AHashSet<&str> = self.active.values().map(String::as_str).collect();
        for key in confirmed.into_values().flatten() {
            if !active.contains(key.as_str()) {
                self.keys.remove_key(&key);
            }
        }
        self.last_confirmed = update_id;
        true
    }
}

/// Consecutive runs in a sorted index list
fn runs(indices: &[usize]) -> Vec<Range<usize>> {
    let mut result: Vec<Range<usize>> = Vec::new();
    for &index in indices {
        match result.last_mut() {
            Some(run) if run.end == index => run.end += 1,
            _ => result.push(index..index + 1),
        }
    }
    result
}
