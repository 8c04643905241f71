//! HierarchyMapper
//!
//! Projects an expandable tree onto the flat row index space the client
//! scrolls through.
//!
//! The mapper keeps a skeleton of the expanded part of the tree: one
//! [`Subtree`] per placed expanded node, holding its child count, a sparse
//! cache of loaded children and the subtrees of its expanded children. Flat
//! positions are derived from child counts, so a subtree whose count is not
//! known yet is a hole. Every operation resolves the holes it touches before
//! answering, one provider call at a time.
//!
//! Expansion is tracked separately, by item id, and survives both collapsing
//! an ancestor and eviction of the subtree from the cache.

use super::DataSource;
use crate::config::{GridConfig, PreloadConfig};
use crate::constants::MAX_RESOLVE_PASSES;
use crate::data::GridItem;
use crate::error::{Error, Result};
use ahash::AHashSet;
use hashlink::LinkedHashMap;
use std::collections::BTreeMap;
use std::ops::Range;
use tracing::{debug, trace, warn};

/// Child row indices leading from the root to a subtree
type Path = Vec<usize>;

/// Expansion state of a node as seen by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Collapsed,
    /// Expanded, child count not fetched yet
    ExpandedPending,
    /// Expanded and counted
    ExpandedPopulated,
    /// Expanded, but not currently part of the cached skeleton
    ExpandedOutOfCache,
}

/// One resolved row
#[derive(Debug, Clone, PartialEq)]
pub struct FlatRow<T> {
    pub index: usize,
    pub item: T,
    pub depth: usize,
    pub expanded: bool,
    pub has_children: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ParentRef<Id> {
    Unknown,
    Root,
    Item(Id),
}

struct ExpandedEntry<T: GridItem> {
    item: T,
    parent: ParentRef<T::Id>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubtreeState {
    Pending,
    Populated,
    /// Dropped from the cache; only the total row count is remembered
    Evicted { flat_size: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RootSize {
    Exact,
    Estimated,
}

struct Subtree<T: GridItem> {
    /// `None` for the root level
    parent: Option<T>,
    /// Depth of this subtree's rows
    depth: usize,
    state: SubtreeState,
    size: usize,
    items: BTreeMap<usize, T>,
    children: BTreeMap<usize, Subtree<T>>,
}

/// A run of consecutive rows inside one subtree
struct Segment {
    path: Path,
    rel_start: usize,
    rel_end: usize,
    flat_start: usize,
}

fn prefixed(rel: usize, mut path: Path) -> Path {
    path.insert(0, rel);
    path
}

fn joined(prefix: &[usize], rest: Path) -> Path {
    let mut path = prefix.to_vec();
    path.extend(rest);
    path
}

fn unsettled() -> Error {
    Error::invalid_state("hierarchy did not settle, the provider keeps changing")
}

impl<T: GridItem> Subtree<T> {
    fn pending(parent: Option<T>, depth: usize) -> Self {
        Self {
            parent,
            depth,
            state: SubtreeState::Pending,
            size: 0,
            items: BTreeMap::new(),
            children: BTreeMap::new(),
        }
    }

    fn parent_ref(&self) -> ParentRef<T::Id> {
        match &self.parent {
            Some(parent) => ParentRef::Item(parent.id()),
            None => ParentRef::Root,
        }
    }

    fn is_populated(&self) -> bool {
        self.state == SubtreeState::Populated
    }

    fn at(&self, path: &[usize]) -> Option<&Self> {
        match path.split_first() {
            None => Some(self),
            Some((first, rest)) => self.children.get(first)?.at(rest),
        }
    }

    fn at_mut(&mut self, path: &[usize]) -> Option<&mut Self> {
        match path.split_first() {
            None => Some(self),
            Some((first, rest)) => self.children.get_mut(first)?.at_mut(rest),
        }
    }

    /// Rows shown by this subtree, or the relative path to the first hole
    fn flat_size(&self) -> Result<usize, Path> {
        match self.state {
            SubtreeState::Pending => Err(Path::new()),
            SubtreeState::Evicted { flat_size } => Ok(flat_size),
            SubtreeState::Populated => {
                let mut total = self.size;
                for (&rel, child) in &self.children {
                    total += child.flat_size().map_err(|hole| prefixed(rel, hole))?;
                }
                Ok(total)
            }
        }
    }

    /// Flat offset of child row `rel` from this subtree's first row
    fn offset_of(&self, rel: usize) -> Result<usize, Path> {
        let mut offset = rel;
        for (&idx, child) in self.children.range(..rel) {
            offset += child.flat_size().map_err(|hole| prefixed(idx, hole))?;
        }
        Ok(offset)
    }

    fn flat_position(&self, path: &[usize], rel: usize) -> Result<Option<usize>, Path> {
        let mut subtree = self;
        let mut position = 0;
        for (depth, &step) in path.iter().enumerate() {
            position += subtree
                .offset_of(step)
                .map_err(|hole| joined(&path[..depth], hole))?
                + 1;
            match subtree.children.get(&step) {
                Some(child) => subtree = child,
                None => return Ok(None),
            }
        }
        let offset = subtree.offset_of(rel).map_err(|hole| joined(path, hole))?;
        Ok(Some(position + offset))
    }

    /// Subtree path and row index of flat row `target`
    fn locate(&self, target: usize) -> Result<Option<(Path, usize)>, Path> {
        if !self.is_populated() {
            return Err(Path::new());
        }
        let mut flat = 0;
        let mut next_rel = 0;
        for (&rel, child) in &self.children {
            let plain = rel + 1 - next_rel;
            if target < flat + plain {
                return Ok(Some((Path::new(), next_rel + target - flat)));
            }
            flat += plain;
            let size = child.flat_size().map_err(|hole| prefixed(rel, hole))?;
            if target < flat + size {
                return match child.locate(target - flat) {
                    Ok(found) => Ok(found.map(|(path, found_rel)| (prefixed(rel, path), found_rel))),
                    Err(hole) => Err(prefixed(rel, hole)),
                };
            }
            flat += size;
            next_rel = rel + 1;
        }
        let rest = self.size - next_rel;
        Ok((target < flat + rest).then(|| (Path::new(), next_rel + target - flat)))
    }

    /// Split the flat range into per-subtree runs. Errors carry absolute paths.
    fn collect_segments(
        &self,
        base: usize,
        range: &Range<usize>,
        path: &mut Path,
        out: &mut Vec<Segment>,
    ) -> Result<(), Path> {
        if !self.is_populated() {
            return Err(path.clone());
        }
        let mut flat = base;
        let mut next_rel = 0;
        for (&rel, child) in &self.children {
            let plain = rel + 1 - next_rel;
            Self::push_plain(out, path, next_rel, flat, plain, range);
            flat += plain;
            let size = child
                .flat_size()
                .map_err(|hole| joined(path, prefixed(rel, hole)))?;
            if size > 0 && flat < range.end && flat + size > range.start {
                path.push(rel);
                child.collect_segments(flat, range, path, out)?;
                path.pop();
            }
            flat += size;
            next_rel = rel + 1;
            if flat >= range.end {
                return Ok(());
            }
        }
        Self::push_plain(out, path, next_rel, flat, self.size - next_rel, range);
        Ok(())
    }

    fn push_plain(
        out: &mut Vec<Segment>,
        path: &[usize],
        rel_from: usize,
        flat_from: usize,
        count: usize,
        range: &Range<usize>,
    ) {
        let start = flat_from.max(range.start);
        let end = (flat_from + count).min(range.end);
        if start < end {
            out.push(Segment {
                path: path.to_vec(),
                rel_start: rel_from + (start - flat_from),
                rel_end: rel_from + (end - flat_from),
                flat_start: start,
            });
        }
    }

    /// Path of the subtree owned by the item with `id`
    fn find_subtree(&self, id: &T::Id, path: &mut Path) -> bool {
        for (&rel, child) in &self.children {
            path.push(rel);
            if child.parent.as_ref().is_some_and(|parent| &parent.id() == id)
                || child.find_subtree(id, path)
            {
                return true;
            }
            path.pop();
        }
        false
    }

    /// Subtree path and row index of a loaded item
    fn find_loaded(&self, id: &T::Id, path: &mut Path) -> Option<usize> {
        if let Some((&rel, _)) = self.items.iter().find(|(_, item)| &item.id() == id) {
            return Some(rel);
        }
        for (&rel, child) in &self.children {
            path.push(rel);
            if let Some(found) = child.find_loaded(id, path) {
                return Some(found);
            }
            path.pop();
        }
        None
    }

    fn unplace(&self, placed: &mut AHashSet<T::Id>) {
        if let Some(parent) = &self.parent {
            placed.remove(&parent.id());
        }
        for child in self.children.values() {
            child.unplace(placed);
        }
    }

    /// Drop loaded rows and nested subtrees
    fn clear(&mut self, placed: &mut AHashSet<T::Id>) {
        for child in self.children.values() {
            child.unplace(placed);
        }
        self.children.clear();
        self.items.clear();
    }

    fn truncate(&mut self, size: usize, placed: &mut AHashSet<T::Id>) {
        self.size = size;
        self.items.split_off(&size);
        for child in self.children.split_off(&size).values() {
            child.unplace(placed);
        }
    }

    fn evict(&mut self, base: usize, window: &Range<usize>, placed: &mut AHashSet<T::Id>) {
        if !self.is_populated() {
            return;
        }
        // (row index, flat start of the child rows, flat size)
        let mut spans = Vec::with_capacity(self.children.len());
        let mut nested = 0;
        for (&rel, child) in &self.children {
            let Ok(size) = child.flat_size() else {
                return;
            };
            spans.push((rel, base + rel + nested + 1, size));
            nested += size;
        }

        let position = |rel: usize| {
            base + rel
                + spans
                    .iter()
                    .take_while(|(child, _, _)| *child < rel)
                    .map(|(_, _, size)| size)
                    .sum::<usize>()
        };
        self.items.retain(|rel, _| window.contains(&position(*rel)));

        for (rel, start, size) in spans {
            let Some(child) = self.children.get_mut(&rel) else {
                continue;
            };
            if start < window.end && start + size > window.start {
                child.evict(start, window, placed);
            } else if child.is_populated() {
                child.clear(placed);
                child.state = SubtreeState::Evicted { flat_size: size };
            }
        }
    }

    fn populated_paths(&self, path: &mut Path, out: &mut Vec<Path>) {
        if !self.is_populated() {
            return;
        }
        out.push(path.clone());
        for (&rel, child) in &self.children {
            path.push(rel);
            child.populated_paths(path, out);
            path.pop();
        }
    }

    fn item_count(&self) -> usize {
        self.items.len() + self.children.values().map(Subtree::item_count).sum::<usize>()
    }
}

fn missing_windows<T>(items: &BTreeMap<usize, T>, range: Range<usize>) -> Vec<Range<usize>> {
    let mut windows = Vec::new();
    let mut start = None;
    for rel in range.clone() {
        match (items.contains_key(&rel), start) {
            (false, None) => start = Some(rel),
            (true, Some(from)) => {
                windows.push(from..rel);
                start = None;
            }
            _ => {}
        }
    }
    if let Some(from) = start {
        windows.push(from..range.end);
    }
    windows
}

/// Flat view over a hierarchical (or flat) provider
pub struct HierarchyMapper<T: GridItem> {
    root: Subtree<T>,
    root_size: RootSize,
    expanded: LinkedHashMap<T::Id, ExpandedEntry<T>>,
    /// Expanded ids that currently own a subtree in the skeleton
    placed: AHashSet<T::Id>,
    preload: PreloadConfig,
    size_estimate: usize,
    size_estimate_increase: usize,
    auto_collapsed: Vec<T>,
}

impl<T: GridItem> HierarchyMapper<T> {
    pub fn new(config: &GridConfig) -> Self {
        Self {
            root: Subtree::pending(None, 0),
            root_size: RootSize::Exact,
            expanded: LinkedHashMap::new(),
            placed: AHashSet::new(),
            preload: config.preload.clone(),
            size_estimate: config.size_estimate,
            size_estimate_increase: config.size_estimate_increase,
            auto_collapsed: Vec::new(),
        }
    }

    /// Forget every cached count and row; expansion is kept
    pub fn reset(&mut self) {
        self.root = Subtree::pending(None, 0);
        self.root_size = RootSize::Exact;
        self.placed.clear();
    }

    /// Forget expansion as well, used when the provider is replaced
    pub fn clear_expanded(&mut self) {
        self.expanded.clear();
        self.reset();
    }

    pub fn apply_config(&mut self, config: &GridConfig) {
        self.preload = config.preload.clone();
        self.size_estimate = config.size_estimate;
        self.size_estimate_increase = config.size_estimate_increase;
    }

    // ==================== Getters ====================

    pub fn is_expanded(&self, item: &T) -> bool {
        self.expanded.contains_key(&item.id())
    }

    /// Expanded items, in expansion order
    pub fn expanded_items(&self) -> Vec<T> {
        self.expanded.values().map(|entry| entry.item.clone()).collect()
    }

    pub fn node_state(&self, item: &T) -> NodeState {
        let id = item.id();
        if !self.expanded.contains_key(&id) {
            return NodeState::Collapsed;
        }
        let mut path = Path::new();
        if !self.root.find_subtree(&id, &mut path) {
            return NodeState::ExpandedOutOfCache;
        }
        match self.root.at(&path).map(|subtree| subtree.state) {
            Some(SubtreeState::Pending) => NodeState::ExpandedPending,
            Some(SubtreeState::Populated) => NodeState::ExpandedPopulated,
            _ => NodeState::ExpandedOutOfCache,
        }
    }

    /// Whether `item` is cached somewhere below `ancestor`
    pub fn is_cached_descendant(&self, item: &T, ancestor: &T) -> bool {
        let mut path = Path::new();
        if !self.root.find_subtree(&ancestor.id(), &mut path) {
            return false;
        }
        self.root
            .at(&path)
            .is_some_and(|subtree| subtree.find_loaded(&item.id(), &mut Path::new()).is_some())
    }

    /// Whether the root row count is an assumption
    pub fn is_size_estimated(&self) -> bool {
        self.root_size == RootSize::Estimated
    }

    /// Items held in the cache, across all subtrees
    pub fn cached_item_count(&self) -> usize {
        self.root.item_count()
    }

    /// Items collapsed because they turned out to have no children
    pub fn take_auto_collapsed(&mut self) -> Vec<T> {
        std::mem::take(&mut self.auto_collapsed)
    }

    // ==================== Resolution ====================

    fn resolve<R>(
        &mut self,
        source: &DataSource<'_, T>,
        probe: impl Fn(&Subtree<T>) -> Result<R, Path>,
    ) -> Result<R> {
        for _ in 0..MAX_RESOLVE_PASSES {
            match probe(&self.root) {
                Ok(value) => return Ok(value),
                Err(hole) => self.fill(source, &hole)?,
            }
        }
        Err(unsettled())
    }

    /// Total flat row count
    pub fn row_count(&mut self, source: &DataSource<'_, T>) -> Result<usize> {
        self.resolve(source, |root| root.flat_size())
    }

    /// Parent and child index of a flat row; `None` past the end
    pub fn resolve_flat_index(
        &mut self,
        source: &DataSource<'_, T>,
        index: usize,
    ) -> Result<Option<(Option<T>, usize)>> {
        let found = self.resolve(source, |root| root.locate(index))?;
        Ok(found.map(|(path, rel)| {
            let parent = self.root.at(&path).and_then(|subtree| subtree.parent.clone());
            (parent, rel)
        }))
    }

    /// Flat row of a cached item
    pub fn flat_index_of(&mut self, source: &DataSource<'_, T>, item: &T) -> Result<Option<usize>> {
        let mut path = Path::new();
        let Some(rel) = self.root.find_loaded(&item.id(), &mut path) else {
            return Ok(None);
        };
        self.resolve(source, |root| root.flat_position(&path, rel))
    }

    /// Resolved rows for a flat range, clamped to the row count
    pub fn fetch_rows(
        &mut self,
        source: &DataSource<'_, T>,
        range: Range<usize>,
    ) -> Result<Vec<FlatRow<T>>> {
        for _ in 0..MAX_RESOLVE_PASSES {
            let total = match self.root.flat_size() {
                Ok(total) => total,
                Err(hole) => {
                    self.fill(source, &hole)?;
                    continue;
                }
            };
            let end = range.end.min(total);
            let start = range.start.min(end);
            if start == end {
                return Ok(Vec::new());
            }

            let mut segments = Vec::new();
            if let Err(hole) =
                self.root
                    .collect_segments(0, &(start..end), &mut Path::new(), &mut segments)
            {
                self.fill(source, &hole)?;
                continue;
            }

            let mut loaded = false;
            for segment in &segments {
                loaded |= self.load_segment(source, segment)?;
            }
            if !loaded {
                return Ok(self.build_rows(source, &segments));
            }
        }
        Err(unsettled())
    }

    /// Grow an assumed root size when `end + buffer` reaches past it
    ///
    /// The size grows by one increase per call, however far past the end the
    /// request lies; the client scrolls into the new rows and asks again.
    pub fn ensure_estimate(&mut self, end: usize, buffer: usize) -> bool {
        if self.root_size != RootSize::Estimated || !self.root.is_populated() {
            return false;
        }
        if end.saturating_add(buffer) <= self.root.size {
            return false;
        }
        let size = self.root.size.saturating_add(self.size_estimate_increase.max(1));
        debug!("Growing assumed row count {} -> {}", self.root.size, size);
        self.root.size = size;
        true
    }

    fn count_root(&mut self, source: &DataSource<'_, T>) -> Result<usize> {
        if let Some(size) = source.count(None)? {
            self.root_size = RootSize::Exact;
            return Ok(size);
        }
        if source.is_hierarchical() {
            self.root_size = RootSize::Exact;
            return source.count_exact(None);
        }
        debug!("Provider cannot count, assuming {} rows", self.size_estimate);
        self.root_size = RootSize::Estimated;
        Ok(self.size_estimate)
    }

    /// Count a pending (or evicted) subtree and place its expanded children
    fn fill(&mut self, source: &DataSource<'_, T>, path: &[usize]) -> Result<()> {
        let parent = {
            let Self { root, placed, .. } = self;
            let Some(subtree) = root.at_mut(path) else {
                return Ok(());
            };
            if subtree.is_populated() {
                return Ok(());
            }
            subtree.clear(placed);
            subtree.state = SubtreeState::Pending;
            subtree.parent.clone()
        };

        let size = match &parent {
            None => self.count_root(source)?,
            Some(item) => source.count_exact(Some(item))?,
        };
        if let Some(item) = &parent
            && size == 0
        {
            self.collapse_empty(path, item);
            return Ok(());
        }

        let parent_ref = {
            let Some(subtree) = self.root.at_mut(path) else {
                return Ok(());
            };
            subtree.size = size;
            subtree.state = SubtreeState::Populated;
            subtree.parent_ref()
        };
        trace!("Resolved subtree {:?} with {} children", path, size);

        let estimated = parent.is_none() && self.root_size == RootSize::Estimated;
        if !estimated && self.needs_scan(&parent_ref) {
            self.scan(source, path, size)?;
        }
        Ok(())
    }

    /// Whether an expanded item not yet placed may be a child of `parent`
    fn needs_scan(&self, parent: &ParentRef<T::Id>) -> bool {
        self.expanded.iter().any(|(id, entry)| {
            !self.placed.contains(id)
                && (entry.parent == ParentRef::Unknown || &entry.parent == parent)
        })
    }

    fn scan(&mut self, source: &DataSource<'_, T>, path: &[usize], size: usize) -> Result<()> {
        let parent = self.root.at(path).and_then(|subtree| subtree.parent.clone());
        trace!("Scanning children of {:?} for expanded items", parent.as_ref().map(GridItem::id));
        let mut offset = 0;
        while offset < size {
            let limit = source.page_size().min(size - offset);
            let page = source.fetch(parent.as_ref(), offset, limit)?;
            let fetched = page.len();
            self.absorb(source, path, offset, page);
            if fetched < limit {
                let end = self.short_page_end(source, path, offset, fetched)?;
                self.shrink(path, end);
                break;
            }
            offset += fetched;
        }
        Ok(())
    }

    /// Store fetched rows and place the expanded ones among them
    fn absorb(&mut self, source: &DataSource<'_, T>, path: &[usize], offset: usize, items: Vec<T>) -> bool {
        let Self {
            root,
            expanded,
            placed,
            ..
        } = self;
        let Some(subtree) = root.at_mut(path) else {
            return false;
        };
        let parent_ref = subtree.parent_ref();
        let depth = subtree.depth + 1;
        let mut placed_any = false;

        for (rel, item) in (offset..).zip(items) {
            if rel >= subtree.size {
                break;
            }
            let id = item.id();
            let stale = subtree
                .children
                .get(&rel)
                .and_then(|child| child.parent.as_ref())
                .is_some_and(|owner| owner.id() != id);
            if stale && let Some(child) = subtree.children.remove(&rel) {
                child.unplace(placed);
            }
            if let Some(entry) = expanded.get_mut(&id)
                && !placed.contains(&id)
                && source.has_children(&item)
            {
                entry.parent = parent_ref.clone();
                entry.item = item.clone();
                subtree
                    .children
                    .insert(rel, Subtree::pending(Some(item.clone()), depth));
                placed.insert(id);
                placed_any = true;
            }
            subtree.items.insert(rel, item);
        }
        placed_any
    }

    /// Row count of a subtree whose page at `offset` came back short
    ///
    /// An empty page past the first row only says the data ends somewhere
    /// before `offset`; the end is then searched between the last cached
    /// row and `offset`.
    fn short_page_end(
        &self,
        source: &DataSource<'_, T>,
        path: &[usize],
        offset: usize,
        fetched: usize,
    ) -> Result<usize> {
        if fetched > 0 || offset == 0 {
            return Ok(offset + fetched);
        }
        let Some(subtree) = self.root.at(path) else {
            return Ok(offset);
        };
        let parent = subtree.parent.clone();
        let mut low = subtree
            .items
            .range(..offset)
            .next_back()
            .map_or(0, |(rel, _)| rel + 1);
        let mut high = offset;
        while low < high {
            let mid = low + (high - low) / 2;
            if source.fetch(parent.as_ref(), mid, 1)?.is_empty() {
                high = mid;
            } else {
                low = mid + 1;
            }
        }
        debug!("Subtree {:?} ends at {}, before requested row {}", path, low, offset);
        Ok(low)
    }

    /// A subtree ended before its recorded size
    fn shrink(&mut self, path: &[usize], size: usize) {
        let parent = {
            let Self { root, placed, .. } = self;
            let Some(subtree) = root.at_mut(path) else {
                return;
            };
            if size >= subtree.size {
                return;
            }
            debug!("Subtree {:?} ended early: {} of {} rows", path, size, subtree.size);
            subtree.truncate(size, placed);
            subtree.parent.clone()
        };
        match parent {
            None => self.root_size = RootSize::Exact,
            Some(item) if size == 0 => self.collapse_empty(path, &item),
            Some(_) => {}
        }
    }

    fn collapse_empty(&mut self, path: &[usize], item: &T) {
        debug!("Expanded item {:?} has no children, collapsing", item.id());
        self.expanded.remove(&item.id());
        self.remove_subtree(path);
        self.auto_collapsed.push(item.clone());
    }

    fn remove_subtree(&mut self, path: &[usize]) {
        let Some((last, parent_path)) = path.split_last() else {
            return;
        };
        let Self { root, placed, .. } = self;
        if let Some(parent) = root.at_mut(parent_path)
            && let Some(removed) = parent.children.remove(last)
        {
            removed.unplace(placed);
        }
    }

    fn invalidate_at(&mut self, path: &[usize]) {
        let Self { root, placed, .. } = self;
        if let Some(subtree) = root.at_mut(path) {
            subtree.clear(placed);
            subtree.state = SubtreeState::Pending;
        }
    }

    fn load_segment(&mut self, source: &DataSource<'_, T>, segment: &Segment) -> Result<bool> {
        let (parent, missing) = match self.root.at(&segment.path) {
            Some(subtree) => (
                subtree.parent.clone(),
                missing_windows(&subtree.items, segment.rel_start..segment.rel_end),
            ),
            None => return Ok(false),
        };
        if missing.is_empty() {
            return Ok(false);
        }
        for window in missing {
            let limit = window.len();
            let page = source.fetch(parent.as_ref(), window.start, limit)?;
            let fetched = page.len();
            self.absorb(source, &segment.path, window.start, page);
            if fetched < limit {
                let end = self.short_page_end(source, &segment.path, window.start, fetched)?;
                self.shrink(&segment.path, end);
                break;
            }
        }
        Ok(true)
    }

    fn build_rows(&self, source: &DataSource<'_, T>, segments: &[Segment]) -> Vec<FlatRow<T>> {
        let mut rows = Vec::new();
        for segment in segments {
            let Some(subtree) = self.root.at(&segment.path) else {
                continue;
            };
            for (offset, rel) in (segment.rel_start..segment.rel_end).enumerate() {
                if let Some(item) = subtree.items.get(&rel) {
                    rows.push(FlatRow {
                        index: segment.flat_start + offset,
                        item: item.clone(),
                        depth: subtree.depth,
                        expanded: subtree.children.contains_key(&rel),
                        has_children: source.has_children(item),
                    });
                }
            }
        }
        rows
    }

    // ==================== Expansion ====================

    /// Expand an item. Returns whether anything changed.
    ///
    /// With a viewport, an item close to it gets its first children loaded
    /// right away when preloading is enabled.
    pub fn expand(
        &mut self,
        source: &DataSource<'_, T>,
        item: &T,
        viewport: Option<Range<usize>>,
    ) -> Result<bool> {
        self.expand_under(source, item, ParentRef::Unknown, viewport)
    }

    fn expand_under(
        &mut self,
        source: &DataSource<'_, T>,
        item: &T,
        hint: ParentRef<T::Id>,
        viewport: Option<Range<usize>>,
    ) -> Result<bool> {
        let id = item.id();
        if self.expanded.contains_key(&id) {
            return Ok(false);
        }
        if !source.has_children(item) {
            debug!("Item {:?} has no children, not expanding", id);
            return Ok(false);
        }

        let mut path = Path::new();
        let loaded = self.root.find_loaded(&id, &mut path);
        let parent = match loaded {
            Some(_) => self
                .root
                .at(&path)
                .map_or(hint, |subtree| subtree.parent_ref()),
            None => hint,
        };
        self.expanded.insert(
            id.clone(),
            ExpandedEntry {
                item: item.clone(),
                parent,
            },
        );

        let Some(rel) = loaded else {
            if let Err(err) = self.place_unloaded(source, &id) {
                warn!("Could not locate expanded item {:?}: {}", id, err);
            }
            return Ok(true);
        };
        {
            let Self { root, placed, .. } = self;
            if let Some(subtree) = root.at_mut(&path) {
                let depth = subtree.depth + 1;
                if let Some(stale) = subtree
                    .children
                    .insert(rel, Subtree::pending(Some(item.clone()), depth))
                {
                    stale.unplace(placed);
                }
                placed.insert(id);
            }
        }
        if let Some(viewport) = viewport
            && let Err(err) = self.preload(source, &path, rel, viewport)
        {
            warn!("Preloading children of {:?} failed: {}", item.id(), err);
        }
        Ok(true)
    }

    /// Look for a newly expanded, uncached item among the children of
    /// subtrees that are already counted. Pending subtrees scan on their own.
    fn place_unloaded(&mut self, source: &DataSource<'_, T>, id: &T::Id) -> Result<()> {
        let Some(hint) = self.expanded.get(id).map(|entry| entry.parent.clone()) else {
            return Ok(());
        };
        let mut candidates = Vec::new();
        self.root.populated_paths(&mut Path::new(), &mut candidates);
        for path in candidates {
            let Some(subtree) = self.root.at(&path) else {
                continue;
            };
            if hint != ParentRef::Unknown && subtree.parent_ref() != hint {
                continue;
            }
            if subtree.parent.is_none() && self.root_size == RootSize::Estimated {
                continue;
            }
            let size = subtree.size;
            self.scan(source, &path, size)?;
            if self.placed.contains(id) {
                break;
            }
        }
        Ok(())
    }

    fn preload(
        &mut self,
        source: &DataSource<'_, T>,
        path: &[usize],
        rel: usize,
        viewport: Range<usize>,
    ) -> Result<()> {
        if !self.preload.enabled || self.preload.max_rows == 0 {
            return Ok(());
        }
        let Some(row) = self.resolve(source, |root| root.flat_position(path, rel))? else {
            return Ok(());
        };
        let buffer = source.page_size();
        if row + buffer < viewport.start || row >= viewport.end + buffer {
            return Ok(());
        }
        let rows = self.preload.max_rows.min(viewport.len().max(1));
        trace!("Preloading {} children below row {}", rows, row);
        self.fetch_rows(source, row + 1..row + 1 + rows)?;
        Ok(())
    }

    /// Collapse an item. Returns whether it was expanded.
    ///
    /// Expansion of its descendants is remembered.
    pub fn collapse(&mut self, item: &T) -> bool {
        let id = item.id();
        if self.expanded.remove(&id).is_none() {
            return false;
        }
        let mut path = Path::new();
        if self.root.find_subtree(&id, &mut path) {
            self.remove_subtree(&path);
        }
        self.placed.remove(&id);
        true
    }

    /// Expand items and their descendants down to `depth` levels below them.
    /// Returns the items that changed state.
    pub fn expand_recursively(
        &mut self,
        source: &DataSource<'_, T>,
        items: &[T],
        depth: usize,
    ) -> Result<Vec<T>> {
        let mut changed = Vec::new();
        self.walk_recursively(source, items, depth, |mapper, item, parent| {
            if mapper.expand_under(source, item, parent, None)? {
                changed.push(item.clone());
            }
            Ok(())
        })?;
        Ok(changed)
    }

    /// Collapse items and their descendants down to `depth` levels below them
    pub fn collapse_recursively(
        &mut self,
        source: &DataSource<'_, T>,
        items: &[T],
        depth: usize,
    ) -> Result<Vec<T>> {
        let mut changed = Vec::new();
        self.walk_recursively(source, items, depth, |mapper, item, _| {
            if mapper.collapse(item) {
                changed.push(item.clone());
            }
            Ok(())
        })?;
        Ok(changed)
    }

    fn walk_recursively(
        &mut self,
        source: &DataSource<'_, T>,
        items: &[T],
        depth: usize,
        mut visit: impl FnMut(&mut Self, &T, ParentRef<T::Id>) -> Result<()>,
    ) -> Result<()> {
        let mut visited = AHashSet::new();
        let mut stack: Vec<(T, ParentRef<T::Id>, usize)> = items
            .iter()
            .rev()
            .map(|item| (item.clone(), ParentRef::Unknown, depth))
            .collect();
        while let Some((item, parent, remaining)) = stack.pop() {
            if !visited.insert(item.id()) {
                continue;
            }
            visit(self, &item, parent)?;
            if remaining > 0 && source.has_children(&item) {
                let parent = ParentRef::Item(item.id());
                for child in source.fetch_all(Some(&item))?.into_iter().rev() {
                    stack.push((child, parent.clone(), remaining - 1));
                }
            }
        }
        Ok(())
    }

    // ==================== Data changes ====================

    /// Replace cached copies of an item
    pub fn refresh_item(&mut self, item: &T) {
        let id = item.id();
        let mut path = Path::new();
        if let Some(rel) = self.root.find_loaded(&id, &mut path)
            && let Some(subtree) = self.root.at_mut(&path)
        {
            subtree.items.insert(rel, item.clone());
        }
        let mut path = Path::new();
        if self.root.find_subtree(&id, &mut path)
            && let Some(subtree) = self.root.at_mut(&path)
        {
            subtree.parent = Some(item.clone());
        }
        if let Some(entry) = self.expanded.get_mut(&id) {
            entry.item = item.clone();
        }
    }

    /// Forget the cached children of an item. Returns whether it had any.
    pub fn invalidate_children(&mut self, item: &T) -> bool {
        let mut path = Path::new();
        if !self.root.find_subtree(&item.id(), &mut path) {
            return false;
        }
        self.invalidate_at(&path);
        true
    }

    /// Account for an item removed from the data
    ///
    /// The parent's children are recounted. When the parent is not known the
    /// whole skeleton is dropped, keeping expansion.
    pub fn remove_item(&mut self, item: &T) {
        let id = item.id();
        self.forget_expanded(&id);

        let mut path = Path::new();
        let parent_path = if self.root.find_loaded(&id, &mut path).is_some() {
            Some(path)
        } else {
            let mut path = Path::new();
            self.root.find_subtree(&id, &mut path).then(|| {
                path.pop();
                path
            })
        };
        match parent_path {
            Some(path) => self.invalidate_at(&path),
            None => {
                debug!("Removed item {:?} is not cached, resetting hierarchy", id);
                self.reset();
            }
        }
    }

    /// Drop expansion of an item and of its known expanded descendants
    fn forget_expanded(&mut self, id: &T::Id) {
        let mut doomed = vec![id.clone()];
        while let Some(next) = doomed.pop() {
            self.expanded.remove(&next);
            self.placed.remove(&next);
            let owner = ParentRef::Item(next);
            doomed.extend(
                self.expanded
                    .iter()
                    .filter(|(_, entry)| entry.parent == owner)
                    .map(|(id, _)| id.clone()),
            );
        }
    }

    /// Drop rows and nested subtrees outside `window`, keeping row counts
    pub fn evict_outside(&mut self, window: Range<usize>) {
        let Self { root, placed, .. } = self;
        root.evict(0, &window, placed);
    }
}
