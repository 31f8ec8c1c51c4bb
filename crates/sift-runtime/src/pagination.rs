#![forbid(unsafe_code)]

//! Page loading and caching.
//!
//! [`PaginationManager`] owns three caches: page number → ordered ids, id →
//! item payload, and the set of pages whose payloads are present. Only
//! [`load_page`](PaginationManager::load_page) changes what is on screen;
//! [`load_page_quietly`](PaginationManager::load_page_quietly) fills caches in
//! the background for select-all and item lookups.
//!
//! # Invariants
//!
//! 1. A page in `loaded_pages` has every one of its ids in the item map.
//! 2. Every invalidation bumps the cache generation; a fetch that started
//!    under an older generation never writes into the caches.
//! 3. No `RefCell` borrow is held across a fetch or while events go out.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use futures::future::join_all;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use sift_core::{
    DataSource, EngineError, EngineEvent, EventBus, Filters, Item, ItemId, PageQuery,
    PageResponse, PaginationConfig, SortOrder,
};
use tracing::{debug, info, warn};

use crate::resilience::{ErrorContext, ResilienceController};
use crate::selection::SelectionTracker;

/// Options for [`PaginationManager::load_page`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Load even if another load is in flight, and refetch even if cached.
    pub force: bool,
}

impl LoadOptions {
    pub const FORCE: Self = Self { force: true };
}

/// Position summary for a pager UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageInfo {
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
    pub page_size: usize,
    /// 1-based index of the first item on the page (0 when empty).
    pub from: usize,
    /// 1-based index of the last item on the page, never above `total_items`.
    pub to: usize,
    pub has_previous: bool,
    pub has_next: bool,
}

/// What [`PaginationManager::select_all_pages`] did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectAllReport {
    pub total_pages: usize,
    /// Pages fetched by this call.
    pub fetched_pages: usize,
    pub failed_pages: Vec<usize>,
    /// Pages not fetched because the engine is in fallback mode.
    pub skipped_pages: Vec<usize>,
    pub newly_selected: usize,
    pub selected_count: usize,
    /// The caches were invalidated mid-flight; nothing was selected.
    pub cancelled: bool,
}

struct PageState<T> {
    current_page: usize,
    page_size: usize,
    total_items: usize,
    total_pages: usize,
    sort_by: Option<String>,
    sort_order: SortOrder,
    filters: Filters,
    loaded_pages: BTreeSet<usize>,
    page_ids: BTreeMap<usize, Vec<ItemId>>,
    items: FxHashMap<ItemId, T>,
    visible: Vec<T>,
    /// Ticket of the visible load in flight.
    in_flight: Option<u64>,
    next_ticket: u64,
    generation: u64,
    loading_progress: f64,
}

impl<T: Item> PageState<T> {
    fn new(page_size: usize) -> Self {
        Self {
            current_page: 1,
            page_size,
            total_items: 0,
            total_pages: 0,
            sort_by: None,
            sort_order: SortOrder::default(),
            filters: Filters::new(),
            loaded_pages: BTreeSet::new(),
            page_ids: BTreeMap::new(),
            items: FxHashMap::default(),
            visible: Vec::new(),
            in_flight: None,
            next_ticket: 0,
            generation: 0,
            loading_progress: 0.0,
        }
    }

    fn query(&self, page: usize) -> PageQuery {
        PageQuery {
            page,
            page_size: self.page_size,
            sort_by: self.sort_by.clone(),
            sort_order: self.sort_order,
            filters: self.filters.clone(),
        }
    }

    fn invalidate(&mut self) {
        self.generation += 1;
        self.loaded_pages.clear();
        self.page_ids.clear();
        self.items.clear();
        self.total_items = 0;
        self.total_pages = 0;
        self.loading_progress = 0.0;
    }

    fn store_page(&mut self, page: usize, response: PageResponse<T>) -> Vec<ItemId> {
        let ids: Vec<ItemId> = response.data.iter().map(Item::id).collect();
        for item in response.data {
            self.items.insert(item.id(), item);
        }
        self.page_ids.insert(page, ids.clone());
        self.loaded_pages.insert(page);
        self.total_items = response.total;
        self.total_pages = response.total.div_ceil(self.page_size.max(1));
        ids
    }

    /// Items of a loaded page, in page order.
    fn page_items(&self, page: usize) -> Option<Vec<T>> {
        if !self.loaded_pages.contains(&page) {
            return None;
        }
        self.page_ids
            .get(&page)?
            .iter()
            .map(|id| self.items.get(id).cloned())
            .collect()
    }

    /// Drop payloads of the loaded pages farthest from the current page
    /// until at most `max_items` remain. The current page and `keep` are
    /// never evicted; the page → ids index is kept for every page.
    fn evict_distant(&mut self, keep: usize, max_items: usize) -> Vec<usize> {
        let mut evicted = Vec::new();
        while self.items.len() > max_items {
            let current = self.current_page;
            let Some(victim) = self
                .loaded_pages
                .iter()
                .copied()
                .filter(|&p| p != current && p != keep)
                .max_by_key(|&p| (p.abs_diff(current), p))
            else {
                break;
            };
            self.loaded_pages.remove(&victim);
            let still_needed: FxHashSet<&ItemId> = self
                .loaded_pages
                .iter()
                .filter_map(|p| self.page_ids.get(p))
                .flatten()
                .collect();
            let orphaned: Vec<ItemId> = self
                .page_ids
                .get(&victim)
                .into_iter()
                .flatten()
                .filter(|id| !still_needed.contains(id))
                .cloned()
                .collect();
            for id in &orphaned {
                self.items.remove(id);
            }
            evicted.push(victim);
        }
        evicted
    }
}

/// Loads pages from a [`DataSource`] and keeps them cached.
pub struct PaginationManager<T: Item + 'static> {
    source: Rc<dyn DataSource<T>>,
    selection: Rc<SelectionTracker>,
    events: EventBus,
    resilience: Option<Rc<ResilienceController>>,
    config: PaginationConfig,
    state: RefCell<PageState<T>>,
}

impl<T: Item + 'static> fmt::Debug for PaginationManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("PaginationManager")
            .field("current_page", &state.current_page)
            .field("total_pages", &state.total_pages)
            .field("loaded_pages", &state.loaded_pages)
            .field("cached_items", &state.items.len())
            .field("generation", &state.generation)
            .finish_non_exhaustive()
    }
}

impl<T: Item + 'static> PaginationManager<T> {
    pub fn new(
        source: Rc<dyn DataSource<T>>,
        selection: Rc<SelectionTracker>,
        events: EventBus,
        config: PaginationConfig,
    ) -> Self {
        let page_size = config.page_size.max(1);
        Self {
            source,
            selection,
            events,
            resilience: None,
            config,
            state: RefCell::new(PageState::new(page_size)),
        }
    }

    /// Run fetches through `controller`.
    #[must_use]
    pub fn with_resilience(mut self, controller: Rc<ResilienceController>) -> Self {
        self.resilience = Some(controller);
        self
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Make `page` the visible page.
    ///
    /// Cached pages are served without a fetch unless `force` is set. Pushes
    /// the page's ids to the selection tracker and emits `PageChanged`.
    pub async fn load_page(
        &self,
        page: usize,
        options: LoadOptions,
    ) -> Result<Vec<ItemId>, EngineError> {
        let (ticket, generation, query) = {
            let mut state = self.state.borrow_mut();
            if state.in_flight.is_some() && !options.force {
                debug!(page, "load rejected, another load in flight");
                return Err(EngineError::LoadInProgress { page });
            }
            if page == 0 || (state.total_pages > 0 && page > state.total_pages) {
                return Err(EngineError::PageOutOfRange {
                    page,
                    total_pages: state.total_pages,
                });
            }
            if !options.force {
                if let Some(items) = state.page_items(page) {
                    drop(state);
                    return Ok(self.show(page, items));
                }
            }
            state.next_ticket += 1;
            let ticket = state.next_ticket;
            state.in_flight = Some(ticket);
            (ticket, state.generation, state.query(page))
        };

        debug!(page, generation, "loading page");
        let fetched = self.fetch(&query).await;

        let items = {
            let mut state = self.state.borrow_mut();
            let latest = state.in_flight == Some(ticket);
            if latest {
                state.in_flight = None;
            }
            let response = fetched?;
            if state.generation != generation {
                debug!(page, generation, "discarding load from stale generation");
                return Err(EngineError::Superseded { page });
            }
            let items = response.data.clone();
            state.store_page(page, response);
            if !latest {
                return Err(EngineError::Superseded { page });
            }
            items
        };
        Ok(self.show(page, items))
    }

    fn show(&self, page: usize, items: Vec<T>) -> Vec<ItemId> {
        let ids: Vec<ItemId> = items.iter().map(Item::id).collect();
        let total_pages = {
            let mut state = self.state.borrow_mut();
            state.current_page = page;
            state.visible = items;
            let evicted = state.evict_distant(page, self.config.max_cached_items);
            if !evicted.is_empty() {
                debug!(?evicted, "evicted distant page payloads");
            }
            state.total_pages
        };
        self.selection.set_filtered_sessions(ids.clone());
        self.events.emit(EngineEvent::PageChanged { page, total_pages });
        ids
    }

    /// Fill the caches for `page` without touching the visible page or the
    /// selection universe. Failures are logged and reported as `None`.
    ///
    /// In fallback mode only cached pages are answered; nothing is fetched.
    pub async fn load_page_quietly(&self, page: usize) -> Option<Vec<ItemId>> {
        let items = self.quiet_page(page).await?;
        Some(items.iter().map(Item::id).collect())
    }

    async fn quiet_page(&self, page: usize) -> Option<Vec<T>> {
        let (generation, query) = {
            let state = self.state.borrow();
            if state.loaded_pages.contains(&page) {
                return state.page_items(page);
            }
            if self.is_degraded() {
                debug!(page, "fallback mode, skipping quiet load");
                return None;
            }
            (state.generation, state.query(page))
        };

        match self.fetch(&query).await {
            Ok(response) => {
                let mut state = self.state.borrow_mut();
                if state.generation != generation {
                    debug!(page, generation, "discarding quiet load from stale generation");
                    return None;
                }
                let items = response.data.clone();
                state.store_page(page, response);
                let evicted = state.evict_distant(page, self.config.max_cached_items);
                if !evicted.is_empty() {
                    debug!(?evicted, "evicted distant page payloads");
                }
                Some(items)
            }
            Err(err) => {
                warn!(page, error = %err, "quiet page load failed");
                None
            }
        }
    }

    /// Quietly load `pages` concurrently. Items are returned as fetched, so
    /// callers see them even if a later page in the batch evicts them.
    async fn load_batch(&self, pages: &[usize]) -> Vec<(usize, Option<Vec<T>>)> {
        join_all(
            pages
                .iter()
                .map(|&page| async move { (page, self.quiet_page(page).await) }),
        )
        .await
    }

    fn batch_size(&self) -> usize {
        self.config.select_all_batch_size.max(1)
    }

    /// The resilience controller has degraded to fallback mode.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.resilience
            .as_ref()
            .is_some_and(|controller| controller.is_fallback_mode())
    }

    /// Load every unloaded page in concurrent batches, then select every
    /// known id. Individual page failures are reported, not fatal.
    pub async fn select_all_pages(&self) -> Result<SelectAllReport, EngineError> {
        let needs_first_page = {
            let state = self.state.borrow();
            state.total_pages == 0 && state.loaded_pages.is_empty()
        };
        if needs_first_page {
            let page = self.current_page();
            self.load_page(page, LoadOptions::default()).await?;
        }

        let (generation, pending, total_pages) = {
            let mut state = self.state.borrow_mut();
            state.loading_progress = 0.0;
            let pending: Vec<usize> = (1..=state.total_pages)
                .filter(|p| !state.loaded_pages.contains(p))
                .collect();
            (state.generation, pending, state.total_pages)
        };

        if self.is_degraded() {
            warn!(
                skipped = pending.len(),
                "fallback mode, selecting cached pages only"
            );
            self.state.borrow_mut().loading_progress = 100.0;
            let newly_selected = self.selection.add_to_selection(self.known_ids());
            return Ok(SelectAllReport {
                total_pages,
                fetched_pages: 0,
                failed_pages: Vec::new(),
                skipped_pages: pending,
                newly_selected,
                selected_count: self.selection.selected_count(),
                cancelled: false,
            });
        }

        let mut failed_pages = Vec::new();
        let mut done = 0;
        for batch in pending.chunks(self.batch_size()) {
            let results = self.load_batch(batch).await;
            failed_pages.extend(
                results
                    .into_iter()
                    .filter(|(_, items)| items.is_none())
                    .map(|(page, _)| page),
            );
            done += batch.len();

            let mut state = self.state.borrow_mut();
            if state.generation != generation {
                info!(done, "select-all cancelled by cache invalidation");
                return Ok(SelectAllReport {
                    total_pages,
                    fetched_pages: done - failed_pages.len(),
                    failed_pages,
                    skipped_pages: Vec::new(),
                    newly_selected: 0,
                    selected_count: self.selection.selected_count(),
                    cancelled: true,
                });
            }
            state.loading_progress = done as f64 / pending.len() as f64 * 100.0;
            debug!(
                done,
                pending = pending.len(),
                progress = state.loading_progress,
                "select-all batch done"
            );
        }

        self.state.borrow_mut().loading_progress = 100.0;
        let newly_selected = self.selection.add_to_selection(self.known_ids());
        let selected_count = self.selection.selected_count();
        info!(
            total_pages,
            fetched = pending.len() - failed_pages.len(),
            failed = failed_pages.len(),
            selected_count,
            "select-all finished"
        );
        Ok(SelectAllReport {
            total_pages,
            fetched_pages: pending.len() - failed_pages.len(),
            failed_pages,
            skipped_pages: Vec::new(),
            newly_selected,
            selected_count,
            cancelled: false,
        })
    }

    async fn fetch(&self, query: &PageQuery) -> Result<PageResponse<T>, EngineError> {
        match &self.resilience {
            Some(controller) => controller
                .run(ErrorContext::api_call("fetch_page"), || {
                    self.source.fetch_page(query)
                })
                .await
                .into_result(),
            None => Ok(self.source.fetch_page(query).await?),
        }
    }

    // ------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------

    pub async fn go_to_page(&self, page: usize) -> Result<Vec<ItemId>, EngineError> {
        self.load_page(page, LoadOptions::default()).await
    }

    /// `Ok(None)` on the last page.
    pub async fn next_page(&self) -> Result<Option<Vec<ItemId>>, EngineError> {
        let (current, total) = (self.current_page(), self.total_pages());
        if current >= total {
            return Ok(None);
        }
        self.go_to_page(current + 1).await.map(Some)
    }

    /// `Ok(None)` on the first page.
    pub async fn prev_page(&self) -> Result<Option<Vec<ItemId>>, EngineError> {
        let current = self.current_page();
        if current <= 1 {
            return Ok(None);
        }
        self.go_to_page(current - 1).await.map(Some)
    }

    pub async fn first_page(&self) -> Result<Vec<ItemId>, EngineError> {
        self.go_to_page(1).await
    }

    pub async fn last_page(&self) -> Result<Vec<ItemId>, EngineError> {
        self.go_to_page(self.total_pages().max(1)).await
    }

    // ------------------------------------------------------------------
    // Query changes
    // ------------------------------------------------------------------

    /// Replace the filters, drop all caches, and load page 1.
    pub async fn update_filters(&self, filters: Filters) -> Result<Vec<ItemId>, EngineError> {
        {
            let mut state = self.state.borrow_mut();
            state.invalidate();
            state.filters = filters.clone();
            state.current_page = 1;
        }
        self.events.emit(EngineEvent::FiltersChanged { filters });
        self.load_page(1, LoadOptions::FORCE).await
    }

    /// Change the sort, drop all caches, and load page 1.
    pub async fn update_sort(
        &self,
        sort_by: Option<String>,
        sort_order: SortOrder,
    ) -> Result<Vec<ItemId>, EngineError> {
        {
            let mut state = self.state.borrow_mut();
            state.invalidate();
            state.sort_by = sort_by.clone();
            state.sort_order = sort_order;
            state.current_page = 1;
        }
        self.events.emit(EngineEvent::SortChanged {
            sort_by,
            sort_order,
        });
        self.load_page(1, LoadOptions::FORCE).await
    }

    /// Change the page size, keeping the first visible item on screen.
    pub async fn set_page_size(&self, page_size: usize) -> Result<Vec<ItemId>, EngineError> {
        if page_size == 0 {
            return Err(EngineError::InvalidConfig(
                "page_size must be at least 1".to_string(),
            ));
        }
        let page = {
            let mut state = self.state.borrow_mut();
            let first_index = (state.current_page - 1) * state.page_size;
            state.invalidate();
            state.page_size = page_size;
            state.current_page = first_index / page_size + 1;
            state.current_page
        };
        self.events.emit(EngineEvent::PageSizeChanged { page_size });
        self.load_page(page, LoadOptions::FORCE).await
    }

    /// Drop all caches and reload the current page.
    pub async fn refresh(&self) -> Result<Vec<ItemId>, EngineError> {
        let page = {
            let mut state = self.state.borrow_mut();
            state.invalidate();
            state.current_page
        };
        self.load_page(page, LoadOptions::FORCE).await
    }

    /// Drop all cached pages and items. The visible page stays until the
    /// next load replaces it.
    pub fn clear_cache(&self) {
        self.state.borrow_mut().invalidate();
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Item by id: from cache, else by quietly loading the page that lists it.
    pub async fn get_session_data(&self, id: &ItemId) -> Option<T> {
        let owner = {
            let state = self.state.borrow();
            if let Some(item) = state.items.get(id) {
                return Some(item.clone());
            }
            state
                .page_ids
                .iter()
                .find(|(_, ids)| ids.contains(id))
                .map(|(page, _)| *page)?
        };
        let items = self.quiet_page(owner).await?;
        items.into_iter().find(|item| item.id() == *id)
    }

    /// Items for `ids`: cached ones directly, the rest by quietly loading
    /// their owning pages in concurrent batches. Unresolvable ids are absent.
    pub async fn resolve_items(&self, ids: &[ItemId]) -> FxHashMap<ItemId, T> {
        let mut found = FxHashMap::default();
        let owners: Vec<usize> = {
            let state = self.state.borrow();
            let mut missing = FxHashSet::default();
            for id in ids {
                match state.items.get(id) {
                    Some(item) => {
                        found.insert(id.clone(), item.clone());
                    }
                    None => {
                        missing.insert(id);
                    }
                }
            }
            state
                .page_ids
                .iter()
                .filter(|(_, listed)| listed.iter().any(|id| missing.contains(id)))
                .map(|(page, _)| *page)
                .collect()
        };
        if owners.is_empty() {
            return found;
        }

        debug!(pages = ?owners, "loading pages for lookup");
        let wanted: FxHashSet<&ItemId> = ids.iter().collect();
        for batch in owners.chunks(self.batch_size()) {
            for (_, items) in self.load_batch(batch).await {
                for item in items.into_iter().flatten() {
                    let id = item.id();
                    if wanted.contains(&id) {
                        found.entry(id).or_insert(item);
                    }
                }
            }
        }
        found
    }

    /// Cached item without any fetch.
    #[must_use]
    pub fn cached_item(&self, id: &ItemId) -> Option<T> {
        self.state.borrow().items.get(id).cloned()
    }

    /// Cached items among `ids`, in `ids` order.
    #[must_use]
    pub fn cached_items<'a>(&self, ids: impl IntoIterator<Item = &'a ItemId>) -> Vec<T> {
        let state = self.state.borrow();
        ids.into_iter()
            .filter_map(|id| state.items.get(id).cloned())
            .collect()
    }

    /// Every id listed by a known page, in page order, without duplicates.
    #[must_use]
    pub fn known_ids(&self) -> Vec<ItemId> {
        let state = self.state.borrow();
        let mut seen = FxHashSet::default();
        state
            .page_ids
            .values()
            .flatten()
            .filter(|id| seen.insert(*id))
            .cloned()
            .collect()
    }

    // ------------------------------------------------------------------
    // Getters
    // ------------------------------------------------------------------

    /// Borrow the visible items without cloning them.
    pub fn with_visible<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        f(&self.state.borrow().visible)
    }

    #[must_use]
    pub fn visible_items(&self) -> Vec<T> {
        self.state.borrow().visible.clone()
    }

    #[must_use]
    pub fn visible_ids(&self) -> Vec<ItemId> {
        self.state.borrow().visible.iter().map(Item::id).collect()
    }

    #[must_use]
    pub fn current_page(&self) -> usize {
        self.state.borrow().current_page
    }

    #[must_use]
    pub fn total_pages(&self) -> usize {
        self.state.borrow().total_pages
    }

    #[must_use]
    pub fn total_items(&self) -> usize {
        self.state.borrow().total_items
    }

    #[must_use]
    pub fn page_size(&self) -> usize {
        self.state.borrow().page_size
    }

    #[must_use]
    pub fn filters(&self) -> Filters {
        self.state.borrow().filters.clone()
    }

    #[must_use]
    pub fn sort(&self) -> (Option<String>, SortOrder) {
        let state = self.state.borrow();
        (state.sort_by.clone(), state.sort_order)
    }

    #[must_use]
    pub fn loaded_pages(&self) -> Vec<usize> {
        self.state.borrow().loaded_pages.iter().copied().collect()
    }

    #[must_use]
    pub fn loaded_page_count(&self) -> usize {
        self.state.borrow().loaded_pages.len()
    }

    #[must_use]
    pub fn is_page_loaded(&self, page: usize) -> bool {
        self.state.borrow().loaded_pages.contains(&page)
    }

    /// Cached item payloads.
    #[must_use]
    pub fn cache_size(&self) -> usize {
        self.state.borrow().items.len()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state.borrow().in_flight.is_some()
    }

    /// Select-all progress, 0 to 100.
    #[must_use]
    pub fn loading_progress(&self) -> f64 {
        self.state.borrow().loading_progress
    }

    /// Cache generation; bumped by every invalidation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.state.borrow().generation
    }

    #[must_use]
    pub fn page_info(&self) -> PageInfo {
        let state = self.state.borrow();
        let total = state.total_items;
        let (from, to) = if total == 0 {
            (0, 0)
        } else {
            let to = (state.current_page * state.page_size).min(total);
            let from = ((state.current_page - 1) * state.page_size + 1).min(to);
            (from, to)
        };
        PageInfo {
            current_page: state.current_page,
            total_pages: state.total_pages,
            total_items: total,
            page_size: state.page_size,
            from,
            to,
            has_previous: state.current_page > 1,
            has_next: state.current_page < state.total_pages,
        }
    }

    /// Up to `page_window` page numbers centred on the current page, shifted
    /// to stay inside `1..=total_pages`.
    #[must_use]
    pub fn page_numbers(&self) -> Vec<usize> {
        let state = self.state.borrow();
        page_window(
            state.current_page,
            state.total_pages,
            self.config.page_window.max(1),
        )
    }
}

fn page_window(current: usize, total: usize, window: usize) -> Vec<usize> {
    if total <= window {
        return (1..=total).collect();
    }
    let half = window / 2;
    let start = current
        .saturating_sub(half)
        .max(1)
        .min(total + 1 - window);
    (start..start + window).collect()
}
