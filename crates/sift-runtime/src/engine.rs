#![forbid(unsafe_code)]

//! [`ListEngine`]: the assembled list management engine.
//!
//! The engine owns one of each component and wires them together:
//!
//! ```text
//!   DataSource ──► PaginationManager ──set_filtered_sessions──► SelectionTracker
//!                      │      ▲                                     ▲
//!                      │      └──── RecoveryHooks (weak) ────┐      │
//!                      ▼                                     │      │ clicks
//!               ResilienceController ◄── bulk_delete ── ListEngine ─┤
//!                                                            │      │
//!                                                     ListVirtualizer
//! ```
//!
//! Every component is constructor-injected; nothing is global. Callers
//! observe changes through [`ListEngine::subscribe`].

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use async_trait::async_trait;
use serde::Serialize;
use sift_cache::{MemoRegistry, MemoryReport, summary_key};
use sift_core::{
    AllowAll, BulkAction, BulkApi, BulkValidation, Clock, DataSource, EligibilityRules,
    EngineConfig, EngineError, EngineEvent, EventBus, EventEnvelope, Filters, Item, ItemId,
    SelectionStats, SortOrder, Subscription, SystemClock,
};
use tracing::{debug, info, warn};

use crate::pagination::{LoadOptions, PageInfo, PaginationManager, SelectAllReport};
use crate::resilience::{
    BulkOutcome, ContextKind, FailureEntry, RecoveryHooks, ResilienceController,
};
use crate::selection::SelectionTracker;
use crate::virtualized::{
    ClickModifiers, ClickOutcome, ListVirtualizer, PerformanceReport, VisibleSlice,
};

/// Shown when re-validation leaves nothing to act on.
const NOTHING_ELIGIBLE_MESSAGE: &str = "None of the selected sessions can be deleted.";

/// What a bulk action did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkActionReport {
    /// Re-validation performed right before the action.
    pub validation: BulkValidation,
    /// `None` when nothing was eligible and no request was made.
    #[serde(skip)]
    pub outcome: Option<BulkOutcome>,
}

impl BulkActionReport {
    #[must_use]
    pub fn deleted(&self) -> &[ItemId] {
        self.outcome
            .as_ref()
            .map_or(&[], |o| o.result.successful.as_slice())
    }

    #[must_use]
    pub fn failed(&self) -> &[ItemId] {
        self.outcome
            .as_ref()
            .map_or(&[], |o| o.result.failed.as_slice())
    }
}

/// Builder for [`ListEngine`].
pub struct EngineBuilder<T: Item + 'static> {
    source: Rc<dyn DataSource<T>>,
    config: EngineConfig,
    clock: Option<Rc<dyn Clock>>,
    bulk_api: Option<Rc<dyn BulkApi>>,
    rules: Rc<dyn EligibilityRules<T>>,
}

impl<T: Item + 'static> EngineBuilder<T> {
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn bulk_api(mut self, api: Rc<dyn BulkApi>) -> Self {
        self.bulk_api = Some(api);
        self
    }

    #[must_use]
    pub fn rules(mut self, rules: Rc<dyn EligibilityRules<T>>) -> Self {
        self.rules = rules;
        self
    }

    /// Validate the configuration and assemble the engine.
    pub fn build(self) -> Result<ListEngine<T>, EngineError> {
        let config = self.config;
        config.validate()?;

        let clock = self
            .clock
            .unwrap_or_else(|| Rc::new(SystemClock::new()) as Rc<dyn Clock>);
        let events = EventBus::new(Rc::clone(&clock));
        let memo = Rc::new(MemoRegistry::new(&config.memo, Rc::clone(&clock)));
        let selection = Rc::new(SelectionTracker::new(events.clone()).with_memo(Rc::clone(&memo)));

        let mut resilience = ResilienceController::new(config.resilience.clone(), Rc::clone(&clock));
        if let Some(api) = self.bulk_api {
            resilience = resilience.with_bulk_api(api);
        }
        let resilience = Rc::new(resilience);

        let pagination = Rc::new(
            PaginationManager::new(
                self.source,
                Rc::clone(&selection),
                events.clone(),
                config.pagination.clone(),
            )
            .with_resilience(Rc::clone(&resilience)),
        );
        resilience.set_hooks(Rc::new(EngineRecovery {
            selection: Rc::downgrade(&selection),
            pagination: Rc::downgrade(&pagination),
            memo: Rc::downgrade(&memo),
        }));

        let virtualizer = ListVirtualizer::new(config.viewport.clone(), Rc::clone(&clock))?;
        debug!(?config, "list engine assembled");

        Ok(ListEngine {
            config,
            events,
            memo,
            selection,
            pagination,
            resilience,
            virtualizer: RefCell::new(virtualizer),
            rules: self.rules,
            stats_action: Cell::new(BulkAction::Delete),
        })
    }
}

/// Recovery callbacks, holding the engine's parts weakly so the controller
/// does not keep them alive.
struct EngineRecovery<T: Item + 'static> {
    selection: Weak<SelectionTracker>,
    pagination: Weak<PaginationManager<T>>,
    memo: Weak<MemoRegistry>,
}

#[async_trait(?Send)]
impl<T: Item + 'static> RecoveryHooks for EngineRecovery<T> {
    async fn clear_and_refresh(&self) -> Result<(), EngineError> {
        if let Some(memo) = self.memo.upgrade() {
            memo.invalidate_derived();
        }
        if let Some(selection) = self.selection.upgrade() {
            selection.clear_selection();
        }
        match self.pagination.upgrade() {
            Some(pagination) => pagination.refresh().await.map(|_| ()),
            None => Ok(()),
        }
    }

    fn enter_fallback_mode(&self, kind: ContextKind) {
        info!(context = %kind, "degraded to cached pages until the next successful call");
    }
}

/// The list management engine.
pub struct ListEngine<T: Item + 'static> {
    config: EngineConfig,
    events: EventBus,
    memo: Rc<MemoRegistry>,
    selection: Rc<SelectionTracker>,
    pagination: Rc<PaginationManager<T>>,
    resilience: Rc<ResilienceController>,
    virtualizer: RefCell<ListVirtualizer>,
    rules: Rc<dyn EligibilityRules<T>>,
    /// Action the selection stats are computed for.
    stats_action: Cell<BulkAction>,
}

impl<T: Item + 'static> std::fmt::Debug for ListEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListEngine")
            .field("selection", &self.selection)
            .field("pagination", &self.pagination)
            .field("resilience", &self.resilience)
            .finish_non_exhaustive()
    }
}

impl<T: Item + 'static> ListEngine<T> {
    /// Start building an engine over `source`, allowing every action by
    /// default.
    pub fn builder(source: Rc<dyn DataSource<T>>) -> EngineBuilder<T> {
        EngineBuilder {
            source,
            config: EngineConfig::default(),
            clock: None,
            bulk_api: None,
            rules: Rc::new(AllowAll),
        }
    }

    // ------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------

    pub fn subscribe(&self, callback: impl Fn(&EventEnvelope) + 'static) -> Subscription {
        self.events.subscribe(callback)
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    #[must_use]
    pub fn selection(&self) -> &SelectionTracker {
        &self.selection
    }

    #[must_use]
    pub fn pagination(&self) -> &PaginationManager<T> {
        &self.pagination
    }

    #[must_use]
    pub fn resilience(&self) -> &ResilienceController {
        &self.resilience
    }

    #[must_use]
    pub fn memo(&self) -> &MemoRegistry {
        &self.memo
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Loading and navigation
    // ------------------------------------------------------------------

    /// Load the current page.
    pub async fn load(&self) -> Result<Vec<ItemId>, EngineError> {
        let page = self.pagination.current_page();
        self.pagination.load_page(page, LoadOptions::default()).await
    }

    pub async fn go_to_page(&self, page: usize) -> Result<Vec<ItemId>, EngineError> {
        self.pagination.go_to_page(page).await
    }

    pub async fn next_page(&self) -> Result<Option<Vec<ItemId>>, EngineError> {
        self.pagination.next_page().await
    }

    pub async fn prev_page(&self) -> Result<Option<Vec<ItemId>>, EngineError> {
        self.pagination.prev_page().await
    }

    pub async fn first_page(&self) -> Result<Vec<ItemId>, EngineError> {
        self.pagination.first_page().await
    }

    pub async fn last_page(&self) -> Result<Vec<ItemId>, EngineError> {
        self.pagination.last_page().await
    }

    pub async fn update_filters(&self, filters: Filters) -> Result<Vec<ItemId>, EngineError> {
        self.memo.invalidate_derived();
        self.pagination.update_filters(filters).await
    }

    pub async fn update_sort(
        &self,
        sort_by: Option<String>,
        sort_order: SortOrder,
    ) -> Result<Vec<ItemId>, EngineError> {
        self.memo.invalidate_derived();
        self.pagination.update_sort(sort_by, sort_order).await
    }

    pub async fn set_page_size(&self, page_size: usize) -> Result<Vec<ItemId>, EngineError> {
        self.memo.invalidate_derived();
        self.pagination.set_page_size(page_size).await
    }

    pub async fn refresh(&self) -> Result<Vec<ItemId>, EngineError> {
        self.memo.invalidate_derived();
        self.pagination.refresh().await
    }

    // ------------------------------------------------------------------
    // Viewport
    // ------------------------------------------------------------------

    /// Slice the visible page for `scroll_offset` and hand it to `f`.
    pub fn with_visible_slice<R>(
        &self,
        scroll_offset: f64,
        f: impl FnOnce(VisibleSlice<'_, T>) -> R,
    ) -> R {
        let virtualizer = self.virtualizer.borrow();
        self.pagination
            .with_visible(|items| f(virtualizer.compute_visible_slice(scroll_offset, items)))
    }

    /// Record a scroll event for click translation and scroll-end detection.
    pub fn on_scroll(&self, offset: f64) {
        self.virtualizer.borrow_mut().record_scroll(offset);
    }

    /// Settled scroll offset once the debounce window has passed.
    pub fn poll_scroll_end(&self) -> Option<f64> {
        self.virtualizer.borrow_mut().poll_scroll_end()
    }

    /// Scroll offset that brings `id` into view, if it is on the visible page.
    #[must_use]
    pub fn scroll_offset_for(&self, id: &ItemId) -> Option<f64> {
        let ids = self.pagination.visible_ids();
        let index = ids.iter().position(|candidate| candidate == id)?;
        Some(
            self.virtualizer
                .borrow()
                .scroll_offset_for_index(index, ids.len()),
        )
    }

    /// Apply a click on row `relative_index` of the rendered slice.
    pub fn click(&self, relative_index: usize, modifiers: ClickModifiers) -> Option<ClickOutcome> {
        let ids = self.pagination.visible_ids();
        let outcome =
            self.virtualizer
                .borrow()
                .handle_click(relative_index, modifiers, &ids, &self.selection)?;
        self.refresh_stats();
        Some(outcome)
    }

    #[must_use]
    pub fn performance_report(&self) -> PerformanceReport {
        self.virtualizer.borrow().performance_report()
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    pub fn add_to_selection<I: Into<ItemId>>(&self, ids: impl IntoIterator<Item = I>) -> usize {
        let added = self.selection.add_to_selection(ids);
        self.refresh_stats();
        added
    }

    pub fn remove_from_selection<I: Into<ItemId>>(
        &self,
        ids: impl IntoIterator<Item = I>,
    ) -> usize {
        let removed = self.selection.remove_from_selection(ids);
        self.refresh_stats();
        removed
    }

    pub fn clear_selection(&self) -> usize {
        let cleared = self.selection.clear_selection();
        self.refresh_stats();
        cleared
    }

    pub fn toggle_manage_mode(&self) -> bool {
        let enabled = self.selection.toggle_manage_mode();
        self.refresh_stats();
        enabled
    }

    /// Select every item on every page.
    pub async fn select_all_pages(&self) -> Result<SelectAllReport, EngineError> {
        let report = self.pagination.select_all_pages().await?;
        self.refresh_stats();
        Ok(report)
    }

    /// Recompute stats for the current stats action over cached selected items.
    pub fn refresh_stats(&self) -> SelectionStats {
        let items = self.pagination.cached_items(&self.selection.selected_ids());
        self.selection
            .update_selection_stats(&items, self.stats_action.get(), self.rules.as_ref())
    }

    /// Switch the action stats are computed for.
    pub fn set_stats_action(&self, action: BulkAction) -> SelectionStats {
        self.stats_action.set(action);
        self.refresh_stats()
    }

    #[must_use]
    pub fn selected_count(&self) -> usize {
        self.selection.selected_count()
    }

    #[must_use]
    pub fn has_selection(&self) -> bool {
        self.selection.has_selection()
    }

    #[must_use]
    pub fn can_perform_bulk_action(&self) -> bool {
        self.selection.can_perform_bulk_action()
    }

    /// Ids on the visible page whose status equals `status`.
    #[must_use]
    pub fn filter_loaded(&self, status: &str) -> Vec<ItemId> {
        let ids = self.pagination.visible_ids();
        let prefix = format!(
            "status={status}|gen={}|page={}",
            self.pagination.generation(),
            self.pagination.current_page()
        );
        let key = summary_key(&prefix, &ids);
        self.memo.filters().get_or_compute(&key, || {
            self.pagination.with_visible(|items| {
                items
                    .iter()
                    .filter(|item| item.status() == status)
                    .map(|item| item.id())
                    .collect()
            })
        })
    }

    // ------------------------------------------------------------------
    // Bulk actions
    // ------------------------------------------------------------------

    /// Re-validate the selection for `action` against current item data,
    /// loading the pages of selected ids that are not cached.
    pub async fn revalidate(&self, action: BulkAction) -> BulkValidation {
        let ids = self.selection.selected_ids();
        let resolved = self.pagination.resolve_items(&ids).await;
        self.selection.validate_for_action(
            |id| resolved.get(id).cloned(),
            action,
            self.rules.as_ref(),
        )
    }

    /// Delete the eligible part of the selection.
    ///
    /// Successfully deleted ids leave the selection and the current page is
    /// reloaded. Ineligible and stale ids are reported, never sent.
    pub async fn bulk_delete(&self) -> Result<BulkActionReport, EngineError> {
        let action = BulkAction::Delete;
        let validation = self.revalidate(action).await;
        if !validation.can_proceed() {
            self.events.emit(EngineEvent::BulkActionFailed {
                action,
                message: NOTHING_ELIGIBLE_MESSAGE.to_string(),
            });
            return Ok(BulkActionReport {
                validation,
                outcome: None,
            });
        }

        self.events.emit(EngineEvent::BulkActionInitiated {
            action,
            count: validation.eligible.len(),
        });
        let outcome = match self.resilience.bulk_delete(&validation.eligible).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.events.emit(EngineEvent::BulkActionFailed {
                    action,
                    message: err.to_string(),
                });
                return Err(err);
            }
        };

        let deleted = &outcome.result.successful;
        self.selection.remove_from_selection(deleted.iter().cloned());
        self.memo.invalidate_derived();
        if !deleted.is_empty() {
            self.reload_after_delete().await;
        }
        self.refresh_stats();

        if deleted.is_empty() {
            let message = outcome
                .message
                .unwrap_or(ContextKind::BulkDelete.user_message());
            self.events.emit(EngineEvent::BulkActionFailed {
                action,
                message: message.to_string(),
            });
        } else {
            self.events.emit(EngineEvent::BulkActionCompleted {
                action,
                successful: deleted.len(),
                failed: outcome.result.failed.len(),
            });
        }
        info!(
            deleted = deleted.len(),
            failed = outcome.result.failed.len(),
            ineligible = validation.ineligible.len(),
            stale = validation.stale.len(),
            "bulk delete finished"
        );
        Ok(BulkActionReport {
            validation,
            outcome: Some(outcome),
        })
    }

    /// Reload the current page, stepping back if deletions emptied it.
    async fn reload_after_delete(&self) {
        if let Err(err) = self.pagination.refresh().await {
            warn!(error = %err, "reload after bulk delete failed");
            return;
        }
        let (current, total) = (
            self.pagination.current_page(),
            self.pagination.total_pages(),
        );
        if current > total.max(1) {
            if let Err(err) = self.pagination.go_to_page(total.max(1)).await {
                warn!(error = %err, "moving back after bulk delete failed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    #[must_use]
    pub fn page_info(&self) -> PageInfo {
        self.pagination.page_info()
    }

    #[must_use]
    pub fn page_numbers(&self) -> Vec<usize> {
        self.pagination.page_numbers()
    }

    #[must_use]
    pub fn loaded_page_count(&self) -> usize {
        self.pagination.loaded_page_count()
    }

    #[must_use]
    pub fn cache_size(&self) -> usize {
        self.pagination.cache_size()
    }

    #[must_use]
    pub fn memory_report(&self) -> MemoryReport {
        self.memo.report()
    }

    #[must_use]
    pub fn recent_failures(&self, n: usize) -> Vec<FailureEntry> {
        self.resilience.recent_failures(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::{BulkResult, ManualClock, PageQuery, PageResponse, SourceError};

    #[derive(Clone, Debug, PartialEq)]
    struct Doc {
        id: u32,
        status: &'static str,
    }

    impl Item for Doc {
        fn id(&self) -> ItemId {
            ItemId::from(self.id)
        }

        fn status(&self) -> &str {
            self.status
        }
    }

    /// Backend holding docs in memory; deletes remove them for later fetches.
    struct Store {
        docs: RefCell<Vec<Doc>>,
        fetches: Cell<u32>,
        deletes: Cell<u32>,
    }

    impl Store {
        fn with_docs(count: u32) -> Rc<Self> {
            let docs = (0..count)
                .map(|id| Doc {
                    id,
                    status: if id % 5 == 0 { "processing" } else { "done" },
                })
                .collect();
            Rc::new(Self {
                docs: RefCell::new(docs),
                fetches: Cell::new(0),
                deletes: Cell::new(0),
            })
        }
    }

    #[async_trait(?Send)]
    impl DataSource<Doc> for Store {
        async fn fetch_page(&self, query: &PageQuery) -> Result<PageResponse<Doc>, SourceError> {
            self.fetches.set(self.fetches.get() + 1);
            let docs = self.docs.borrow();
            let start = (query.page - 1) * query.page_size;
            let data = docs
                .iter()
                .skip(start)
                .take(query.page_size)
                .cloned()
                .collect();
            Ok(PageResponse {
                data,
                total: docs.len(),
            })
        }
    }

    #[async_trait(?Send)]
    impl BulkApi for Store {
        async fn delete_sessions(&self, ids: &[ItemId]) -> Result<BulkResult, SourceError> {
            self.deletes.set(self.deletes.get() + 1);
            self.docs
                .borrow_mut()
                .retain(|doc| !ids.contains(&doc.id()));
            Ok(BulkResult {
                successful: ids.to_vec(),
                failed: Vec::new(),
            })
        }
    }

    struct NoDeleteWhileProcessing;

    impl EligibilityRules<Doc> for NoDeleteWhileProcessing {
        fn can_delete(&self, item: &Doc) -> bool {
            item.status != "processing"
        }

        fn ineligible_reason(&self, item: &Doc, _action: BulkAction) -> Option<String> {
            (item.status == "processing").then(|| "still processing".to_string())
        }
    }

    fn engine(store: &Rc<Store>) -> ListEngine<Doc> {
        let config = EngineConfig::default()
            .with_page_size(5)
            .with_viewport(10.0, 50.0, 0);
        ListEngine::builder(Rc::clone(store) as Rc<dyn DataSource<Doc>>)
            .config(config)
            .clock(Rc::new(ManualClock::new()))
            .bulk_api(Rc::clone(store) as Rc<dyn BulkApi>)
            .rules(Rc::new(NoDeleteWhileProcessing))
            .build()
            .unwrap()
    }

    fn record_events(engine: &ListEngine<Doc>) -> (Rc<RefCell<Vec<EngineEvent>>>, Subscription) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let sub = engine.subscribe(move |envelope| sink.borrow_mut().push(envelope.event.clone()));
        (seen, sub)
    }

    #[test]
    fn build_rejects_invalid_config() {
        let store = Store::with_docs(3);
        let err = ListEngine::builder(store as Rc<dyn DataSource<Doc>>)
            .config(EngineConfig::default().with_page_size(0))
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn clicks_select_and_stats_follow() {
        let store = Store::with_docs(12);
        let engine = engine(&store);
        engine.load().await.unwrap();

        let first = engine.click(0, ClickModifiers::NONE);
        assert!(matches!(first, Some(ClickOutcome::Single { index: 0, .. })));
        let range = engine.click(3, ClickModifiers::SHIFT);
        assert!(matches!(
            range,
            Some(ClickOutcome::Range {
                anchor: 0,
                index: 3,
                ..
            })
        ));
        assert_eq!(engine.selected_count(), 4);

        let stats = engine.set_stats_action(BulkAction::Delete);
        assert_eq!(stats.total, 4);
        assert_eq!(stats.eligible, 3);
        assert_eq!(stats.ineligible, 1);
        assert!(engine.can_perform_bulk_action());
    }

    #[tokio::test]
    async fn click_past_loaded_rows_is_ignored() {
        let store = Store::with_docs(3);
        let engine = engine(&store);
        engine.load().await.unwrap();
        assert!(engine.click(4, ClickModifiers::NONE).is_none());
        assert!(!engine.has_selection());
    }

    #[tokio::test]
    async fn bulk_delete_removes_eligible_and_keeps_the_rest_selected() {
        let store = Store::with_docs(12);
        let engine = engine(&store);
        engine.load().await.unwrap();
        engine.add_to_selection(engine.pagination().visible_ids());
        let (events, _sub) = record_events(&engine);

        let report = engine.bulk_delete().await.unwrap();
        assert_eq!(report.deleted().len(), 4);
        assert!(report.failed().is_empty());
        assert_eq!(report.validation.ineligible.len(), 1);
        assert_eq!(report.validation.ineligible[0].0, ItemId::from(0u32));

        assert_eq!(engine.selection().selected_ids(), vec![ItemId::from(0u32)]);
        assert_eq!(store.docs.borrow().len(), 8);
        let visible: Vec<ItemId> = [0u32, 5, 6, 7, 8].into_iter().map(ItemId::from).collect();
        assert_eq!(engine.pagination().visible_ids(), visible);

        let events = events.borrow();
        assert!(events.contains(&EngineEvent::BulkActionInitiated {
            action: BulkAction::Delete,
            count: 4,
        }));
        assert!(events.contains(&EngineEvent::BulkActionCompleted {
            action: BulkAction::Delete,
            successful: 4,
            failed: 0,
        }));
    }

    #[tokio::test]
    async fn bulk_delete_with_nothing_eligible_makes_no_request() {
        let store = Store::with_docs(12);
        let engine = engine(&store);
        engine.load().await.unwrap();
        engine.add_to_selection([0u32]);
        let (events, _sub) = record_events(&engine);

        let report = engine.bulk_delete().await.unwrap();
        assert!(report.outcome.is_none());
        assert_eq!(store.deletes.get(), 0);
        assert!(events.borrow().iter().any(|event| matches!(
            event,
            EngineEvent::BulkActionFailed {
                action: BulkAction::Delete,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn bulk_delete_on_last_page_steps_back_when_emptied() {
        let store = Store::with_docs(11);
        let engine = ListEngine::builder(Rc::clone(&store) as Rc<dyn DataSource<Doc>>)
            .config(EngineConfig::default().with_page_size(5))
            .clock(Rc::new(ManualClock::new()))
            .bulk_api(Rc::clone(&store) as Rc<dyn BulkApi>)
            .build()
            .unwrap();
        engine.go_to_page(3).await.unwrap();
        assert_eq!(engine.pagination().visible_ids(), vec![ItemId::from(10u32)]);
        engine.add_to_selection([10u32]);

        let report = engine.bulk_delete().await.unwrap();
        assert_eq!(report.deleted(), &[ItemId::from(10u32)]);
        assert_eq!(engine.page_info().current_page, 2);
        assert_eq!(engine.page_info().total_pages, 2);
    }

    #[tokio::test]
    async fn filter_loaded_is_memoized() {
        let store = Store::with_docs(12);
        let engine = engine(&store);
        engine.load().await.unwrap();

        assert_eq!(engine.filter_loaded("processing"), vec![ItemId::from(0u32)]);
        assert_eq!(engine.filter_loaded("processing"), vec![ItemId::from(0u32)]);
        let stats = engine.memo().filters().stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);

        engine.next_page().await.unwrap();
        assert_eq!(engine.filter_loaded("processing"), vec![ItemId::from(5u32)]);
    }

    #[tokio::test]
    async fn scroll_offset_for_visible_ids() {
        let store = Store::with_docs(12);
        let engine = engine(&store);
        engine.load().await.unwrap();
        // Five rows of 10px in a 50px container: nothing to scroll.
        assert_eq!(engine.scroll_offset_for(&ItemId::from(4u32)), Some(0.0));
        assert_eq!(engine.scroll_offset_for(&ItemId::from(9u32)), None);

        let rendered = engine.with_visible_slice(0.0, |slice| slice.items.len());
        assert_eq!(rendered, 5);
        assert!(engine.performance_report().samples >= 1);
    }

    #[tokio::test]
    async fn filter_change_drops_derived_caches() {
        let store = Store::with_docs(12);
        let engine = engine(&store);
        engine.load().await.unwrap();
        engine.filter_loaded("done");
        assert_eq!(engine.memo().filters().len(), 1);

        let mut filters = Filters::new();
        filters.insert("status".into(), "done".into());
        engine.update_filters(filters).await.unwrap();
        assert!(engine.memo().filters().is_empty());
        assert_eq!(engine.loaded_page_count(), 1);
    }
}
