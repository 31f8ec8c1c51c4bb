#![forbid(unsafe_code)]

//! Selection state for the loaded list.
//!
//! [`SelectionTracker`] exclusively owns the selected-id set, the range
//! anchor, the last selected index, and manage mode. Ids are stored
//! normalized ([`ItemId`]); liveness is not checked on insert.
//!
//! All methods take `&self`. State sits in a `RefCell` that is released
//! before events go out, so subscribers may read the tracker from inside a
//! callback.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashSet;
use sift_cache::{MemoRegistry, snapshot_key, summary_key};
use sift_core::{
    BulkAction, BulkValidation, EligibilityRules, EngineEvent, EventBus, Item, ItemId,
    SelectionStats,
};
use tracing::debug;

#[derive(Debug, Default)]
struct SelectionState {
    selected: FxHashSet<ItemId>,
    /// Loaded, filtered sequence that indices refer to.
    filtered: Vec<ItemId>,
    anchor_index: Option<usize>,
    last_selected_index: Option<usize>,
    manage_mode: bool,
    stats: SelectionStats,
}

impl SelectionState {
    fn in_bounds(&self, index: usize) -> bool {
        index < self.filtered.len()
    }
}

/// Owner of the selection set and its indices.
pub struct SelectionTracker {
    state: RefCell<SelectionState>,
    events: EventBus,
    memo: Option<Rc<MemoRegistry>>,
}

impl fmt::Debug for SelectionTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("SelectionTracker")
            .field("selected", &state.selected.len())
            .field("filtered", &state.filtered.len())
            .field("anchor_index", &state.anchor_index)
            .field("manage_mode", &state.manage_mode)
            .finish_non_exhaustive()
    }
}

impl SelectionTracker {
    #[must_use]
    pub fn new(events: EventBus) -> Self {
        Self {
            state: RefCell::new(SelectionState::default()),
            events,
            memo: None,
        }
    }

    /// Route eligibility, stats, and validation through `memo`.
    #[must_use]
    pub fn with_memo(mut self, memo: Rc<MemoRegistry>) -> Self {
        self.memo = Some(memo);
        self
    }

    // ------------------------------------------------------------------
    // Set mutation
    // ------------------------------------------------------------------

    /// Add ids. Returns how many were newly selected.
    pub fn add_to_selection<I>(&self, ids: impl IntoIterator<Item = I>) -> usize
    where
        I: Into<ItemId>,
    {
        let (changed, count) = {
            let mut state = self.state.borrow_mut();
            let changed: Vec<ItemId> = ids
                .into_iter()
                .map(Into::into)
                .filter(|id| state.selected.insert(id.clone()))
                .collect();
            (changed, state.selected.len())
        };
        self.notify(changed, count)
    }

    /// Remove ids. Returns how many were actually removed.
    pub fn remove_from_selection<I>(&self, ids: impl IntoIterator<Item = I>) -> usize
    where
        I: Into<ItemId>,
    {
        let (changed, count) = {
            let mut state = self.state.borrow_mut();
            let changed: Vec<ItemId> = ids
                .into_iter()
                .map(Into::into)
                .filter(|id| state.selected.remove(id))
                .collect();
            (changed, state.selected.len())
        };
        self.notify(changed, count)
    }

    /// Deselect everything and drop the range anchor.
    pub fn clear_selection(&self) -> usize {
        let changed = {
            let mut state = self.state.borrow_mut();
            state.anchor_index = None;
            state.last_selected_index = None;
            let mut changed: Vec<ItemId> = state.selected.drain().collect();
            changed.sort();
            changed
        };
        self.notify(changed, 0)
    }

    /// Flip one id. Returns whether it is selected afterwards.
    pub fn toggle(&self, id: impl Into<ItemId>) -> bool {
        let id = id.into();
        let (selected, count) = {
            let mut state = self.state.borrow_mut();
            let selected = if state.selected.remove(&id) {
                false
            } else {
                state.selected.insert(id.clone());
                true
            };
            (selected, state.selected.len())
        };
        self.notify(vec![id], count);
        selected
    }

    /// Replace the selection with `id` at `index` and anchor there.
    pub fn select_only(&self, id: impl Into<ItemId>, index: usize) {
        let id = id.into();
        let (changed, count) = {
            let mut state = self.state.borrow_mut();
            let was_selected = state.selected.contains(&id);
            let mut changed: Vec<ItemId> = state
                .selected
                .drain()
                .filter(|existing| *existing != id)
                .collect();
            changed.sort();
            if !was_selected {
                changed.push(id.clone());
            }
            state.selected.insert(id);
            if state.in_bounds(index) {
                state.anchor_index = Some(index);
                state.last_selected_index = Some(index);
            }
            (changed, state.selected.len())
        };
        self.notify(changed, count);
    }

    /// Select the closed interval between two indices of the loaded sequence.
    ///
    /// Order-insensitive. `resolver` maps an index to its id; indices it
    /// cannot resolve are skipped. Returns how many ids were newly selected.
    pub fn select_range_by_index(
        &self,
        start: usize,
        end: usize,
        resolver: impl Fn(usize) -> Option<ItemId>,
    ) -> usize {
        let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
        let (changed, count) = {
            let mut state = self.state.borrow_mut();
            let mut changed = Vec::new();
            for index in lo..=hi {
                if let Some(id) = resolver(index) {
                    if state.selected.insert(id.clone()) {
                        changed.push(id);
                    }
                }
            }
            let last = state.in_bounds(end).then_some(end);
            state.last_selected_index = last;
            (changed, state.selected.len())
        };
        debug!(start, end, added = changed.len(), "range selection");
        self.notify(changed, count)
    }

    /// Range select over the tracker's own loaded sequence.
    pub fn select_range_in_filtered(&self, start: usize, end: usize) -> usize {
        let filtered = self.filtered_ids();
        self.select_range_by_index(start, end, |i| filtered.get(i).cloned())
    }

    // ------------------------------------------------------------------
    // Loaded universe and indices
    // ------------------------------------------------------------------

    /// Replace the loaded, filtered sequence. Indices that no longer fit are
    /// reset; the selection itself is untouched.
    pub fn set_filtered_sessions<I>(&self, ids: impl IntoIterator<Item = I>)
    where
        I: Into<ItemId>,
    {
        let mut state = self.state.borrow_mut();
        state.filtered = ids.into_iter().map(Into::into).collect();
        if state.anchor_index.is_some_and(|i| !state.in_bounds(i)) {
            state.anchor_index = None;
        }
        if state.last_selected_index.is_some_and(|i| !state.in_bounds(i)) {
            state.last_selected_index = None;
        }
    }

    #[must_use]
    pub fn filtered_ids(&self) -> Vec<ItemId> {
        self.state.borrow().filtered.clone()
    }

    #[must_use]
    pub fn filtered_len(&self) -> usize {
        self.state.borrow().filtered.len()
    }

    #[must_use]
    pub fn anchor_index(&self) -> Option<usize> {
        self.state.borrow().anchor_index
    }

    #[must_use]
    pub fn last_selected_index(&self) -> Option<usize> {
        self.state.borrow().last_selected_index
    }

    /// Set the range anchor. Out-of-range indices are ignored.
    pub fn set_anchor(&self, index: usize) -> bool {
        let mut state = self.state.borrow_mut();
        if !state.in_bounds(index) {
            return false;
        }
        state.anchor_index = Some(index);
        state.last_selected_index = Some(index);
        true
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    #[must_use]
    pub fn is_selected(&self, id: &ItemId) -> bool {
        self.state.borrow().selected.contains(id)
    }

    #[must_use]
    pub fn selected_count(&self) -> usize {
        self.state.borrow().selected.len()
    }

    #[must_use]
    pub fn has_selection(&self) -> bool {
        !self.state.borrow().selected.is_empty()
    }

    /// Selected ids in sorted order.
    #[must_use]
    pub fn selected_ids(&self) -> Vec<ItemId> {
        let mut ids: Vec<ItemId> = self.state.borrow().selected.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Stats from the last [`update_selection_stats`](Self::update_selection_stats).
    #[must_use]
    pub fn stats(&self) -> SelectionStats {
        self.state.borrow().stats
    }

    /// Something is selected and, if stats were computed, at least one
    /// selected item is eligible.
    #[must_use]
    pub fn can_perform_bulk_action(&self) -> bool {
        let state = self.state.borrow();
        if state.selected.is_empty() {
            return false;
        }
        state.stats.action.is_none() || state.stats.eligible > 0
    }

    // ------------------------------------------------------------------
    // Eligibility
    // ------------------------------------------------------------------

    /// Count eligible and ineligible items among `items ∩ selection`.
    pub fn update_selection_stats<T: Item>(
        &self,
        items: &[T],
        action: BulkAction,
        rules: &dyn EligibilityRules<T>,
    ) -> SelectionStats {
        let selected: Vec<&T> = {
            let state = self.state.borrow();
            items
                .iter()
                .filter(|item| state.selected.contains(&item.id()))
                .collect()
        };

        let compute = || {
            let eligible = selected
                .iter()
                .filter(|item| self.permits(**item, action, rules))
                .count();
            SelectionStats {
                action: Some(action),
                total: selected.len(),
                eligible,
                ineligible: selected.len() - eligible,
            }
        };

        let stats = match &self.memo {
            Some(memo) => {
                // Compact key: a false hit here only yields a stale count.
                let ids: Vec<ItemId> = selected.iter().map(|item| item.id()).collect();
                let key = summary_key(&format!("stats|{action}|of={}", items.len()), &ids);
                memo.stats().get_or_compute(&key, compute)
            }
            None => compute(),
        };
        self.state.borrow_mut().stats = stats;
        stats
    }

    /// Re-check every selected id before running `action`.
    ///
    /// `lookup` resolves an id to its current item; ids it cannot resolve
    /// are reported as stale.
    pub fn validate_for_action<T: Item>(
        &self,
        lookup: impl Fn(&ItemId) -> Option<T>,
        action: BulkAction,
        rules: &dyn EligibilityRules<T>,
    ) -> BulkValidation {
        let resolved: Vec<(ItemId, Option<T>)> = self
            .selected_ids()
            .into_iter()
            .map(|id| {
                let item = lookup(&id);
                (id, item)
            })
            .collect();

        let compute = || {
            let mut validation = BulkValidation::default();
            for (id, item) in &resolved {
                match item {
                    None => validation.stale.push(id.clone()),
                    Some(item) if self.permits(item, action, rules) => {
                        validation.eligible.push(id.clone());
                    }
                    Some(item) => {
                        let reason = rules
                            .ineligible_reason(item, action)
                            .unwrap_or_else(|| format!("cannot {action} in status {}", item.status()));
                        validation.ineligible.push((id.clone(), reason));
                    }
                }
            }
            validation
        };

        match &self.memo {
            Some(memo) => {
                let key = snapshot_key(
                    &format!("validate|{action}"),
                    resolved
                        .iter()
                        .map(|(id, item)| (id, item.as_ref().map(Item::status))),
                );
                memo.validation().get_or_compute(&key, compute)
            }
            None => compute(),
        }
    }

    fn permits<T: Item>(
        &self,
        item: &T,
        action: BulkAction,
        rules: &dyn EligibilityRules<T>,
    ) -> bool {
        match &self.memo {
            Some(memo) => memo.check_eligibility(item, action, rules),
            None => rules.permits(item, action),
        }
    }

    // ------------------------------------------------------------------
    // Manage mode
    // ------------------------------------------------------------------

    #[must_use]
    pub fn manage_mode(&self) -> bool {
        self.state.borrow().manage_mode
    }

    /// Flip manage mode. Leaving it clears the selection; entering it never
    /// pre-selects. Returns the new mode.
    pub fn toggle_manage_mode(&self) -> bool {
        let enabled = !self.manage_mode();
        self.set_manage_mode(enabled);
        enabled
    }

    pub fn set_manage_mode(&self, enabled: bool) {
        let was = std::mem::replace(&mut self.state.borrow_mut().manage_mode, enabled);
        if was == enabled {
            return;
        }
        if enabled {
            self.events.emit(EngineEvent::ManageModeEntered);
        } else {
            self.clear_selection();
            self.events.emit(EngineEvent::ManageModeExited);
        }
    }

    fn notify(&self, changed: Vec<ItemId>, selected_count: usize) -> usize {
        let n = changed.len();
        if n > 0 {
            self.events.emit(EngineEvent::SelectionChanged {
                selected_count,
                changed,
            });
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::{EventEnvelope, ManualClock, MemoConfig};
    use std::cell::RefCell as TestCell;

    #[derive(Clone, Debug)]
    struct Row {
        id: u32,
        status: &'static str,
    }

    impl Item for Row {
        fn id(&self) -> ItemId {
            ItemId::from(self.id)
        }

        fn status(&self) -> &str {
            self.status
        }
    }

    struct DoneOnly;

    impl EligibilityRules<Row> for DoneOnly {
        fn can_delete(&self, item: &Row) -> bool {
            item.status == "done"
        }

        fn ineligible_reason(&self, item: &Row, _action: BulkAction) -> Option<String> {
            (item.status == "running").then(|| "still running".to_string())
        }
    }

    fn tracker() -> (SelectionTracker, EventBus) {
        let bus = EventBus::new(Rc::new(ManualClock::new()));
        (SelectionTracker::new(bus.clone()), bus)
    }

    fn rows() -> Vec<Row> {
        vec![
            Row { id: 1, status: "done" },
            Row { id: 2, status: "running" },
            Row { id: 3, status: "done" },
            Row { id: 4, status: "failed" },
        ]
    }

    #[test]
    fn add_is_idempotent_and_normalizes() {
        let (sel, _) = tracker();
        assert_eq!(sel.add_to_selection([ItemId::from(7)]), 1);
        assert_eq!(sel.add_to_selection(["7"]), 0);
        assert_eq!(sel.add_to_selection(vec!["7".to_string(), "8".to_string()]), 1);
        assert_eq!(sel.selected_count(), 2);
        assert!(sel.is_selected(&ItemId::from("8")));
    }

    #[test]
    fn remove_missing_is_noop() {
        let (sel, _) = tracker();
        sel.add_to_selection(["a", "b"]);
        assert_eq!(sel.remove_from_selection(["c"]), 0);
        assert_eq!(sel.remove_from_selection(["a", "a"]), 1);
        assert_eq!(sel.selected_ids(), vec![ItemId::from("b")]);
    }

    #[test]
    fn events_only_on_change() {
        let (sel, bus) = tracker();
        let seen: Rc<TestCell<Vec<usize>>> = Rc::default();
        let sink = Rc::clone(&seen);
        let _sub = bus.subscribe(move |env: &EventEnvelope| {
            if let EngineEvent::SelectionChanged { selected_count, .. } = env.event {
                sink.borrow_mut().push(selected_count);
            }
        });

        sel.add_to_selection(["a", "b"]);
        sel.add_to_selection(["a"]);
        sel.remove_from_selection(["z"]);
        sel.toggle("a");
        sel.clear_selection();
        sel.clear_selection();
        assert_eq!(*seen.borrow(), vec![2, 1, 0]);
    }

    #[test]
    fn subscriber_can_read_tracker_during_emit() {
        let bus = EventBus::new(Rc::new(ManualClock::new()));
        let sel = Rc::new(SelectionTracker::new(bus.clone()));
        let observed = Rc::new(TestCell::new(0));
        let (reader, sink) = (Rc::clone(&sel), Rc::clone(&observed));
        let _sub = bus.subscribe(move |_| {
            *sink.borrow_mut() = reader.selected_count();
        });
        sel.add_to_selection(["x", "y"]);
        assert_eq!(*observed.borrow(), 2);
    }

    #[test]
    fn range_selection_is_order_insensitive() {
        let (sel, _) = tracker();
        let ids: Vec<ItemId> = (0..10).map(ItemId::from).collect();
        sel.set_filtered_sessions(ids.clone());

        assert_eq!(sel.select_range_by_index(2, 7, |i| ids.get(i).cloned()), 6);
        let forward = sel.selected_ids();
        sel.clear_selection();
        assert_eq!(sel.select_range_by_index(7, 2, |i| ids.get(i).cloned()), 6);
        assert_eq!(sel.selected_ids(), forward);
        assert_eq!(sel.last_selected_index(), Some(2));
    }

    #[test]
    fn range_skips_unresolvable_indices() {
        let (sel, _) = tracker();
        let ids: Vec<ItemId> = (0..4).map(ItemId::from).collect();
        sel.set_filtered_sessions(ids.clone());
        assert_eq!(sel.select_range_in_filtered(1, 9), 3);
        assert_eq!(sel.selected_count(), 3);
        assert_eq!(sel.last_selected_index(), None);
    }

    #[test]
    fn filtered_update_resets_out_of_bounds_anchor() {
        let (sel, _) = tracker();
        sel.set_filtered_sessions((0..20).map(ItemId::from));
        assert!(sel.set_anchor(15));
        sel.add_to_selection(["3"]);

        sel.set_filtered_sessions((0..20).map(ItemId::from));
        assert_eq!(sel.anchor_index(), Some(15));

        sel.set_filtered_sessions((0..10).map(ItemId::from));
        assert_eq!(sel.anchor_index(), None);
        assert_eq!(sel.last_selected_index(), None);
        assert_eq!(sel.selected_count(), 1);
        assert!(!sel.set_anchor(10));
    }

    #[test]
    fn select_only_replaces_selection() {
        let (sel, _) = tracker();
        sel.set_filtered_sessions((0..5).map(ItemId::from));
        sel.add_to_selection(["0", "1", "2"]);
        sel.select_only("4", 4);
        assert_eq!(sel.selected_ids(), vec![ItemId::from(4)]);
        assert_eq!(sel.anchor_index(), Some(4));
    }

    #[test]
    fn stats_count_selected_items_only() {
        let (sel, _) = tracker();
        sel.add_to_selection([1u32, 2, 3, 99]);
        let stats = sel.update_selection_stats(&rows(), BulkAction::Delete, &DoneOnly);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.eligible, 2);
        assert_eq!(stats.ineligible, 1);
        assert!(sel.can_perform_bulk_action());

        sel.remove_from_selection([1u32, 3]);
        let stats = sel.update_selection_stats(&rows(), BulkAction::Delete, &DoneOnly);
        assert_eq!(stats.eligible, 0);
        assert!(!sel.can_perform_bulk_action());
    }

    #[test]
    fn absent_predicates_allow() {
        let (sel, _) = tracker();
        sel.add_to_selection([2u32, 4]);
        let stats = sel.update_selection_stats(&rows(), BulkAction::Export, &DoneOnly);
        assert_eq!(stats.eligible, 2);
    }

    #[test]
    fn stats_are_memoized() {
        let clock = ManualClock::new();
        let memo = Rc::new(MemoRegistry::new(&MemoConfig::default(), Rc::new(clock.clone())));
        let sel = SelectionTracker::new(EventBus::new(Rc::new(clock))).with_memo(Rc::clone(&memo));
        sel.add_to_selection([1u32, 2]);

        sel.update_selection_stats(&rows(), BulkAction::Delete, &DoneOnly);
        sel.update_selection_stats(&rows(), BulkAction::Delete, &DoneOnly);
        let stats = memo.stats_for("stats").unwrap();
        assert_eq!((stats.hits, stats.misses), (1, 1));
        // Eligibility only evaluated on the first pass.
        assert_eq!(memo.stats_for("eligibility").unwrap().misses, 2);
    }

    #[test]
    fn validation_partitions_selection() {
        let (sel, _) = tracker();
        sel.add_to_selection([1u32, 2, 4, 50]);
        let rows = rows();
        let lookup = |id: &ItemId| rows.iter().find(|r| r.id() == *id).cloned();
        let validation = sel.validate_for_action(lookup, BulkAction::Delete, &DoneOnly);

        assert_eq!(validation.eligible, vec![ItemId::from(1)]);
        assert_eq!(
            validation.ineligible,
            vec![
                (ItemId::from(2), "still running".to_string()),
                (ItemId::from(4), "cannot delete in status failed".to_string()),
            ]
        );
        assert_eq!(validation.stale, vec![ItemId::from(50)]);
        assert!(validation.can_proceed());
    }

    fn memo_tracker() -> (SelectionTracker, Rc<MemoRegistry>) {
        let clock = ManualClock::new();
        let memo = Rc::new(MemoRegistry::new(&MemoConfig::default(), Rc::new(clock.clone())));
        let sel = SelectionTracker::new(EventBus::new(Rc::new(clock))).with_memo(Rc::clone(&memo));
        (sel, memo)
    }

    fn done_row(id: &ItemId) -> Option<Row> {
        id.as_str().parse().ok().map(|id| Row { id, status: "done" })
    }

    #[test]
    fn validation_tracks_a_swapped_tail_id() {
        let (sel, _) = memo_tracker();
        sel.add_to_selection(1u32..=6);
        let first = sel.validate_for_action(done_row, BulkAction::Delete, &DoneOnly);
        assert_eq!(first.eligible.len(), 6);

        sel.remove_from_selection([6u32]);
        sel.add_to_selection([7u32]);
        let second = sel.validate_for_action(done_row, BulkAction::Delete, &DoneOnly);
        let expected: Vec<ItemId> = [1u32, 2, 3, 4, 5, 7].into_iter().map(ItemId::from).collect();
        assert_eq!(second.eligible, expected);
    }

    #[test]
    fn validation_reuses_identical_snapshots_only() {
        let (sel, memo) = memo_tracker();
        sel.add_to_selection([1u32, 2]);
        sel.validate_for_action(done_row, BulkAction::Delete, &DoneOnly);
        sel.validate_for_action(done_row, BulkAction::Delete, &DoneOnly);

        let running = |id: &ItemId| done_row(id).map(|row| Row { status: "running", ..row });
        let validation = sel.validate_for_action(running, BulkAction::Delete, &DoneOnly);
        assert!(validation.eligible.is_empty());
        assert_eq!(validation.ineligible.len(), 2);

        let stats = memo.stats_for("validation").unwrap();
        assert_eq!((stats.hits, stats.misses), (1, 2));
    }

    #[test]
    fn manage_mode_exit_clears_selection() {
        let (sel, bus) = tracker();
        let names: Rc<TestCell<Vec<&'static str>>> = Rc::default();
        let sink = Rc::clone(&names);
        let _sub = bus.subscribe(move |env| sink.borrow_mut().push(env.event.name()));

        assert!(sel.toggle_manage_mode());
        assert!(!sel.has_selection());
        sel.add_to_selection(["a"]);
        assert!(!sel.toggle_manage_mode());
        assert!(!sel.has_selection());
        assert_eq!(
            *names.borrow(),
            vec![
                "manage_mode_entered",
                "selection_changed",
                "selection_changed",
                "manage_mode_exited"
            ]
        );
    }
}
