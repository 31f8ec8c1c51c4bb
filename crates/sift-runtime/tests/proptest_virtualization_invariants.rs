//! Property-based invariant tests for the list virtualizer and selection:
//!
//! 1. The render range lies inside the visible range, which lies inside `0..len`.
//! 2. The visible slice offset equals its first index times the row height.
//! 3. `scroll_offset_for_index` never exceeds the scrollable extent.
//! 4. Range selection is order-insensitive and selects `|a - b| + 1` ids.
//! 5. Re-adding selected ids never changes the selected count.

use proptest::prelude::*;
use sift_core::{EventBus, ItemId, ManualClock, ViewportConfig};
use sift_runtime::{ListVirtualizer, SelectionTracker};
use std::rc::Rc;

fn virtualizer(item_height: f64, container_height: f64, buffer_size: usize) -> ListVirtualizer {
    let config = ViewportConfig {
        item_height,
        container_height,
        buffer_size,
        ..ViewportConfig::default()
    };
    ListVirtualizer::new(config, Rc::new(ManualClock::new())).unwrap()
}

fn tracker(len: u32) -> SelectionTracker {
    let tracker = SelectionTracker::new(EventBus::new(Rc::new(ManualClock::new())));
    tracker.set_filtered_sessions(0..len);
    tracker
}

proptest! {
    #[test]
    fn ranges_nest_inside_the_sequence(
        item_height in 1.0f64..200.0,
        container_height in 0.0f64..2_000.0,
        buffer_size in 0usize..20,
        len in 0usize..500,
        scroll in -100.0f64..100_000.0,
    ) {
        let v = virtualizer(item_height, container_height, buffer_size);
        let render = v.render_range(scroll, len);
        let visible = v.visible_range(scroll, len);
        prop_assert!(render.start <= render.end);
        prop_assert!(visible.start <= render.start);
        prop_assert!(render.end <= visible.end);
        prop_assert!(visible.end <= len);
        prop_assert!(visible.len() <= render.len() + 2 * buffer_size);
    }

    #[test]
    fn slice_offset_matches_first_index(
        item_height in 1.0f64..100.0,
        buffer_size in 0usize..10,
        len in 0usize..300,
        scroll in 0.0f64..30_000.0,
    ) {
        let v = virtualizer(item_height, 400.0, buffer_size);
        let items: Vec<usize> = (0..len).collect();
        let slice = v.compute_visible_slice(scroll, &items);
        prop_assert_eq!(slice.items.len(), slice.visible_range.len());
        prop_assert_eq!(slice.offset, slice.visible_range.start as f64 * item_height);
        prop_assert_eq!(slice.total_extent, len as f64 * item_height);
        if let Some(first) = slice.items.first() {
            prop_assert_eq!(*first, slice.visible_range.start);
        }
    }

    #[test]
    fn scroll_target_stays_in_extent(
        item_height in 1.0f64..100.0,
        container_height in 0.0f64..1_000.0,
        len in 1usize..400,
        index in 0usize..800,
    ) {
        let v = virtualizer(item_height, container_height, 0);
        let offset = v.scroll_offset_for_index(index, len);
        let max_offset = (v.total_extent(len) - container_height).max(0.0);
        prop_assert!(offset >= 0.0);
        prop_assert!(offset <= max_offset);
    }

    #[test]
    fn range_selection_is_order_insensitive(len in 1u32..200, a in 0u32..200, b in 0u32..200) {
        let (a, b) = (a % len, b % len);
        let forward = tracker(len);
        let backward = tracker(len);
        forward.select_range_in_filtered(a as usize, b as usize);
        backward.select_range_in_filtered(b as usize, a as usize);
        prop_assert_eq!(forward.selected_ids(), backward.selected_ids());
        prop_assert_eq!(forward.selected_count() as u32, a.abs_diff(b) + 1);
    }

    #[test]
    fn re_adding_is_idempotent(ids in proptest::collection::vec(0u32..50, 0..60)) {
        let tracker = tracker(50);
        tracker.add_to_selection(ids.iter().copied());
        let count = tracker.selected_count();
        let added = tracker.add_to_selection(ids.iter().copied());
        prop_assert_eq!(added, 0);
        prop_assert_eq!(tracker.selected_count(), count);
        for id in &ids {
            prop_assert!(tracker.is_selected(&ItemId::from(*id)));
        }
    }
}
