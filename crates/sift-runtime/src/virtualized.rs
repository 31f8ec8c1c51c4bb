#![forbid(unsafe_code)]

//! Fixed-height list virtualization.
//!
//! [`ListVirtualizer`] turns a scroll offset and the loaded items into the
//! slice that actually needs to be rendered, and translates clicks on that
//! slice back into selection mutations.
//!
//! Two ranges are computed for every call:
//!
//! - the *render range*: rows intersecting the viewport,
//! - the *visible range*: the render range padded by `buffer_size` rows on
//!   each side and clamped to the item count. This is the slice handed back.
//!
//! # Example
//!
//! ```ignore
//! use sift_runtime::ListVirtualizer;
//!
//! let virt = ListVirtualizer::new(config.viewport.clone(), clock)?;
//! let slice = virt.compute_visible_slice(1200.0, &items);
//! assert_eq!(slice.items.len(), slice.visible_range.len());
//! ```

use std::cell::Cell as StdCell;
use std::ops::Range;
use std::rc::Rc;
use std::time::Duration;

use serde::Serialize;
use sift_core::{Clock, EngineError, ItemId, ViewportConfig};
use tracing::trace;
use web_time::Instant;

use crate::selection::SelectionTracker;

/// Exponential moving average weight for new render samples.
const RENDER_SMOOTHING: f64 = 0.1;

/// FPS figure reported when renders are too fast to measure.
const MAX_REPORTED_FPS: f64 = 1000.0;

/// The slice of items to render for one scroll position.
#[derive(Debug, Clone, PartialEq)]
pub struct VisibleSlice<'a, T> {
    /// Items in `visible_range`.
    pub items: &'a [T],
    /// Pixel offset of the first sliced item.
    pub offset: f64,
    /// Pixel height of the whole list.
    pub total_extent: f64,
    /// Buffered range (what `items` covers).
    pub visible_range: Range<usize>,
    /// Rows intersecting the viewport.
    pub render_range: Range<usize>,
}

/// Modifier keys held during a click.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClickModifiers {
    /// Extend from the anchor (shift).
    pub shift: bool,
    /// Toggle a single row (ctrl / meta).
    pub toggle: bool,
}

impl ClickModifiers {
    pub const NONE: Self = Self {
        shift: false,
        toggle: false,
    };
    pub const SHIFT: Self = Self {
        shift: true,
        toggle: false,
    };
    pub const TOGGLE: Self = Self {
        shift: false,
        toggle: true,
    };
}

/// What a click did to the selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// Selection replaced by one row.
    Single { index: usize, id: ItemId },
    /// One row flipped.
    Toggled {
        index: usize,
        id: ItemId,
        selected: bool,
    },
    /// Closed interval from the anchor added.
    Range {
        anchor: usize,
        index: usize,
        added: usize,
    },
}

#[derive(Debug, Clone, Copy, Default)]
struct RenderMetrics {
    avg_secs: f64,
    max: Duration,
    samples: u64,
}

/// Render cost summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PerformanceReport {
    pub avg_render_time: Duration,
    pub max_render_time: Duration,
    pub current_fps: f64,
    pub is_performant: bool,
    pub samples: u64,
}

/// Scroll-to-slice calculator for fixed-height rows.
pub struct ListVirtualizer {
    config: ViewportConfig,
    scroll_offset: f64,
    /// Updated from `&self` so slicing stays a read-only call.
    metrics: StdCell<RenderMetrics>,
    last_scroll_at: Option<Duration>,
    clock: Rc<dyn Clock>,
}

impl std::fmt::Debug for ListVirtualizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListVirtualizer")
            .field("config", &self.config)
            .field("scroll_offset", &self.scroll_offset)
            .field("metrics", &self.metrics.get())
            .field("last_scroll_at", &self.last_scroll_at)
            .finish()
    }
}

impl ListVirtualizer {
    /// Create a virtualizer for the given viewport.
    pub fn new(config: ViewportConfig, clock: Rc<dyn Clock>) -> Result<Self, EngineError> {
        if !config.item_height.is_finite() || config.item_height <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "item_height must be positive, got {}",
                config.item_height
            )));
        }
        Ok(Self {
            config,
            scroll_offset: 0.0,
            metrics: StdCell::new(RenderMetrics::default()),
            last_scroll_at: None,
            clock,
        })
    }

    /// Set buffer rows per side.
    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.config.buffer_size = buffer_size;
        self
    }

    #[must_use]
    pub fn item_height(&self) -> f64 {
        self.config.item_height
    }

    #[must_use]
    pub fn container_height(&self) -> f64 {
        self.config.container_height
    }

    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.config.buffer_size
    }

    /// Resize the viewport. Negative heights clamp to zero.
    pub fn set_container_height(&mut self, height: f64) {
        self.config.container_height = sanitize(height);
    }

    /// Last recorded scroll offset.
    #[must_use]
    pub fn scroll_offset(&self) -> f64 {
        self.scroll_offset
    }

    /// Pixel height of `len` rows.
    #[must_use]
    pub fn total_extent(&self, len: usize) -> f64 {
        len as f64 * self.config.item_height
    }

    /// Rows intersecting the viewport at `scroll_offset`.
    #[must_use]
    pub fn render_range(&self, scroll_offset: f64, len: usize) -> Range<usize> {
        let height = self.config.item_height;
        let start = ((sanitize(scroll_offset) / height).floor() as usize).min(len);
        let rows = (self.config.container_height / height).ceil() as usize;
        let end = start.saturating_add(rows).min(len);
        start..end
    }

    /// Render range padded by `buffer_size` rows per side.
    #[must_use]
    pub fn visible_range(&self, scroll_offset: f64, len: usize) -> Range<usize> {
        let render = self.render_range(scroll_offset, len);
        let start = render.start.saturating_sub(self.config.buffer_size);
        let end = render.end.saturating_add(self.config.buffer_size).min(len);
        start..end
    }

    /// Slice `items` for `scroll_offset` and record the cost of doing so.
    pub fn compute_visible_slice<'a, T>(
        &self,
        scroll_offset: f64,
        items: &'a [T],
    ) -> VisibleSlice<'a, T> {
        let started = Instant::now();

        let len = items.len();
        let render_range = self.render_range(scroll_offset, len);
        let visible_range = self.visible_range(scroll_offset, len);
        let slice = VisibleSlice {
            items: &items[visible_range.clone()],
            offset: visible_range.start as f64 * self.config.item_height,
            total_extent: self.total_extent(len),
            visible_range,
            render_range,
        };

        self.record_render(started.elapsed());
        slice
    }

    /// Slice at the last recorded scroll offset.
    pub fn current_slice<'a, T>(&self, items: &'a [T]) -> VisibleSlice<'a, T> {
        self.compute_visible_slice(self.scroll_offset, items)
    }

    /// Scroll offset that brings `index` into view, clamped to the scrollable extent.
    #[must_use]
    pub fn scroll_offset_for_index(&self, index: usize, len: usize) -> f64 {
        if len == 0 {
            return 0.0;
        }
        let max_offset = (self.total_extent(len) - self.config.container_height).max(0.0);
        (index.min(len - 1) as f64 * self.config.item_height).min(max_offset)
    }

    /// Record a scroll event. Slicing never waits on this.
    pub fn record_scroll(&mut self, offset: f64) {
        self.scroll_offset = sanitize(offset);
        self.last_scroll_at = Some(self.clock.now());
    }

    /// Returns the settled offset once no scroll has been recorded for the
    /// debounce window. Fires once per burst.
    pub fn poll_scroll_end(&mut self) -> Option<f64> {
        let at = self.last_scroll_at?;
        let quiet = Duration::from_millis(self.config.scroll_debounce_ms);
        if self.clock.now().saturating_sub(at) < quiet {
            return None;
        }
        self.last_scroll_at = None;
        trace!(offset = self.scroll_offset, "scroll settled");
        Some(self.scroll_offset)
    }

    /// Apply a click on row `relative_index` of the current slice.
    ///
    /// `ids` is the loaded, filtered sequence the slice was computed over.
    /// Clicks past the loaded rows return `None` and change nothing.
    pub fn handle_click(
        &self,
        relative_index: usize,
        modifiers: ClickModifiers,
        ids: &[ItemId],
        selection: &SelectionTracker,
    ) -> Option<ClickOutcome> {
        let visible = self.visible_range(self.scroll_offset, ids.len());
        let index = visible.start.checked_add(relative_index)?;
        let id = ids.get(index)?.clone();

        let anchor = if modifiers.shift {
            selection.anchor_index()
        } else {
            None
        };
        if let Some(anchor) = anchor {
            let added =
                selection.select_range_by_index(anchor, index, |i| ids.get(i).cloned());
            return Some(ClickOutcome::Range {
                anchor,
                index,
                added,
            });
        }

        if modifiers.toggle {
            let selected = selection.toggle(id.clone());
            selection.set_anchor(index);
            return Some(ClickOutcome::Toggled {
                index,
                id,
                selected,
            });
        }

        selection.select_only(id.clone(), index);
        Some(ClickOutcome::Single { index, id })
    }

    /// Render cost so far.
    #[must_use]
    pub fn performance_report(&self) -> PerformanceReport {
        let metrics = self.metrics.get();
        let avg = Duration::from_secs_f64(metrics.avg_secs.max(0.0));
        let current_fps = if metrics.samples == 0 {
            0.0
        } else if metrics.avg_secs > 0.0 {
            (1.0 / metrics.avg_secs).min(MAX_REPORTED_FPS)
        } else {
            MAX_REPORTED_FPS
        };
        PerformanceReport {
            avg_render_time: avg,
            max_render_time: metrics.max,
            current_fps,
            is_performant: avg <= Duration::from_millis(self.config.frame_budget_ms),
            samples: metrics.samples,
        }
    }

    /// Forget recorded render samples.
    pub fn reset_metrics(&self) {
        self.metrics.set(RenderMetrics::default());
    }

    fn record_render(&self, elapsed: Duration) {
        let mut metrics = self.metrics.get();
        let sample = elapsed.as_secs_f64();
        metrics.avg_secs = if metrics.samples == 0 {
            sample
        } else {
            metrics.avg_secs * (1.0 - RENDER_SMOOTHING) + sample * RENDER_SMOOTHING
        };
        metrics.max = metrics.max.max(elapsed);
        metrics.samples = metrics.samples.saturating_add(1);
        self.metrics.set(metrics);
    }
}

/// NaN and negative offsets clamp to zero.
fn sanitize(value: f64) -> f64 {
    if value.is_nan() || value < 0.0 {
        0.0
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sift_core::{EventBus, ManualClock};

    fn virt(buffer: usize) -> (ListVirtualizer, ManualClock) {
        let clock = ManualClock::new();
        let config = ViewportConfig {
            item_height: 60.0,
            container_height: 600.0,
            buffer_size: buffer,
            ..ViewportConfig::default()
        };
        let v = ListVirtualizer::new(config, Rc::new(clock.clone())).unwrap();
        (v, clock)
    }

    fn ids(n: usize) -> Vec<ItemId> {
        (0..n).map(ItemId::from).collect()
    }

    fn tracker(clock: &ManualClock) -> SelectionTracker {
        SelectionTracker::new(EventBus::new(Rc::new(clock.clone())))
    }

    #[test]
    fn test_render_range_at_top() {
        let (v, _) = virt(5);
        assert_eq!(v.render_range(0.0, 100), 0..10);
        assert_eq!(v.visible_range(0.0, 100), 0..15);
    }

    #[test]
    fn test_visible_range_buffers_both_sides() {
        let (v, _) = virt(5);
        // 1230 / 60 = 20.5 -> row 20
        assert_eq!(v.render_range(1230.0, 100), 20..30);
        assert_eq!(v.visible_range(1230.0, 100), 15..35);
    }

    #[test]
    fn test_ranges_clamp_at_end() {
        let (v, _) = virt(5);
        assert_eq!(v.render_range(5700.0, 100), 95..100);
        assert_eq!(v.visible_range(5700.0, 100), 90..100);
        // Past the end.
        assert_eq!(v.render_range(1_000_000.0, 100), 100..100);
        assert_eq!(v.visible_range(1_000_000.0, 100), 95..100);
    }

    #[test]
    fn test_negative_and_nan_offsets_clamp() {
        let (v, _) = virt(0);
        assert_eq!(v.render_range(-500.0, 50), 0..10);
        assert_eq!(v.render_range(f64::NAN, 50), 0..10);
    }

    #[test]
    fn test_empty_items() {
        let (v, _) = virt(5);
        let items: Vec<u32> = Vec::new();
        let slice = v.compute_visible_slice(300.0, &items);
        assert!(slice.items.is_empty());
        assert_eq!(slice.total_extent, 0.0);
        assert_eq!(slice.visible_range, 0..0);
    }

    #[test]
    fn test_slice_offset_and_extent() {
        let (v, _) = virt(2);
        let items: Vec<u32> = (0..40).collect();
        let slice = v.compute_visible_slice(600.0, &items);
        assert_eq!(slice.render_range, 10..20);
        assert_eq!(slice.visible_range, 8..22);
        assert_eq!(slice.items.len(), 14);
        assert_eq!(slice.items[0], 8);
        assert_eq!(slice.offset, 480.0);
        assert_eq!(slice.total_extent, 2400.0);
    }

    #[test]
    fn test_rejects_non_positive_item_height() {
        let config = ViewportConfig {
            item_height: 0.0,
            ..ViewportConfig::default()
        };
        let err = ListVirtualizer::new(config, Rc::new(ManualClock::new())).unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn test_scroll_offset_for_index_clamps() {
        let (v, _) = virt(5);
        assert_eq!(v.scroll_offset_for_index(3, 100), 180.0);
        // 100 rows * 60 - 600 = 5400 max
        assert_eq!(v.scroll_offset_for_index(99, 100), 5400.0);
        assert_eq!(v.scroll_offset_for_index(500, 100), 5400.0);
        assert_eq!(v.scroll_offset_for_index(4, 5), 0.0);
        assert_eq!(v.scroll_offset_for_index(0, 0), 0.0);
    }

    #[test]
    fn test_scroll_end_debounce() {
        let (mut v, clock) = virt(5);
        v.record_scroll(120.0);
        clock.advance(Duration::from_millis(10));
        assert_eq!(v.poll_scroll_end(), None);
        v.record_scroll(240.0);
        clock.advance(Duration::from_millis(10));
        assert_eq!(v.poll_scroll_end(), None);
        clock.advance(Duration::from_millis(6));
        assert_eq!(v.poll_scroll_end(), Some(240.0));
        // Fires once per burst.
        assert_eq!(v.poll_scroll_end(), None);
    }

    #[test]
    fn test_performance_report_tracks_samples() {
        let (v, _) = virt(5);
        let report = v.performance_report();
        assert_eq!(report.samples, 0);
        assert_eq!(report.current_fps, 0.0);
        assert!(report.is_performant);

        let items: Vec<u32> = (0..1000).collect();
        for offset in 0..10 {
            let _ = v.compute_visible_slice(offset as f64 * 60.0, &items);
        }
        let report = v.performance_report();
        assert_eq!(report.samples, 10);
        assert!(report.max_render_time >= report.avg_render_time);
        assert!(report.current_fps > 0.0);

        v.reset_metrics();
        assert_eq!(v.performance_report().samples, 0);
    }

    #[test]
    fn test_plain_click_selects_one_and_sets_anchor() {
        let (mut v, clock) = virt(0);
        let sel = tracker(&clock);
        let ids = ids(30);
        sel.set_filtered_sessions(ids.clone());
        v.record_scroll(600.0);

        let outcome = v.handle_click(2, ClickModifiers::NONE, &ids, &sel);
        assert_eq!(
            outcome,
            Some(ClickOutcome::Single {
                index: 12,
                id: ItemId::from(12)
            })
        );
        assert_eq!(sel.selected_ids(), vec![ItemId::from(12)]);
        assert_eq!(sel.anchor_index(), Some(12));
    }

    #[test]
    fn test_toggle_click_flips_one() {
        let (v, clock) = virt(0);
        let sel = tracker(&clock);
        let ids = ids(10);
        sel.set_filtered_sessions(ids.clone());
        sel.add_to_selection(["1"]);

        let outcome = v.handle_click(3, ClickModifiers::TOGGLE, &ids, &sel);
        assert!(matches!(outcome, Some(ClickOutcome::Toggled { selected: true, .. })));
        assert_eq!(sel.selected_count(), 2);

        let outcome = v.handle_click(3, ClickModifiers::TOGGLE, &ids, &sel);
        assert!(matches!(outcome, Some(ClickOutcome::Toggled { selected: false, .. })));
        assert_eq!(sel.selected_ids(), vec![ItemId::from(1)]);
    }

    #[test]
    fn test_shift_click_selects_closed_range() {
        let (v, clock) = virt(0);
        let sel = tracker(&clock);
        let ids = ids(10);
        sel.set_filtered_sessions(ids.clone());

        v.handle_click(7, ClickModifiers::NONE, &ids, &sel);
        let outcome = v.handle_click(2, ClickModifiers::SHIFT, &ids, &sel);
        assert_eq!(
            outcome,
            Some(ClickOutcome::Range {
                anchor: 7,
                index: 2,
                added: 5
            })
        );
        assert_eq!(sel.selected_count(), 6);
        assert_eq!(sel.last_selected_index(), Some(2));
    }

    #[test]
    fn test_shift_click_without_anchor_is_single_select() {
        let (v, clock) = virt(0);
        let sel = tracker(&clock);
        let ids = ids(10);
        sel.set_filtered_sessions(ids.clone());

        let outcome = v.handle_click(4, ClickModifiers::SHIFT, &ids, &sel);
        assert!(matches!(outcome, Some(ClickOutcome::Single { index: 4, .. })));
        assert_eq!(sel.anchor_index(), Some(4));
    }

    #[test]
    fn test_click_past_loaded_rows_is_noop() {
        let (v, clock) = virt(0);
        let sel = tracker(&clock);
        let ids = ids(3);
        sel.set_filtered_sessions(ids.clone());
        assert_eq!(v.handle_click(3, ClickModifiers::NONE, &ids, &sel), None);
        assert_eq!(v.handle_click(usize::MAX, ClickModifiers::NONE, &ids, &sel), None);
        assert!(!sel.has_selection());
    }
}
