//! Scroll-position bookkeeping.
//!
//! The render layer is reached only through [`ViewportProbe`]. On each
//! throttled scroll event the reconciler picks the item nearest the viewport
//! midpoint as the anchor and decides whether either edge is close enough to
//! trigger a load. Prepends above the viewport are compensated by shifting
//! `scroll_top` by the document height delta, measured after layout.

use std::time::Duration;
use tokio::time::Instant;

use super::cursor::CursorMachine;
use super::model::{Direction, FeedItem, ItemId};

/// Pixel measurements of the viewport, in document coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportMetrics {
    pub scroll_top: f64,
    pub viewport_height: f64,
    pub document_height: f64,
}

impl ViewportMetrics {
    pub fn midpoint(&self) -> f64 {
        self.scroll_top + self.viewport_height / 2.0
    }

    pub fn distance_to_top(&self) -> f64 {
        self.scroll_top.max(0.0)
    }

    pub fn distance_to_bottom(&self) -> f64 {
        (self.document_height - self.scroll_top - self.viewport_height).max(0.0)
    }
}

/// Capability interface onto whatever renders the list.
pub trait ViewportProbe: Send {
    fn metrics(&self) -> ViewportMetrics;

    /// Item whose rendered vertical midpoint is closest to `midpoint`.
    fn find_anchor_near(&self, midpoint: f64) -> Option<ItemId>;

    /// Move the scroll position by `delta` pixels.
    fn adjust_scroll(&mut self, delta: f64);

    /// Re-render after the item list changed.
    fn layout(&mut self, items: &[FeedItem]);
}

/// Pick the row whose midpoint is nearest `point` from `(id, top, height)` rows.
pub fn nearest_to<'a>(
    rows: impl IntoIterator<Item = (&'a ItemId, f64, f64)>,
    point: f64,
) -> Option<&'a ItemId> {
    rows.into_iter()
        .map(|(id, top, height)| (id, (top + height / 2.0 - point).abs()))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(id, _)| id)
}

/// Headless viewport: every item renders as a fixed-height row.
#[derive(Debug, Clone)]
pub struct ListViewport {
    row_height: f64,
    viewport_height: f64,
    scroll_top: f64,
    rows: Vec<ItemId>,
}

impl ListViewport {
    pub fn new(viewport_height: f64, row_height: f64) -> Self {
        Self {
            row_height,
            viewport_height,
            scroll_top: 0.0,
            rows: Vec::new(),
        }
    }

    pub fn scroll_to(&mut self, scroll_top: f64) {
        self.scroll_top = scroll_top.clamp(0.0, self.max_scroll());
    }

    pub fn scroll_top(&self) -> f64 {
        self.scroll_top
    }

    /// Ids currently inside the viewport, top to bottom.
    pub fn visible(&self) -> Vec<ItemId> {
        let bottom = self.scroll_top + self.viewport_height;
        self.rows()
            .filter(|(_, top, height)| top + height > self.scroll_top && *top < bottom)
            .map(|(id, _, _)| id.clone())
            .collect()
    }

    fn document_height(&self) -> f64 {
        self.rows.len() as f64 * self.row_height
    }

    fn max_scroll(&self) -> f64 {
        (self.document_height() - self.viewport_height).max(0.0)
    }

    fn rows(&self) -> impl Iterator<Item = (&ItemId, f64, f64)> + '_ {
        self.rows
            .iter()
            .enumerate()
            .map(|(i, id)| (id, i as f64 * self.row_height, self.row_height))
    }
}

impl ViewportProbe for ListViewport {
    fn metrics(&self) -> ViewportMetrics {
        ViewportMetrics {
            scroll_top: self.scroll_top,
            viewport_height: self.viewport_height,
            document_height: self.document_height(),
        }
    }

    fn find_anchor_near(&self, midpoint: f64) -> Option<ItemId> {
        nearest_to(self.rows(), midpoint).cloned()
    }

    fn adjust_scroll(&mut self, delta: f64) {
        self.scroll_to(self.scroll_top + delta);
    }

    fn layout(&mut self, items: &[FeedItem]) {
        self.rows = items.iter().map(|item| item.id.clone()).collect();
        self.scroll_top = self.scroll_top.min(self.max_scroll());
    }
}

/// What one scroll evaluation concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollDecision {
    pub anchor: Option<ItemId>,
    pub load_older: bool,
    pub load_newer: bool,
}

impl ScrollDecision {
    pub fn loads(&self) -> impl Iterator<Item = Direction> {
        let older = self.load_older.then_some(Direction::Older);
        let newer = self.load_newer.then_some(Direction::Newer);
        older.into_iter().chain(newer)
    }
}

/// Measurements captured before a prepend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrependSnapshot {
    pub scroll_top: f64,
    pub document_height: f64,
}

#[derive(Debug, Clone)]
pub struct ScrollReconciler {
    throttle: Duration,
    edge_threshold: f64,
    last_eval: Option<Instant>,
}

impl ScrollReconciler {
    pub fn new(throttle: Duration, edge_threshold: f64) -> Self {
        Self {
            throttle,
            edge_threshold,
            last_eval: None,
        }
    }

    /// Evaluate a scroll or resize event. Returns `None` while throttled.
    pub fn evaluate(
        &mut self,
        probe: &dyn ViewportProbe,
        now: Instant,
        cursors: &CursorMachine,
    ) -> Option<ScrollDecision> {
        if let Some(last) = self.last_eval {
            if now.saturating_duration_since(last) < self.throttle {
                return None;
            }
        }
        self.last_eval = Some(now);

        let metrics = probe.metrics();
        let decision = ScrollDecision {
            anchor: probe.find_anchor_near(metrics.midpoint()),
            load_older: metrics.distance_to_bottom() <= self.edge_threshold
                && cursors.can_auto_load(Direction::Older),
            load_newer: metrics.distance_to_top() <= self.edge_threshold
                && cursors.can_auto_load(Direction::Newer),
        };
        tracing::trace!(?metrics, ?decision, "Scroll evaluated");
        Some(decision)
    }

    pub fn capture(&self, probe: &dyn ViewportProbe) -> PrependSnapshot {
        let metrics = probe.metrics();
        PrependSnapshot {
            scroll_top: metrics.scroll_top,
            document_height: metrics.document_height,
        }
    }

    /// Shift the viewport by however much the document grew since `before`.
    /// Call once layout has settled.
    pub fn settle(&self, probe: &mut dyn ViewportProbe, before: PrependSnapshot) -> f64 {
        let delta = probe.metrics().document_height - before.document_height;
        if delta != 0.0 {
            probe.adjust_scroll(delta);
        }
        delta
    }
}
