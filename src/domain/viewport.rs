// Visible time range on the x axis
use super::point::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewportWindow {
    pub from: Timestamp,
    pub until: Timestamp,
}

impl ViewportWindow {
    pub fn new(from: Timestamp, until: Timestamp) -> Self {
        Self { from, until }
    }

    /// Sliding live window ending at `now`.
    pub fn sliding(now: Timestamp, time_span_ms: i64) -> Self {
        Self {
            from: now - time_span_ms,
            until: now,
        }
    }

    pub fn span(&self) -> i64 {
        self.until - self.from
    }
}

/// Manual zoom state. While a zoom is active autoscale and pruning are
/// suspended; in live mode the zoomed span is applied as an offset to the
/// left edge of the sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ZoomState {
    pub active: bool,
    pub min_offset: i64,
    pub max_offset: i64,
    pub(crate) pending: Option<ViewportWindow>,
    pub(crate) reset_requested: bool,
}

impl ZoomState {
    pub fn select(&mut self, window: ViewportWindow) {
        self.active = true;
        self.pending = Some(window);
    }

    pub fn reset(&mut self) {
        self.active = false;
        self.reset_requested = true;
    }

    /// Applies a pending selection or reset to the live window ending at
    /// `until` and returns the window to display.
    pub fn apply(&mut self, window: ViewportWindow) -> ViewportWindow {
        if self.reset_requested {
            self.reset_requested = false;
            self.pending = None;
            self.min_offset = 0;
            self.max_offset = 0;
        } else if let Some(selection) = self.pending.take() {
            if selection.span() > 0 {
                self.max_offset = 0;
                self.min_offset = window.span() - selection.span();
            }
        }
        ViewportWindow::new(window.from + self.min_offset, window.until + self.max_offset)
    }
}
