// Configuration diff between two chart settings
use crate::domain::series::SeriesId;
use crate::infrastructure::config::{ChartSettings, SeriesSettings};

/// What changed between the applied chart settings and new ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartDiff {
    pub mode_changed: bool,
    /// Time span or history bounds moved.
    pub time_axis_changed: bool,
    pub frame_rate_changed: bool,
    pub axes_changed: bool,
    pub added: Vec<SeriesId>,
    pub removed: Vec<SeriesId>,
    /// Existing series with any settings change.
    pub updated: Vec<SeriesId>,
    /// Series whose data has to be loaded again.
    pub reload: Vec<SeriesId>,
    /// Series switched from a plain to a range kind; their points have no
    /// high value and must be dropped.
    pub cleared: Vec<SeriesId>,
}

impl ChartDiff {
    pub fn between(old: &ChartSettings, new: &ChartSettings) -> Self {
        let mut diff = ChartDiff {
            mode_changed: old.mode != new.mode,
            time_axis_changed: old.time_span != new.time_span
                || old.time_span_unit_s != new.time_span_unit_s
                || old.x_min != new.x_min
                || old.x_max != new.x_max,
            frame_rate_changed: old.live_frame_rate != new.live_frame_rate,
            axes_changed: old.axes != new.axes,
            ..Default::default()
        };

        for series in &new.series {
            match old.series(&series.id) {
                None => {
                    diff.added.push(series.id.clone());
                    // A series without a channel yet has nothing to load.
                    if !series.address.is_empty() {
                        diff.reload.push(series.id.clone());
                    }
                }
                Some(previous) => {
                    if previous != series {
                        diff.updated.push(series.id.clone());
                    }
                    if bindings_changed(previous, series) {
                        diff.reload.push(series.id.clone());
                    }
                    if !previous.is_range() && series.is_range() {
                        diff.cleared.push(series.id.clone());
                    }
                }
            }
        }

        diff.removed = old
            .series
            .iter()
            .filter(|s| new.series(&s.id).is_none())
            .map(|s| s.id.clone())
            .collect();

        diff
    }

    pub fn is_empty(&self) -> bool {
        *self == ChartDiff::default()
    }

    pub fn series_changed(&self) -> bool {
        !(self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty())
    }
}

/// Channel or aggregate bindings moved, or the series was made visible.
/// Hiding a series needs no reload.
fn bindings_changed(old: &SeriesSettings, new: &SeriesSettings) -> bool {
    old.address != new.address
        || old.address2 != new.address2
        || old.aggregate != new.aggregate
        || old.aggregate2 != new.aggregate2
        || (new.visible && !old.visible)
}
