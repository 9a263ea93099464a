// Autoscale: value axis bounds driven by observed data extremes
use super::render_surface::RenderSurface;
use crate::domain::series::AxisId;
use crate::infrastructure::config::AxisSettings;
use indexmap::IndexMap;

/// Tracking state of one autoscaled axis. A locked bound was pinned by the
/// user and only moves when data leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AutoscaleState {
    pub min_locked: bool,
    pub max_locked: bool,
    pub observed_min: Option<f64>,
    pub observed_max: Option<f64>,
    pinned_min: Option<f64>,
    pinned_max: Option<f64>,
    /// Ignore the rendered bounds once, after a reset.
    restart: bool,
}

impl AutoscaleState {
    fn from_axis(axis: &AxisSettings) -> Self {
        Self {
            min_locked: axis.min.is_some(),
            max_locked: axis.max.is_some(),
            pinned_min: axis.min,
            pinned_max: axis.max,
            restart: true,
            ..Default::default()
        }
    }

    fn observe(&mut self, min: f64, max: f64) {
        self.observed_min = Some(self.observed_min.map_or(min, |m| m.min(min)));
        self.observed_max = Some(self.observed_max.map_or(max, |m| m.max(max)));
    }

    /// Bounds to render given the currently rendered ones. Bounds only grow.
    fn target(&mut self, rendered_min: Option<f64>, rendered_max: Option<f64>) -> Option<(f64, f64)> {
        let (observed_min, observed_max) = (self.observed_min?, self.observed_max?);

        let (base_min, base_max) = if self.restart {
            (self.pinned_min, self.pinned_max)
        } else {
            (rendered_min.or(self.pinned_min), rendered_max.or(self.pinned_max))
        };
        self.restart = false;

        let min = base_min.map_or(observed_min, |b| b.min(observed_min));
        let max = base_max.map_or(observed_max, |b| b.max(observed_max));

        if min == max {
            return Some((min, min + 1.0));
        }
        Some((min, max))
    }

    fn reset(&mut self) {
        self.observed_min = None;
        self.observed_max = None;
        self.restart = true;
    }
}

#[derive(Debug, Clone, Default)]
pub struct AutoscaleTracker {
    axes: IndexMap<AxisId, AutoscaleState>,
}

impl AutoscaleTracker {
    pub fn new(axes: &[AxisSettings]) -> Self {
        Self {
            axes: axes
                .iter()
                .filter(|axis| axis.autoscale)
                .map(|axis| (axis.id.clone(), AutoscaleState::from_axis(axis)))
                .collect(),
        }
    }

    pub fn state(&self, axis: &str) -> Option<&AutoscaleState> {
        self.axes.get(axis)
    }

    /// Forgets everything observed so far, e.g. before a new history window.
    pub fn reset(&mut self) {
        self.axes.values_mut().for_each(AutoscaleState::reset);
    }

    /// Folds the data extents into the tracked state and pushes grown bounds
    /// to the surface. Nothing is applied while a manual zoom is active.
    pub fn apply<'a>(
        &mut self,
        extents: impl IntoIterator<Item = (&'a str, (f64, f64))>,
        surface: &dyn RenderSurface,
        zoomed: bool,
    ) -> Vec<(AxisId, f64, f64)> {
        for (axis, (min, max)) in extents {
            if let Some(state) = self.axes.get_mut(axis) {
                state.observe(min, max);
            }
        }

        if zoomed {
            return Vec::new();
        }

        let mut applied = Vec::new();
        for (axis, state) in self.axes.iter_mut() {
            let rendered = surface.get_extremes(axis);
            let Some((min, max)) = state.target(rendered.min, rendered.max) else {
                continue;
            };
            if rendered.min != Some(min) || rendered.max != Some(max) {
                surface.set_extremes(axis, Some(min), Some(max));
                tracing::debug!(axis = %axis, min, max, "autoscale");
                applied.push((axis.clone(), min, max));
            }
        }
        applied
    }
}
