// Log-backed render surface: keeps the drawn state and traces redraws
use crate::application::render_surface::{Extremes, RenderSurface};
use crate::domain::point::{Point, Timestamp};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;

#[derive(Default)]
struct SurfaceState {
    axes: IndexMap<String, (Option<f64>, Option<f64>)>,
    series: IndexMap<String, BTreeMap<Timestamp, Point>>,
    redraws: u64,
}

/// Headless surface for running a trend without a chart library. Each
/// redraw logs the axis bounds and the point count of every series.
#[derive(Default)]
pub struct TracingSurface {
    state: Mutex<SurfaceState>,
}

impl TracingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn point_count(&self, series: &str) -> usize {
        self.state.lock().series.get(series).map_or(0, BTreeMap::len)
    }

    pub fn redraws(&self) -> u64 {
        self.state.lock().redraws
    }
}

impl RenderSurface for TracingSurface {
    fn redraw(&self) {
        let mut state = self.state.lock();
        state.redraws += 1;
        for (series, points) in &state.series {
            let last = points.values().rev().find(|p| p.y.is_some());
            tracing::debug!(
                series = %series,
                points = points.len(),
                last_x = last.map(|p| p.x),
                last_y = last.and_then(|p| p.y),
                "series drawn"
            );
        }
        for (axis, (min, max)) in &state.axes {
            tracing::debug!(axis = %axis, ?min, ?max, "axis drawn");
        }
        tracing::trace!(redraws = state.redraws, "redraw complete");
    }

    fn set_extremes(&self, axis: &str, min: Option<f64>, max: Option<f64>) {
        self.state.lock().axes.insert(axis.to_string(), (min, max));
    }

    fn get_extremes(&self, axis: &str) -> Extremes {
        let state = self.state.lock();
        let (min, max) = state.axes.get(axis).copied().unwrap_or_default();
        Extremes { min, max }
    }

    fn add_point(&self, series: &str, point: &Point) {
        self.state
            .lock()
            .series
            .entry(series.to_string())
            .or_default()
            .insert(point.x, *point);
    }

    fn update_point(&self, series: &str, point: &Point) {
        self.add_point(series, point);
    }

    fn remove_point(&self, series: &str, x: Timestamp) {
        if let Some(points) = self.state.lock().series.get_mut(series) {
            points.remove(&x);
        }
    }

    fn set_data(&self, series: &str, points: &[Point]) {
        let points = points.iter().map(|p| (p.x, *p)).collect();
        self.state.lock().series.insert(series.to_string(), points);
    }
}
