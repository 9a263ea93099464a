// Render surface seam: the chart library the engine drives
use crate::domain::point::{Point, Timestamp};

/// Id under which the time axis is addressed in `set_extremes`.
pub const TIME_AXIS: &str = "x";

/// Bounds of an axis as currently rendered.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Extremes {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// Drawing collaborator. Calls are cheap bookkeeping on the surface side;
/// only `redraw` is expected to be expensive.
pub trait RenderSurface: Send + Sync {
    fn redraw(&self);

    fn set_extremes(&self, axis: &str, min: Option<f64>, max: Option<f64>);

    fn get_extremes(&self, axis: &str) -> Extremes;

    fn add_point(&self, series: &str, point: &Point);

    fn update_point(&self, series: &str, point: &Point);

    fn remove_point(&self, series: &str, x: Timestamp);

    /// Replaces every point of a series at once.
    fn set_data(&self, series: &str, points: &[Point]);
}
