// Chart model: series buffers and view state shared by the engine tasks
use super::admission::{self, AdmissionPolicy, NonStopOutcome, PointChange, RangeJoiner};
use super::autoscale::AutoscaleTracker;
use super::render_surface::{RenderSurface, TIME_AXIS};
use crate::domain::error::{TrendError, TrendResult};
use crate::domain::point::{Point, Timestamp};
use crate::domain::sample::{high_value_key, split_channel_key, ChannelKey, ChannelMap, SampleBatch};
use crate::domain::series::{SeriesBuffer, SeriesId, SeriesKind};
use crate::domain::viewport::{ViewportWindow, ZoomState};
use crate::infrastructure::config::{AxisSettings, ChartSettings, SeriesSettings};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;

pub type SharedChart = Arc<Mutex<Chart>>;

#[derive(Debug, Clone)]
pub struct Series {
    pub settings: SeriesSettings,
    pub kind: SeriesKind,
    pub buffer: SeriesBuffer,
    joiner: RangeJoiner,
}

impl Series {
    pub fn new(settings: SeriesSettings) -> TrendResult<Self> {
        let kind = settings.kind()?;
        Ok(Self {
            settings,
            kind,
            buffer: SeriesBuffer::default(),
            joiner: RangeJoiner::default(),
        })
    }

    pub fn id(&self) -> &str {
        &self.settings.id
    }

    /// Series that take part in live subscriptions.
    pub fn is_live(&self) -> bool {
        self.settings.visible && !self.settings.is_aggregated()
    }

    fn bind(&self, channels: &mut ChannelMap) {
        channels.insert(self.settings.id.clone(), self.settings.address.clone());
        if self.kind.is_range() {
            if let Some(high) = &self.settings.address2 {
                channels.insert(high_value_key(&self.settings.id), high.clone());
            }
        }
    }

    /// Turns this series' samples of `batch` into points.
    fn points_from(&mut self, batch: &SampleBatch) -> Vec<Point> {
        let low = batch
            .channels
            .get(&self.settings.id)
            .map(Vec::as_slice)
            .unwrap_or_default();

        if self.kind.is_range() {
            let high = batch
                .channels
                .get(&high_value_key(&self.settings.id))
                .map(Vec::as_slice)
                .unwrap_or_default();
            return self.joiner.join(low, high);
        }
        low.iter().map(|s| Point::new(s.t, s.v)).collect()
    }

    /// Drops all points, sentinels and pending range halves.
    pub fn clear(&mut self) {
        self.buffer = SeriesBuffer {
            history_loading: self.buffer.history_loading,
            ..Default::default()
        };
        self.joiner.clear();
    }
}

/// Series that could not update their non-stop points because a history
/// load holds their buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub admitted: usize,
    pub deferred: Vec<SeriesId>,
}

pub struct Chart {
    surface: Arc<dyn RenderSurface>,
    series: IndexMap<SeriesId, Series>,
    autoscale: AutoscaleTracker,
    viewport: ViewportWindow,
    pub zoom: ZoomState,
    admission_floor: Option<Timestamp>,
}

impl Chart {
    pub fn new(surface: Arc<dyn RenderSurface>, settings: &ChartSettings) -> TrendResult<Self> {
        let mut series = IndexMap::new();
        for s in &settings.series {
            series.insert(s.id.clone(), Series::new(s.clone())?);
        }
        Ok(Self {
            surface,
            series,
            autoscale: AutoscaleTracker::new(&settings.axes),
            viewport: ViewportWindow::default(),
            zoom: ZoomState::default(),
            admission_floor: None,
        })
    }

    pub fn shared(self) -> SharedChart {
        Arc::new(Mutex::new(self))
    }

    pub fn surface(&self) -> &Arc<dyn RenderSurface> {
        &self.surface
    }

    pub fn series(&self, id: &str) -> Option<&Series> {
        self.series.get(id)
    }

    pub(crate) fn series_mut(&mut self, id: &str) -> Option<&mut Series> {
        self.series.get_mut(id)
    }

    pub fn series_ids(&self) -> Vec<SeriesId> {
        self.series.keys().cloned().collect()
    }

    pub fn iter_series(&self) -> impl Iterator<Item = &Series> {
        self.series.values()
    }

    pub fn viewport(&self) -> ViewportWindow {
        self.viewport
    }

    pub fn set_viewport(&mut self, window: ViewportWindow) {
        self.viewport = window;
        self.surface
            .set_extremes(TIME_AXIS, Some(window.from as f64), Some(window.until as f64));
    }

    pub fn admission_floor(&self) -> Option<Timestamp> {
        self.admission_floor
    }

    pub fn set_admission_floor(&mut self, floor: Option<Timestamp>) {
        self.admission_floor = floor;
    }

    pub fn autoscale(&self) -> &AutoscaleTracker {
        &self.autoscale
    }

    pub fn reset_autoscale(&mut self) {
        self.autoscale.reset();
    }

    /// Channel bindings of the given series (all when `ids` is `None`).
    /// With `live_only`, hidden and aggregated series are left out.
    pub fn channel_map(&self, ids: Option<&[SeriesId]>, live_only: bool) -> ChannelMap {
        let mut channels = ChannelMap::new();
        for series in self.series.values() {
            if ids.is_some_and(|ids| !ids.iter().any(|id| id == series.id())) {
                continue;
            }
            if live_only && !series.is_live() {
                continue;
            }
            if !series.settings.visible {
                continue;
            }
            series.bind(&mut channels);
        }
        channels
    }

    /// Last point of every live channel, the position a resumed
    /// subscription continues from.
    pub fn live_seeds(&self) -> Vec<(ChannelKey, Timestamp)> {
        self.channel_map(None, true)
            .into_keys()
            .filter_map(|key| {
                let (id, _) = split_channel_key(&key);
                let last = self.series.get(id)?.buffer.last_timestamp()?;
                Some((key, last))
            })
            .collect()
    }

    /// Routes a subscription batch to its series. Keys that belong to no
    /// series (results of an older subscription) are ignored.
    pub fn ingest(&mut self, batch: &SampleBatch) -> IngestReport {
        let mut report = IngestReport::default();
        let ids = self.series_ids();
        for id in ids {
            let Some(series) = self.series.get_mut(&id) else {
                continue;
            };
            let points = series.points_from(batch);
            if points.is_empty() {
                continue;
            }
            report.admitted += points.len();
            if let NonStopOutcome::Deferred = self.admit_points(&id, points) {
                report.deferred.push(id);
            }
        }
        report
    }

    /// Admits points into one series and refreshes its non-stop points.
    pub fn admit_points(&mut self, id: &str, points: Vec<Point>) -> NonStopOutcome {
        let floor = self.admission_floor;
        let surface = self.surface.clone();
        let Some(series) = self.series.get_mut(id) else {
            return NonStopOutcome::Applied(Vec::new());
        };
        let policy = AdmissionPolicy {
            floor,
            is_range: series.kind.is_range(),
        };

        let changes = admission::admit(&mut series.buffer, points, &policy);
        forward(surface.as_ref(), id, &changes);

        let outcome = admission::apply_non_stop_points(&mut series.buffer, series.settings.non_stop);
        if let NonStopOutcome::Applied(changes) = &outcome {
            forward(surface.as_ref(), id, changes);
        }
        outcome
    }

    /// Drops points left of `from` in every series. Suspended while zoomed.
    pub fn prune(&mut self, from: Timestamp) {
        if self.zoom.active {
            return;
        }
        for (id, series) in self.series.iter_mut() {
            let changes = admission::prune_old(&mut series.buffer, from);
            if changes.is_empty() {
                continue;
            }
            tracing::debug!(series = %id, removed = changes.len(), "pruned old points");
            forward(self.surface.as_ref(), id, &changes);
            if let NonStopOutcome::Applied(changes) =
                admission::apply_non_stop_points(&mut series.buffer, series.settings.non_stop)
            {
                forward(self.surface.as_ref(), id, &changes);
            }
        }
    }

    /// Recomputes non-stop points everywhere; returns the series still held
    /// by a history load.
    pub fn apply_non_stop_points(&mut self) -> Vec<SeriesId> {
        let mut deferred = Vec::new();
        for (id, series) in self.series.iter_mut() {
            match admission::apply_non_stop_points(&mut series.buffer, series.settings.non_stop) {
                NonStopOutcome::Applied(changes) => forward(self.surface.as_ref(), id, &changes),
                NonStopOutcome::Deferred => deferred.push(id.clone()),
            }
        }
        deferred
    }

    pub fn apply_autoscale(&mut self) {
        let extents: Vec<(String, (f64, f64))> = self
            .series
            .values()
            .filter(|s| s.settings.visible)
            .filter_map(|s| s.buffer.value_range().map(|range| (s.settings.axis.clone(), range)))
            .collect();
        self.autoscale.apply(
            extents.iter().map(|(axis, range)| (axis.as_str(), *range)),
            self.surface.as_ref(),
            self.zoom.active,
        );
    }

    pub fn redraw(&self) {
        self.surface.redraw();
    }

    /// Sends the complete point list of a series to the surface.
    pub fn publish(&self, id: &str) {
        if let Some(series) = self.series.get(id) {
            let points: Vec<Point> = series.buffer.rendered().copied().collect();
            self.surface.set_data(id, &points);
        }
    }

    /// Ends every visible line with a gap right after its last point, unless
    /// it connects nulls.
    pub fn terminate_lines(&mut self) {
        let ends: Vec<(SeriesId, Timestamp)> = self
            .series
            .values()
            .filter(|s| s.settings.visible && !s.settings.connect_nulls)
            .filter_map(|s| s.buffer.last_timestamp().map(|t| (s.settings.id.clone(), t + 1)))
            .collect();
        for (id, at) in ends {
            self.admit_points(&id, vec![Point::gap(at)]);
        }
    }

    pub fn add_series(&mut self, settings: SeriesSettings) -> TrendResult<()> {
        let series = Series::new(settings)?;
        let id = series.settings.id.clone();
        self.series.insert(id.clone(), series);
        self.publish(&id);
        Ok(())
    }

    pub fn remove_series(&mut self, id: &str) {
        if self.series.shift_remove(id).is_some() {
            self.surface.set_data(id, &[]);
        }
    }

    /// Replaces the settings of an existing series, keeping its buffer.
    pub fn update_series(&mut self, settings: SeriesSettings) -> TrendResult<()> {
        let kind = settings.kind()?;
        let series = self
            .series
            .get_mut(&settings.id)
            .ok_or_else(|| TrendError::Configuration(format!("unknown series `{}`", settings.id)))?;
        series.kind = kind;
        series.settings = settings;
        Ok(())
    }

    pub fn clear_series(&mut self, id: &str) {
        if let Some(series) = self.series.get_mut(id) {
            series.clear();
            self.surface.set_data(id, &[]);
        }
    }

    pub fn set_axes(&mut self, axes: &[AxisSettings]) {
        self.autoscale = AutoscaleTracker::new(axes);
    }
}

pub(crate) fn forward(surface: &dyn RenderSurface, id: &str, changes: &[PointChange]) {
    for change in changes {
        match change {
            PointChange::Added(point) => surface.add_point(id, point),
            PointChange::Updated(point) => surface.update_point(id, point),
            PointChange::Removed(x) => surface.remove_point(id, *x),
        }
    }
}
