// Test doubles shared by the unit tests
use crate::application::animator::{AnimatorSettings, LiveAnimator};
use crate::application::chart::{Chart, SharedChart};
use crate::application::clock::TokioClock;
use crate::application::controller::ModeController;
use crate::application::error_reporter::{ErrorReporter, NotificationSink};
use crate::application::events::EventBus;
use crate::application::history::HistoryLoader;
use crate::application::render_surface::{Extremes, RenderSurface};
use crate::application::sample_source::ScopeSource;
use crate::application::source_transport::SourceTransport;
use crate::domain::error::{TrendError, TrendResult};
use crate::domain::point::{Point, Sample, Timestamp};
use crate::domain::sample::QueryPage;
use crate::infrastructure::config::{
    AxisSettings, ChartSettings, SeriesSettings, SourceSettings, TrendConfig, TuningSettings,
};
use async_trait::async_trait;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn source_settings() -> SourceSettings {
    SourceSettings {
        host: "http://scope.test".into(),
        default_recorder: "Recorder1".into(),
        poll_interval_ms: 500,
        page_limit: 1000,
        max_pages: None,
    }
}

pub fn series_settings(id: &str, address: &str) -> SeriesSettings {
    SeriesSettings {
        id: id.into(),
        name: id.into(),
        kind: "line".into(),
        axis: "y0".into(),
        address: address.into(),
        address2: None,
        aggregate: Default::default(),
        aggregate2: Default::default(),
        visible: true,
        non_stop: true,
        connect_nulls: false,
    }
}

/// Live chart over one minute with series `s1` bound to `Temp`.
pub fn chart_settings() -> ChartSettings {
    ChartSettings {
        mode: "live".into(),
        live_frame_rate: 10.0,
        time_span: Some(1.0),
        time_span_unit_s: Some(60.0),
        x_min: None,
        x_max: None,
        axes: vec![AxisSettings {
            id: "y0".into(),
            autoscale: true,
            min: None,
            max: None,
        }],
        series: vec![series_settings("s1", "Temp")],
    }
}

pub fn trend_config() -> TrendConfig {
    TrendConfig {
        source: source_settings(),
        chart: chart_settings(),
        tuning: TuningSettings::default(),
    }
}

#[derive(Default)]
struct Script {
    /// recorder -> channel -> samples
    recorded: IndexMap<String, IndexMap<String, Vec<Sample>>>,
    failures: HashMap<String, String>,
    page_size: Option<usize>,
    delay: Duration,
    time: Timestamp,
    query_starts: Vec<Timestamp>,
}

/// In-memory source. Pages follow the server rules: at most `limit`
/// timestamps from `from` on (inclusive), `remaining` counts the rest.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<Script>,
    queries: AtomicUsize,
    time_requests: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedTransport {
    pub fn with_recorded(recorder: &str, channel: &str, samples: Vec<Sample>) -> Self {
        let transport = Self::default();
        transport
            .script
            .lock()
            .recorded
            .entry(recorder.to_string())
            .or_default()
            .insert(channel.to_string(), samples);
        transport
    }

    /// Appends a sample to every recorder that holds `channel`, or to
    /// `Recorder1` when none does.
    pub fn record(&self, channel: &str, sample: Sample) {
        let mut script = self.script.lock();
        let mut stored = false;
        for channels in script.recorded.values_mut() {
            if let Some(samples) = channels.get_mut(channel) {
                samples.push(sample);
                stored = true;
            }
        }
        if !stored {
            script
                .recorded
                .entry("Recorder1".to_string())
                .or_default()
                .entry(channel.to_string())
                .or_default()
                .push(sample);
        }
    }

    pub fn set_page_size(&self, size: usize) {
        self.script.lock().page_size = Some(size);
    }

    pub fn fail_recorder(&self, recorder: &str, message: &str) {
        self.script
            .lock()
            .failures
            .insert(recorder.to_string(), message.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        self.script.lock().delay = delay;
    }

    pub fn set_time(&self, time: Timestamp) {
        self.script.lock().time = time;
    }

    pub fn time_requests(&self) -> usize {
        self.time_requests.load(Ordering::SeqCst)
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn query_starts(&self) -> Vec<Timestamp> {
        self.script.lock().query_starts.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn page(
        &self,
        recorder: &str,
        channels: &[String],
        from: Timestamp,
        until: Option<Timestamp>,
        limit: Option<u32>,
    ) -> TrendResult<QueryPage> {
        let script = self.script.lock();
        if let Some(message) = script.failures.get(recorder) {
            return Err(TrendError::source(recorder, message.clone()));
        }

        let in_range = |t: Timestamp| t >= from && until.is_none_or(|u| t <= u);
        let stored = script.recorded.get(recorder);
        let timestamps: BTreeSet<Timestamp> = channels
            .iter()
            .filter_map(|name| stored.and_then(|s| s.get(name)))
            .flat_map(|samples| samples.iter().map(|s| s.t))
            .filter(|t| in_range(*t))
            .collect();

        let size = match (limit, script.page_size) {
            (Some(limit), Some(size)) => (limit as usize).min(size),
            (Some(limit), None) => limit as usize,
            (None, Some(size)) => size,
            (None, None) => usize::MAX,
        };
        let served: BTreeSet<Timestamp> = timestamps.iter().take(size).copied().collect();

        let mut page = QueryPage {
            remaining: (timestamps.len() - served.len()) as u64,
            ..Default::default()
        };
        for name in channels {
            let samples = stored
                .and_then(|s| s.get(name))
                .map(|samples| {
                    samples
                        .iter()
                        .filter(|s| served.contains(&s.t))
                        .copied()
                        .collect()
                })
                .unwrap_or_default();
            page.channels.insert(name.clone(), samples);
        }
        Ok(page)
    }
}

#[async_trait]
impl SourceTransport for ScriptedTransport {
    async fn query(
        &self,
        recorder: &str,
        channels: &[String],
        from: Timestamp,
        until: Option<Timestamp>,
        limit: Option<u32>,
    ) -> TrendResult<QueryPage> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let delay = {
            let mut script = self.script.lock();
            script.query_starts.push(from);
            script.delay
        };

        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.page(recorder, channels, from, until, limit)
    }

    async fn get_time(&self) -> TrendResult<Timestamp> {
        self.time_requests.fetch_add(1, Ordering::SeqCst);
        Ok(self.script.lock().time)
    }
}

#[derive(Default)]
struct Drawn {
    series: HashMap<String, BTreeMap<Timestamp, Point>>,
    extremes: HashMap<String, (Option<f64>, Option<f64>)>,
    redraws: usize,
}

/// Render surface that remembers what it was asked to draw.
#[derive(Default)]
pub struct RecordingSurface {
    drawn: Mutex<Drawn>,
}

impl RecordingSurface {
    /// X positions of the drawn points, sentinels included.
    pub fn points(&self, series: &str) -> Vec<Timestamp> {
        self.drawn
            .lock()
            .series
            .get(series)
            .map(|points| points.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn extremes(&self, axis: &str) -> (Option<f64>, Option<f64>) {
        self.drawn.lock().extremes.get(axis).copied().unwrap_or_default()
    }

    pub fn redraws(&self) -> usize {
        self.drawn.lock().redraws
    }
}

impl RenderSurface for RecordingSurface {
    fn redraw(&self) {
        self.drawn.lock().redraws += 1;
    }

    fn set_extremes(&self, axis: &str, min: Option<f64>, max: Option<f64>) {
        self.drawn.lock().extremes.insert(axis.to_string(), (min, max));
    }

    fn get_extremes(&self, axis: &str) -> Extremes {
        let (min, max) = self.extremes(axis);
        Extremes { min, max }
    }

    fn add_point(&self, series: &str, point: &Point) {
        self.drawn
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
        if let Some(points) = self.drawn.lock().series.get_mut(series) {
            points.remove(&x);
        }
    }

    fn set_data(&self, series: &str, points: &[Point]) {
        let points = points.iter().map(|p| (p.x, *p)).collect();
        self.drawn.lock().series.insert(series.to_string(), points);
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    notifications: Mutex<Vec<u32>>,
    overlays: Mutex<Vec<u32>>,
}

impl RecordingNotifier {
    pub fn notifications(&self) -> Vec<u32> {
        self.notifications.lock().clone()
    }

    pub fn overlays(&self) -> Vec<u32> {
        self.overlays.lock().clone()
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, code: u32, _message: &str) {
        self.notifications.lock().push(code);
    }

    fn show_error_overlay(&self, code: u32, _message: &str) {
        self.overlays.lock().push(code);
    }
}

/// Fully wired engine over a scripted transport, with the local clock at 0.
pub struct Harness {
    pub transport: Arc<ScriptedTransport>,
    pub surface: Arc<RecordingSurface>,
    pub notifier: Arc<RecordingNotifier>,
    pub chart: SharedChart,
    pub source: Arc<ScopeSource>,
    pub events: Arc<EventBus>,
    pub reporter: Arc<ErrorReporter>,
    pub history: Arc<HistoryLoader>,
    pub animator: Arc<LiveAnimator>,
    pub controller: ModeController,
}

impl Harness {
    pub fn new(transport: ScriptedTransport) -> Self {
        Self::with_config(transport, trend_config())
    }

    pub fn with_config(transport: ScriptedTransport, config: TrendConfig) -> Self {
        let transport = Arc::new(transport);
        let surface = Arc::new(RecordingSurface::default());
        let notifier = Arc::new(RecordingNotifier::default());

        let chart = Chart::new(surface.clone(), &config.chart).unwrap().shared();
        let source = Arc::new(ScopeSource::new(
            transport.clone(),
            Arc::new(TokioClock::starting_at(0)),
            &config.source,
        ));
        let events = Arc::new(EventBus::new());
        let reporter = Arc::new(ErrorReporter::new(
            notifier.clone(),
            Duration::from_millis(config.tuning.error_suppress_ms),
        ));
        let history = Arc::new(HistoryLoader::new(
            chart.clone(),
            source.clone(),
            events.clone(),
            reporter.clone(),
            config.tuning.cache_cut_ms,
        ));
        let animator = Arc::new(LiveAnimator::new(
            chart.clone(),
            source.clone(),
            events.clone(),
            reporter.clone(),
            AnimatorSettings::from_config(&config),
        ));
        let controller = ModeController::new(
            chart.clone(),
            source.clone(),
            history.clone(),
            animator.clone(),
            events.clone(),
            reporter.clone(),
            config,
        )
        .unwrap();

        Self {
            transport,
            surface,
            notifier,
            chart,
            source,
            events,
            reporter,
            history,
            animator,
            controller,
        }
    }
}
