// Mode controller: live, history and mixed transitions plus config updates
use super::animator::{AnimatorSettings, LiveAnimator};
use super::chart::SharedChart;
use super::error_reporter::ErrorReporter;
use super::events::{EventBus, TrendEvent};
use super::history::{HistoryLoader, LoadReport, LoadRequest};
use super::reconcile::ChartDiff;
use super::sample_source::{DeliveryCursor, ScopeSource};
use crate::domain::error::{TrendError, TrendResult};
use crate::domain::mode::Mode;
use crate::domain::series::SeriesId;
use crate::domain::viewport::ViewportWindow;
use crate::infrastructure::config::TrendConfig;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Drives the engine components through mode changes, configuration
/// updates, zoom and visibility changes. Every failure is reported through
/// the error reporter and returned; none of them is fatal.
pub struct ModeController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    chart: SharedChart,
    source: Arc<ScopeSource>,
    history: Arc<HistoryLoader>,
    animator: Arc<LiveAnimator>,
    events: Arc<EventBus>,
    reporter: Arc<ErrorReporter>,
    state: Mutex<ControllerState>,
    update_generation: AtomicU64,
}

struct ControllerState {
    config: TrendConfig,
    mode: Mode,
    /// Live mode was stopped because the host went invisible.
    paused: bool,
    pending_update: Option<JoinHandle<()>>,
    visibility_timer: Option<JoinHandle<()>>,
}

impl ModeController {
    pub fn new(
        chart: SharedChart,
        source: Arc<ScopeSource>,
        history: Arc<HistoryLoader>,
        animator: Arc<LiveAnimator>,
        events: Arc<EventBus>,
        reporter: Arc<ErrorReporter>,
        config: TrendConfig,
    ) -> TrendResult<Self> {
        let mode = config.chart.mode()?;
        animator.configure(AnimatorSettings::from_config(&config));

        Ok(Self {
            inner: Arc::new(ControllerInner {
                chart,
                source,
                history,
                animator,
                events,
                reporter,
                state: Mutex::new(ControllerState {
                    config,
                    mode,
                    paused: false,
                    pending_update: None,
                    visibility_timer: None,
                }),
                update_generation: AtomicU64::new(0),
            }),
        })
    }

    pub fn mode(&self) -> Mode {
        self.inner.state.lock().mode
    }

    pub fn config(&self) -> TrendConfig {
        self.inner.state.lock().config.clone()
    }

    pub fn is_live_running(&self) -> bool {
        self.inner.animator.is_running()
    }

    /// Enters the configured mode.
    pub async fn activate(&self) -> TrendResult<()> {
        let mode = self.mode();
        tracing::info!(%mode, "activating trend");
        self.inner.enter(mode).await
    }

    /// Switches to `mode`. An unknown mode is reported and the controller
    /// stays where it is.
    pub async fn set_mode(&self, mode: &str) -> TrendResult<()> {
        let mode = self.inner.reported(mode.parse::<Mode>())?;
        self.inner.enter(mode).await
    }

    /// Starts streaming in the current mode; from history mode the trend
    /// switches to mixed mode.
    pub async fn start_live_mode(&self) -> TrendResult<()> {
        if self.inner.animator.is_running() {
            return self.inner.reported(Err(TrendError::LiveAlreadyRunning));
        }
        let mode = match self.mode() {
            Mode::History => Mode::Mixed,
            mode => mode,
        };
        self.inner.switch_mode(mode);
        self.inner.start_streaming(mode).await
    }

    pub fn stop_live_mode(&self) -> TrendResult<()> {
        self.inner.reported(self.inner.animator.stop())
    }

    /// Stops live mode if needed and loads the configured history bounds.
    pub async fn load_history(&self) -> TrendResult<LoadReport> {
        self.inner.load_history().await
    }

    /// Applies a changed configuration. Calls within the debounce delay
    /// collapse into one reconciliation of the latest configuration.
    pub fn updated(&self, config: TrendConfig) {
        let generation = self.inner.update_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let delay = Duration::from_millis(self.inner.state.lock().config.tuning.debounce_ms);

        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            sleep(delay).await;
            if inner.update_generation.load(Ordering::Acquire) != generation {
                tracing::debug!(generation, "configuration update superseded");
                return;
            }
            let _ = inner.reconcile(config).await;
        });

        self.inner.state.lock().pending_update = Some(task);
    }

    /// Zooms to `window`. In live mode the zoomed span keeps sliding.
    pub fn select_zoom(&self, window: ViewportWindow) {
        let running = self.inner.animator.is_running();
        let mut chart = self.inner.chart.lock();
        chart.zoom.select(window);
        if !running {
            chart.set_viewport(window);
            chart.redraw();
        }
        tracing::debug!(from = window.from, until = window.until, "zoom selected");
    }

    pub fn reset_zoom(&self) {
        let running = self.inner.animator.is_running();
        let (mode, bounds) = {
            let state = self.inner.state.lock();
            (state.mode, state.config.chart.x_min.zip(state.config.chart.x_max))
        };

        let mut chart = self.inner.chart.lock();
        chart.zoom.reset();
        if !running {
            if let (Mode::History, Some((min, max))) = (mode, bounds) {
                chart.set_viewport(ViewportWindow::new(min, max));
            }
            chart.apply_autoscale();
            chart.redraw();
        }
        tracing::debug!("zoom reset");
    }

    /// Hiding the host pauses live mode after the configured delay and ends
    /// every line with a gap. Showing it again resumes a paused live mode.
    pub async fn set_visible(&self, visible: bool) {
        let (timer, paused) = {
            let mut state = self.inner.state.lock();
            (state.visibility_timer.take(), state.paused)
        };
        if let Some(timer) = timer {
            timer.abort();
        }

        if !visible {
            if !self.inner.animator.is_running() {
                return;
            }
            let delay = Duration::from_millis(self.inner.state.lock().config.tuning.visibility_pause_ms);
            let inner = self.inner.clone();
            let timer = tokio::spawn(async move {
                sleep(delay).await;
                if inner.animator.stop().is_err() {
                    return;
                }
                inner.chart.lock().terminate_lines();
                inner.state.lock().paused = true;
                tracing::info!("live mode paused while hidden");
            });
            self.inner.state.lock().visibility_timer = Some(timer);
        } else if paused {
            self.inner.state.lock().paused = false;
            tracing::info!("resuming live mode");
            let _ = self.start_live_mode().await;
        }
    }

    /// Cancels pending timers and stops live mode.
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock();
            if let Some(task) = state.pending_update.take() {
                task.abort();
            }
            if let Some(timer) = state.visibility_timer.take() {
                timer.abort();
            }
        }
        if self.inner.animator.is_running() {
            let _ = self.inner.animator.stop();
        }
        tracing::info!("trend shut down");
    }
}

impl ControllerInner {
    fn reported<T>(&self, result: TrendResult<T>) -> TrendResult<T> {
        if let Err(error) = &result {
            self.reporter.report(error);
        }
        result
    }

    fn switch_mode(&self, mode: Mode) {
        let previous = {
            let mut state = self.state.lock();
            let previous = std::mem::replace(&mut state.mode, mode);
            state.config.chart.mode = mode.as_str().to_string();
            previous
        };
        if previous != mode {
            tracing::info!(from = %previous, to = %mode, "mode changed");
            self.events.emit(TrendEvent::ModeChanged { from: previous, to: mode });
        }
    }

    async fn enter(&self, mode: Mode) -> TrendResult<()> {
        match mode {
            Mode::History => self.load_history().await.map(|_| ()),
            Mode::Live | Mode::Mixed => {
                self.switch_mode(mode);
                if !self.animator.is_running() {
                    return self.start_streaming(mode).await;
                }
                if mode == Mode::Mixed {
                    return self.load_window(None, true, true).await;
                }
                Ok(())
            }
        }
    }

    fn time_span_ms(&self) -> TrendResult<i64> {
        self.state
            .lock()
            .config
            .chart
            .time_span_ms()
            .ok_or(TrendError::TimeSpanMissing)
    }

    /// Starts the animator. Mixed mode first backfills the sliding window
    /// and continues the subscription right after the loaded data.
    async fn start_streaming(&self, mode: Mode) -> TrendResult<()> {
        let span = self.reported(self.time_span_ms())?;
        let tuning = self.state.lock().config.tuning.clone();

        self.source.server_time_offset().await;
        let now = self.source.source_now();

        let (from, cursor) = match mode {
            Mode::Mixed => {
                let window = ViewportWindow::sliding(now, span);
                let request = LoadRequest {
                    series: None,
                    window,
                    query_until: window.until + tuning.mixed_slack_ms,
                    keep_live_tail: false,
                };
                self.reported(self.load_when_idle(request).await)?;
                let seeds = self.chart.lock().live_seeds();
                (window.until, DeliveryCursor::seeded(seeds))
            }
            _ => {
                self.chart
                    .lock()
                    .set_admission_floor(Some(now - (span + tuning.cache_cut_ms)));
                (now, DeliveryCursor::default())
            }
        };

        self.reported(self.animator.start(from, cursor))
    }

    /// Restarts a stopped subscription after the newest point of each live
    /// channel.
    fn resume_streaming(&self) -> TrendResult<()> {
        let seeds = self.chart.lock().live_seeds();
        let from = seeds
            .iter()
            .map(|(_, t)| *t)
            .min()
            .unwrap_or_else(|| self.source.source_now());
        self.reported(self.animator.start(from, DeliveryCursor::seeded(seeds)))
    }

    async fn load_history(&self) -> TrendResult<LoadReport> {
        let (min, max) = {
            let state = self.state.lock();
            (state.config.chart.x_min, state.config.chart.x_max)
        };
        let min = self.reported(min.ok_or(TrendError::HistoryMinInvalid))?;
        let max = self.reported(max.ok_or(TrendError::HistoryMaxInvalid))?;

        if self.animator.is_running() {
            let _ = self.animator.stop();
        }
        self.switch_mode(Mode::History);

        let request = LoadRequest::window(ViewportWindow::new(min, max));
        self.reported(self.load_when_idle(request).await)
    }

    /// Returns once no history load is running, polling at the non-stop
    /// retry cadence.
    async fn wait_for_history(&self) {
        if !self.history.is_loading() {
            return;
        }
        let retry = Duration::from_millis(self.state.lock().config.tuning.non_stop_retry_ms.max(1));
        tracing::debug!("waiting for the running history load");
        while self.history.is_loading() {
            sleep(retry).await;
        }
    }

    /// Runs `request` once the loader is free. A load rejected with
    /// `LoadInProgress` is retried, never dropped.
    async fn load_when_idle(&self, request: LoadRequest) -> TrendResult<LoadReport> {
        loop {
            self.wait_for_history().await;
            match self.history.load(request.clone()).await {
                Err(TrendError::LoadInProgress) => continue,
                result => return result,
            }
        }
    }

    /// Loads `series` (all when `None`) for the sliding window ending now,
    /// or for the window on screen unless `whole_span` is set. The window is
    /// taken when the loader accepts the request, so a reload that had to
    /// wait for another load still covers the current view.
    async fn load_window(
        &self,
        series: Option<Vec<SeriesId>>,
        whole_span: bool,
        keep_live_tail: bool,
    ) -> TrendResult<()> {
        loop {
            self.wait_for_history().await;

            let request = if whole_span {
                let span = self.reported(self.time_span_ms())?;
                let slack = self.state.lock().config.tuning.mixed_slack_ms;
                let window = ViewportWindow::sliding(self.source.source_now(), span);
                LoadRequest {
                    series: series.clone(),
                    window,
                    query_until: window.until + slack,
                    keep_live_tail,
                }
            } else {
                let window = self.chart.lock().viewport();
                if window.span() <= 0 {
                    return Ok(());
                }
                LoadRequest {
                    series: series.clone(),
                    ..LoadRequest::window(window)
                }
            };

            match self.history.load(request).await {
                Err(TrendError::LoadInProgress) => {
                    tracing::debug!(?series, "history reload deferred");
                }
                result => return self.reported(result).map(|_| ()),
            }
        }
    }

    async fn reconcile(&self, config: TrendConfig) -> TrendResult<()> {
        self.reported(config.validate())?;
        let mode = self.reported(config.chart.mode())?;

        let previous = self.state.lock().config.clone();
        if previous.source != config.source {
            tracing::warn!("source settings changed, they take effect after a restart");
        }

        let diff = ChartDiff::between(&previous.chart, &config.chart);
        let running = self.animator.is_running();
        tracing::info!(
            mode = %mode,
            reload = diff.reload.len(),
            added = diff.added.len(),
            removed = diff.removed.len(),
            "reconciling configuration"
        );

        let bindings_moved = if diff.series_changed() || diff.axes_changed {
            let mut chart = self.chart.lock();
            let live_before = chart.channel_map(None, true);

            for id in &diff.removed {
                chart.remove_series(id);
            }
            for settings in &config.chart.series {
                if diff.added.contains(&settings.id) {
                    self.reported(chart.add_series(settings.clone()))?;
                } else if diff.updated.contains(&settings.id) {
                    self.reported(chart.update_series(settings.clone()))?;
                }
            }
            for id in &diff.cleared {
                chart.clear_series(id);
            }
            if diff.axes_changed {
                chart.set_axes(&config.chart.axes);
            }

            live_before != chart.channel_map(None, true)
        } else {
            false
        };

        let restart = running
            && (bindings_moved
                || diff.time_axis_changed
                || diff.frame_rate_changed
                || previous.tuning != config.tuning);
        if restart {
            let _ = self.animator.stop();
        }
        self.animator.configure(AnimatorSettings::from_config(&config));
        self.state.lock().config = config;

        let result = if diff.mode_changed {
            self.enter(mode).await
        } else {
            match mode {
                Mode::Mixed if diff.time_axis_changed => self.load_window(None, true, running).await,
                Mode::Mixed if !diff.reload.is_empty() => {
                    self.load_window(Some(diff.reload.clone()), running, running).await
                }
                Mode::History if diff.time_axis_changed => self.load_history().await.map(|_| ()),
                Mode::History => {
                    if self.animator.is_running() {
                        let _ = self.animator.stop();
                    }
                    if diff.reload.is_empty() {
                        Ok(())
                    } else {
                        self.load_window(Some(diff.reload.clone()), false, false).await
                    }
                }
                _ => Ok(()),
            }
        };

        if restart && mode.is_streaming() && !self.animator.is_running() {
            let _ = self.resume_streaming();
        }

        self.events.emit(TrendEvent::Updated);
        result
    }
}
