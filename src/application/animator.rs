// Live animator: subscription ingestion, throttled viewport ticks and redraws
use super::chart::SharedChart;
use super::error_reporter::ErrorReporter;
use super::events::{EventBus, TrendEvent};
use super::sample_source::{DeliveryCursor, ScopeSource};
use super::subscription::{Subscription, SubscriptionEvent};
use super::throttle::FrameThrottle;
use crate::domain::error::{TrendError, TrendResult};
use crate::domain::point::Timestamp;
use crate::domain::viewport::ViewportWindow;
use crate::infrastructure::config::{TrendConfig, TuningSettings};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, sleep, Instant, MissedTickBehavior};

#[derive(Debug, Clone, PartialEq)]
pub struct AnimatorSettings {
    pub time_span_ms: i64,
    pub frame_interval_ms: f64,
    pub tuning: TuningSettings,
}

impl AnimatorSettings {
    /// Settings of a configured trend. Without a time span the window is
    /// empty; streaming modes refuse to start in that case.
    pub fn from_config(config: &TrendConfig) -> Self {
        Self {
            time_span_ms: config.chart.time_span_ms().unwrap_or_default(),
            frame_interval_ms: config.chart.frame_interval_ms(),
            tuning: config.tuning.clone(),
        }
    }
}

enum AnimatorState {
    Stopped,
    Running {
        subscription: Subscription,
        tasks: Vec<JoinHandle<()>>,
    },
}

pub struct LiveAnimator {
    chart: SharedChart,
    source: Arc<ScopeSource>,
    events: Arc<EventBus>,
    reporter: Arc<ErrorReporter>,
    settings: Mutex<AnimatorSettings>,
    state: Mutex<AnimatorState>,
}

impl LiveAnimator {
    pub fn new(
        chart: SharedChart,
        source: Arc<ScopeSource>,
        events: Arc<EventBus>,
        reporter: Arc<ErrorReporter>,
        settings: AnimatorSettings,
    ) -> Self {
        Self {
            chart,
            source,
            events,
            reporter,
            settings: Mutex::new(settings),
            state: Mutex::new(AnimatorState::Stopped),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state.lock(), AnimatorState::Running { .. })
    }

    /// Takes effect on the next `start`.
    pub fn configure(&self, settings: AnimatorSettings) {
        *self.settings.lock() = settings;
    }

    pub fn settings(&self) -> AnimatorSettings {
        self.settings.lock().clone()
    }

    /// Subscribes every live series from `from` on and starts the tick,
    /// redraw and ingestion tasks.
    pub fn start(&self, from: Timestamp, cursor: DeliveryCursor) -> TrendResult<()> {
        let mut state = self.state.lock();
        if matches!(*state, AnimatorState::Running { .. }) {
            return Err(TrendError::LiveAlreadyRunning);
        }

        let settings = self.settings.lock().clone();
        let channels = self.chart.lock().channel_map(None, true);
        let (subscription, batches) = self.source.subscribe(&channels, from, cursor);

        let initial = Duration::from_secs_f64(settings.frame_interval_ms.max(1.0) / 1000.0);
        let (period_tx, period_rx) = watch::channel(initial);

        let tasks = vec![
            tokio::spawn(run_ticks(
                self.chart.clone(),
                self.source.clone(),
                settings.clone(),
                period_tx,
            )),
            tokio::spawn(run_redraws(self.chart.clone(), period_rx)),
            tokio::spawn(run_ingest(
                self.chart.clone(),
                batches,
                self.reporter.clone(),
                Duration::from_millis(settings.tuning.non_stop_retry_ms.max(1)),
            )),
        ];

        *state = AnimatorState::Running { subscription, tasks };
        drop(state);

        tracing::info!(from, channels = channels.len(), "live mode started");
        self.events.emit(TrendEvent::LiveStarted);
        Ok(())
    }

    /// Cancels the subscription and every pending tick.
    pub fn stop(&self) -> TrendResult<()> {
        let previous = std::mem::replace(&mut *self.state.lock(), AnimatorState::Stopped);
        let AnimatorState::Running { subscription, tasks } = previous else {
            return Err(TrendError::LiveNotRunning);
        };

        subscription.cancel();
        for task in tasks {
            task.abort();
        }

        tracing::info!("live mode stopped");
        self.events.emit(TrendEvent::LiveStopped);
        Ok(())
    }
}

impl Drop for LiveAnimator {
    fn drop(&mut self) {
        if let AnimatorState::Running { tasks, .. } = &*self.state.lock() {
            tasks.iter().for_each(JoinHandle::abort);
        }
    }
}

/// Animation loop: every tick asks the throttle whether the viewport is due
/// and when to come back.
async fn run_ticks(
    chart: SharedChart,
    source: Arc<ScopeSource>,
    settings: AnimatorSettings,
    redraw_period: watch::Sender<Duration>,
) {
    let started = Instant::now();
    let mut throttle = FrameThrottle::new(settings.frame_interval_ms, &settings.tuning);
    let prune_every = settings.tuning.prune_every_ms as i64;
    let mut last_prune: Option<Timestamp> = None;

    loop {
        let decision = throttle.on_tick(started.elapsed().as_secs_f64() * 1000.0);
        if decision.throttled_warning {
            tracing::warn!(
                nominal_ms = throttle.nominal_ms(),
                actual_ms = throttle.interval_ms(),
                "performance poor, configured refresh rate cannot be achieved"
            );
        }

        if decision.update {
            let sliding = ViewportWindow::sliding(source.source_now(), settings.time_span_ms);
            let mut chart = chart.lock();
            let window = chart.zoom.apply(sliding);
            chart.set_viewport(window);
            chart.set_admission_floor(Some(sliding.from - settings.tuning.cache_cut_ms));

            if last_prune.is_none_or(|t| t < window.from - prune_every) {
                last_prune = Some(window.from);
                chart.prune(window.from);
            }
        }

        if let Some(period) = decision.redraw_period {
            tracing::debug!(period_ms = period.as_millis() as u64, "redraw period changed");
            redraw_period.send_replace(period);
        }

        sleep(decision.next_delay).await;
    }
}

/// Redraw timer, decoupled from the animation ticks.
async fn run_redraws(chart: SharedChart, mut period: watch::Receiver<Duration>) {
    loop {
        let current = *period.borrow_and_update();
        let mut ticker = interval_at(Instant::now() + current, current);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let mut chart = chart.lock();
                    chart.apply_autoscale();
                    chart.redraw();
                }
                changed = period.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    break;
                }
            }
        }
    }
}

/// Feeds subscription batches into the chart in arrival order.
async fn run_ingest(
    chart: SharedChart,
    mut batches: mpsc::Receiver<SubscriptionEvent>,
    reporter: Arc<ErrorReporter>,
    retry: Duration,
) {
    let mut retry_ticker = interval(retry);
    retry_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut non_stop_pending = false;

    loop {
        tokio::select! {
            event = batches.recv() => {
                let Some(event) = event else {
                    return;
                };
                match event {
                    SubscriptionEvent::Batch { recorder, batch } => {
                        let report = chart.lock().ingest(&batch);
                        tracing::debug!(recorder = %recorder, admitted = report.admitted, "live batch admitted");
                        if !report.deferred.is_empty() {
                            non_stop_pending = true;
                        }
                    }
                    SubscriptionEvent::SlowConsumer { recorder } => {
                        tracing::debug!(recorder = %recorder, "source slower than the poll interval");
                    }
                    SubscriptionEvent::Failed { error, .. } => reporter.report(&error),
                }
            }
            _ = retry_ticker.tick(), if non_stop_pending => {
                non_stop_pending = !chart.lock().apply_non_stop_points().is_empty();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::point::{Point, Sample, END_OF_TIME, START_OF_TIME};
    use crate::domain::series::SeriesBuffer;
    use crate::test_support::{Harness, ScriptedTransport};

    const T0: Timestamp = 1_700_000_000_000;

    fn harness() -> Harness {
        let transport = ScriptedTransport::with_recorded("Recorder1", "Temp", vec![Sample::new(T0 - 1_000, 1.0)]);
        transport.set_time(T0);
        Harness::new(transport)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_and_stop_twice_are_rejected() {
        let harness = harness();
        harness.animator.start(T0 - 5_000, DeliveryCursor::default()).unwrap();
        assert_eq!(
            harness.animator.start(T0, DeliveryCursor::default()),
            Err(TrendError::LiveAlreadyRunning)
        );

        harness.animator.stop().unwrap();
        assert_eq!(harness.animator.stop(), Err(TrendError::LiveNotRunning));
        assert!(!harness.animator.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_mode_slides_viewport_and_admits_samples() {
        let harness = harness();
        harness.source.server_time_offset().await;
        harness.animator.start(T0 - 5_000, DeliveryCursor::default()).unwrap();

        sleep(Duration::from_millis(600)).await;
        harness.transport.record("Temp", Sample::new(T0 + 400, 2.0));
        sleep(Duration::from_millis(1_000)).await;

        {
            let chart = harness.chart.lock();
            let viewport = chart.viewport();
            assert_eq!(viewport.span(), 60_000);
            assert!(viewport.until >= T0 + 1_000 && viewport.until <= T0 + 1_600);
            let xs: Vec<Timestamp> = chart.series("s1").unwrap().buffer.points().iter().map(|p| p.x).collect();
            assert_eq!(xs, vec![T0 - 1_000, T0 + 400]);
        }
        assert!(harness.surface.redraws() >= 10);

        harness.animator.stop().unwrap();
        let redraws = harness.surface.redraws();
        sleep(Duration::from_millis(1_000)).await;
        assert_eq!(harness.surface.redraws(), redraws);
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_points_pruned_while_streaming() {
        let harness = harness();
        harness.source.server_time_offset().await;
        harness
            .chart
            .lock()
            .admit_points("s1", (0..5).map(|i| Point::value(T0 - 200_000 + i * 1_000, 0.0)).collect());

        harness.animator.start(T0, DeliveryCursor::default()).unwrap();
        sleep(Duration::from_millis(300)).await;

        let chart = harness.chart.lock();
        let buffer = &chart.series("s1").unwrap().buffer;
        assert_eq!(buffer.first().map(|p| p.x), Some(T0 - 196_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscription_error_is_reported() {
        let transport = ScriptedTransport::default();
        transport.fail_recorder("Recorder1", "session expired");
        let harness = Harness::new(transport);

        harness.animator.start(T0, DeliveryCursor::default()).unwrap();
        sleep(Duration::from_millis(100)).await;

        assert_eq!(harness.notifier.notifications(), vec![20103]);
        harness.animator.stop().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_stop_points_retried_after_load_releases_buffer() {
        let harness = harness();
        harness.transport.record("Temp", Sample::new(T0 + 100, 2.0));
        harness.source.server_time_offset().await;
        {
            let mut chart = harness.chart.lock();
            let series = chart.series_mut("s1").unwrap();
            series.buffer = SeriesBuffer::from_points(vec![Point::value(T0 - 2_000, 3.0)]);
            series.buffer.history_loading = true;
        }

        harness.animator.start(T0, DeliveryCursor::default()).unwrap();
        sleep(Duration::from_millis(300)).await;
        {
            let chart = harness.chart.lock();
            let buffer = &chart.series("s1").unwrap().buffer;
            assert_eq!(buffer.side_queue_len(), 1);
            assert_eq!(buffer.right_non_stop(), None);
        }

        harness.chart.lock().series_mut("s1").unwrap().buffer.history_loading = false;
        sleep(Duration::from_millis(250)).await;

        let chart = harness.chart.lock();
        let buffer = &chart.series("s1").unwrap().buffer;
        assert_eq!(buffer.left_non_stop(), Some(&Point::value(START_OF_TIME, 3.0)));
        assert_eq!(buffer.right_non_stop(), Some(&Point::value(END_OF_TIME, 3.0)));
    }
}
