// History loader: bulk range loads with gap data reconciliation
use super::admission::{self, AdmissionPolicy, RangeJoiner};
use super::chart::SharedChart;
use super::error_reporter::ErrorReporter;
use super::events::{EventBus, TrendEvent};
use super::sample_source::{QueryOutcome, ScopeSource};
use crate::domain::error::{TrendError, TrendResult};
use crate::domain::point::{Point, Timestamp};
use crate::domain::sample::high_value_key;
use crate::domain::series::{SeriesBuffer, SeriesId};
use crate::domain::viewport::ViewportWindow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    /// Series to load; `None` loads every visible series.
    pub series: Option<Vec<SeriesId>>,
    /// Window shown while and after loading.
    pub window: ViewportWindow,
    /// Upper bound of the query, at or after `window.until`.
    pub query_until: Timestamp,
    /// Keep live points newer than the fetched data (live mode is running).
    pub keep_live_tail: bool,
}

impl LoadRequest {
    pub fn window(window: ViewportWindow) -> Self {
        Self {
            series: None,
            window,
            query_until: window.until,
            keep_live_tail: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub loaded: Vec<SeriesId>,
    pub failed: Vec<SeriesId>,
    pub error: Option<TrendError>,
}

pub struct HistoryLoader {
    chart: SharedChart,
    source: Arc<ScopeSource>,
    events: Arc<EventBus>,
    reporter: Arc<ErrorReporter>,
    cache_cut_ms: i64,
    loading: AtomicBool,
}

/// Clears the in-progress flag when the load ends, including when the
/// load future is dropped half way.
struct LoadGuard<'a>(&'a AtomicBool);

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl HistoryLoader {
    pub fn new(
        chart: SharedChart,
        source: Arc<ScopeSource>,
        events: Arc<EventBus>,
        reporter: Arc<ErrorReporter>,
        cache_cut_ms: i64,
    ) -> Self {
        Self {
            chart,
            source,
            events,
            reporter,
            cache_cut_ms,
            loading: AtomicBool::new(false),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    /// Loads `request.window` into the selected series. Only one load runs at
    /// a time; a concurrent call fails with `LoadInProgress` and is not
    /// queued. Series whose group failed keep their previous points.
    pub async fn load(&self, request: LoadRequest) -> TrendResult<LoadReport> {
        let window = request.window;
        if window.from >= window.until || request.query_until < window.until {
            return Err(TrendError::Configuration(format!(
                "invalid history window {}..{}",
                window.from, window.until
            )));
        }

        if self.loading.swap(true, Ordering::AcqRel) {
            tracing::warn!("history load rejected, another load is in progress");
            return Err(TrendError::LoadInProgress);
        }
        let _guard = LoadGuard(&self.loading);

        let (ids, channels) = {
            let mut chart = self.chart.lock();
            chart.set_viewport(window);
            chart.set_admission_floor(Some(window.from - self.cache_cut_ms));

            let channels = chart.channel_map(request.series.as_deref(), false);
            let ids: Vec<SeriesId> = chart
                .series_ids()
                .into_iter()
                .filter(|id| channels.contains_key(id))
                .collect();
            for id in &ids {
                if let Some(series) = chart.series_mut(id) {
                    series.buffer.history_loading = true;
                }
            }
            (ids, channels)
        };

        tracing::info!(
            from = window.from,
            until = request.query_until,
            series = ids.len(),
            "loading history"
        );
        self.events.emit(TrendEvent::HistoryLoading { series: ids.clone() });

        let outcome = self
            .source
            .query(&channels, window.from, request.query_until)
            .await;

        let report = self.apply(&ids, outcome, request.keep_live_tail);

        tracing::info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            "history loaded"
        );
        self.events.emit(TrendEvent::HistoryReady {
            series: report.loaded.clone(),
            failed: report.failed.clone(),
        });
        if let Some(error) = &report.error {
            self.reporter.report(error);
        }
        Ok(report)
    }

    fn apply(&self, ids: &[SeriesId], outcome: QueryOutcome, keep_live_tail: bool) -> LoadReport {
        let QueryOutcome { batch, failed, error } = outcome;
        let mut report = LoadReport {
            error,
            ..Default::default()
        };

        let mut chart = self.chart.lock();
        for id in ids {
            let Some(series) = chart.series_mut(id) else {
                continue;
            };
            series.buffer.history_loading = false;
            let side_queue = std::mem::take(&mut series.buffer.side_queue);
            let policy = AdmissionPolicy {
                floor: None,
                is_range: series.kind.is_range(),
            };

            if failed.contains(id) || failed.contains(&high_value_key(id)) {
                admission::admit(&mut series.buffer, side_queue, &policy);
                report.failed.push(id.clone());
            } else {
                let low = batch.channels.get(id).map(Vec::as_slice).unwrap_or_default();
                let fetched: Vec<Point> = if series.kind.is_range() {
                    let high = batch
                        .channels
                        .get(&high_value_key(id))
                        .map(Vec::as_slice)
                        .unwrap_or_default();
                    RangeJoiner::default().join(low, high)
                } else {
                    low.iter().map(|s| Point::new(s.t, s.v)).collect()
                };

                let mut fresh = SeriesBuffer::default();
                admission::admit(&mut fresh, fetched, &policy);
                if keep_live_tail {
                    let tail = gap_data(&series.buffer, fresh.last_timestamp());
                    admission::admit(&mut fresh, tail, &policy);
                }
                admission::admit(&mut fresh, side_queue, &policy);

                tracing::debug!(series = %id, points = fresh.len(), "history buffer replaced");
                series.buffer = fresh;
                report.loaded.push(id.clone());
            }
        }

        chart.apply_non_stop_points();
        for id in ids {
            chart.publish(id);
        }
        chart.reset_autoscale();
        chart.apply_autoscale();
        chart.redraw();
        report
    }
}

/// Live points of the pre-load buffer newer than the freshly fetched data.
/// A trailing gap is dropped so the joined line does not break at its end.
fn gap_data(buffer: &SeriesBuffer, fetched_until: Option<Timestamp>) -> Vec<Point> {
    let mut tail: Vec<Point> = buffer
        .points()
        .iter()
        .filter(|p| fetched_until.is_none_or(|t| p.x > t))
        .copied()
        .collect();
    if tail.last().is_some_and(|p| p.y.is_none()) {
        tail.pop();
    }
    tail
}
