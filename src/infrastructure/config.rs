// Trend configuration: source, chart layout and tuning constants
use crate::domain::error::{TrendError, TrendResult};
use crate::domain::mode::Mode;
use crate::domain::point::Timestamp;
use crate::domain::series::{AggregateOptions, SeriesKind};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TrendConfig {
    pub source: SourceSettings,
    pub chart: ChartSettings,
    #[serde(default)]
    pub tuning: TuningSettings,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SourceSettings {
    pub host: String,
    #[serde(default = "default_recorder")]
    pub default_recorder: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_page_limit")]
    pub page_limit: u32,
    /// Upper bound of pages fetched per group and query.
    #[serde(default)]
    pub max_pages: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ChartSettings {
    pub mode: String,
    #[serde(default = "default_frame_rate")]
    pub live_frame_rate: f64,
    #[serde(default)]
    pub time_span: Option<f64>,
    /// Seconds per `time_span` unit, 60 for minutes.
    #[serde(default)]
    pub time_span_unit_s: Option<f64>,
    #[serde(default)]
    pub x_min: Option<Timestamp>,
    #[serde(default)]
    pub x_max: Option<Timestamp>,
    #[serde(default)]
    pub axes: Vec<AxisSettings>,
    #[serde(default)]
    pub series: Vec<SeriesSettings>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AxisSettings {
    pub id: String,
    #[serde(default = "default_true")]
    pub autoscale: bool,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SeriesSettings {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    pub axis: String,
    pub address: String,
    /// High value channel of range series.
    #[serde(default)]
    pub address2: Option<String>,
    #[serde(default)]
    pub aggregate: AggregateOptions,
    #[serde(default)]
    pub aggregate2: AggregateOptions,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default = "default_true")]
    pub non_stop: bool,
    #[serde(default)]
    pub connect_nulls: bool,
}

/// Empirically tuned constants. Defaults are the values the engine was
/// tuned with on the target rendering environment.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct TuningSettings {
    pub throttle_slack_ms: f64,
    pub throttle_cap_ms: f64,
    pub throttle_window: usize,
    pub throttle_rank: usize,
    pub throttle_warn_factor: f64,
    pub update_lead_ratio: f64,
    pub update_lead_cap_ms: f64,
    pub frame_lead_ratio: f64,
    pub frame_lead_cap_ms: f64,
    pub redraw_band: f64,
    pub debounce_ms: u64,
    pub error_suppress_ms: u64,
    pub cache_cut_ms: i64,
    pub mixed_slack_ms: i64,
    pub non_stop_retry_ms: u64,
    pub prune_every_ms: u64,
    pub visibility_pause_ms: u64,
}

impl Default for TuningSettings {
    fn default() -> Self {
        Self {
            throttle_slack_ms: 50.0,
            throttle_cap_ms: 10_000.0,
            throttle_window: 10,
            throttle_rank: 5,
            throttle_warn_factor: 4.0,
            update_lead_ratio: 0.25,
            update_lead_cap_ms: 100.0,
            frame_lead_ratio: 0.1,
            frame_lead_cap_ms: 100.0,
            redraw_band: 0.2,
            debounce_ms: 50,
            error_suppress_ms: 2_500,
            cache_cut_ms: 60_000,
            mixed_slack_ms: 5_000,
            non_stop_retry_ms: 100,
            prune_every_ms: 2_500,
            visibility_pause_ms: 15_000,
        }
    }
}

fn default_recorder() -> String {
    "Recorder1".to_string()
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_page_limit() -> u32 {
    1000
}

fn default_frame_rate() -> f64 {
    10.0
}

fn default_kind() -> String {
    "line".to_string()
}

fn default_true() -> bool {
    true
}

impl SourceSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl ChartSettings {
    pub fn mode(&self) -> TrendResult<Mode> {
        self.mode.parse()
    }

    /// Visible span of the sliding window in milliseconds.
    pub fn time_span_ms(&self) -> Option<i64> {
        let span = self.time_span?;
        let unit = self.time_span_unit_s.unwrap_or(1.0);
        let ms = span * unit * 1000.0;
        (ms.is_finite() && ms > 0.0).then_some(ms as i64)
    }

    /// Nominal interval between animation updates.
    pub fn frame_interval_ms(&self) -> f64 {
        1000.0 / self.live_frame_rate
    }

    pub fn axis(&self, id: &str) -> Option<&AxisSettings> {
        self.axes.iter().find(|a| a.id == id)
    }

    pub fn series(&self, id: &str) -> Option<&SeriesSettings> {
        self.series.iter().find(|s| s.id == id)
    }
}

impl SeriesSettings {
    pub fn kind(&self) -> TrendResult<SeriesKind> {
        self.kind.parse()
    }

    pub fn is_range(&self) -> bool {
        self.kind().is_ok_and(|k| k.is_range())
    }

    /// Aggregated series can only be loaded as history.
    pub fn is_aggregated(&self) -> bool {
        self.aggregate.is_aggregate() || (self.is_range() && self.aggregate2.is_aggregate())
    }
}

impl TrendConfig {
    /// Checks the configuration before anything is applied. Errors carry
    /// their specific codes where the host defines one.
    pub fn validate(&self) -> TrendResult<()> {
        if self.source.host.trim().is_empty() {
            return Err(TrendError::Configuration("source host is empty".into()));
        }
        if self.source.page_limit == 0 {
            return Err(TrendError::Configuration("page limit must be positive".into()));
        }

        let mode = self.chart.mode()?;

        let rate = self.chart.live_frame_rate;
        if !(rate.is_finite() && rate > 0.0) {
            return Err(TrendError::Configuration(format!(
                "live frame rate must be positive (got {})",
                rate
            )));
        }
        if self.chart.frame_interval_ms() < 1.0 {
            return Err(TrendError::FrameRateTooHigh(rate));
        }

        match mode {
            Mode::Live | Mode::Mixed => {
                if self.chart.time_span_ms().is_none() {
                    return Err(TrendError::TimeSpanMissing);
                }
            }
            Mode::History => {
                let min = self.chart.x_min.ok_or(TrendError::HistoryMinInvalid)?;
                let max = self.chart.x_max.ok_or(TrendError::HistoryMaxInvalid)?;
                if min >= max {
                    return Err(TrendError::Configuration(format!(
                        "history bounds are inverted ({} >= {})",
                        min, max
                    )));
                }
            }
        }

        let mut axis_ids = HashSet::new();
        for axis in &self.chart.axes {
            if !axis_ids.insert(axis.id.as_str()) {
                return Err(TrendError::Configuration(format!("duplicate axis `{}`", axis.id)));
            }
            if let (Some(min), Some(max)) = (axis.min, axis.max) {
                if min >= max {
                    return Err(TrendError::Configuration(format!(
                        "axis `{}` has min >= max",
                        axis.id
                    )));
                }
            }
        }

        let mut series_ids = HashSet::new();
        for series in &self.chart.series {
            if !series_ids.insert(series.id.as_str()) {
                return Err(TrendError::Configuration(format!(
                    "duplicate series `{}`",
                    series.id
                )));
            }
            if !axis_ids.contains(series.axis.as_str()) {
                return Err(TrendError::Configuration(format!(
                    "series `{}` references unknown axis `{}`",
                    series.id, series.axis
                )));
            }
            let kind = series.kind()?;
            if kind.is_range() && series.address2.as_deref().is_none_or(str::is_empty) {
                return Err(TrendError::Configuration(format!(
                    "range series `{}` needs a high value address",
                    series.id
                )));
            }
        }

        let tuning = &self.tuning;
        if tuning.throttle_rank == 0 || tuning.throttle_rank > tuning.throttle_window {
            return Err(TrendError::Configuration(
                "throttle rank must be within the throttle window".into(),
            ));
        }

        Ok(())
    }

    /// Serialised axis and series settings for the persistence collaborator.
    pub fn to_snapshot(&self) -> TrendResult<String> {
        #[derive(Serialize)]
        struct Snapshot<'a> {
            axes: &'a [AxisSettings],
            series: &'a [SeriesSettings],
        }

        toml::to_string_pretty(&Snapshot {
            axes: &self.chart.axes,
            series: &self.chart.series,
        })
        .map_err(|e| TrendError::Configuration(format!("snapshot failed: {}", e)))
    }
}

pub fn load_trend_config() -> anyhow::Result<TrendConfig> {
    load_trend_config_from("config/trend")
}

pub fn load_trend_config_from(path: &str) -> anyhow::Result<TrendConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name(path))
        .add_source(config::Environment::with_prefix("TREND").separator("__"))
        .build()?;

    Ok(settings.try_deserialize()?)
}
