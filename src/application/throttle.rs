// Adaptive frame throttling for the live animation loop
use crate::infrastructure::config::TuningSettings;
use std::collections::VecDeque;
use std::time::Duration;

/// What the animation loop should do on this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickDecision {
    /// Recompute the viewport now.
    pub update: bool,
    /// New period of the redraw timer, when it moved out of the band.
    pub redraw_period: Option<Duration>,
    /// Delay until the next tick.
    pub next_delay: Duration,
    /// Set on the single tick that first detected sustained throttling.
    pub throttled_warning: bool,
}

/// Keeps the update interval close to the latency the host actually
/// achieves.
///
/// Latency is sampled on the first tick after each update. The
/// `throttle_rank`-th largest of the last `throttle_window` samples is the
/// observed interval; once it exceeds the nominal interval by more than the
/// slack the loop throttles down to it, otherwise it runs at nominal rate.
#[derive(Debug, Clone)]
pub struct FrameThrottle {
    nominal_ms: f64,
    interval_ms: f64,
    deltas: VecDeque<f64>,
    last_step: Option<f64>,
    rendered: bool,
    redraw_period_ms: f64,
    warned: bool,
    tuning: TuningSettings,
}

impl FrameThrottle {
    pub fn new(nominal_ms: f64, tuning: &TuningSettings) -> Self {
        Self {
            nominal_ms,
            interval_ms: nominal_ms,
            deltas: std::iter::repeat_n(0.0, tuning.throttle_rank).collect(),
            last_step: None,
            rendered: false,
            redraw_period_ms: 0.0,
            warned: false,
            tuning: tuning.clone(),
        }
    }

    pub fn interval_ms(&self) -> f64 {
        self.interval_ms
    }

    pub fn nominal_ms(&self) -> f64 {
        self.nominal_ms
    }

    pub fn on_tick(&mut self, now_ms: f64) -> TickDecision {
        let mut throttled_warning = false;

        if self.rendered {
            if let Some(last_step) = self.last_step {
                throttled_warning = self.observe(now_ms - last_step);
            }
        }

        let lead = (self.interval_ms * self.tuning.update_lead_ratio).min(self.tuning.update_lead_cap_ms);
        let due = self
            .last_step
            .is_none_or(|last| now_ms - last > self.interval_ms - lead);

        let mut redraw_period = None;
        if due {
            self.rendered = true;
            self.last_step = Some(now_ms);

            let band = self.tuning.redraw_band;
            if self.interval_ms > self.redraw_period_ms * (1.0 + band)
                || self.interval_ms < self.redraw_period_ms * (1.0 - band)
            {
                self.redraw_period_ms = self.interval_ms;
                redraw_period = Some(duration_ms(self.interval_ms));
            }
        } else {
            self.rendered = false;
        }

        let frame_lead = (self.nominal_ms * self.tuning.frame_lead_ratio).min(self.tuning.frame_lead_cap_ms);
        let next_delay = (self.nominal_ms - frame_lead).max(self.interval_ms / 4.0);

        TickDecision {
            update: due,
            redraw_period,
            next_delay: duration_ms(next_delay),
            throttled_warning,
        }
    }

    fn observe(&mut self, delta: f64) -> bool {
        self.deltas.push_back(delta);
        while self.deltas.len() > self.tuning.throttle_window {
            self.deltas.pop_front();
        }

        let mut sorted: Vec<f64> = self.deltas.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let observed = sorted[sorted.len().saturating_sub(self.tuning.throttle_rank)];

        if self.nominal_ms < observed - self.tuning.throttle_slack_ms {
            self.interval_ms = observed.min(self.tuning.throttle_cap_ms).floor();

            let fastest = sorted.first().copied().unwrap_or(0.0);
            if !self.warned && fastest > self.tuning.throttle_warn_factor * self.nominal_ms {
                self.warned = true;
                return true;
            }
        } else {
            self.interval_ms = self.nominal_ms;
        }
        false
    }
}

fn duration_ms(ms: f64) -> Duration {
    Duration::from_micros((ms.max(0.0) * 1000.0).round() as u64)
}
