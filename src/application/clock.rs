// Wall clock used for viewport and cursor computations
use crate::domain::point::Timestamp;
use tokio::time::Instant;

pub trait Clock: Send + Sync {
    /// Local wall-clock time in ms since the epoch.
    fn now_ms(&self) -> Timestamp;
}

/// Wall clock anchored once on chrono and advanced by the tokio clock, so
/// paused-time tests see a deterministic "now".
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    anchor_ms: Timestamp,
    anchor: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::starting_at(chrono::Utc::now().timestamp_millis())
    }

    pub fn starting_at(anchor_ms: Timestamp) -> Self {
        Self {
            anchor_ms,
            anchor: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now_ms(&self) -> Timestamp {
        self.anchor_ms + self.anchor.elapsed().as_millis() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_clock_follows_tokio_time() {
        let clock = TokioClock::starting_at(1_000);
        assert_eq!(clock.now_ms(), 1_000);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(clock.now_ms(), 1_250);
    }
}
