// Single funnel for user-visible errors with repeat suppression
use crate::domain::error::TrendError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Where reported errors end up in the host UI.
pub trait NotificationSink: Send + Sync {
    /// Dismissible notification.
    fn notify(&self, code: u32, message: &str);

    /// Blocking error overlay.
    fn show_error_overlay(&self, code: u32, message: &str);
}

pub struct ErrorReporter {
    sink: Arc<dyn NotificationSink>,
    window: Duration,
    last_shown: Mutex<HashMap<u32, Instant>>,
}

impl ErrorReporter {
    pub fn new(sink: Arc<dyn NotificationSink>, window: Duration) -> Self {
        Self {
            sink,
            window,
            last_shown: Mutex::new(HashMap::new()),
        }
    }

    /// Shows `error` unless the same code was shown within the window.
    /// Aggregated source errors are reported member by member.
    pub fn report(&self, error: &TrendError) {
        if let TrendError::MultiSource(errors) = error {
            for error in errors {
                self.report(error);
            }
            return;
        }

        let code = error.code();
        let now = Instant::now();
        {
            let mut last_shown = self.last_shown.lock();
            if let Some(shown) = last_shown.get(&code) {
                if now.duration_since(*shown) <= self.window {
                    tracing::debug!(code, %error, "suppressed repeated error");
                    return;
                }
            }
            last_shown.insert(code, now);
        }

        let message = error.to_string();
        if error.is_blocking() {
            tracing::error!(code, %message, "blocking error");
            self.sink.show_error_overlay(code, &message);
        } else {
            tracing::warn!(code, %message, "notification");
            self.sink.notify(code, &message);
        }
    }
}
