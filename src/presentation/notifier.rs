// Notification sink that writes user-facing errors to the log
use crate::application::error_reporter::NotificationSink;

pub struct TracingNotifier;

impl NotificationSink for TracingNotifier {
    fn notify(&self, code: u32, message: &str) {
        tracing::warn!(target: "scope_trend::notification", code, "{}", message);
    }

    fn show_error_overlay(&self, code: u32, message: &str) {
        tracing::error!(target: "scope_trend::overlay", code, "{}", message);
    }
}
