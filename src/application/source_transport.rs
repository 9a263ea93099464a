// Transport trait for the remote time-series source
use crate::domain::error::TrendResult;
use crate::domain::point::Timestamp;
use crate::domain::sample::QueryPage;
use async_trait::async_trait;

/// Request/response channel to one Scope-style server. Every call is a
/// single round trip; pagination and polling are built on top of it.
#[async_trait]
pub trait SourceTransport: Send + Sync {
    /// Samples of `channels` recorded by `recorder` from `from` on. An open
    /// `until` reads up to the newest sample.
    async fn query(
        &self,
        recorder: &str,
        channels: &[String],
        from: Timestamp,
        until: Option<Timestamp>,
        limit: Option<u32>,
    ) -> TrendResult<QueryPage>;

    /// Current time of the source in ms since the epoch.
    async fn get_time(&self) -> TrendResult<Timestamp>;
}
