// Scope client: paginated range queries, subscriptions and clock offset
use super::clock::Clock;
use super::source_transport::SourceTransport;
use super::subscription::{self, Subscription, SubscriptionEvent};
use crate::domain::error::TrendError;
use crate::domain::point::{Sample, Timestamp};
use crate::domain::sample::{ChannelAddress, ChannelKey, ChannelMap, QueryPage, SampleBatch};
use crate::infrastructure::config::SourceSettings;
use futures::future::join_all;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, OnceCell};

/// Channel keys served by one recorder, with the source channel name each
/// key is bound to. Several keys may share a channel name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecorderGroup {
    pub recorder: String,
    pub bindings: Vec<(ChannelKey, String)>,
}

impl RecorderGroup {
    /// Unique channel names in binding order, as sent to the server.
    pub fn channel_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.bindings
            .iter()
            .filter(|(_, name)| seen.insert(name.as_str()))
            .map(|(_, name)| name.clone())
            .collect()
    }

    fn keys_for<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ChannelKey> + 'a {
        self.bindings
            .iter()
            .filter(move |(_, n)| n == name)
            .map(|(key, _)| key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &ChannelKey> {
        self.bindings.iter().map(|(key, _)| key)
    }
}

/// Last delivered timestamp per channel key. Each request starts at the
/// previous request's newest sample, so the first sample of every later
/// page is a repeat and gets dropped here.
#[derive(Debug, Clone, Default)]
pub struct DeliveryCursor {
    last: HashMap<ChannelKey, Timestamp>,
}

impl DeliveryCursor {
    /// Cursor that treats everything up to the given timestamps as delivered.
    pub fn seeded(seeds: impl IntoIterator<Item = (ChannelKey, Timestamp)>) -> Self {
        Self {
            last: seeds.into_iter().collect(),
        }
    }

    pub fn last_delivered(&self, key: &str) -> Option<Timestamp> {
        self.last.get(key).copied()
    }

    /// Moves the new samples of `page` into `batch`.
    pub fn absorb(&mut self, group: &RecorderGroup, page: QueryPage, batch: &mut SampleBatch) {
        for (name, samples) in page.channels {
            for key in group.keys_for(&name) {
                let mut last = self.last.get(key).copied();
                let fresh: Vec<Sample> = samples
                    .iter()
                    .filter(|sample| {
                        let is_new = last.is_none_or(|t| sample.t > t);
                        if is_new {
                            last = Some(sample.t);
                        }
                        is_new
                    })
                    .copied()
                    .collect();

                if let Some(t) = last {
                    self.last.insert(key.clone(), t);
                }
                batch.channels.entry(key.clone()).or_default().extend(fresh);
            }
        }
    }
}

/// Result of a range query over all recorder groups. Failing groups do not
/// block the others; their keys are listed in `failed`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutcome {
    pub batch: SampleBatch,
    pub failed: HashSet<ChannelKey>,
    pub error: Option<TrendError>,
}

pub struct ScopeSource {
    transport: Arc<dyn SourceTransport>,
    clock: Arc<dyn Clock>,
    default_recorder: String,
    page_limit: u32,
    max_pages: Option<u32>,
    poll_interval: Duration,
    server_offset: OnceCell<i64>,
}

impl ScopeSource {
    pub fn new(
        transport: Arc<dyn SourceTransport>,
        clock: Arc<dyn Clock>,
        settings: &SourceSettings,
    ) -> Self {
        Self {
            transport,
            clock,
            default_recorder: settings.default_recorder.clone(),
            page_limit: settings.page_limit,
            max_pages: settings.max_pages,
            poll_interval: settings.poll_interval(),
            server_offset: OnceCell::new(),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Splits a channel map by recorder. Bare channel names belong to the
    /// default recorder.
    pub fn group_channels(&self, channels: &ChannelMap) -> Vec<RecorderGroup> {
        let mut groups: IndexMap<String, RecorderGroup> = IndexMap::new();
        for (key, address) in channels {
            let address = ChannelAddress::parse(address);
            let recorder = address
                .recorder
                .unwrap_or_else(|| self.default_recorder.clone());
            groups
                .entry(recorder.clone())
                .or_insert_with(|| RecorderGroup {
                    recorder,
                    bindings: Vec::new(),
                })
                .bindings
                .push((key.clone(), address.channel));
        }
        groups.into_values().collect()
    }

    /// Range query over `[from, until]`, following the `remaining` signal
    /// page by page. Groups are queried in parallel.
    pub async fn query(&self, channels: &ChannelMap, from: Timestamp, until: Timestamp) -> QueryOutcome {
        let groups = self.group_channels(channels);
        let results = join_all(groups.iter().map(|group| self.query_group(group, from, until))).await;

        let mut outcome = QueryOutcome::default();
        let mut errors = Vec::new();
        for (group, (batch, error)) in groups.iter().zip(results) {
            outcome.batch.extend(batch);
            if let Some(error) = error {
                if error != TrendError::QueryLimitExceeded {
                    outcome.failed.extend(group.keys().cloned());
                }
                errors.push(error);
            }
        }
        outcome.error = TrendError::aggregate(errors);
        outcome
    }

    async fn query_group(
        &self,
        group: &RecorderGroup,
        from: Timestamp,
        until: Timestamp,
    ) -> (SampleBatch, Option<TrendError>) {
        let names = group.channel_names();
        let mut batch = SampleBatch::default();
        let mut cursor = DeliveryCursor::default();
        let mut timestart = from;
        let mut loaded = 0u64;
        let mut pages = 0u32;

        loop {
            let page = match self
                .transport
                .query(&group.recorder, &names, timestart, Some(until), Some(self.page_limit))
                .await
            {
                Ok(page) => page,
                Err(e) => {
                    tracing::error!(recorder = %group.recorder, error = %e, "range query failed");
                    return (SampleBatch::default(), Some(e));
                }
            };
            pages += 1;
            loaded += page.sample_count() as u64;
            let remaining = page.remaining;
            let latest = page.latest_timestamp();
            cursor.absorb(group, page, &mut batch);

            if remaining == 0 {
                break;
            }

            tracing::debug!(
                recorder = %group.recorder,
                loaded,
                total = loaded + remaining,
                "query progress"
            );

            match latest {
                Some(t) if t > timestart => timestart = t,
                _ => {
                    tracing::warn!(
                        recorder = %group.recorder,
                        remaining,
                        "query page did not advance, stopping pagination"
                    );
                    break;
                }
            }

            if self.max_pages.is_some_and(|max| pages >= max) {
                tracing::warn!(recorder = %group.recorder, pages, remaining, "query page limit reached");
                return (batch, Some(TrendError::QueryLimitExceeded));
            }
        }

        tracing::debug!(recorder = %group.recorder, pages, samples = batch.sample_count(), "query complete");
        (batch, None)
    }

    /// Polls every recorder group from `from` on. Channels present in
    /// `cursor` continue after their last delivered sample.
    pub fn subscribe(
        &self,
        channels: &ChannelMap,
        from: Timestamp,
        cursor: DeliveryCursor,
    ) -> (Subscription, mpsc::Receiver<SubscriptionEvent>) {
        let groups = self.group_channels(channels);
        subscription::spawn(
            self.transport.clone(),
            groups,
            from,
            cursor,
            self.poll_interval,
            self.page_limit,
        )
    }

    /// Offset between the source clock and the local clock, fetched once.
    pub async fn server_time_offset(&self) -> i64 {
        *self
            .server_offset
            .get_or_init(|| async {
                match self.transport.get_time().await {
                    Ok(timestamp) => {
                        let offset = timestamp - self.clock.now_ms();
                        tracing::debug!(offset, "source clock offset");
                        offset
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "could not read source time, assuming no offset");
                        0
                    }
                }
            })
            .await
    }

    /// Offset if already known, zero otherwise.
    pub fn cached_server_time_offset(&self) -> i64 {
        self.server_offset.get().copied().unwrap_or(0)
    }

    /// Current time on the source clock.
    pub fn source_now(&self) -> Timestamp {
        self.clock.now_ms() + self.cached_server_time_offset()
    }
}
