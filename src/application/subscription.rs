// Polling subscription: one task per recorder group, cursor chained
use super::sample_source::{DeliveryCursor, RecorderGroup};
use super::source_transport::SourceTransport;
use crate::domain::error::TrendError;
use crate::domain::point::Timestamp;
use crate::domain::sample::SampleBatch;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    Batch { recorder: String, batch: SampleBatch },
    /// A poll took longer than the interval. Sent once per group.
    SlowConsumer { recorder: String },
    /// The group stopped polling after this error.
    Failed { recorder: String, error: TrendError },
}

/// Handle of a running subscription. Cancelling stops polling; requests
/// already in flight complete but their results are dropped.
pub struct Subscription {
    cancel: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Subscription {
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_active(&self) -> bool {
        !*self.cancel.borrow() && self.tasks.iter().any(|task| !task.is_finished())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub(crate) fn spawn(
    transport: Arc<dyn SourceTransport>,
    groups: Vec<RecorderGroup>,
    from: Timestamp,
    cursor: DeliveryCursor,
    period: Duration,
    limit: u32,
) -> (Subscription, mpsc::Receiver<SubscriptionEvent>) {
    let (tx, rx) = mpsc::channel(100);
    let (cancel, cancelled) = watch::channel(false);

    let tasks = groups
        .into_iter()
        .map(|group| {
            let poller = GroupPoller {
                transport: transport.clone(),
                names: group.channel_names(),
                group,
                timestart: from,
                cursor: cursor.clone(),
                period,
                limit,
            };
            tokio::spawn(poller.run(cancelled.clone(), tx.clone()))
        })
        .collect();

    (Subscription { cancel, tasks }, rx)
}

struct GroupPoller {
    transport: Arc<dyn SourceTransport>,
    group: RecorderGroup,
    names: Vec<String>,
    timestart: Timestamp,
    cursor: DeliveryCursor,
    period: Duration,
    limit: u32,
}

impl GroupPoller {
    async fn run(
        mut self,
        mut cancelled: watch::Receiver<bool>,
        tx: mpsc::Sender<SubscriptionEvent>,
    ) {
        let recorder = self.group.recorder.clone();
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut warned = false;

        loop {
            if *cancelled.borrow() {
                return;
            }

            let request = self.transport.query(
                &recorder,
                &self.names,
                self.timestart,
                None,
                Some(self.limit),
            );
            tokio::pin!(request);

            // Ticks that pass while the request is pending are skipped; the
            // next request goes out as soon as this one resolves.
            let mut awaiting = false;
            let result = loop {
                tokio::select! {
                    biased;
                    result = &mut request => break result,
                    _ = ticker.tick() => {
                        if !warned {
                            tracing::warn!(
                                recorder = %recorder,
                                interval_ms = self.period.as_millis() as u64,
                                "a request takes longer than the update interval, consider increasing it"
                            );
                            warned = true;
                            let _ = tx
                                .send(SubscriptionEvent::SlowConsumer { recorder: recorder.clone() })
                                .await;
                        }
                        awaiting = true;
                    }
                }
            };

            if *cancelled.borrow() {
                tracing::debug!(recorder = %recorder, "subscription cancelled, dropping response");
                return;
            }

            match result {
                Ok(page) => {
                    if let Some(latest) = page.latest_timestamp() {
                        self.timestart = self.timestart.max(latest);
                    }
                    let mut batch = SampleBatch::default();
                    self.cursor.absorb(&self.group, page, &mut batch);
                    if !batch.is_empty() {
                        tracing::debug!(recorder = %recorder, samples = batch.sample_count(), "subscription batch");
                        let event = SubscriptionEvent::Batch {
                            recorder: recorder.clone(),
                            batch,
                        };
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                Err(error) => {
                    tracing::error!(recorder = %recorder, error = %error, "subscription failed, cancelling");
                    let _ = tx
                        .send(SubscriptionEvent::Failed {
                            recorder: recorder.clone(),
                            error,
                        })
                        .await;
                    return;
                }
            }

            if !awaiting {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = cancelled.changed() => return,
                }
            }
        }
    }
}
