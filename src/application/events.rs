// Event bus for trend lifecycle notifications
use crate::domain::mode::Mode;
use crate::domain::series::SeriesId;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum TrendEvent {
    HistoryLoading { series: Vec<SeriesId> },
    HistoryReady { series: Vec<SeriesId>, failed: Vec<SeriesId> },
    LiveStarted,
    LiveStopped,
    ModeChanged { from: Mode, to: Mode },
    /// A configuration change was reconciled.
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&TrendEvent) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    listeners: Mutex<IndexMap<ListenerId, Listener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn(&TrendEvent) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().insert(id, Arc::new(listener));
        id
    }

    /// Returns false if the listener was not registered.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.lock().shift_remove(&id).is_some()
    }

    /// Calls every listener in subscription order. Listeners run outside the
    /// registry lock and may subscribe or unsubscribe.
    pub fn emit(&self, event: TrendEvent) {
        let listeners: Vec<Listener> = self.listeners.lock().values().cloned().collect();
        tracing::debug!(?event, listeners = listeners.len(), "trend event");
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}
