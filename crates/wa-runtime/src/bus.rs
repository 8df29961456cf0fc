//! Broadcast-based event bus for runtime lifecycle events, so a
//! `wa-daemon`/`wa-cli` surface (or tests) can observe scheduler activity
//! without polling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use wa_core::ids::{CampaignId, ScheduledMessageId};

const DEFAULT_CAPACITY: usize = 1024;

/// A lifecycle event emitted by the campaign or single-message schedulers.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A campaign's worker task started (or resumed after restart).
    CampaignStarted(CampaignId),
    /// A campaign transitioned to `paused`.
    CampaignPaused(CampaignId),
    /// A campaign transitioned back to `running` after a pause.
    CampaignResumed(CampaignId),
    /// A campaign transitioned to `cancelled`.
    CampaignCancelled(CampaignId),
    /// A campaign transitioned to `completed`.
    CampaignCompleted(CampaignId),
    /// A campaign transitioned to `failed`.
    CampaignFailed {
        /// The affected campaign.
        campaign_id: CampaignId,
        /// Human-readable failure reason.
        reason: String,
    },
    /// A campaign's progress advanced by one recipient.
    ProgressAdvanced {
        /// The affected campaign.
        campaign_id: CampaignId,
        /// `progress.next_index` after the advance.
        next_index: usize,
    },
    /// A scheduled one-off message was dispatched successfully.
    MessageDispatched(ScheduledMessageId),
    /// A scheduled one-off message failed after exhausting retries.
    MessageFailed {
        /// The affected message.
        message_id: ScheduledMessageId,
        /// Human-readable failure reason.
        reason: String,
    },
}

#[derive(Debug, Default)]
struct StatsInner {
    total_published: AtomicU64,
    dropped_events: AtomicU64,
}

/// Broadcast-based distribution point for [`RuntimeEvent`]s.
pub struct EventBus {
    tx: broadcast::Sender<RuntimeEvent>,
    stats: Arc<StatsInner>,
}

impl EventBus {
    /// Create a new bus with the default channel capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new bus with the given channel capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            stats: Arc::new(StatsInner::default()),
        }
    }

    /// Subscribe to future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.tx.subscribe()
    }

    /// Publish an event to all current subscribers. Silently dropped (and
    /// counted) if nobody is listening.
    pub fn publish(&self, event: RuntimeEvent) {
        self.stats.total_published.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(event).is_err() {
            self.stats.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Snapshot of bus activity.
    #[must_use]
    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            total_published: self.stats.total_published.load(Ordering::Relaxed),
            active_subscribers: self.tx.receiver_count(),
            dropped_events: self.stats.dropped_events.load(Ordering::Relaxed),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of [`EventBus`] activity counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventBusStats {
    /// Total events published over the bus's lifetime.
    pub total_published: u64,
    /// Number of subscribers currently listening.
    pub active_subscribers: usize,
    /// Events lost because nobody was listening at publish time.
    pub dropped_events: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        let campaign_id = CampaignId::new();
        bus.publish(RuntimeEvent::CampaignStarted(campaign_id));
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, RuntimeEvent::CampaignStarted(id) if id == campaign_id));
    }

    #[test]
    fn publish_with_no_subscribers_counts_dropped() {
        let bus = EventBus::new();
        bus.publish(RuntimeEvent::CampaignStarted(CampaignId::new()));
        let stats = bus.stats();
        assert_eq!(stats.total_published, 1);
        assert_eq!(stats.dropped_events, 1);
        assert_eq!(stats.active_subscribers, 0);
    }

    #[tokio::test]
    async fn multiple_subscribers_all_receive() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        bus.publish(RuntimeEvent::CampaignCompleted(CampaignId::new()));
        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
        assert_eq!(bus.stats().active_subscribers, 2);
    }
}
