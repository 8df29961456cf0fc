//! `SingleMessageScheduler` (component I, `spec.md` §4.I): a tick loop that
//! claims and dispatches one-off scheduled messages as they come due.

use crate::bus::{EventBus, RuntimeEvent};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::warn;
use wa_core::ids::LogEntryId;
use wa_core::random::SharedRandomSource;
use wa_core::scheduled::{ScheduledMessage, ScheduledStatus};
use wa_core::tracking::VariationLogEntry;
use wa_error::CoreError;
use wa_gateway::{MessageGateway, MessageSpec};
use wa_retry::{retry_async, RetryPolicy};
use wa_template::{ProcessOptions, TemplateProcessor};
use wa_tracker::VariationTracker;

use crate::store::ScheduledMessageStore;

fn is_retryable(err: &CoreError) -> bool {
    err.retryable()
}

/// Dispatches due [`ScheduledMessage`]s through the same
/// template → gateway → tracker pipeline as campaigns, with the same
/// transient-failure retry policy, but no pacing or quota reservation
/// (`spec.md` §4.I: single messages are not rate-limited against a
/// campaign's pacing). Up to `max_parallel` messages are dispatched
/// concurrently within one tick, gated by a shared `Semaphore`
/// (`spec.md` §5).
pub struct SingleMessageScheduler {
    store: Arc<ScheduledMessageStore>,
    template: Arc<TemplateProcessor>,
    gateway: Arc<dyn MessageGateway>,
    tracker: Arc<VariationTracker>,
    bus: Arc<EventBus>,
    random: SharedRandomSource,
    retry_policy: RetryPolicy,
    dispatch_pool: Arc<Semaphore>,
}

impl SingleMessageScheduler {
    /// Assemble a scheduler from its collaborators. `max_parallel` bounds
    /// how many due messages are dispatched concurrently within one tick.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<ScheduledMessageStore>,
        template: Arc<TemplateProcessor>,
        gateway: Arc<dyn MessageGateway>,
        tracker: Arc<VariationTracker>,
        bus: Arc<EventBus>,
        random: SharedRandomSource,
        max_parallel: usize,
    ) -> Self {
        Self {
            store,
            template,
            gateway,
            tracker,
            bus,
            random,
            retry_policy: RetryPolicy::default(),
            dispatch_pool: Arc::new(Semaphore::new(max_parallel.max(1))),
        }
    }

    /// One tick: claim and dispatch every message due at `now`. Returns the
    /// number of messages it attempted to dispatch this tick. Dispatch of
    /// individual messages runs concurrently, bounded by the scheduler's
    /// dispatch pool; one message's failure never aborts another's.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the underlying store cannot be read.
    /// Per-message dispatch failures are recorded on the message itself and
    /// never abort the tick.
    pub async fn tick(&self, now: chrono::DateTime<chrono::Utc>) -> Result<usize, CoreError> {
        let due = self.store.list_due(now).await;
        let mut claimed = Vec::with_capacity(due.len());
        for message in due {
            if self.store.claim_pending(message.id).await? {
                claimed.push(message);
            }
        }
        let dispatched = claimed.len();

        let mut tasks = Vec::with_capacity(claimed.len());
        for message in claimed {
            let permit = self.dispatch_pool.clone().acquire_owned().await.expect("dispatch pool is never closed");
            let template = self.template.clone();
            let gateway = self.gateway.clone();
            let tracker = self.tracker.clone();
            let bus = self.bus.clone();
            let store = self.store.clone();
            let random = self.random.clone();
            let retry_policy = self.retry_policy;
            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                dispatch_one(&template, gateway.as_ref(), &tracker, &bus, &store, random.as_ref(), &retry_policy, message).await
            }));
        }

        for task in tasks {
            if let Err(err) = task.await.map_err(|e| CoreError::storage("scheduled dispatch task panicked").with_source(e))? {
                warn!(error = %err, "scheduled message dispatch tick recorded a failure");
            }
        }

        Ok(dispatched)
    }
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_one(
    template: &TemplateProcessor,
    gateway: &dyn MessageGateway,
    tracker: &VariationTracker,
    bus: &EventBus,
    store: &ScheduledMessageStore,
    random: &dyn wa_core::random::RandomSource,
    retry_policy: &RetryPolicy,
    message: ScheduledMessage,
) -> Result<(), CoreError> {
    let processed = template.process(
        &message.template_raw,
        &ProcessOptions {
            variables: message.variables.clone(),
            validate_only: false,
            seed: None,
        },
    );

    if !processed.success {
        let err = CoreError::validation(format!("template invalid for scheduled message {}", message.id));
        return fail(store, bus, message, &err).await;
    }

    let spec = MessageSpec {
        account_id: message.account_id.clone(),
        to: message.recipient.clone(),
        body: processed.final_text.clone(),
    };

    match retry_async(retry_policy, random, is_retryable, || async { gateway.send(&spec).await }).await {
        Ok(outcome) => {
            let entry = VariationLogEntry {
                id: LogEntryId::new(),
                campaign_id: None,
                message_id: Some(outcome.value.provider_message_id.clone()),
                account_id: message.account_id.clone(),
                template: message.template_raw.clone(),
                selections: processed.selections.clone(),
                recipient: message.recipient.clone(),
                sent_at: outcome.value.accepted_at,
                delivered: false,
                read: false,
            };
            tracker.log(entry).await?;
            bus.publish(RuntimeEvent::MessageDispatched(message.id));
            Ok(())
        }
        Err(err) => {
            warn!(message_id = %message.id, error = %err, "scheduled message dispatch failed");
            fail(store, bus, message, &err).await
        }
    }
}

async fn fail(store: &ScheduledMessageStore, bus: &EventBus, message: ScheduledMessage, err: &CoreError) -> Result<(), CoreError> {
    store.mark_failed(message.id, err.into()).await?;
    bus.publish(RuntimeEvent::MessageFailed {
        message_id: message.id,
        reason: err.to_string(),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::sync::Arc;
    use wa_core::clock::FixedClock;
    use wa_core::clock::SharedClock;
    use wa_core::ids::{AccountId, ScheduledMessageId};
    use wa_core::random::SeededRandomSource;
    use wa_gateway::MockGateway;

    fn message(run_at: chrono::DateTime<Utc>) -> ScheduledMessage {
        ScheduledMessage {
            id: ScheduledMessageId::new(),
            account_id: AccountId::new("acct-1"),
            template_raw: "Hi|Hello".into(),
            recipient: "+15550000000".into(),
            variables: Default::default(),
            run_at,
            status: ScheduledStatus::Pending,
            attempts: 0,
            last_error: None,
        }
    }

    async fn scheduler(gateway: Arc<dyn MessageGateway>) -> (SingleMessageScheduler, Arc<ScheduledMessageStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ScheduledMessageStore::open(dir.path().join("scheduled.jsonl")).await.unwrap());
        let template = Arc::new(TemplateProcessor::new(16));
        let tracker = Arc::new(VariationTracker::open(dir.path().join("tracking.jsonl")).await.unwrap());
        let bus = Arc::new(EventBus::new());
        let random: SharedRandomSource = Arc::new(SeededRandomSource::new(3));
        (
            SingleMessageScheduler::new(store.clone(), template, gateway, tracker, bus, random, 4),
            store,
            dir,
        )
    }

    #[tokio::test]
    async fn tick_dispatches_due_messages_and_marks_them_terminal() {
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let random: SharedRandomSource = Arc::new(SeededRandomSource::new(1));
        let gateway: Arc<dyn MessageGateway> = Arc::new(MockGateway::new(clock.clone(), random));
        let (scheduler, store, _dir) = scheduler(gateway).await;

        let now = Utc::now();
        let msg = message(now - Duration::seconds(1));
        let id = msg.id;
        store.insert(msg).await.unwrap();

        let n = scheduler.tick(now).await.unwrap();
        assert_eq!(n, 1);

        let stored = store.get(id).await.unwrap();
        assert_eq!(stored.status, ScheduledStatus::Dispatched);
    }

    #[tokio::test]
    async fn tick_skips_messages_not_yet_due() {
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let random: SharedRandomSource = Arc::new(SeededRandomSource::new(1));
        let gateway: Arc<dyn MessageGateway> = Arc::new(MockGateway::new(clock.clone(), random));
        let (scheduler, store, _dir) = scheduler(gateway).await;

        let now = Utc::now();
        let msg = message(now + Duration::seconds(60));
        store.insert(msg).await.unwrap();

        let n = scheduler.tick(now).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn permanent_gateway_failure_marks_message_failed() {
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let random: SharedRandomSource = Arc::new(SeededRandomSource::new(1));
        let gw = Arc::new(MockGateway::new(clock.clone(), random));
        gw.reject_address("+15550000000");
        let gateway: Arc<dyn MessageGateway> = gw;
        let (scheduler, store, _dir) = scheduler(gateway).await;

        let now = Utc::now();
        let msg = message(now - Duration::seconds(1));
        let id = msg.id;
        store.insert(msg).await.unwrap();

        scheduler.tick(now).await.unwrap();

        let stored = store.get(id).await.unwrap();
        assert_eq!(stored.status, ScheduledStatus::Failed);
        assert!(stored.last_error.is_some());
    }

    #[tokio::test]
    async fn invalid_template_fails_without_calling_gateway() {
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let random: SharedRandomSource = Arc::new(SeededRandomSource::new(1));
        let gateway: Arc<dyn MessageGateway> = Arc::new(MockGateway::new(clock.clone(), random));
        let (scheduler, store, _dir) = scheduler(gateway).await;

        let now = Utc::now();
        let mut msg = message(now - Duration::seconds(1));
        msg.template_raw = "Solo|".into();
        let id = msg.id;
        store.insert(msg).await.unwrap();

        scheduler.tick(now).await.unwrap();

        let stored = store.get(id).await.unwrap();
        assert_eq!(stored.status, ScheduledStatus::Failed);
    }

    #[tokio::test]
    async fn a_batch_of_due_messages_all_dispatch_concurrently() {
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let random: SharedRandomSource = Arc::new(SeededRandomSource::new(1));
        let gateway: Arc<dyn MessageGateway> = Arc::new(MockGateway::new(clock.clone(), random));
        let (scheduler, store, _dir) = scheduler(gateway).await;

        let now = Utc::now();
        let mut ids = Vec::new();
        for i in 0..6 {
            let mut msg = message(now - Duration::seconds(1));
            msg.recipient = format!("+1555000{i:04}");
            ids.push(msg.id);
            store.insert(msg).await.unwrap();
        }

        let n = scheduler.tick(now).await.unwrap();
        assert_eq!(n, 6);
        for id in ids {
            let stored = store.get(id).await.unwrap();
            assert_eq!(stored.status, ScheduledStatus::Dispatched);
        }
    }
}
