//! `CampaignScheduler` (component G, `spec.md` §4.G): drives one campaign's
//! per-recipient send loop to completion, honouring pacing, cancellation,
//! pause, quota, and failure policy.
//!
//! Concurrency: up to `pacing.max_parallel` recipients are in flight at
//! once, gated by a `Semaphore` (`spec.md` §5), but `progress.next_index`
//! only advances in strict recipient order — the oldest in-flight send is
//! always the next one awaited, so a crash mid-campaign always resumes from
//! a contiguous prefix.

use crate::bus::{EventBus, RuntimeEvent};
use crate::cancel::{CancellationToken, PauseFlag};
use crate::sync::StateSynchronizer;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::warn;
use wa_core::campaign::{Campaign, CampaignStatus, FailurePolicy, Pacing, Recipient};
use wa_core::clock::SharedClock;
use wa_core::ids::{AccountId, LogEntryId};
use wa_core::quota::AccountPlan;
use wa_core::random::{RandomSource, SharedRandomSource};
use wa_core::tracking::VariationLogEntry;
use wa_error::CoreError;
use wa_gateway::{MessageGateway, MessageSpec};
use wa_ratelimit::{QuotaDecision, QuotaLedger};
use wa_retry::{retry_async, RetryPolicy};
use wa_template::{ProcessOptions, TemplateProcessor};
use wa_tracker::VariationTracker;

fn is_retryable(err: &CoreError) -> bool {
    err.retryable()
}

/// A humanising delay drawn uniformly from `[min_interval_ms, max_interval_ms]`.
fn humanising_delay_ms(pacing: &Pacing, random: &dyn RandomSource) -> u64 {
    if pacing.max_interval_ms <= pacing.min_interval_ms {
        return pacing.min_interval_ms;
    }
    let span = pacing.max_interval_ms - pacing.min_interval_ms;
    pacing.min_interval_ms + random.uint64n(span + 1)
}

/// How many total attempts (first try plus retries) a single recipient gets
/// before `failure_policy` decides what happens to the campaign.
fn max_recipient_attempts(policy: FailurePolicy) -> u32 {
    match policy {
        FailurePolicy::RetryUpToK { k } => k.saturating_add(1),
        FailurePolicy::SkipRecipient | FailurePolicy::AbortCampaign => 1,
    }
}

/// Process the template for `recipient`, send it through the gateway
/// (retrying transient failures per `spec.md` §5), and build the log entry
/// for a successful send. Free function so it can run inside a spawned
/// per-recipient task without borrowing a `CampaignScheduler`.
async fn send_to_recipient(
    template: &TemplateProcessor,
    gateway: &dyn MessageGateway,
    random: &dyn RandomSource,
    retry_policy: &RetryPolicy,
    campaign_id: wa_core::ids::CampaignId,
    template_raw: &str,
    account_id: &AccountId,
    recipient: &Recipient,
) -> Result<VariationLogEntry, CoreError> {
    let processed = template.process(
        template_raw,
        &ProcessOptions {
            variables: recipient.per_recipient_variables.clone(),
            validate_only: false,
            seed: None,
        },
    );
    if !processed.success {
        return Err(CoreError::validation(format!("template invalid for campaign {campaign_id}")));
    }

    let spec = MessageSpec {
        account_id: account_id.clone(),
        to: recipient.address.clone(),
        body: processed.final_text.clone(),
    };

    let outcome = retry_async(retry_policy, random, is_retryable, || async { gateway.send(&spec).await }).await?;

    Ok(VariationLogEntry {
        id: LogEntryId::new(),
        campaign_id: Some(campaign_id),
        message_id: Some(outcome.value.provider_message_id.clone()),
        account_id: account_id.clone(),
        template: template_raw.to_string(),
        selections: processed.selections.clone(),
        recipient: recipient.address.clone(),
        sent_at: outcome.value.accepted_at,
        delivered: false,
        read: false,
    })
}

type RecipientOutcome = Result<VariationLogEntry, CoreError>;

/// Aborts the wrapped task when dropped, so a background task never
/// outlives the scope that spawned it.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Drives campaigns through the template → quota → gateway → tracker
/// pipeline, up to `pacing.max_parallel` recipients at a time.
pub struct CampaignScheduler {
    sync: Arc<StateSynchronizer>,
    template: Arc<TemplateProcessor>,
    quota: Arc<QuotaLedger>,
    gateway: Arc<dyn MessageGateway>,
    tracker: Arc<VariationTracker>,
    bus: Arc<EventBus>,
    random: SharedRandomSource,
    clock: SharedClock,
    retry_policy: RetryPolicy,
    heartbeat_interval: StdDuration,
}

impl CampaignScheduler {
    /// Assemble a scheduler from its collaborators. `heartbeat_interval`
    /// governs how often `run` renews its campaign's lease while it is in
    /// flight (`spec.md` §4.H: every 10 seconds by default).
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sync: Arc<StateSynchronizer>,
        template: Arc<TemplateProcessor>,
        quota: Arc<QuotaLedger>,
        gateway: Arc<dyn MessageGateway>,
        tracker: Arc<VariationTracker>,
        bus: Arc<EventBus>,
        random: SharedRandomSource,
        clock: SharedClock,
        heartbeat_interval: StdDuration,
    ) -> Self {
        Self {
            sync,
            template,
            quota,
            gateway,
            tracker,
            bus,
            random,
            clock,
            retry_policy: RetryPolicy::default(),
            heartbeat_interval,
        }
    }

    /// Spawn the task that sends to recipient `index`, gated by `permit`
    /// (held for the task's whole lifetime, bounding concurrency to
    /// `pacing.max_parallel`).
    #[allow(clippy::too_many_arguments)]
    fn spawn_recipient(
        &self,
        campaign: &Campaign,
        index: usize,
        plan: AccountPlan,
        permit: tokio::sync::OwnedSemaphorePermit,
    ) -> JoinHandle<RecipientOutcome> {
        let template = self.template.clone();
        let gateway = self.gateway.clone();
        let quota = self.quota.clone();
        let random = self.random.clone();
        let retry_policy = self.retry_policy;
        let campaign_id = campaign.id;
        let account_id = campaign.account_id.clone();
        let template_raw = campaign.template_raw.clone();
        let pacing = campaign.pacing;
        let recipient = campaign.recipients[index].clone();

        tokio::spawn(async move {
            let _permit = permit;

            // spec.md §4.G step 2: the humanising delay is skipped for the
            // very first recipient of a campaign so a freshly started
            // campaign sends immediately.
            if index > 0 {
                let delay_ms = humanising_delay_ms(&pacing, random.as_ref());
                if delay_ms > 0 {
                    sleep(StdDuration::from_millis(delay_ms)).await;
                }
            }

            let reservation = loop {
                match quota.reserve(&account_id, plan, 1).await {
                    QuotaDecision::Granted(r) => break r,
                    QuotaDecision::Denied { retry_after_ms, .. } => {
                        sleep(StdDuration::from_millis(retry_after_ms.max(1))).await;
                    }
                }
            };

            let attempts_allowed = max_recipient_attempts(pacing.failure_policy);
            let mut attempt = 0u32;
            let result = loop {
                attempt += 1;
                let outcome = send_to_recipient(
                    &template,
                    gateway.as_ref(),
                    random.as_ref(),
                    &retry_policy,
                    campaign_id,
                    &template_raw,
                    &account_id,
                    &recipient,
                )
                .await;
                if outcome.is_ok() || attempt >= attempts_allowed {
                    break outcome;
                }
                sleep(retry_policy.nominal_delay(attempt)).await;
            };

            match &result {
                Ok(_) => quota.commit(&account_id, reservation).await,
                Err(_) => quota.release(&account_id, reservation).await,
            }
            result
        })
    }

    /// Drive `campaign` to completion from wherever `progress.next_index`
    /// left off. `owner` must already hold the campaign's lease; `cancel`
    /// and `pause` are observed only when deciding whether to launch the
    /// *next* recipient, never by aborting one already in flight
    /// (`spec.md` §5).
    ///
    /// # Errors
    ///
    /// Returns the error that aborted the campaign when `failure_policy` is
    /// `abort_campaign` and a recipient exhausts its attempts, or a storage
    /// error if persistence fails.
    pub async fn run(
        &self,
        mut campaign: Campaign,
        owner: &str,
        plan: AccountPlan,
        cancel: CancellationToken,
        pause: PauseFlag,
    ) -> Result<(), CoreError> {
        let campaign_id = campaign.id;
        self.bus.publish(RuntimeEvent::CampaignStarted(campaign_id));

        let max_parallel = (campaign.pacing.max_parallel.max(1)) as usize;
        let semaphore = Arc::new(Semaphore::new(max_parallel));
        let mut in_flight: VecDeque<JoinHandle<RecipientOutcome>> = VecDeque::new();

        // Renew the lease on an interval independent of how often progress
        // is persisted (`spec.md` §4.H): a slow-paced campaign can easily
        // go longer than the lease TTL between recipient completions, and
        // `persist_progress` alone never touches `lease_expires_at`.
        let lease_lost = Arc::new(AtomicBool::new(false));
        let heartbeat_handle = {
            let sync = self.sync.clone();
            let lease_lost = lease_lost.clone();
            let owner = owner.to_string();
            let interval = self.heartbeat_interval;
            tokio::spawn(async move {
                loop {
                    sleep(interval).await;
                    match sync.heartbeat(campaign_id, &owner).await {
                        Ok(true) => {}
                        Ok(false) => {
                            warn!(campaign_id = %campaign_id, %owner, "lease heartbeat found campaign no longer owned by this process");
                            lease_lost.store(true, Ordering::SeqCst);
                            break;
                        }
                        Err(err) => {
                            warn!(campaign_id = %campaign_id, error = %err, "lease heartbeat failed");
                            lease_lost.store(true, Ordering::SeqCst);
                            break;
                        }
                    }
                }
            })
        };
        let _heartbeat_guard = AbortOnDrop(heartbeat_handle);

        loop {
            if in_flight.is_empty() {
                if lease_lost.load(Ordering::SeqCst) {
                    let err = CoreError::lease_lost(format!("lease for campaign {campaign_id} was lost while still running"));
                    self.bus.publish(RuntimeEvent::CampaignFailed {
                        campaign_id,
                        reason: err.to_string(),
                    });
                    return Err(err);
                }
                if cancel.is_cancelled() {
                    self.sync.persist_progress(campaign_id, owner, |c| c.status = CampaignStatus::Cancelled).await?;
                    self.bus.publish(RuntimeEvent::CampaignCancelled(campaign_id));
                    return Ok(());
                }
                if pause.is_paused() {
                    self.sync.persist_progress(campaign_id, owner, |c| c.status = CampaignStatus::Paused).await?;
                    self.bus.publish(RuntimeEvent::CampaignPaused(campaign_id));
                    while pause.is_paused() && !cancel.is_cancelled() {
                        sleep(StdDuration::from_millis(200)).await;
                    }
                    if cancel.is_cancelled() {
                        continue;
                    }
                    self.sync.persist_progress(campaign_id, owner, |c| c.status = CampaignStatus::Running).await?;
                    self.bus.publish(RuntimeEvent::CampaignResumed(campaign_id));
                    continue;
                }
                if campaign.progress.next_index >= campaign.recipients.len() {
                    break;
                }
            }

            while in_flight.len() < max_parallel
                && campaign.progress.next_index + in_flight.len() < campaign.recipients.len()
                && !cancel.is_cancelled()
                && !pause.is_paused()
            {
                let spawn_index = campaign.progress.next_index + in_flight.len();
                let permit = semaphore.clone().acquire_owned().await.expect("campaign semaphore is never closed");
                in_flight.push_back(self.spawn_recipient(&campaign, spawn_index, plan, permit));
            }

            let Some(handle) = in_flight.pop_front() else {
                continue;
            };
            let outcome = handle.await.map_err(|e| CoreError::storage("recipient task panicked").with_source(e))?;

            match outcome {
                Ok(entry) => {
                    self.tracker.log(entry).await?;
                    campaign.progress.record_success();
                    self.sync.persist_progress(campaign_id, owner, |c| c.progress.record_success()).await?;
                    self.bus.publish(RuntimeEvent::ProgressAdvanced {
                        campaign_id,
                        next_index: campaign.progress.next_index,
                    });
                }
                Err(err) => {
                    warn!(
                        campaign_id = %campaign_id,
                        error = %err,
                        "recipient send failed after exhausting attempts"
                    );
                    campaign.progress.record_failure();
                    let dto = (&err).into();
                    self.sync
                        .persist_progress(campaign_id, owner, |c| {
                            c.progress.record_failure();
                            c.last_error = Some(dto);
                        })
                        .await?;
                    self.bus.publish(RuntimeEvent::ProgressAdvanced {
                        campaign_id,
                        next_index: campaign.progress.next_index,
                    });

                    if matches!(campaign.pacing.failure_policy, FailurePolicy::AbortCampaign) {
                        for leftover in in_flight.drain(..) {
                            let _ = leftover.await;
                        }
                        self.sync.persist_progress(campaign_id, owner, |c| c.status = CampaignStatus::Failed).await?;
                        self.bus.publish(RuntimeEvent::CampaignFailed {
                            campaign_id,
                            reason: err.to_string(),
                        });
                        return Err(err);
                    }
                }
            }
        }

        self.sync.persist_progress(campaign_id, owner, |c| c.status = CampaignStatus::Completed).await?;
        self.bus.publish(RuntimeEvent::CampaignCompleted(campaign_id));
        Ok(())
    }

    /// The clock this scheduler was built with, exposed for callers that
    /// need `now()` without threading a second handle through.
    #[must_use]
    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CampaignStore;
    use chrono::{Duration, Utc};
    use std::sync::Arc;
    use wa_core::campaign::Progress;
    use wa_core::clock::FixedClock;
    use wa_core::ids::CampaignId;
    use wa_core::random::SeededRandomSource;
    use wa_gateway::{MockFailureRates, MockGateway};

    fn recipients(n: usize) -> Vec<Recipient> {
        (0..n).map(|i| Recipient::new(format!("+1555000{i:04}"))).collect()
    }

    fn campaign(pacing: Pacing, n: usize) -> Campaign {
        Campaign {
            id: CampaignId::new(),
            account_id: AccountId::new("acct-1"),
            name: "welcome".into(),
            template_raw: "Hi|Hello".into(),
            recipients: recipients(n),
            pacing,
            created_at: Utc::now(),
            starts_at: None,
            status: CampaignStatus::Running,
            progress: Progress::new(n),
            last_error: None,
        }
    }

    async fn scheduler_with_gateway(gateway: Arc<dyn MessageGateway>) -> (CampaignScheduler, tempfile::TempDir) {
        scheduler_with_gateway_and_heartbeat(gateway, StdDuration::from_secs(3600)).await
    }

    async fn scheduler_with_gateway_and_heartbeat(
        gateway: Arc<dyn MessageGateway>,
        heartbeat_interval: StdDuration,
    ) -> (CampaignScheduler, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = CampaignStore::open(dir.path().join("campaigns.jsonl")).await.unwrap();
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let sync = Arc::new(StateSynchronizer::new(store, clock.clone(), Duration::seconds(30)));
        let template = Arc::new(TemplateProcessor::new(16));
        let quota = Arc::new(QuotaLedger::new(clock.clone()));
        let tracker = Arc::new(VariationTracker::open(dir.path().join("tracking.jsonl")).await.unwrap());
        let bus = Arc::new(EventBus::new());
        let random: SharedRandomSource = Arc::new(SeededRandomSource::new(7));
        (
            CampaignScheduler::new(sync, template, quota, gateway, tracker, bus, random, clock, heartbeat_interval),
            dir,
        )
    }

    #[tokio::test]
    async fn completes_a_campaign_with_no_failures() {
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let random: SharedRandomSource = Arc::new(SeededRandomSource::new(1));
        let gateway: Arc<dyn MessageGateway> = Arc::new(MockGateway::new(clock.clone(), random.clone()));
        let (scheduler, _dir) = scheduler_with_gateway(gateway).await;

        let c = campaign(Pacing::default(), 3);
        let id = c.id;
        scheduler.sync.persist_new(c.clone()).await.unwrap();
        scheduler.sync.claim(id, "owner-a").await.unwrap();

        scheduler
            .run(c, "owner-a", AccountPlan::default(), CancellationToken::new(), PauseFlag::new())
            .await
            .unwrap();

        let stored = scheduler.sync.get(id).await.unwrap();
        assert_eq!(stored.campaign.status, CampaignStatus::Completed);
        assert_eq!(stored.campaign.progress.succeeded, 3);
        assert_eq!(stored.campaign.progress.next_index, 3);
    }

    #[tokio::test]
    async fn concurrent_recipients_still_advance_progress_in_contiguous_order() {
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let random: SharedRandomSource = Arc::new(SeededRandomSource::new(4));
        let gateway: Arc<dyn MessageGateway> = Arc::new(MockGateway::new(clock.clone(), random.clone()));
        let (scheduler, _dir) = scheduler_with_gateway(gateway).await;

        let pacing = Pacing {
            max_parallel: 4,
            ..Pacing::default()
        };
        let c = campaign(pacing, 10);
        let id = c.id;
        scheduler.sync.persist_new(c.clone()).await.unwrap();
        scheduler.sync.claim(id, "owner-a").await.unwrap();

        scheduler
            .run(c, "owner-a", AccountPlan::default(), CancellationToken::new(), PauseFlag::new())
            .await
            .unwrap();

        let stored = scheduler.sync.get(id).await.unwrap();
        assert_eq!(stored.campaign.status, CampaignStatus::Completed);
        assert_eq!(stored.campaign.progress.succeeded, 10);
        assert_eq!(stored.campaign.progress.next_index, 10);
        assert!(stored.campaign.progress.is_consistent());
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop_and_marks_cancelled() {
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let random: SharedRandomSource = Arc::new(SeededRandomSource::new(1));
        let gateway: Arc<dyn MessageGateway> = Arc::new(MockGateway::new(clock.clone(), random.clone()));
        let (scheduler, _dir) = scheduler_with_gateway(gateway).await;

        let c = campaign(Pacing::default(), 5);
        let id = c.id;
        scheduler.sync.persist_new(c.clone()).await.unwrap();
        scheduler.sync.claim(id, "owner-a").await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        scheduler
            .run(c, "owner-a", AccountPlan::default(), cancel, PauseFlag::new())
            .await
            .unwrap();

        let stored = scheduler.sync.get(id).await.unwrap();
        assert_eq!(stored.campaign.status, CampaignStatus::Cancelled);
    }

    #[tokio::test]
    async fn skip_recipient_policy_continues_past_permanent_failures() {
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let random: SharedRandomSource = Arc::new(SeededRandomSource::new(1));
        let gateway: Arc<MockGateway> = Arc::new(MockGateway::new(clock.clone(), random.clone()));
        gateway.reject_address("+15550000001");
        let (scheduler, _dir) = scheduler_with_gateway(gateway).await;

        let pacing = Pacing {
            failure_policy: FailurePolicy::SkipRecipient,
            ..Pacing::default()
        };
        let c = campaign(pacing, 3);
        let id = c.id;
        scheduler.sync.persist_new(c.clone()).await.unwrap();
        scheduler.sync.claim(id, "owner-a").await.unwrap();

        scheduler
            .run(c, "owner-a", AccountPlan::default(), CancellationToken::new(), PauseFlag::new())
            .await
            .unwrap();

        let stored = scheduler.sync.get(id).await.unwrap();
        assert_eq!(stored.campaign.status, CampaignStatus::Completed);
        assert_eq!(stored.campaign.progress.failed, 1);
        assert_eq!(stored.campaign.progress.succeeded, 2);
    }

    #[tokio::test]
    async fn abort_campaign_policy_stops_on_first_permanent_failure() {
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let random: SharedRandomSource = Arc::new(SeededRandomSource::new(1));
        let gateway: Arc<MockGateway> = Arc::new(MockGateway::new(clock.clone(), random.clone()));
        gateway.reject_address("+15550000000");
        let (scheduler, _dir) = scheduler_with_gateway(gateway).await;

        let pacing = Pacing {
            failure_policy: FailurePolicy::AbortCampaign,
            max_parallel: 1,
            ..Pacing::default()
        };
        let c = campaign(pacing, 3);
        let id = c.id;
        scheduler.sync.persist_new(c.clone()).await.unwrap();
        scheduler.sync.claim(id, "owner-a").await.unwrap();

        let err = scheduler
            .run(c, "owner-a", AccountPlan::default(), CancellationToken::new(), PauseFlag::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, wa_error::ErrorCode::GatewayPermanent);

        let stored = scheduler.sync.get(id).await.unwrap();
        assert_eq!(stored.campaign.status, CampaignStatus::Failed);
        assert_eq!(stored.campaign.progress.next_index, 1);
    }

    #[tokio::test]
    async fn losing_the_lease_aborts_the_run_at_the_next_heartbeat() {
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let random: SharedRandomSource = Arc::new(SeededRandomSource::new(6));
        let gateway: Arc<dyn MessageGateway> = Arc::new(MockGateway::new(clock.clone(), random.clone()));
        let (scheduler, _dir) = scheduler_with_gateway_and_heartbeat(gateway, StdDuration::from_millis(20)).await;

        let pacing = Pacing {
            min_interval_ms: 60,
            max_interval_ms: 90,
            max_parallel: 1,
            ..Pacing::default()
        };
        let c = campaign(pacing, 5);
        let id = c.id;
        scheduler.sync.persist_new(c.clone()).await.unwrap();
        scheduler.sync.claim(id, "owner-a").await.unwrap();

        let sync = scheduler.sync.clone();
        let run_handle = tokio::spawn(async move {
            scheduler
                .run(c, "owner-a", AccountPlan::default(), CancellationToken::new(), PauseFlag::new())
                .await
        });

        // Give the first heartbeat tick a chance to fire before stealing
        // the lease out from under it.
        tokio::time::sleep(StdDuration::from_millis(60)).await;
        sync.release(id, "owner-a").await.unwrap();
        assert!(sync.claim(id, "owner-b").await.unwrap());

        let err = run_handle.await.unwrap().unwrap_err();
        assert_eq!(err.code, wa_error::ErrorCode::LeaseLost);
    }

    #[tokio::test]
    async fn retry_up_to_k_eventually_records_success() {
        let clock: SharedClock = Arc::new(FixedClock::new(Utc::now()));
        let random: SharedRandomSource = Arc::new(SeededRandomSource::new(2));
        let gateway: Arc<dyn MessageGateway> = Arc::new(MockGateway::with_rates(
            clock.clone(),
            random.clone(),
            MockFailureRates {
                transient_per_mille: 0,
                permanent_per_mille: 0,
            },
        ));
        let (scheduler, _dir) = scheduler_with_gateway(gateway).await;

        let pacing = Pacing {
            failure_policy: FailurePolicy::RetryUpToK { k: 2 },
            ..Pacing::default()
        };
        let c = campaign(pacing, 1);
        let id = c.id;
        scheduler.sync.persist_new(c.clone()).await.unwrap();
        scheduler.sync.claim(id, "owner-a").await.unwrap();

        scheduler
            .run(c, "owner-a", AccountPlan::default(), CancellationToken::new(), PauseFlag::new())
            .await
            .unwrap();

        let stored = scheduler.sync.get(id).await.unwrap();
        assert_eq!(stored.campaign.progress.succeeded, 1);
    }
}
