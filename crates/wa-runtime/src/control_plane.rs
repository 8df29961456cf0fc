//! `ControlPlane` (component K, `spec.md` §4.K): the thin facade the outer
//! HTTP/CLI surfaces call. It owns no business logic of its own — every
//! method is a direct delegation to C/D/F/G/H/I, scoped by `account_id`.

use crate::bus::{EventBus, RuntimeEvent};
use crate::cancel::{CancellationToken, PauseFlag};
use crate::campaign::CampaignScheduler;
use crate::single::SingleMessageScheduler;
use crate::store::{CampaignStore, ScheduledMessageStore};
use crate::sync::StateSynchronizer;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use wa_core::campaign::{Campaign, CampaignStatus, Progress};
use wa_core::clock::SharedClock;
use wa_core::ids::{CampaignId, ScheduledMessageId};
use wa_core::quota::AccountPlan;
use wa_core::random::SharedRandomSource;
use wa_core::scheduled::ScheduledMessage;
use wa_error::CoreError;
use wa_gateway::MessageGateway;
use wa_ratelimit::QuotaLedger;
use wa_template::{ProcessedMessage, TemplateProcessor};
use wa_tracker::{ExportFormat, Stats, VariationTracker};

struct RunningCampaign {
    cancel: CancellationToken,
    pause: PauseFlag,
    handle: JoinHandle<()>,
}

/// Composes every core component behind one `account_id`-scoped API.
pub struct ControlPlane {
    owner: String,
    sync: Arc<StateSynchronizer>,
    template: Arc<TemplateProcessor>,
    quota: Arc<QuotaLedger>,
    gateway: Arc<dyn MessageGateway>,
    tracker: Arc<VariationTracker>,
    bus: Arc<EventBus>,
    scheduled: Arc<ScheduledMessageStore>,
    single: Arc<SingleMessageScheduler>,
    clock: SharedClock,
    random: SharedRandomSource,
    heartbeat_interval: StdDuration,
    running: AsyncMutex<HashMap<CampaignId, RunningCampaign>>,
}

impl ControlPlane {
    /// Assemble a control plane. `owner` identifies this process for lease
    /// ownership (`spec.md` §4.H); it should be stable across restarts of
    /// the same deployment slot but unique across concurrent processes.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        owner: impl Into<String>,
        campaign_store: CampaignStore,
        scheduled: Arc<ScheduledMessageStore>,
        template: Arc<TemplateProcessor>,
        quota: Arc<QuotaLedger>,
        gateway: Arc<dyn MessageGateway>,
        tracker: Arc<VariationTracker>,
        bus: Arc<EventBus>,
        clock: SharedClock,
        random: SharedRandomSource,
        lease_ttl: chrono::Duration,
        single_message_max_parallel: usize,
        heartbeat_interval_secs: u64,
    ) -> Self {
        let sync = Arc::new(StateSynchronizer::new(campaign_store, clock.clone(), lease_ttl));
        let single = Arc::new(SingleMessageScheduler::new(
            scheduled.clone(),
            template.clone(),
            gateway.clone(),
            tracker.clone(),
            bus.clone(),
            random.clone(),
            single_message_max_parallel,
        ));
        Self {
            owner: owner.into(),
            sync,
            template,
            quota,
            gateway,
            tracker,
            bus,
            scheduled,
            single,
            clock,
            random,
            heartbeat_interval: StdDuration::from_secs(heartbeat_interval_secs.max(1)),
            running: AsyncMutex::new(HashMap::new()),
        }
    }

    fn campaign_scheduler(&self) -> CampaignScheduler {
        CampaignScheduler::new(
            self.sync.clone(),
            self.template.clone(),
            self.quota.clone(),
            self.gateway.clone(),
            self.tracker.clone(),
            self.bus.clone(),
            self.random.clone(),
            self.clock.clone(),
            self.heartbeat_interval,
        )
    }

    /// Parse and validate a raw template without selecting or substituting.
    #[must_use]
    pub fn validate_template(&self, raw: &str) -> wa_core::template::Template {
        (*self.template.validate(raw)).clone()
    }

    /// Produce up to `n` rendered previews of `raw`.
    #[must_use]
    pub fn preview_template(&self, raw: &str, variables: &BTreeMap<String, String>, n: usize) -> Vec<ProcessedMessage> {
        self.template.preview(raw, variables, n)
    }

    /// Create and start driving a new campaign. Persists it, claims its
    /// lease for this process, and spawns its send loop.
    ///
    /// # Errors
    ///
    /// Returns a storage error if persistence fails.
    pub async fn create_campaign(&self, mut campaign: Campaign, plan: AccountPlan) -> Result<CampaignId, CoreError> {
        campaign.status = CampaignStatus::Running;
        let id = campaign.id;
        self.sync.persist_new(campaign.clone()).await?;
        self.sync.claim(id, &self.owner).await?;
        self.spawn(campaign, plan).await;
        Ok(id)
    }

    async fn spawn(&self, campaign: Campaign, plan: AccountPlan) {
        let scheduler = self.campaign_scheduler();
        let owner = self.owner.clone();
        let cancel = CancellationToken::new();
        let pause = PauseFlag::new();
        let campaign_id = campaign.id;
        let task_cancel = cancel.clone();
        let task_pause = pause.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = scheduler.run(campaign, &owner, plan, task_cancel, task_pause).await {
                warn!(campaign_id = %campaign_id, error = %err, "campaign task ended with an error");
            }
        });
        self.running.lock().await.insert(campaign_id, RunningCampaign { cancel, pause, handle });
    }

    /// Request a pause. Takes effect at the next recipient boundary.
    ///
    /// # Errors
    ///
    /// Returns [`wa_error::ErrorCode::NotFound`] if no running task is
    /// tracked for `campaign_id` in this process.
    pub async fn pause(&self, campaign_id: CampaignId) -> Result<(), CoreError> {
        let running = self.running.lock().await;
        let entry = running
            .get(&campaign_id)
            .ok_or_else(|| CoreError::new(wa_error::ErrorCode::NotFound, format!("no running task for campaign {campaign_id}")))?;
        entry.pause.pause();
        Ok(())
    }

    /// Clear a pause request, resuming the send loop.
    ///
    /// # Errors
    ///
    /// Returns [`wa_error::ErrorCode::NotFound`] if no running task is
    /// tracked for `campaign_id` in this process.
    pub async fn resume(&self, campaign_id: CampaignId) -> Result<(), CoreError> {
        let running = self.running.lock().await;
        let entry = running
            .get(&campaign_id)
            .ok_or_else(|| CoreError::new(wa_error::ErrorCode::NotFound, format!("no running task for campaign {campaign_id}")))?;
        entry.pause.resume();
        Ok(())
    }

    /// Request cancellation. Takes effect at the next recipient boundary.
    ///
    /// # Errors
    ///
    /// Returns [`wa_error::ErrorCode::NotFound`] if no running task is
    /// tracked for `campaign_id` in this process.
    pub async fn cancel(&self, campaign_id: CampaignId) -> Result<(), CoreError> {
        let running = self.running.lock().await;
        let entry = running
            .get(&campaign_id)
            .ok_or_else(|| CoreError::new(wa_error::ErrorCode::NotFound, format!("no running task for campaign {campaign_id}")))?;
        entry.cancel.cancel();
        Ok(())
    }

    /// Current progress snapshot for a campaign.
    ///
    /// # Errors
    ///
    /// Returns [`wa_error::ErrorCode::NotFound`] if the campaign does not
    /// exist.
    pub async fn progress(&self, campaign_id: CampaignId) -> Result<Progress, CoreError> {
        self.sync
            .get(campaign_id)
            .await
            .map(|row| row.campaign.progress)
            .ok_or_else(|| CoreError::new(wa_error::ErrorCode::NotFound, format!("no campaign {campaign_id}")))
    }

    /// Schedule a one-off message for later dispatch.
    ///
    /// # Errors
    ///
    /// Returns a storage error if persistence fails.
    pub async fn schedule_message(&self, message: ScheduledMessage) -> Result<ScheduledMessageId, CoreError> {
        let id = message.id;
        self.scheduled.insert(message).await?;
        Ok(id)
    }

    /// Cancel a scheduled message, if it has not already been dispatched.
    ///
    /// # Errors
    ///
    /// Returns a storage error if persistence fails.
    pub async fn cancel_scheduled(&self, message_id: ScheduledMessageId) -> Result<bool, CoreError> {
        self.scheduled.cancel(message_id).await
    }

    /// Distribution and delivery statistics for a campaign.
    pub async fn campaign_stats(&self, campaign_id: CampaignId, now: DateTime<Utc>) -> Stats {
        self.tracker.stats_for_campaign(campaign_id, now).await
    }

    /// Export a campaign's variation log in the requested format.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation fails.
    pub async fn export_campaign(&self, campaign_id: CampaignId, format: ExportFormat) -> Result<Vec<u8>, CoreError> {
        self.tracker.export_campaign(campaign_id, format).await
    }

    /// One tick of the single-message scheduler. Callers (typically
    /// `wa-daemon`'s startup code) drive this on a fixed interval
    /// (`spec.md` §4.I: 15 seconds).
    ///
    /// # Errors
    ///
    /// Returns a storage error if the underlying store cannot be read.
    pub async fn tick_single_messages(&self, now: DateTime<Utc>) -> Result<usize, CoreError> {
        self.single.tick(now).await
    }

    /// On process startup: reclaim every campaign this process previously
    /// owned (or whose lease has expired) and resume its send loop from
    /// `progress.next_index` (`spec.md` §4.H).
    ///
    /// # Errors
    ///
    /// Returns a storage error if the underlying store cannot be read.
    pub async fn restore_and_resume(&self, plan: AccountPlan) -> Result<usize, CoreError> {
        let resumed = self.sync.restore(&self.owner).await?;
        let n = resumed.len();
        for campaign in resumed {
            info!(campaign_id = %campaign.id, "resuming campaign after restart");
            self.bus.publish(RuntimeEvent::CampaignStarted(campaign.id));
            self.spawn(campaign, plan).await;
        }
        Ok(n)
    }

    /// Compare authoritative campaign progress against the variation log
    /// and correct drift exceeding 1% (`spec.md` §4.H). Callers drive this
    /// on a fixed interval (60 seconds by default).
    ///
    /// # Errors
    ///
    /// Returns a storage error if persistence fails.
    pub async fn reconcile(&self, now: DateTime<Utc>) -> Result<Vec<CampaignId>, CoreError> {
        self.sync.reconcile(&self.owner, &self.tracker, now).await
    }
}
