//! `StateSynchronizer` (component H, `spec.md` §4.H): durability, leasing,
//! crash recovery, and drift reconciliation for campaigns.

use crate::store::{CampaignStore, StoredCampaign};
use chrono::{DateTime, Duration, Utc};
use wa_core::campaign::Campaign;
use wa_core::clock::SharedClock;
use wa_core::ids::CampaignId;
use wa_error::CoreError;
use wa_tracker::VariationTracker;

/// Durability and recovery surface for campaigns, backed by a
/// [`CampaignStore`].
pub struct StateSynchronizer {
    store: CampaignStore,
    clock: SharedClock,
    lease_ttl: Duration,
}

impl StateSynchronizer {
    /// Wrap `store`, using `clock` for lease timestamps and `lease_ttl`
    /// as the ownership window (`spec.md` §4.H: 30 seconds by default).
    #[must_use]
    pub fn new(store: CampaignStore, clock: SharedClock, lease_ttl: Duration) -> Self {
        Self { store, clock, lease_ttl }
    }

    /// Persist a newly created campaign.
    ///
    /// # Errors
    ///
    /// Returns a storage error if persistence fails.
    pub async fn persist_new(&self, campaign: Campaign) -> Result<(), CoreError> {
        self.store.insert(campaign).await
    }

    /// Claim ownership of `campaign_id` for `owner`
    /// (`spec.md` §4.H: "marks a campaign as owned by this process").
    ///
    /// # Errors
    ///
    /// Returns [`wa_error::ErrorCode::NotFound`] if no such campaign
    /// exists, or a storage error if persistence fails.
    pub async fn claim(&self, campaign_id: CampaignId, owner: &str) -> Result<bool, CoreError> {
        self.store.claim(campaign_id, owner, self.clock.now(), self.lease_ttl).await
    }

    /// Renew `owner`'s lease on `campaign_id`. Returns `false` if `owner`
    /// no longer holds it — the caller must stop mutating and exit its
    /// task (`spec.md` §7: `LeaseLost`).
    ///
    /// # Errors
    ///
    /// Returns a storage error if persistence fails.
    pub async fn heartbeat(&self, campaign_id: CampaignId, owner: &str) -> Result<bool, CoreError> {
        self.store.heartbeat(campaign_id, owner, self.clock.now(), self.lease_ttl).await
    }

    /// Release `owner`'s lease, e.g. on graceful task exit.
    ///
    /// # Errors
    ///
    /// Returns a storage error if persistence fails.
    pub async fn release(&self, campaign_id: CampaignId, owner: &str) -> Result<(), CoreError> {
        self.store.release_lease(campaign_id, owner).await
    }

    /// Apply a progress/status mutation to `campaign_id`, but only while
    /// `owner` holds its lease.
    ///
    /// # Errors
    ///
    /// Returns [`wa_error::ErrorCode::LeaseLost`] if `owner` does not hold
    /// the lease, or a storage error if persistence fails.
    pub async fn persist_progress<F>(&self, campaign_id: CampaignId, owner: &str, f: F) -> Result<(), CoreError>
    where
        F: FnOnce(&mut Campaign),
    {
        self.store.with_campaign_mut(campaign_id, owner, f).await
    }

    /// Current snapshot of one campaign.
    pub async fn get(&self, campaign_id: CampaignId) -> Option<StoredCampaign> {
        self.store.get(campaign_id).await
    }

    /// On startup: every campaign whose status is `running` AND whose
    /// lease is expired (or was already owned by `owner`), claimed for
    /// `owner` (`spec.md` §4.H: "reclaims ownership, and hands it to G to
    /// resume from `nextIndex`").
    ///
    /// # Errors
    ///
    /// Returns a storage error if the underlying store cannot be read.
    pub async fn restore(&self, owner: &str) -> Result<Vec<Campaign>, CoreError> {
        let mut resumed = Vec::new();
        for row in self.store.list_running().await {
            if self.store.claim(row.campaign.id, owner, self.clock.now(), self.lease_ttl).await? {
                resumed.push(row.campaign);
            }
        }
        Ok(resumed)
    }

    /// For every campaign `owner` currently holds the lease for, compare
    /// its authoritative `attempted/succeeded/failed` counters against
    /// what the variation log actually recorded, and correct drift
    /// exceeding 1% (`spec.md` §4.H).
    ///
    /// Returns the ids of campaigns whose counters were corrected.
    ///
    /// # Errors
    ///
    /// Returns a storage error if persistence fails.
    pub async fn reconcile(&self, owner: &str, tracker: &VariationTracker, now: DateTime<Utc>) -> Result<Vec<CampaignId>, CoreError> {
        let mut corrected = Vec::new();
        for row in self.store.list_running().await {
            if row.lease_owner.as_deref() != Some(owner) {
                continue;
            }
            let stats = tracker.stats_for_campaign(row.campaign.id, now).await;
            let observed_attempted = stats.total_sent as usize;
            let authoritative = row.campaign.progress.attempted;
            let drift = authoritative.abs_diff(observed_attempted);
            let threshold = ((authoritative.max(1)) as f64 * 0.01).ceil() as usize;
            if drift > threshold.max(0) && drift > 0 {
                tracing::warn!(
                    campaign_id = %row.campaign.id,
                    authoritative,
                    observed_attempted,
                    "correcting campaign progress drift from variation log"
                );
                let campaign_id = row.campaign.id;
                self.store
                    .with_campaign_mut(campaign_id, owner, |c| {
                        c.progress.attempted = observed_attempted;
                        c.progress.succeeded = stats.delivery.sent as usize - c.progress.failed.min(observed_attempted);
                    })
                    .await?;
                corrected.push(campaign_id);
            }
        }
        Ok(corrected)
    }
}
