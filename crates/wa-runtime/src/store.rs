//! File-backed, compare-and-set-capable persistence for campaigns and
//! scheduled messages (`spec.md` §4.H, §6).
//!
//! Modelled on the teacher's one-file-per-record `ReceiptStore`, but each
//! store here keeps its whole table as a single JSON-lines snapshot
//! (consistent with `wa-tracker`'s log format) rewritten atomically —
//! write to a temp file, then rename over the original — so `persist()`
//! is all-or-nothing even across a crash mid-write.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::sync::RwLock;
use wa_core::campaign::{Campaign, CampaignStatus};
use wa_core::ids::{CampaignId, ScheduledMessageId};
use wa_core::scheduled::{ScheduledMessage, ScheduledStatus};
use wa_error::{CoreError, CoreErrorDto};

/// A campaign row plus its lease ownership fields.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct StoredCampaign {
    /// The campaign itself.
    pub campaign: Campaign,
    /// Process identifier currently holding the lease, if any.
    pub lease_owner: Option<String>,
    /// When the current lease expires.
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl StoredCampaign {
    fn lease_is_free_for(&self, owner: &str, now: DateTime<Utc>) -> bool {
        match (&self.lease_owner, self.lease_expires_at) {
            (None, _) => true,
            (Some(current), Some(expires)) => current == owner || expires <= now,
            (Some(current), None) => current == owner,
        }
    }
}

/// Campaign table: persistence, leasing, and CAS-guarded progress updates.
pub struct CampaignStore {
    path: PathBuf,
    index: RwLock<HashMap<CampaignId, StoredCampaign>>,
}

impl CampaignStore {
    /// Open (or create) the campaign snapshot at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`wa_error::ErrorCode::StorageError`] if the file exists
    /// but cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::storage("failed to create campaign store directory").with_source(e))?;
        }
        let rows: Vec<StoredCampaign> = match tokio::fs::read_to_string(&path).await {
            Ok(text) => parse_lines(&text)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(CoreError::storage("failed to read campaign store").with_source(e)),
        };
        let index = rows.into_iter().map(|r| (r.campaign.id, r)).collect();
        Ok(Self {
            path,
            index: RwLock::new(index),
        })
    }

    /// Insert or fully overwrite a campaign row (no lease).
    ///
    /// # Errors
    ///
    /// Returns [`wa_error::ErrorCode::StorageError`] on I/O failure.
    pub async fn insert(&self, campaign: Campaign) -> Result<(), CoreError> {
        let id = campaign.id;
        {
            let mut index = self.index.write().await;
            index.insert(
                id,
                StoredCampaign {
                    campaign,
                    lease_owner: None,
                    lease_expires_at: None,
                },
            );
        }
        self.persist().await
    }

    /// Fetch a snapshot of one campaign row.
    pub async fn get(&self, id: CampaignId) -> Option<StoredCampaign> {
        self.index.read().await.get(&id).cloned()
    }

    /// Every campaign currently `running`, regardless of lease state (used
    /// by [`crate::sync::StateSynchronizer::restore`] to find candidates).
    pub async fn list_running(&self) -> Vec<StoredCampaign> {
        self.index
            .read()
            .await
            .values()
            .filter(|r| r.campaign.status == CampaignStatus::Running)
            .cloned()
            .collect()
    }

    /// Attempt to claim `id`'s lease for `owner`. Succeeds if the lease is
    /// unheld, expired, or already held by `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`wa_error::ErrorCode::NotFound`] if no such campaign
    /// exists, or a storage error if persistence fails.
    pub async fn claim(&self, id: CampaignId, owner: &str, now: DateTime<Utc>, ttl: Duration) -> Result<bool, CoreError> {
        let won = {
            let mut index = self.index.write().await;
            let row = index.get_mut(&id).ok_or_else(|| CoreError::new(wa_error::ErrorCode::NotFound, format!("no campaign {id}")))?;
            if row.lease_is_free_for(owner, now) {
                row.lease_owner = Some(owner.to_string());
                row.lease_expires_at = Some(now + ttl);
                true
            } else {
                false
            }
        };
        if won {
            self.persist().await?;
        }
        Ok(won)
    }

    /// Renew `owner`'s lease on `id`, extending it by `ttl` from `now`.
    /// Returns `false` (without persisting) if `owner` is not the current
    /// holder — the caller should treat this as [`wa_error::ErrorCode::LeaseLost`].
    ///
    /// # Errors
    ///
    /// Returns [`wa_error::ErrorCode::NotFound`] if no such campaign
    /// exists, or a storage error if persistence fails.
    pub async fn heartbeat(&self, id: CampaignId, owner: &str, now: DateTime<Utc>, ttl: Duration) -> Result<bool, CoreError> {
        let renewed = {
            let mut index = self.index.write().await;
            let row = index.get_mut(&id).ok_or_else(|| CoreError::new(wa_error::ErrorCode::NotFound, format!("no campaign {id}")))?;
            if row.lease_owner.as_deref() == Some(owner) {
                row.lease_expires_at = Some(now + ttl);
                true
            } else {
                false
            }
        };
        if renewed {
            self.persist().await?;
        }
        Ok(renewed)
    }

    /// Release `owner`'s lease on `id`, if held.
    ///
    /// # Errors
    ///
    /// Returns a storage error if persistence fails.
    pub async fn release_lease(&self, id: CampaignId, owner: &str) -> Result<(), CoreError> {
        let changed = {
            let mut index = self.index.write().await;
            if let Some(row) = index.get_mut(&id) {
                if row.lease_owner.as_deref() == Some(owner) {
                    row.lease_owner = None;
                    row.lease_expires_at = None;
                    true
                } else {
                    false
                }
            } else {
                false
            }
        };
        if changed {
            self.persist().await?;
        }
        Ok(())
    }

    /// Apply `f` to the campaign identified by `id`, but only if `owner`
    /// currently holds its lease.
    ///
    /// # Errors
    ///
    /// Returns [`wa_error::ErrorCode::NotFound`] if no such campaign
    /// exists, [`wa_error::ErrorCode::LeaseLost`] if `owner` does not hold
    /// the lease, or a storage error if persistence fails.
    pub async fn with_campaign_mut<F>(&self, id: CampaignId, owner: &str, f: F) -> Result<(), CoreError>
    where
        F: FnOnce(&mut Campaign),
    {
        {
            let mut index = self.index.write().await;
            let row = index.get_mut(&id).ok_or_else(|| CoreError::new(wa_error::ErrorCode::NotFound, format!("no campaign {id}")))?;
            if row.lease_owner.as_deref() != Some(owner) {
                return Err(CoreError::lease_lost(format!("lost lease for campaign {id}")));
            }
            f(&mut row.campaign);
        }
        self.persist().await
    }

    async fn persist(&self) -> Result<(), CoreError> {
        let index = self.index.read().await;
        let mut buf = String::new();
        for row in index.values() {
            let line = serde_json::to_string(row).map_err(|e| CoreError::storage("failed to serialize campaign row").with_source(e))?;
            buf.push_str(&line);
            buf.push('\n');
        }
        drop(index);
        write_atomic(&self.path, &buf).await
    }
}

/// Scheduled-message table: persistence and exactly-once dispatch via CAS.
pub struct ScheduledMessageStore {
    path: PathBuf,
    index: RwLock<HashMap<ScheduledMessageId, ScheduledMessage>>,
}

impl ScheduledMessageStore {
    /// Open (or create) the scheduled-message snapshot at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`wa_error::ErrorCode::StorageError`] if the file exists
    /// but cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::storage("failed to create scheduled message store directory").with_source(e))?;
        }
        let rows: Vec<ScheduledMessage> = match tokio::fs::read_to_string(&path).await {
            Ok(text) => parse_lines(&text)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(CoreError::storage("failed to read scheduled message store").with_source(e)),
        };
        let index = rows.into_iter().map(|m| (m.id, m)).collect();
        Ok(Self {
            path,
            index: RwLock::new(index),
        })
    }

    /// Insert or fully overwrite a scheduled message.
    ///
    /// # Errors
    ///
    /// Returns a storage error if persistence fails.
    pub async fn insert(&self, message: ScheduledMessage) -> Result<(), CoreError> {
        let id = message.id;
        self.index.write().await.insert(id, message);
        self.persist().await
    }

    /// Fetch a snapshot of one scheduled message.
    pub async fn get(&self, id: ScheduledMessageId) -> Option<ScheduledMessage> {
        self.index.read().await.get(&id).cloned()
    }

    /// Every pending message whose `run_at <= now`.
    pub async fn list_due(&self, now: DateTime<Utc>) -> Vec<ScheduledMessage> {
        self.index.read().await.values().filter(|m| m.is_due(now)).cloned().collect()
    }

    /// Atomically transition `id` from `pending` to `dispatched`
    /// (`spec.md` §4.I: "compare-and-set on `(id, status=pending)`").
    /// Returns `true` only to the single caller that wins the race.
    ///
    /// # Errors
    ///
    /// Returns a storage error if persistence fails.
    pub async fn claim_pending(&self, id: ScheduledMessageId) -> Result<bool, CoreError> {
        let won = {
            let mut index = self.index.write().await;
            match index.get_mut(&id) {
                Some(message) if message.status == ScheduledStatus::Pending => {
                    message.status = ScheduledStatus::Dispatched;
                    message.attempts += 1;
                    true
                }
                _ => false,
            }
        };
        if won {
            self.persist().await?;
        }
        Ok(won)
    }

    /// Cancel a still-pending message. Returns `false` if it was already
    /// terminal.
    ///
    /// # Errors
    ///
    /// Returns [`wa_error::ErrorCode::NotFound`] if no such message
    /// exists, or a storage error if persistence fails.
    pub async fn cancel(&self, id: ScheduledMessageId) -> Result<bool, CoreError> {
        let cancelled = {
            let mut index = self.index.write().await;
            let message = index.get_mut(&id).ok_or_else(|| CoreError::new(wa_error::ErrorCode::NotFound, format!("no scheduled message {id}")))?;
            if message.status == ScheduledStatus::Pending {
                message.status = ScheduledStatus::Cancelled;
                true
            } else {
                false
            }
        };
        if cancelled {
            self.persist().await?;
        }
        Ok(cancelled)
    }

    /// Record that dispatch ultimately failed after exhausting retries.
    ///
    /// # Errors
    ///
    /// Returns a storage error if persistence fails.
    pub async fn mark_failed(&self, id: ScheduledMessageId, error: CoreErrorDto) -> Result<(), CoreError> {
        {
            let mut index = self.index.write().await;
            if let Some(message) = index.get_mut(&id) {
                message.status = ScheduledStatus::Failed;
                message.last_error = Some(error);
            }
        }
        self.persist().await
    }

    async fn persist(&self) -> Result<(), CoreError> {
        let index = self.index.read().await;
        let mut buf = String::new();
        for row in index.values() {
            let line = serde_json::to_string(row).map_err(|e| CoreError::storage("failed to serialize scheduled message").with_source(e))?;
            buf.push_str(&line);
            buf.push('\n');
        }
        drop(index);
        write_atomic(&self.path, &buf).await
    }
}

async fn write_atomic(path: &PathBuf, contents: &str) -> Result<(), CoreError> {
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, contents)
        .await
        .map_err(|e| CoreError::storage("failed to write temp snapshot").with_source(e))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| CoreError::storage("failed to rename temp snapshot into place").with_source(e))
}

fn parse_lines<T: serde::de::DeserializeOwned>(text: &str) -> Result<Vec<T>, CoreError> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(|e| CoreError::storage("malformed store snapshot line").with_source(e)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wa_core::campaign::{Pacing, Progress};
    use wa_core::ids::AccountId;

    fn sample_campaign(status: CampaignStatus) -> Campaign {
        Campaign {
            id: CampaignId::new(),
            account_id: AccountId::new("acct"),
            name: "test".into(),
            template_raw: "Hi|Hello".into(),
            recipients: vec![],
            pacing: Pacing::default(),
            created_at: Utc::now(),
            starts_at: None,
            status,
            progress: Progress::new(0),
            last_error: None,
        }
    }

    #[tokio::test]
    async fn claim_succeeds_when_unheld_then_blocks_other_owner() {
        let dir = tempfile::tempdir().unwrap();
        let store = CampaignStore::open(dir.path().join("campaigns.jsonl")).await.unwrap();
        let campaign = sample_campaign(CampaignStatus::Running);
        let id = campaign.id;
        store.insert(campaign).await.unwrap();

        let now = Utc::now();
        assert!(store.claim(id, "worker-a", now, Duration::seconds(30)).await.unwrap());
        assert!(!store.claim(id, "worker-b", now, Duration::seconds(30)).await.unwrap());
    }

    #[tokio::test]
    async fn claim_succeeds_once_lease_expires() {
        let dir = tempfile::tempdir().unwrap();
        let store = CampaignStore::open(dir.path().join("campaigns.jsonl")).await.unwrap();
        let campaign = sample_campaign(CampaignStatus::Running);
        let id = campaign.id;
        store.insert(campaign).await.unwrap();

        let now = Utc::now();
        assert!(store.claim(id, "worker-a", now, Duration::seconds(30)).await.unwrap());
        let later = now + Duration::seconds(31);
        assert!(store.claim(id, "worker-b", later, Duration::seconds(30)).await.unwrap());
    }

    #[tokio::test]
    async fn with_campaign_mut_rejects_non_owner() {
        let dir = tempfile::tempdir().unwrap();
        let store = CampaignStore::open(dir.path().join("campaigns.jsonl")).await.unwrap();
        let campaign = sample_campaign(CampaignStatus::Running);
        let id = campaign.id;
        store.insert(campaign).await.unwrap();
        store.claim(id, "worker-a", Utc::now(), Duration::seconds(30)).await.unwrap();

        let err = store
            .with_campaign_mut(id, "worker-b", |c| c.progress.record_success())
            .await
            .unwrap_err();
        assert_eq!(err.code, wa_error::ErrorCode::LeaseLost);
    }

    #[tokio::test]
    async fn state_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("campaigns.jsonl");
        let campaign = sample_campaign(CampaignStatus::Running);
        let id = campaign.id;
        {
            let store = CampaignStore::open(&path).await.unwrap();
            store.insert(campaign).await.unwrap();
            store.claim(id, "worker-a", Utc::now(), Duration::seconds(30)).await.unwrap();
        }
        let reopened = CampaignStore::open(&path).await.unwrap();
        let row = reopened.get(id).await.unwrap();
        assert_eq!(row.lease_owner.as_deref(), Some("worker-a"));
    }

    fn sample_message(run_at: DateTime<Utc>) -> ScheduledMessage {
        ScheduledMessage {
            id: ScheduledMessageId::new(),
            account_id: AccountId::new("acct"),
            template_raw: "Hi|Hello".into(),
            recipient: "+1555".into(),
            variables: Default::default(),
            run_at,
            status: ScheduledStatus::Pending,
            attempts: 0,
            last_error: None,
        }
    }

    #[tokio::test]
    async fn only_one_caller_wins_claim_pending() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduledMessageStore::open(dir.path().join("messages.jsonl")).await.unwrap();
        let message = sample_message(Utc::now());
        let id = message.id;
        store.insert(message).await.unwrap();

        assert!(store.claim_pending(id).await.unwrap());
        assert!(!store.claim_pending(id).await.unwrap());
    }

    #[tokio::test]
    async fn list_due_excludes_future_and_non_pending() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduledMessageStore::open(dir.path().join("messages.jsonl")).await.unwrap();
        let now = Utc::now();
        let due = sample_message(now - Duration::seconds(1));
        let future = sample_message(now + Duration::seconds(60));
        store.insert(due.clone()).await.unwrap();
        store.insert(future).await.unwrap();

        let results = store.list_due(now).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, due.id);
    }

    #[tokio::test]
    async fn cancel_only_affects_pending() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduledMessageStore::open(dir.path().join("messages.jsonl")).await.unwrap();
        let message = sample_message(Utc::now());
        let id = message.id;
        store.insert(message).await.unwrap();

        assert!(store.cancel(id).await.unwrap());
        assert!(!store.cancel(id).await.unwrap());
    }
}
