//! Append-only variation log storage (component D, `spec.md` §4.D).
//!
//! A single JSON-lines file backs an in-memory index. Appends go straight
//! to disk; delivery/read updates mutate the in-memory index and then
//! rewrite the file (the log is small enough per campaign that
//! compaction-on-update is simpler than an update-in-place format).

use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use wa_core::ids::{AccountId, CampaignId, LogEntryId};
use wa_core::tracking::VariationLogEntry;
use wa_error::CoreError;

/// File-backed, in-memory-indexed variation log.
pub struct TrackingStore {
    path: PathBuf,
    index: RwLock<Vec<VariationLogEntry>>,
}

impl TrackingStore {
    /// Open (or create) the log file at `path`, loading any existing
    /// entries into memory.
    ///
    /// # Errors
    ///
    /// Returns [`wa_error::ErrorCode::StorageError`] if the parent
    /// directory cannot be created or an existing file is unreadable or
    /// contains malformed JSON.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::storage("failed to create tracking log directory").with_source(e))?;
        }

        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(text) => parse_lines(&text)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(CoreError::storage("failed to read tracking log").with_source(e)),
        };

        Ok(Self {
            path,
            index: RwLock::new(entries),
        })
    }

    /// Persist a single entry.
    ///
    /// # Errors
    ///
    /// Returns [`wa_error::ErrorCode::StorageError`] on I/O failure.
    pub async fn log(&self, entry: VariationLogEntry) -> Result<(), CoreError> {
        self.append_raw(&serialize_line(&entry)?).await?;
        self.index.write().await.push(entry);
        Ok(())
    }

    /// Persist many entries in one append.
    ///
    /// # Errors
    ///
    /// Returns [`wa_error::ErrorCode::StorageError`] on I/O failure.
    pub async fn log_bulk(&self, entries: Vec<VariationLogEntry>) -> Result<(), CoreError> {
        let mut buf = String::new();
        for entry in &entries {
            buf.push_str(&serialize_line(entry)?);
        }
        self.append_raw(&buf).await?;
        self.index.write().await.extend(entries);
        Ok(())
    }

    /// Apply an idempotent delivery/read update to the entry identified by
    /// `id`. A no-op if `id` is unknown (the event may have arrived before
    /// the send was logged, or for an entry outside this store's scope).
    ///
    /// # Errors
    ///
    /// Returns [`wa_error::ErrorCode::StorageError`] if the compacted log
    /// cannot be rewritten.
    pub async fn update_delivery(&self, id: LogEntryId, delivered: Option<bool>, read: Option<bool>) -> Result<(), CoreError> {
        {
            let mut index = self.index.write().await;
            if let Some(entry) = index.iter_mut().find(|e| e.id == id) {
                entry.apply_delivery_update(delivered, read);
            } else {
                return Ok(());
            }
        }
        self.compact().await
    }

    /// Every entry for `campaign_id`, in log order.
    pub async fn entries_for_campaign(&self, campaign_id: CampaignId) -> Vec<VariationLogEntry> {
        self.index
            .read()
            .await
            .iter()
            .filter(|e| e.campaign_id == Some(campaign_id))
            .cloned()
            .collect()
    }

    /// Entries for `account_id` within `[from, to]` (either bound
    /// optional), sorted by `sent_at` ascending and capped at `limit`.
    pub async fn entries_for_account(
        &self,
        account_id: &AccountId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Vec<VariationLogEntry> {
        let mut out: Vec<VariationLogEntry> = self
            .index
            .read()
            .await
            .iter()
            .filter(|e| &e.account_id == account_id)
            .filter(|e| from.is_none_or(|f| e.sent_at >= f))
            .filter(|e| to.is_none_or(|t| e.sent_at <= t))
            .cloned()
            .collect();
        out.sort_by_key(|e| e.sent_at);
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        out
    }

    /// Total number of entries currently held, for diagnostics.
    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }

    /// `true` if the store holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn append_raw(&self, data: &str) -> Result<(), CoreError> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| CoreError::storage("failed to open tracking log").with_source(e))?;
        file.write_all(data.as_bytes())
            .await
            .map_err(|e| CoreError::storage("failed to append to tracking log").with_source(e))?;
        Ok(())
    }

    async fn compact(&self) -> Result<(), CoreError> {
        let mut buf = String::new();
        for entry in self.index.read().await.iter() {
            buf.push_str(&serialize_line(entry)?);
        }
        tokio::fs::write(&self.path, buf)
            .await
            .map_err(|e| CoreError::storage("failed to rewrite tracking log").with_source(e))
    }
}

fn serialize_line(entry: &VariationLogEntry) -> Result<String, CoreError> {
    let mut line = serde_json::to_string(entry).map_err(|e| CoreError::storage("failed to serialize log entry").with_source(e))?;
    line.push('\n');
    Ok(line)
}

fn parse_lines(text: &str) -> Result<Vec<VariationLogEntry>, CoreError> {
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(|e| CoreError::storage("malformed tracking log line").with_source(e)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wa_core::ids::ProviderMessageId;

    fn sample_entry(campaign_id: CampaignId, account_id: &str, sent_at: DateTime<Utc>) -> VariationLogEntry {
        VariationLogEntry {
            id: LogEntryId::new(),
            campaign_id: Some(campaign_id),
            message_id: Some(ProviderMessageId::new("msg-1")),
            account_id: AccountId::new(account_id),
            template: "Hi|Hello".into(),
            selections: vec![],
            recipient: "+1555".into(),
            sent_at,
            delivered: false,
            read: false,
        }
    }

    #[tokio::test]
    async fn log_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let campaign_id = CampaignId::new();
        let entry = sample_entry(campaign_id, "acct", Utc::now());
        let entry_id = entry.id;

        {
            let store = TrackingStore::open(&path).await.unwrap();
            store.log(entry).await.unwrap();
        }

        let reopened = TrackingStore::open(&path).await.unwrap();
        assert_eq!(reopened.len().await, 1);
        let entries = reopened.entries_for_campaign(campaign_id).await;
        assert_eq!(entries[0].id, entry_id);
    }

    #[tokio::test]
    async fn log_bulk_appends_all() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackingStore::open(dir.path().join("log.jsonl")).await.unwrap();
        let campaign_id = CampaignId::new();
        let entries = vec![
            sample_entry(campaign_id, "acct", Utc::now()),
            sample_entry(campaign_id, "acct", Utc::now()),
        ];
        store.log_bulk(entries).await.unwrap();
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn update_delivery_is_idempotent_and_monotonic() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackingStore::open(dir.path().join("log.jsonl")).await.unwrap();
        let campaign_id = CampaignId::new();
        let entry = sample_entry(campaign_id, "acct", Utc::now());
        let id = entry.id;
        store.log(entry).await.unwrap();

        store.update_delivery(id, Some(true), None).await.unwrap();
        store.update_delivery(id, Some(false), None).await.unwrap();

        let entries = store.entries_for_campaign(campaign_id).await;
        assert!(entries[0].delivered, "delivered must not revert to false");
    }

    #[tokio::test]
    async fn update_delivery_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let campaign_id = CampaignId::new();
        let entry = sample_entry(campaign_id, "acct", Utc::now());
        let id = entry.id;

        {
            let store = TrackingStore::open(&path).await.unwrap();
            store.log(entry).await.unwrap();
            store.update_delivery(id, Some(true), Some(true)).await.unwrap();
        }

        let reopened = TrackingStore::open(&path).await.unwrap();
        let entries = reopened.entries_for_campaign(campaign_id).await;
        assert!(entries[0].delivered);
        assert!(entries[0].read);
    }

    #[tokio::test]
    async fn entries_for_account_respects_time_bounds_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackingStore::open(dir.path().join("log.jsonl")).await.unwrap();
        let campaign_id = CampaignId::new();
        let base = Utc::now();
        for i in 0..5 {
            store
                .log(sample_entry(campaign_id, "acct", base + chrono::Duration::seconds(i)))
                .await
                .unwrap();
        }
        let all = store.entries_for_account(&AccountId::new("acct"), None, None, None).await;
        assert_eq!(all.len(), 5);

        let bounded = store
            .entries_for_account(&AccountId::new("acct"), Some(base + chrono::Duration::seconds(2)), None, None)
            .await;
        assert_eq!(bounded.len(), 3);

        let limited = store.entries_for_account(&AccountId::new("acct"), None, None, Some(2)).await;
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn unknown_entry_update_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrackingStore::open(dir.path().join("log.jsonl")).await.unwrap();
        store.update_delivery(LogEntryId::new(), Some(true), None).await.unwrap();
        assert!(store.is_empty().await);
    }
}
