//! wa-tracker
//!
//! The variation log and reporting surface (components D and J,
//! `spec.md` §4.D/§4.J): records which variation was selected for every
//! send, tracks delivery/read status as asynchronous gateway events
//! arrive, and aggregates those records into distribution and delivery
//! statistics for campaigns and accounts.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod report;
mod store;

pub use report::{DeliveryStats, ExportFormat, OptionCount, ReportEngine, Stats};
pub use store::TrackingStore;

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use wa_core::ids::{AccountId, CampaignId, LogEntryId};
use wa_core::tracking::VariationLogEntry;
use wa_error::CoreError;

/// Facade combining the append-only log ([`TrackingStore`]) with the
/// aggregation logic ([`ReportEngine`]), the shape consumers depend on.
pub struct VariationTracker {
    store: TrackingStore,
}

impl VariationTracker {
    /// Open the tracker's backing log file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`wa_error::ErrorCode::StorageError`] if the log cannot be
    /// opened or read.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CoreError> {
        Ok(Self {
            store: TrackingStore::open(path).await?,
        })
    }

    /// Record one send's variation selections.
    ///
    /// # Errors
    ///
    /// Returns [`wa_error::ErrorCode::StorageError`] on I/O failure.
    pub async fn log(&self, entry: VariationLogEntry) -> Result<(), CoreError> {
        self.store.log(entry).await
    }

    /// Record many sends' variation selections in one durable append
    /// (used by the campaign scheduler to batch per-tick writes).
    ///
    /// # Errors
    ///
    /// Returns [`wa_error::ErrorCode::StorageError`] on I/O failure.
    pub async fn log_bulk(&self, entries: Vec<VariationLogEntry>) -> Result<(), CoreError> {
        self.store.log_bulk(entries).await
    }

    /// Apply a delivery/read update for the send identified by `id`.
    /// Idempotent and monotonic: an out-of-order or duplicate event never
    /// un-marks a flag already set.
    ///
    /// # Errors
    ///
    /// Returns [`wa_error::ErrorCode::StorageError`] if the update cannot
    /// be persisted.
    pub async fn update_delivery(&self, id: LogEntryId, delivered: Option<bool>, read: Option<bool>) -> Result<(), CoreError> {
        self.store.update_delivery(id, delivered, read).await
    }

    /// Compute distribution and delivery statistics for one campaign.
    pub async fn stats_for_campaign(&self, campaign_id: CampaignId, now: DateTime<Utc>) -> Stats {
        let entries = self.store.entries_for_campaign(campaign_id).await;
        ReportEngine::stats(&entries, now)
    }

    /// Compute statistics for one account's send history within
    /// `[from, to]` (either bound optional), capped at `limit` entries.
    pub async fn stats_for_account(
        &self,
        account_id: &AccountId,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: Option<usize>,
        now: DateTime<Utc>,
    ) -> Stats {
        let entries = self.store.entries_for_account(account_id, from, to, limit).await;
        ReportEngine::stats(&entries, now)
    }

    /// Export one campaign's raw log rows in `format`.
    ///
    /// # Errors
    ///
    /// Returns [`wa_error::ErrorCode::StorageError`] if serialization
    /// fails.
    pub async fn export_campaign(&self, campaign_id: CampaignId, format: ExportFormat) -> Result<Vec<u8>, CoreError> {
        let entries = self.store.entries_for_campaign(campaign_id).await;
        ReportEngine::export(&entries, format)
    }
}
