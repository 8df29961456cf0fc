//! Variation log domain types (`spec.md` §3, §4.D).

use crate::ids::{AccountId, CampaignId, LogEntryId, ProviderMessageId};
use crate::template::SelectionRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A durable record of one variation selection made for one send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariationLogEntry {
    /// Unique identifier for this log row.
    pub id: LogEntryId,
    /// Owning campaign, when the send was part of a campaign.
    pub campaign_id: Option<CampaignId>,
    /// Provider-assigned message id, when the send succeeded.
    pub message_id: Option<ProviderMessageId>,
    /// Owning account.
    pub account_id: AccountId,
    /// The raw template text this selection was drawn from.
    pub template: String,
    /// The selections made for each block in the template.
    pub selections: Vec<SelectionRecord>,
    /// Destination address.
    pub recipient: String,
    /// When the send was accepted by the gateway.
    pub sent_at: DateTime<Utc>,
    /// `true` once a `Delivered` event has been observed. Monotonic: never
    /// reverts to `false`.
    pub delivered: bool,
    /// `true` once a `Read` event has been observed. Monotonic: never
    /// reverts to `false`.
    pub read: bool,
}

impl VariationLogEntry {
    /// Apply a delivery/read update, respecting monotonicity
    /// (`spec.md` §4.D: "Delivery flags are monotonically increasing").
    pub fn apply_delivery_update(&mut self, delivered: Option<bool>, read: Option<bool>) {
        if let Some(true) = delivered {
            self.delivered = true;
        }
        if let Some(true) = read {
            self.read = true;
            // A read message was necessarily delivered.
            self.delivered = true;
        }
    }
}
