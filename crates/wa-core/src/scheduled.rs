//! Scheduled one-off message domain types (`spec.md` §3, §4.I).

use crate::ids::{AccountId, ScheduledMessageId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use wa_error::CoreErrorDto;

/// Lifecycle status of a [`ScheduledMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledStatus {
    /// Waiting for `run_at` to elapse.
    Pending,
    /// Claimed and dispatched by a scheduler tick.
    Dispatched,
    /// Dispatch failed after exhausting retries.
    Failed,
    /// Cancelled before dispatch.
    Cancelled,
}

impl ScheduledStatus {
    /// `true` for `dispatched`, `failed`, and `cancelled`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A one-off message scheduled to be sent at a specific time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledMessage {
    /// Unique identifier.
    pub id: ScheduledMessageId,
    /// Owning account.
    pub account_id: AccountId,
    /// Raw template text.
    pub template_raw: String,
    /// Destination address.
    pub recipient: String,
    /// `{{variable}}` substitutions.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    /// Time at which the message becomes eligible for dispatch.
    pub run_at: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: ScheduledStatus,
    /// Number of dispatch attempts made so far.
    pub attempts: u32,
    /// Last error observed during dispatch, if any.
    pub last_error: Option<CoreErrorDto>,
}

impl ScheduledMessage {
    /// `true` if `run_at <= now` and the message is still pending.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == ScheduledStatus::Pending && self.run_at <= now
    }
}
