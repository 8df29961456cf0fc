//! Campaign domain types (`spec.md` §3, `Campaign`, `Recipient`, `pacing`,
//! `progress`).

use crate::ids::{AccountId, CampaignId};
use crate::template::Template;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use wa_error::CoreErrorDto;

/// A single bulk-send recipient.
///
/// Address format is opaque to the core; it is validated by the
/// [`MessageGateway`](../../wa_gateway/trait.MessageGateway.html)
/// implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipient {
    /// Opaque destination address (e.g. a phone number in the provider's
    /// expected format).
    pub address: String,
    /// Per-recipient `{{variable}}` substitutions, merged over any
    /// campaign-level defaults.
    #[serde(default)]
    pub per_recipient_variables: BTreeMap<String, String>,
}

impl Recipient {
    /// Create a recipient with no per-recipient variables.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            per_recipient_variables: BTreeMap::new(),
        }
    }
}

/// What to do when processing or sending fails for one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the whole campaign on the first failure.
    AbortCampaign,
    /// Record the recipient as failed and move on to the next one.
    SkipRecipient,
    /// Retry the recipient up to `k` times before recording it as failed.
    RetryUpToK {
        /// Maximum number of additional attempts.
        k: u32,
    },
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::SkipRecipient
    }
}

/// Inter-send delay distribution and parallelism for a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pacing {
    /// Minimum humanising delay before a send, in milliseconds.
    pub min_interval_ms: u64,
    /// Maximum humanising delay before a send, in milliseconds.
    pub max_interval_ms: u64,
    /// Maximum number of concurrent in-flight sends for this campaign.
    pub max_parallel: u32,
    /// Policy applied when processing or sending fails for a recipient.
    pub failure_policy: FailurePolicy,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            min_interval_ms: 0,
            max_interval_ms: 0,
            max_parallel: 1,
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl Pacing {
    /// `true` if `min_interval_ms <= max_interval_ms` and `max_parallel >= 1`.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.min_interval_ms <= self.max_interval_ms && self.max_parallel >= 1
    }
}

/// Lifecycle status of a [`Campaign`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    /// Created but not yet started.
    Scheduled,
    /// Actively being driven by a scheduler worker.
    Running,
    /// Cooperatively paused; may be resumed.
    Paused,
    /// Finished: every recipient was attempted.
    Completed,
    /// Finished: cancelled before every recipient was attempted.
    Cancelled,
    /// Finished: the campaign could not continue (e.g. unrecoverable
    /// storage failure).
    Failed,
}

impl CampaignStatus {
    /// `true` for `completed`, `cancelled`, and `failed`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Valid next statuses from `self`.
    #[must_use]
    pub fn valid_transitions(&self) -> &'static [CampaignStatus] {
        match self {
            Self::Scheduled => &[Self::Running, Self::Cancelled],
            Self::Running => &[
                Self::Paused,
                Self::Completed,
                Self::Cancelled,
                Self::Failed,
            ],
            Self::Paused => &[Self::Running, Self::Cancelled],
            Self::Completed | Self::Cancelled | Self::Failed => &[],
        }
    }

    /// `true` if transitioning from `self` to `next` is a valid step.
    #[must_use]
    pub fn can_transition_to(&self, next: CampaignStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

/// Running totals for a campaign's send loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Progress {
    /// Total number of recipients in the campaign.
    pub total_recipients: usize,
    /// Number of recipients attempted so far (succeeded + failed).
    pub attempted: usize,
    /// Number of recipients successfully sent to.
    pub succeeded: usize,
    /// Number of recipients that permanently failed.
    pub failed: usize,
    /// Index of the next recipient to process.
    ///
    /// Invariant: `0 <= next_index <= total_recipients`.
    pub next_index: usize,
}

impl Progress {
    /// Create a fresh progress record for `total_recipients` recipients.
    #[must_use]
    pub fn new(total_recipients: usize) -> Self {
        Self {
            total_recipients,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            next_index: 0,
        }
    }

    /// `true` once every recipient has been visited.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.next_index >= self.total_recipients
    }

    /// Record a successful send and advance `next_index`.
    pub fn record_success(&mut self) {
        self.attempted += 1;
        self.succeeded += 1;
        self.next_index += 1;
    }

    /// Record a failed send and advance `next_index`.
    pub fn record_failure(&mut self) {
        self.attempted += 1;
        self.failed += 1;
        self.next_index += 1;
    }

    /// `true` if `attempted == succeeded + failed` (the invariant from
    /// `spec.md` §3).
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.attempted == self.succeeded + self.failed && self.next_index <= self.total_recipients
    }
}

/// A bulk-send job against an ordered recipient list with a common
/// template (`spec.md` §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    /// Unique campaign identifier.
    pub id: CampaignId,
    /// Owning account.
    pub account_id: AccountId,
    /// Human-readable campaign name.
    pub name: String,
    /// Raw template text (parsed on demand via the template processor's
    /// cache, never stored pre-parsed).
    pub template_raw: String,
    /// The ordered recipient list, present when it is small enough to be
    /// embedded (see `spec.md` §9; larger lists live in a separate
    /// recipient store keyed by `id`).
    pub recipients: Vec<Recipient>,
    /// Pacing configuration for this campaign's send loop.
    pub pacing: Pacing,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Optional future start time; `None` means "start immediately".
    pub starts_at: Option<DateTime<Utc>>,
    /// Current lifecycle status.
    pub status: CampaignStatus,
    /// Running send totals.
    pub progress: Progress,
    /// Last error observed by the scheduler, if any.
    pub last_error: Option<CoreErrorDto>,
}

impl Campaign {
    /// `true` if `progress` is internally consistent and `status` is a
    /// recognised value (always true by construction, included for
    /// documentation / assertions at trust boundaries).
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.progress.is_consistent() && self.progress.total_recipients == self.recipients.len()
            || self.recipients.is_empty() // recipients may live in a separate store
    }

    /// Parse `template_raw` just enough to report its combinations; full
    /// parsing/caching belongs to `wa-template`.
    #[must_use]
    pub fn template_preview(&self) -> &str {
        &self.template_raw
    }
}

/// A zero-sized marker documenting that [`Template`] is re-derived, never
/// stored, for a [`Campaign`] (kept so the relationship is discoverable
/// from rustdoc).
pub type _TemplateIsDerived = Template;
