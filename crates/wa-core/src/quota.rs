//! Quota domain types (`spec.md` §3, §4.F).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which tumbling window a [`QuotaWindow`] tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaBucket {
    /// 60-second fixed tumbling window.
    Minute,
    /// UTC-midnight tumbling window.
    Day,
}

impl QuotaBucket {
    /// The fixed window length for this bucket.
    #[must_use]
    pub fn window(&self, at: DateTime<Utc>) -> (DateTime<Utc>, chrono::Duration) {
        match self {
            Self::Minute => {
                let secs = at.timestamp();
                let window_start_secs = secs - secs.rem_euclid(60);
                (
                    DateTime::from_timestamp(window_start_secs, 0).unwrap_or(at),
                    chrono::Duration::seconds(60),
                )
            }
            Self::Day => {
                let start = at.date_naive().and_hms_opt(0, 0, 0).unwrap();
                (
                    DateTime::from_naive_utc_and_offset(start, Utc),
                    chrono::Duration::days(1),
                )
            }
        }
    }
}

/// Per-account, per-bucket counter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaWindow {
    /// Which bucket this window tracks.
    pub bucket: QuotaBucket,
    /// Start of the current tumbling window.
    pub window_start: DateTime<Utc>,
    /// Number of sends committed (or reserved) in the current window.
    pub count: u64,
    /// The limit sourced from the account's [`AccountPlan`].
    pub limit: u64,
}

impl QuotaWindow {
    /// `true` if one more send would not exceed `limit`.
    #[must_use]
    pub fn has_room(&self, n: u64) -> bool {
        self.count + n <= self.limit
    }
}

/// External plan information read by the quota ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountPlan {
    /// Maximum sends permitted per 60-second window.
    pub sends_per_minute: u64,
    /// Maximum sends permitted per UTC day.
    pub sends_per_day: u64,
}

impl Default for AccountPlan {
    fn default() -> Self {
        Self {
            sends_per_minute: 60,
            sends_per_day: 10_000,
        }
    }
}
