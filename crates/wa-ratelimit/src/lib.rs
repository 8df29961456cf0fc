//! wa-ratelimit
//!
//! The QuotaLedger (component F, `spec.md` §4.F): a reserve/commit/release
//! ledger over fixed tumbling minute and day windows, serialised per
//! account and tolerant of abandoned reservations via a 60-second TTL.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;
use wa_core::clock::SharedClock;
use wa_core::ids::AccountId;
use wa_core::quota::{AccountPlan, QuotaBucket, QuotaWindow};

/// TTL for an uncommitted reservation before it is treated as abandoned.
pub const RESERVATION_TTL_SECS: i64 = 60;

/// Outcome of [`QuotaLedger::reserve`].
#[derive(Debug)]
pub enum QuotaDecision {
    /// Both buckets had room; `n` units are held pending commit/release.
    Granted(Reservation),
    /// At least one bucket was full. `retry_after_ms` is the time until
    /// the most restrictive exhausted bucket rolls over.
    Denied {
        /// Human-readable reason (names the exhausted bucket).
        reason: String,
        /// Milliseconds the caller should wait before retrying.
        retry_after_ms: u64,
    },
}

/// An opaque handle to a granted reservation. Must be resolved with
/// exactly one of [`QuotaLedger::commit`] or [`QuotaLedger::release`].
#[derive(Debug, Clone, Copy)]
pub struct Reservation {
    id: u64,
    account_id_hash: u64,
    amount: u64,
}

struct PendingReservation {
    id: u64,
    amount: u64,
    expires_at: DateTime<Utc>,
}

struct AccountState {
    plan: AccountPlan,
    minute: QuotaWindow,
    day: QuotaWindow,
    pending: Vec<PendingReservation>,
}

impl AccountState {
    fn new(plan: AccountPlan, now: DateTime<Utc>) -> Self {
        Self {
            plan,
            minute: fresh_window(QuotaBucket::Minute, now, plan.sends_per_minute),
            day: fresh_window(QuotaBucket::Day, now, plan.sends_per_day),
            pending: Vec::new(),
        }
    }

    fn refresh(&mut self, now: DateTime<Utc>) {
        roll_window(&mut self.minute, now);
        roll_window(&mut self.day, now);
        self.pending.retain(|p| p.expires_at > now);
    }

    fn reserved_total(&self) -> u64 {
        self.pending.iter().map(|p| p.amount).sum()
    }
}

fn fresh_window(bucket: QuotaBucket, now: DateTime<Utc>, limit: u64) -> QuotaWindow {
    let (window_start, _) = bucket.window(now);
    QuotaWindow {
        bucket,
        window_start,
        count: 0,
        limit,
    }
}

fn roll_window(window: &mut QuotaWindow, now: DateTime<Utc>) {
    let (window_start, _) = window.bucket.window(now);
    if window_start != window.window_start {
        window.window_start = window_start;
        window.count = 0;
    }
}

/// Per-account quota reservation ledger.
pub struct QuotaLedger {
    clock: SharedClock,
    accounts: AsyncMutex<HashMap<AccountId, Arc<AsyncMutex<AccountState>>>>,
    next_id: AtomicU64,
}

impl QuotaLedger {
    /// Create an empty ledger driven by `clock`.
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            accounts: AsyncMutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    async fn account_state(&self, account_id: &AccountId, plan: AccountPlan) -> Arc<AsyncMutex<AccountState>> {
        let mut accounts = self.accounts.lock().await;
        accounts
            .entry(account_id.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(AccountState::new(plan, self.clock.now()))))
            .clone()
    }

    /// Attempt to reserve `n` sends for `account_id` against `plan`.
    ///
    /// Both the minute and day buckets must have room; the most
    /// restrictive bucket determines the denial reason and retry delay.
    pub async fn reserve(&self, account_id: &AccountId, plan: AccountPlan, n: u64) -> QuotaDecision {
        let state_handle = self.account_state(account_id, plan).await;
        let mut state = state_handle.lock().await;
        let now = self.clock.now();
        state.plan = plan;
        state.minute.limit = plan.sends_per_minute;
        state.day.limit = plan.sends_per_day;
        state.refresh(now);

        let reserved = state.reserved_total();
        let minute_used = state.minute.count + reserved;
        let day_used = state.day.count + reserved;

        let minute_ok = minute_used + n <= state.minute.limit;
        let day_ok = day_used + n <= state.day.limit;

        if !minute_ok || !day_ok {
            let (reason, retry_after_ms) = if !minute_ok {
                ("minute quota exhausted".to_string(), window_retry_after_ms(&state.minute, now))
            } else {
                ("day quota exhausted".to_string(), window_retry_after_ms(&state.day, now))
            };
            debug!(target: "wa.ratelimit", account_id = %account_id, reason, "reservation denied");
            return QuotaDecision::Denied { reason, retry_after_ms };
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        state.pending.push(PendingReservation {
            id,
            amount: n,
            expires_at: now + chrono::Duration::seconds(RESERVATION_TTL_SECS),
        });
        QuotaDecision::Granted(Reservation {
            id,
            account_id_hash: hash_account(account_id),
            amount: n,
        })
    }

    /// Commit a previously granted reservation, converting it into a
    /// permanent count against both buckets.
    pub async fn commit(&self, account_id: &AccountId, reservation: Reservation) {
        debug_assert_eq!(hash_account(account_id), reservation.account_id_hash, "reservation used against the wrong account");
        let state_handle = self.account_state(account_id, AccountPlan::default()).await;
        let mut state = state_handle.lock().await;
        let now = self.clock.now();
        state.refresh(now);
        if let Some(pos) = state.pending.iter().position(|p| p.id == reservation.id) {
            state.pending.remove(pos);
            state.minute.count += reservation.amount;
            state.day.count += reservation.amount;
        }
    }

    /// Release a previously granted reservation without counting it,
    /// freeing the held capacity immediately.
    pub async fn release(&self, account_id: &AccountId, reservation: Reservation) {
        debug_assert_eq!(hash_account(account_id), reservation.account_id_hash, "reservation used against the wrong account");
        let state_handle = self.account_state(account_id, AccountPlan::default()).await;
        let mut state = state_handle.lock().await;
        let now = self.clock.now();
        state.refresh(now);
        state.pending.retain(|p| p.id != reservation.id);
    }

    /// Snapshot the current minute/day windows for `account_id`, for
    /// diagnostics and the control-plane progress API.
    pub async fn windows(&self, account_id: &AccountId, plan: AccountPlan) -> (QuotaWindow, QuotaWindow) {
        let state_handle = self.account_state(account_id, plan).await;
        let mut state = state_handle.lock().await;
        state.refresh(self.clock.now());
        (state.minute, state.day)
    }
}

fn window_retry_after_ms(window: &QuotaWindow, now: DateTime<Utc>) -> u64 {
    let (_, duration) = window.bucket.window(now);
    let window_end = window.window_start + duration;
    let remaining = window_end - now;
    remaining.num_milliseconds().max(0) as u64
}

fn hash_account(account_id: &AccountId) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    account_id.as_str().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use wa_core::clock::FixedClock;

    fn plan(per_minute: u64, per_day: u64) -> AccountPlan {
        AccountPlan {
            sends_per_minute: per_minute,
            sends_per_day: per_day,
        }
    }

    #[tokio::test]
    async fn grants_reservation_within_limits() {
        let clock: SharedClock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()));
        let ledger = QuotaLedger::new(clock);
        let account = AccountId::from("acct-1");
        let decision = ledger.reserve(&account, plan(5, 100), 1).await;
        assert!(matches!(decision, QuotaDecision::Granted(_)));
    }

    #[tokio::test]
    async fn denies_when_minute_bucket_is_full() {
        let clock: SharedClock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()));
        let ledger = QuotaLedger::new(clock);
        let account = AccountId::from("acct-2");
        for _ in 0..2 {
            let decision = ledger.reserve(&account, plan(2, 1000), 1).await;
            if let QuotaDecision::Granted(r) = decision {
                ledger.commit(&account, r).await;
            }
        }
        let decision = ledger.reserve(&account, plan(2, 1000), 1).await;
        match decision {
            QuotaDecision::Denied { reason, retry_after_ms } => {
                assert!(reason.contains("minute"));
                assert!(retry_after_ms > 0);
            }
            QuotaDecision::Granted(_) => panic!("expected denial"),
        }
    }

    #[tokio::test]
    async fn release_frees_reserved_capacity() {
        let clock: SharedClock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()));
        let ledger = QuotaLedger::new(clock);
        let account = AccountId::from("acct-3");
        let first = ledger.reserve(&account, plan(1, 1000), 1).await;
        let QuotaDecision::Granted(r) = first else { panic!("expected grant") };
        // Second reserve should be denied while the first is still pending.
        let second = ledger.reserve(&account, plan(1, 1000), 1).await;
        assert!(matches!(second, QuotaDecision::Denied { .. }));
        ledger.release(&account, r).await;
        let third = ledger.reserve(&account, plan(1, 1000), 1).await;
        assert!(matches!(third, QuotaDecision::Granted(_)));
    }

    #[tokio::test]
    async fn minute_window_resets_after_rollover() {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()));
        let shared: SharedClock = clock.clone();
        let ledger = QuotaLedger::new(shared);
        let account = AccountId::from("acct-4");
        let decision = ledger.reserve(&account, plan(1, 1000), 1).await;
        let QuotaDecision::Granted(r) = decision else { panic!("expected grant") };
        ledger.commit(&account, r).await;
        let denied = ledger.reserve(&account, plan(1, 1000), 1).await;
        assert!(matches!(denied, QuotaDecision::Denied { .. }));

        clock.advance(chrono::Duration::seconds(61));
        let granted_again = ledger.reserve(&account, plan(1, 1000), 1).await;
        assert!(matches!(granted_again, QuotaDecision::Granted(_)));
    }

    #[tokio::test]
    async fn day_bucket_is_independent_of_minute_bucket() {
        let clock: SharedClock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()));
        let ledger = QuotaLedger::new(clock);
        let account = AccountId::from("acct-5");
        let decision = ledger.reserve(&account, plan(1000, 1), 1).await;
        let QuotaDecision::Granted(r) = decision else { panic!("expected grant") };
        ledger.commit(&account, r).await;
        let denied = ledger.reserve(&account, plan(1000, 1), 1).await;
        match denied {
            QuotaDecision::Denied { reason, .. } => assert!(reason.contains("day")),
            QuotaDecision::Granted(_) => panic!("expected day denial"),
        }
    }

    #[tokio::test]
    async fn concurrent_reserves_on_same_account_do_not_overcommit() {
        let clock: SharedClock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()));
        let ledger = Arc::new(QuotaLedger::new(clock));
        let account = AccountId::from("acct-6");
        let mut handles = Vec::new();
        for _ in 0..10 {
            let ledger = ledger.clone();
            let account = account.clone();
            handles.push(tokio::spawn(async move { ledger.reserve(&account, plan(5, 1000), 1).await }));
        }
        let mut granted = 0;
        for h in handles {
            if matches!(h.await.unwrap(), QuotaDecision::Granted(_)) {
                granted += 1;
            }
        }
        assert_eq!(granted, 5);
    }
}
