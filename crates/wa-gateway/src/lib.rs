//! wa-gateway
//!
//! The pluggable send capability (component E, `spec.md` §4.E) and a
//! [`MockGateway`] reference implementation used by tests and local
//! development. A real provider adapter (Cloud API, BSP, etc.) implements
//! the same [`MessageGateway`] trait; the runtime never depends on the
//! concrete provider.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;
use wa_core::clock::SharedClock;
use wa_core::ids::{AccountId, ProviderMessageId};
use wa_core::random::SharedRandomSource;
use wa_error::CoreError;

/// A message ready to hand to the provider: final text, not a template.
#[derive(Debug, Clone)]
pub struct MessageSpec {
    /// Owning account.
    pub account_id: AccountId,
    /// Destination address (opaque to the core; validated by the gateway).
    pub to: String,
    /// Fully substituted message body.
    pub body: String,
}

/// Successful acknowledgement from [`MessageGateway::send`].
#[derive(Debug, Clone)]
pub struct SendAck {
    /// Provider-assigned identifier, used to correlate later delivery
    /// events back to this send.
    pub provider_message_id: ProviderMessageId,
    /// Time the provider accepted the message.
    pub accepted_at: DateTime<Utc>,
}

/// Asynchronous delivery-lifecycle event pushed back from the provider.
#[derive(Debug, Clone)]
pub enum GatewayEvent {
    /// The provider confirmed the recipient's device received the message.
    Delivered {
        /// The send this event correlates to.
        provider_message_id: ProviderMessageId,
        /// When delivery was confirmed.
        at: DateTime<Utc>,
    },
    /// The provider confirmed the recipient read the message.
    Read {
        /// The send this event correlates to.
        provider_message_id: ProviderMessageId,
        /// When the read receipt arrived.
        at: DateTime<Utc>,
    },
    /// A previously-accepted send ultimately failed to deliver.
    Failed {
        /// The send this event correlates to.
        provider_message_id: ProviderMessageId,
        /// Provider-supplied failure reason.
        reason: String,
        /// When the failure was reported.
        at: DateTime<Utc>,
    },
}

impl GatewayEvent {
    /// The [`ProviderMessageId`] this event correlates to, regardless of
    /// variant.
    #[must_use]
    pub fn provider_message_id(&self) -> &ProviderMessageId {
        match self {
            Self::Delivered { provider_message_id, .. }
            | Self::Read { provider_message_id, .. }
            | Self::Failed { provider_message_id, .. } => provider_message_id,
        }
    }
}

/// The pluggable outbound capability consumed by the campaign and
/// single-message schedulers.
#[async_trait]
pub trait MessageGateway: Send + Sync {
    /// Attempt to send `spec`. Returns a typed [`CoreError`] on failure —
    /// see [`wa_error::ErrorCode::retryable`] to classify transient vs.
    /// permanent failures.
    async fn send(&self, spec: &MessageSpec) -> Result<SendAck, CoreError>;

    /// Best-effort address validity check, performed before queuing a
    /// send where the provider supports it.
    async fn check_address(&self, address: &str) -> bool;

    /// Subscribe to this gateway's asynchronous delivery-lifecycle events.
    /// Each call returns an independent receiver; every event is
    /// broadcast to all current subscribers.
    fn subscribe(&self) -> broadcast::Receiver<GatewayEvent>;
}

/// Per-mille (parts-per-1000) failure injection rates for [`MockGateway`].
#[derive(Debug, Clone, Copy)]
pub struct MockFailureRates {
    /// Probability, in parts-per-1000, that a send fails transiently.
    pub transient_per_mille: u64,
    /// Probability, in parts-per-1000, that a send fails permanently.
    pub permanent_per_mille: u64,
}

impl Default for MockFailureRates {
    fn default() -> Self {
        Self {
            transient_per_mille: 0,
            permanent_per_mille: 0,
        }
    }
}

/// In-memory [`MessageGateway`] for tests and local development. Accepts
/// sends instantly, optionally injects failures per [`MockFailureRates`],
/// and lets the caller drive delivery/read/failed events explicitly.
pub struct MockGateway {
    clock: SharedClock,
    random: SharedRandomSource,
    rates: MockFailureRates,
    rejected_addresses: Mutex<HashSet<String>>,
    events_tx: broadcast::Sender<GatewayEvent>,
    next_id: AtomicU64,
}

impl MockGateway {
    /// Create a mock gateway that always succeeds and accepts every
    /// address.
    #[must_use]
    pub fn new(clock: SharedClock, random: SharedRandomSource) -> Self {
        Self::with_rates(clock, random, MockFailureRates::default())
    }

    /// Create a mock gateway that injects failures at the given rates.
    #[must_use]
    pub fn with_rates(clock: SharedClock, random: SharedRandomSource, rates: MockFailureRates) -> Self {
        let (events_tx, _) = broadcast::channel(1024);
        Self {
            clock,
            random,
            rates,
            rejected_addresses: Mutex::new(HashSet::new()),
            events_tx,
            next_id: AtomicU64::new(1),
        }
    }

    /// Mark `address` as invalid for subsequent [`MessageGateway::send`]
    /// and [`MessageGateway::check_address`] calls.
    pub fn reject_address(&self, address: impl Into<String>) {
        self.rejected_addresses.lock().expect("lock poisoned").insert(address.into());
    }

    /// Manually emit a `Delivered` event, as a real provider's webhook
    /// would.
    pub fn deliver(&self, provider_message_id: &ProviderMessageId) {
        let _ = self.events_tx.send(GatewayEvent::Delivered {
            provider_message_id: provider_message_id.clone(),
            at: self.clock.now(),
        });
    }

    /// Manually emit a `Read` event.
    pub fn mark_read(&self, provider_message_id: &ProviderMessageId) {
        let _ = self.events_tx.send(GatewayEvent::Read {
            provider_message_id: provider_message_id.clone(),
            at: self.clock.now(),
        });
    }

    /// Manually emit a post-acceptance `Failed` event.
    pub fn fail_async(&self, provider_message_id: &ProviderMessageId, reason: impl Into<String>) {
        let _ = self.events_tx.send(GatewayEvent::Failed {
            provider_message_id: provider_message_id.clone(),
            reason: reason.into(),
            at: self.clock.now(),
        });
    }

    fn next_provider_message_id(&self) -> ProviderMessageId {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        ProviderMessageId::new(format!("mock-{n:012}"))
    }
}

#[async_trait]
impl MessageGateway for MockGateway {
    async fn send(&self, spec: &MessageSpec) -> Result<SendAck, CoreError> {
        if self
            .rejected_addresses
            .lock()
            .expect("lock poisoned")
            .contains(&spec.to)
        {
            return Err(CoreError::gateway_permanent(format!("address rejected: {}", spec.to)));
        }

        let roll = self.random.uint64n(1000);
        if roll < self.rates.transient_per_mille {
            return Err(CoreError::gateway_transient("simulated transient provider failure"));
        }
        if roll < self.rates.transient_per_mille + self.rates.permanent_per_mille {
            return Err(CoreError::gateway_permanent("simulated permanent provider failure"));
        }

        Ok(SendAck {
            provider_message_id: self.next_provider_message_id(),
            accepted_at: self.clock.now(),
        })
    }

    async fn check_address(&self, address: &str) -> bool {
        !self.rejected_addresses.lock().expect("lock poisoned").contains(address)
    }

    fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.events_tx.subscribe()
    }
}
