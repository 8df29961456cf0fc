//! wa-core
//!
//! Shared domain types and the injected `Clock`/`RandomSource` seams
//! (component L) for the WhatsApp campaign core. If you only take one
//! dependency from this workspace, take this one.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Bulk-send campaign, recipient, pacing, and progress types.
pub mod campaign;
/// Injected wall-clock time abstraction.
pub mod clock;
/// Opaque, strongly-typed identifiers.
pub mod ids;
/// Fixed tumbling-window quota types.
pub mod quota;
/// Injected uniform-random-integer abstraction.
pub mod random;
/// Scheduled one-off message types.
pub mod scheduled;
/// Template, block, and selection data types.
pub mod template;
/// Durable variation-log entry types.
pub mod tracking;

pub use campaign::{Campaign, CampaignStatus, FailurePolicy, Pacing, Progress, Recipient};
pub use clock::{Clock, FixedClock, SharedClock, SystemClock};
pub use ids::{AccountId, CampaignId, LogEntryId, ProviderMessageId, ScheduledMessageId};
pub use quota::{AccountPlan, QuotaBucket, QuotaWindow};
pub use random::{OsRandomSource, RandomSource, SeededRandomSource, SharedRandomSource};
pub use scheduled::{ScheduledMessage, ScheduledStatus};
pub use template::{Block, Selection, SelectionRecord, Template, ValidationError, ValidationWarning};
pub use tracking::VariationLogEntry;

/// Current contract version string embedded in persisted records and API
/// responses, bumped whenever a breaking schema change is made.
pub const CONTRACT_VERSION: &str = "wa-core/v1";

#[cfg(test)]
mod tests {
    #[test]
    fn contract_version_is_stable() {
        assert_eq!(super::CONTRACT_VERSION, "wa-core/v1");
    }
}
