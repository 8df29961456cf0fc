//! wa-runtime
//!
//! Campaign scheduling (component G), crash-recovered state synchronisation
//! (component H), single-message dispatch (component I), and the
//! `ControlPlane` facade (component K) that ties every core component
//! together for an outer HTTP or CLI surface.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod campaign;
pub mod cancel;
pub mod control_plane;
pub mod single;
pub mod store;
pub mod sync;

pub use bus::{EventBus, EventBusStats, RuntimeEvent};
pub use campaign::CampaignScheduler;
pub use cancel::{CancellationToken, PauseFlag};
pub use control_plane::ControlPlane;
pub use single::SingleMessageScheduler;
pub use store::{CampaignStore, ScheduledMessageStore, StoredCampaign};
pub use sync::StateSynchronizer;
