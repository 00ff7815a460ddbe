//! Listwarden Sync
//!
//! The two coordination pieces of Listwarden:
//!
//! - `coordinator`: downloads subscriptions in generations, settles each
//!   generation into one merge and one content-blocker reload, and decides
//!   which failures reach the user
//! - `probe`: the activity-test handshake that proves the extension is
//!   actually being invoked by the platform
//!
//! Both are handed an explicit [`lw_core::Settings`] handle and the host
//! capabilities they need. Neither looks anything up globally.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod probe;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{DefaultSubscription, ProbeConfig, UpdaterConfig};
pub use coordinator::{UpdateCoordinator, UpdateRequest};
pub use error::SyncError;
pub use events::{CoordinatorStatus, FailedSubscription, FailureReport, UpdateEvent};
pub use probe::{ActivationProbe, CheckOutcome, ProbeFailure, ProbePhase};
