//! Listwarden Core Library
//!
//! Shared building blocks for managing content-blocker filter list
//! subscriptions. Nothing in this crate performs network I/O or schedules
//! work: it defines the inert records the update coordinator mutates, the
//! durable storage they live in, and the capability traits through which
//! the platform (content-blocker host, transport) is reached.
//!
//! # Modules
//!
//! - `types`: Identifiers and constants shared across crates
//! - `subscription`: One filter list and its persisted record form
//! - `allowlist`: User-approved hostnames that bypass blocking
//! - `selection`: Which default-list variant is active
//! - `hostname`: IDNA-aware hostname normalization
//! - `activation`: Host-side activation state of the extension
//! - `store`: Durable settings store and list cache
//! - `host`: Content-blocker host capability and its error slot
//! - `transport`: Fetch capability for subscription payloads
//! - `extension`: The extension-process side of the activity test

pub mod activation;
pub mod allowlist;
pub mod extension;
pub mod host;
pub mod hostname;
pub mod selection;
pub mod store;
pub mod subscription;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use activation::ActivationState;
pub use allowlist::AllowList;
pub use extension::ExtensionRequestHandler;
pub use host::{ContentBlockerHost, HostError};
pub use hostname::normalize_hostname;
pub use selection::{ListRole, ListSelection};
pub use store::{DirCache, FileStore, ListCache, MemoryCache, MemoryStore, Settings, SettingsStore, StoreError};
pub use subscription::{AttemptResult, FailureKind, RecordError, Subscription, SubscriptionRecord};
pub use transport::{FetchResponse, Transport, TransportError};
pub use types::{GroupId, TaskId, DEFAULT_EXPIRES, RULESET_FILE_NAME};
