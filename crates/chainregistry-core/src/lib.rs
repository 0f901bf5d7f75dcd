//! chainregistry-core — foundation types for the ChainRegistry replica.
//!
//! # Architecture
//!
//! ```text
//! ConnectionSupervisor → ChainReader ─┬─ IndexWalker → EntitySynchronizer ─┐
//!                                     └─ EventStreamApplier ───────────────┴→ RecordStore
//! ```
//!
//! This crate defines what every other crate shares:
//!
//! - [`MemberAddress`], [`EntityRecord`], [`ChangeEvent`]: the replica data model
//! - [`ConnectionState`] / [`ConnectionStatus`]: supervisor liveness snapshots
//! - [`SyncCursor`]: the monotonic last-applied block
//! - [`RecordStore`]: the storage collaborator trait
//! - [`RegistryConfig`]: TOML-backed configuration
//! - [`RegistryError`]: the error taxonomy

pub mod config;
pub mod cursor;
pub mod error;
pub mod store;
pub mod types;

pub use config::{HashAlgorithm, NetworkConfig, ProfilePaths, RegistryConfig};
pub use cursor::SyncCursor;
pub use error::RegistryError;
pub use store::{PageRequest, RecordFilter, RecordPage, RecordStore};
pub use types::{
    ChangeEvent, ChangeKind, ConnectionState, ConnectionStatus, DocumentStatus, EntityProfile,
    EntityRecord, MemberAddress,
};
