//! chainregistry-sync — keeps the local replica in step with the ledger.
//!
//! # Passes
//!
//! - **bootstrap**: [`IndexWalker`] enumerates every member under the
//!   entrypoint, then [`EntitySynchronizer::sync_all`] composes and upserts a
//!   record for each one with bounded concurrency
//! - **live**: [`EventStreamApplier::run`] catches up from the stored cursor
//!   with `eth_getLogs`, then applies the log subscription as it arrives
//!
//! Both passes write through the same [`RecordStore`](chainregistry_core::RecordStore)
//! and may run at the same time.

pub mod applier;
pub mod contracts;
pub mod document;
pub mod events;
pub mod profile;
pub mod synchronizer;
pub mod walker;

mod signal;

pub use applier::{reduce, ApplierConfig, EventStreamApplier, Reduction};
pub use contracts::{LedgerContracts, OnChainMember, RegistryContracts};
pub use document::{DocumentFetcher, DocumentVerifier, HttpDocumentFetcher, Resolution};
pub use events::EventDecoder;
pub use synchronizer::{BatchReport, EntitySynchronizer, SyncConfig};
pub use walker::{IndexWalker, MemberIndex};
