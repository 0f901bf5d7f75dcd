//! Per-entity synchronization: on-chain fields + verified document → record.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;

use chainregistry_core::config::SyncSettings;
use chainregistry_core::{EntityProfile, EntityRecord, MemberAddress, ProfilePaths, RecordStore, RegistryError};

use crate::contracts::{OnChainMember, RegistryContracts};
use crate::document::{DocumentVerifier, Resolution};
use crate::profile::extract_profile;
use crate::signal::shutdown_requested;
use crate::walker::MemberIndex;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Members synchronized at once by `sync_all`.
    pub concurrency: usize,
    /// How long in-flight syncs may run after shutdown is requested.
    pub shutdown_grace: Duration,
    pub profile_paths: ProfilePaths,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(&SyncSettings::default(), ProfilePaths::default())
    }
}

impl SyncConfig {
    pub fn new(settings: &SyncSettings, profile_paths: ProfilePaths) -> Self {
        Self {
            concurrency: settings.concurrency.max(1),
            shutdown_grace: settings.shutdown_grace(),
            profile_paths,
        }
    }
}

/// Result of a `sync_all` batch.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub synced: usize,
    /// Members whose sync failed; the rest of the batch still ran.
    pub failed: Vec<(MemberAddress, RegistryError)>,
    /// Members never started or abandoned because of shutdown.
    pub not_attempted: usize,
    pub interrupted: bool,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.synced + self.failed.len() + self.not_attempted
    }
}

pub struct EntitySynchronizer {
    contracts: Arc<dyn RegistryContracts>,
    verifier: Arc<DocumentVerifier>,
    store: Arc<dyn RecordStore>,
    config: SyncConfig,
    /// Serializes the parent-chain check with the write it guards.
    commit: Mutex<()>,
}

impl EntitySynchronizer {
    pub fn new(
        contracts: Arc<dyn RegistryContracts>,
        verifier: Arc<DocumentVerifier>,
        store: Arc<dyn RecordStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            contracts,
            verifier,
            store,
            config,
            commit: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Synchronize one member, keeping the segment tags already stored.
    pub async fn sync_one(&self, address: &MemberAddress) -> Result<EntityRecord, RegistryError> {
        self.sync_member(address, &BTreeSet::new()).await
    }

    /// Synchronize one member and tag it with `segments` in addition to the
    /// segments already stored for it.
    pub async fn sync_member(
        &self,
        address: &MemberAddress,
        segments: &BTreeSet<u64>,
    ) -> Result<EntityRecord, RegistryError> {
        let state = self.contracts.member_state(address).await?;
        if let Some(parent) = &state.parent {
            self.check_parent_chain(address, parent).await?;
        }

        let resolution = self
            .verifier
            .resolve(&state.document_uri, state.document_hash.as_deref())
            .await;

        let deposit = match self.contracts.deposit_of(address).await {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!(member = %address, error = %e, "deposit lookup failed, omitting");
                None
            }
        };

        // Concurrent syncs of A (parent B) and B (parent A) both pass the
        // early check; the one committing second must see the first's write.
        let guard = self.commit.lock().await;
        if let Some(parent) = &state.parent {
            self.check_parent_chain(address, parent).await?;
        }
        let mut all_segments = self
            .store
            .get(address)
            .await?
            .map(|r| r.segments)
            .unwrap_or_default();
        all_segments.extend(segments.iter().copied());

        let record = self.compose(address, state, all_segments, resolution, deposit);
        self.store.upsert(record.clone()).await?;
        drop(guard);
        tracing::debug!(
            member = %address,
            verified = record.integrity_verified,
            status = record.document_status.label(),
            "member synchronized"
        );
        Ok(record)
    }

    fn compose(
        &self,
        address: &MemberAddress,
        state: OnChainMember,
        segments: BTreeSet<u64>,
        resolution: Resolution,
        deposit: Option<String>,
    ) -> EntityRecord {
        let mut record = EntityRecord {
            address: address.clone(),
            owner: state.owner,
            parent: state.parent,
            segments,
            document_uri: state.document_uri,
            document_hash: state.document_hash,
            integrity_verified: false,
            document_status: resolution.status.clone(),
            document: None,
            profile: EntityProfile::default(),
            keys: state.keys,
            created_at_block: state.created_at_block,
            deposit,
            last_checked_at: Utc::now(),
        };
        self.apply_resolution(&mut record, resolution);
        record
    }

    fn apply_resolution(&self, record: &mut EntityRecord, resolution: Resolution) {
        record.profile = resolution
            .content
            .as_ref()
            .map(|doc| extract_profile(doc, &self.config.profile_paths))
            .unwrap_or_default();
        record.integrity_verified = resolution.verified;
        record.document_status = resolution.status;
        record.document = resolution.content;
    }

    /// Re-resolve the record's document against its current URI and hash.
    pub async fn refresh_document(&self, record: &mut EntityRecord) {
        let resolution = self
            .verifier
            .resolve(&record.document_uri, record.document_hash.as_deref())
            .await;
        self.apply_resolution(record, resolution);
    }

    /// Follow stored parent links from `parent`; reaching `address` or any
    /// address twice is a cycle.
    async fn check_parent_chain(&self, address: &MemberAddress, parent: &MemberAddress) -> Result<(), RegistryError> {
        let mut visited = BTreeSet::from([address.clone()]);
        let mut next = Some(parent.clone());
        while let Some(current) = next {
            if !visited.insert(current.clone()) {
                tracing::warn!(member = %address, at = %current, "parent cycle rejected");
                return Err(RegistryError::ParentCycle {
                    address: address.to_string(),
                });
            }
            next = self.store.get(&current).await?.and_then(|r| r.parent);
        }
        Ok(())
    }

    /// Synchronize every member in `index` with bounded concurrency.
    ///
    /// One member's failure is recorded in the report and never stops the
    /// batch. Once `shutdown` turns `true` (or its sender is dropped) no new
    /// members are started; in-flight ones get `shutdown_grace` to finish.
    pub async fn sync_all(&self, index: &MemberIndex, shutdown: watch::Receiver<bool>) -> BatchReport {
        let total = index.len();
        tracing::info!(members = total, concurrency = self.config.concurrency, "batch sync starting");

        let gate = shutdown.clone();
        let results = futures::stream::iter(index.iter())
            .take_while(move |_| futures::future::ready(!*gate.borrow()))
            .map(|(address, segments)| async move {
                (address.clone(), self.sync_member(address, segments).await)
            })
            .buffer_unordered(self.config.concurrency)
            .boxed();
        futures::pin_mut!(results);

        let mut report = BatchReport::default();
        let mut stop = shutdown;
        let mut deadline: Option<Instant> = None;

        loop {
            let next = match deadline {
                Some(at) => match tokio::time::timeout_at(at, results.next()).await {
                    Ok(item) => item,
                    Err(_) => {
                        tracing::warn!("shutdown grace elapsed, abandoning in-flight syncs");
                        break;
                    }
                },
                None => tokio::select! {
                    item = results.next() => item,
                    _ = shutdown_requested(&mut stop) => {
                        tracing::info!(grace_ms = self.config.shutdown_grace.as_millis() as u64, "shutdown requested, draining batch");
                        report.interrupted = true;
                        deadline = Some(Instant::now() + self.config.shutdown_grace);
                        continue;
                    }
                },
            };

            match next {
                None => break,
                Some((_, Ok(_))) => report.synced += 1,
                Some((address, Err(e))) => {
                    tracing::warn!(member = %address, error = %e, "member sync failed, skipping");
                    report.failed.push((address, e));
                }
            }
        }

        report.not_attempted = total - report.synced - report.failed.len();
        tracing::info!(
            synced = report.synced,
            failed = report.failed.len(),
            not_attempted = report.not_attempted,
            "batch sync finished"
        );
        report
    }
}
