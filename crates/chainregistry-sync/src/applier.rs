//! Live event application.
//!
//! [`reduce`] is the pure "what does this event mean" step. The
//! [`EventStreamApplier`] feeds it: catch up from the stored cursor with
//! `eth_getLogs`, then drain the live subscription. Delivery is
//! at-least-once, so everything here is idempotent under replay.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use chainregistry_core::config::SyncSettings;
use chainregistry_core::{ChangeEvent, ChangeKind, EntityRecord, MemberAddress, RegistryError, SyncCursor};
use chainregistry_rpc::{ChainReader, LogFilter, RawLog};

use crate::events::EventDecoder;
use crate::signal::shutdown_requested;
use crate::synchronizer::EntitySynchronizer;

#[derive(Debug, Clone)]
pub struct ApplierConfig {
    /// Lowest block the entrypoint can have emitted events in.
    pub start_block: u64,
    /// Pause before resubscribing after the stream ends.
    pub resubscribe_delay: Duration,
}

impl ApplierConfig {
    pub fn new(settings: &SyncSettings, start_block: u64) -> Self {
        Self {
            start_block,
            resubscribe_delay: Duration::from_millis(settings.resubscribe_delay_ms),
        }
    }
}

/// What [`reduce`] did to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Reduction {
    pub changed: bool,
    /// The URI or hash changed; the document must be resolved again.
    pub resolve_document: bool,
}

impl Reduction {
    fn changed(changed: bool) -> Self {
        Self {
            changed,
            resolve_document: false,
        }
    }

    fn document(changed: bool) -> Self {
        Self {
            changed,
            resolve_document: changed,
        }
    }
}

/// Apply `event` to `record` in place. Replaying an event is a no-op.
pub fn reduce(record: &mut EntityRecord, event: &ChangeEvent) -> Reduction {
    match &event.kind {
        ChangeKind::MemberCreated { segment } => Reduction::changed(record.segments.insert(*segment)),
        ChangeKind::OwnerChanged { owner } => {
            if record.owner == *owner {
                return Reduction::default();
            }
            record.owner = owner.clone();
            Reduction::changed(true)
        }
        ChangeKind::DocumentUriChanged { uri } => {
            if record.document_uri == *uri {
                return Reduction::default();
            }
            record.document_uri = uri.clone();
            record.clear_verification();
            Reduction::document(true)
        }
        ChangeKind::DocumentHashChanged { hash } => {
            if record.document_hash == *hash {
                return Reduction::default();
            }
            record.document_hash = hash.clone();
            record.clear_verification();
            Reduction::document(true)
        }
        ChangeKind::KeyAdded { key } => Reduction::changed(record.keys.insert(key.clone())),
        ChangeKind::KeyRemoved { key } => Reduction::changed(record.keys.remove(key)),
    }
}

// ─── EventStreamApplier ───────────────────────────────────────────────────────

pub struct EventStreamApplier {
    reader: Arc<ChainReader>,
    synchronizer: Arc<EntitySynchronizer>,
    entrypoint: MemberAddress,
    decoder: EventDecoder,
    config: ApplierConfig,
}

impl EventStreamApplier {
    pub fn new(
        reader: Arc<ChainReader>,
        synchronizer: Arc<EntitySynchronizer>,
        entrypoint: MemberAddress,
        config: ApplierConfig,
    ) -> Self {
        Self {
            reader,
            synchronizer,
            entrypoint,
            decoder: EventDecoder::new(),
            config,
        }
    }

    fn filter(&self) -> LogFilter {
        LogFilter::address(self.entrypoint.clone()).with_topics(self.decoder.topics())
    }

    /// Apply one decoded event to the store.
    ///
    /// `MemberCreated`, and any event for a member not yet stored, triggers a
    /// full synchronization of the subject.
    pub async fn apply_event(&self, event: &ChangeEvent) -> Result<(), RegistryError> {
        if let ChangeKind::MemberCreated { segment } = event.kind {
            self.synchronizer
                .sync_member(&event.member, &BTreeSet::from([segment]))
                .await?;
            return Ok(());
        }

        let store = self.synchronizer.store();
        let Some(mut record) = store.get(&event.member).await? else {
            tracing::info!(member = %event.member, event = event.kind.name(), "event for unknown member, synchronizing");
            self.synchronizer.sync_one(&event.member).await?;
            return Ok(());
        };

        let reduction = reduce(&mut record, event);
        if !reduction.changed {
            tracing::debug!(member = %event.member, event = event.kind.name(), "event already applied");
            return Ok(());
        }
        if reduction.resolve_document {
            self.synchronizer.refresh_document(&mut record).await;
        }
        record.last_checked_at = Utc::now();
        store.upsert(record).await?;
        tracing::debug!(member = %event.member, event = event.kind.name(), block = event.block_number, "event applied");
        Ok(())
    }

    /// Decode and apply one log, then advance and persist the cursor.
    ///
    /// Member-scoped failures skip the log. Anything else (lost connection,
    /// store failure) propagates with the cursor untouched, so the log is
    /// replayed after resubscribing. The cursor moves only once persisted.
    pub async fn apply_log(&self, log: &RawLog, cursor: &mut SyncCursor) -> Result<(), RegistryError> {
        if log.removed {
            tracing::debug!(block = %log.block_number, "removed log skipped");
            return Ok(());
        }
        let block = match log.block_number_u64() {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(block = %log.block_number, error = %e, "log without a usable block number, skipping");
                return Ok(());
            }
        };

        match self.decoder.decode(log) {
            Ok(Some(event)) => {
                if let Err(e) = self.apply_event(&event).await {
                    if !e.is_member_scoped() {
                        return Err(e);
                    }
                    tracing::warn!(member = %event.member, event = event.kind.name(), error = %e, "event application failed, skipping");
                }
            }
            Ok(None) => {
                let topic0 = log.topics.first().map(String::as_str).unwrap_or("");
                tracing::warn!(block, topic0, "unrecognised registry log, skipping");
            }
            Err(e) => tracing::warn!(block, error = %e, "undecodable registry log, skipping"),
        }

        if block > cursor.block_number() {
            self.synchronizer.store().set_cursor(block).await?;
            cursor.advance(block);
        }
        Ok(())
    }

    /// Follow the event stream until `shutdown` turns `true`.
    ///
    /// Never returns an error for transport trouble: interruptions request a
    /// reconnect and the stream is resumed from the stored cursor.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), RegistryError> {
        let stored = self.synchronizer.store().get_cursor().await?;
        let mut cursor = SyncCursor::new(stored.unwrap_or(0));
        tracing::info!(cursor = cursor.block_number(), entrypoint = %self.entrypoint, "event applier starting");

        loop {
            let outcome = tokio::select! {
                r = self.follow(&mut cursor) => r,
                _ = shutdown_requested(&mut shutdown) => break,
            };
            if let Err(e) = outcome {
                if e.is_fatal() {
                    return Err(e);
                }
                tracing::warn!(error = %e, cursor = cursor.block_number(), "event stream interrupted, resubscribing");
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.resubscribe_delay) => {}
                _ = shutdown_requested(&mut shutdown) => break,
            }
        }

        tracing::info!(cursor = cursor.block_number(), "event applier stopped");
        Ok(())
    }

    /// One subscription lifetime: subscribe, catch up, then drain live logs.
    async fn follow(&self, cursor: &mut SyncCursor) -> Result<(), RegistryError> {
        let supervisor = self.reader.supervisor();
        let transport = supervisor.ensure_connected().await?;
        let filter = self.filter();

        // Subscribe before catching up so nothing lands in the gap.
        let mut live = self.reader.subscribe_logs(&filter).await?;

        let head = self.reader.block_number().await?;
        let from = cursor.resume_from(self.config.start_block);
        if from <= head {
            let mut logs = self.reader.get_logs(&filter, from, head).await?;
            logs.sort_by_key(|l| (l.block_number_u64().unwrap_or(0), l.log_index_u64().unwrap_or(0)));
            tracing::info!(from, head, logs = logs.len(), "catching up");
            for log in &logs {
                self.apply_log(log, cursor).await?;
            }
        }

        tracing::info!(cursor = cursor.block_number(), "following live events");
        while let Some(item) = live.recv().await {
            match item {
                Ok(log) => self.apply_log(&log, cursor).await?,
                Err(e) => {
                    supervisor.request_reconnect_for(&transport, &e.to_string()).await;
                    return Err(e.into_registry("eth_subscription"));
                }
            }
        }

        supervisor
            .request_reconnect_for(&transport, "log subscription ended")
            .await;
        Err(RegistryError::Connection("log subscription ended".into()))
    }
}
