//! Wires one network's components together.

use std::sync::Arc;

use anyhow::Context;

use chainregistry_core::{NetworkConfig, RecordStore, RegistryConfig};
use chainregistry_rpc::{
    ChainReader, ConnectionSupervisor, NodeConnector, ReaderConfig, SupervisorConfig, SupervisorHandle,
};
use chainregistry_storage::{InMemoryRecordStore, SqliteRecordStore};
use chainregistry_sync::{
    ApplierConfig, DocumentVerifier, EntitySynchronizer, EventStreamApplier, HttpDocumentFetcher,
    IndexWalker, LedgerContracts, SyncConfig,
};

pub struct Replica {
    pub supervisor: SupervisorHandle,
    pub walker: IndexWalker,
    pub synchronizer: Arc<EntitySynchronizer>,
    pub applier: Arc<EventStreamApplier>,
}

/// Open the record store: SQLite when a path is given, in-memory otherwise.
pub async fn open_store(db: Option<&str>) -> anyhow::Result<Arc<dyn RecordStore>> {
    Ok(match db {
        Some(path) => {
            tracing::info!(path, "opening sqlite record store");
            Arc::new(
                SqliteRecordStore::open(path)
                    .await
                    .with_context(|| format!("opening {path}"))?,
            )
        }
        None => {
            tracing::warn!("no --db given, records are kept in memory only");
            Arc::new(InMemoryRecordStore::new())
        }
    })
}

pub fn verifier(config: &RegistryConfig, network: Option<&NetworkConfig>) -> anyhow::Result<DocumentVerifier> {
    let fetcher = HttpDocumentFetcher::new(config.sync.document_timeout(), config.sync.max_document_bytes)?;
    let algorithm = network.map(|n| n.hash_algorithm).unwrap_or_default();
    Ok(DocumentVerifier::new(Arc::new(fetcher), algorithm))
}

impl Replica {
    pub fn build(config: &RegistryConfig, network: &NetworkConfig, store: Arc<dyn RecordStore>) -> anyhow::Result<Self> {
        let entrypoint = network.entrypoint_address()?;
        let deposit = network.deposit_address()?;

        let connector = NodeConnector::from_network(network);
        let supervisor = Arc::new(ConnectionSupervisor::new(
            Arc::new(connector),
            SupervisorConfig::from(&config.supervisor),
        ));
        let handle = supervisor.start();

        let reader = Arc::new(ChainReader::new(supervisor, ReaderConfig::from(&config.sync)));
        let contracts = Arc::new(LedgerContracts::new(reader.clone(), entrypoint.clone(), deposit));
        let verifier = Arc::new(verifier(config, Some(network))?);

        let synchronizer = Arc::new(EntitySynchronizer::new(
            contracts.clone(),
            verifier,
            store,
            SyncConfig::new(&config.sync, network.profile_paths.clone()),
        ));
        let applier = Arc::new(EventStreamApplier::new(
            reader,
            synchronizer.clone(),
            entrypoint,
            ApplierConfig::new(&config.sync, network.deployment_block),
        ));

        Ok(Self {
            supervisor: handle,
            walker: IndexWalker::new(contracts),
            synchronizer,
            applier,
        })
    }
}
