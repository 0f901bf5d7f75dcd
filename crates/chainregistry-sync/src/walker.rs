//! Full membership walk: entrypoint → segment directories → members.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chainregistry_core::{MemberAddress, RegistryError};

use crate::contracts::RegistryContracts;

/// Every known member with the segments it is listed under.
pub type MemberIndex = BTreeMap<MemberAddress, BTreeSet<u64>>;

pub struct IndexWalker {
    contracts: Arc<dyn RegistryContracts>,
}

impl IndexWalker {
    pub fn new(contracts: Arc<dyn RegistryContracts>) -> Self {
        Self { contracts }
    }

    /// Enumerate every member under the entrypoint.
    ///
    /// Segments are visited in ascending order starting at 1. A segment whose
    /// directory cannot be resolved or listed is skipped with a warning; only
    /// a failure to read the segment count aborts the walk.
    pub async fn enumerate_members(&self) -> Result<MemberIndex, RegistryError> {
        let count = self.contracts.segment_count().await?;
        tracing::info!(segments = count, "walking registry");

        let mut index = MemberIndex::new();
        for segment in 1..=count {
            let directory = match self.contracts.segment_directory(segment).await {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(segment, error = %e, "cannot resolve segment directory, skipping");
                    continue;
                }
            };
            if directory.is_zero() {
                tracing::debug!(segment, "empty segment");
                continue;
            }

            match self.contracts.directory_members(&directory).await {
                Ok(members) => {
                    let listed = members.len();
                    for member in members.into_iter().filter(|m| !m.is_zero()) {
                        index.entry(member).or_default().insert(segment);
                    }
                    tracing::debug!(segment, directory = %directory, listed, "segment enumerated");
                }
                Err(e) => {
                    tracing::warn!(
                        segment,
                        directory = %directory,
                        error = %e,
                        "directory enumeration failed, skipping"
                    );
                }
            }
        }

        tracing::info!(segments = count, members = index.len(), "registry walk complete");
        Ok(index)
    }
}
