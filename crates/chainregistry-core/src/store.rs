//! The record-store collaborator.
//!
//! The replica core only reads and writes through this trait. Backends live in
//! `chainregistry-storage` (in-memory, SQLite).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::types::{EntityRecord, MemberAddress};

/// Filter applied by [`RecordStore::query`]. Empty fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordFilter {
    pub owner: Option<MemberAddress>,
    pub entity_type: Option<String>,
    pub segment: Option<u64>,
    /// Only records whose document verified against the commitment.
    #[serde(default)]
    pub verified_only: bool,
}

impl RecordFilter {
    pub fn segment(segment: u64) -> Self {
        Self {
            segment: Some(segment),
            ..Default::default()
        }
    }

    pub fn verified(mut self) -> Self {
        self.verified_only = true;
        self
    }

    /// Returns `true` if `record` passes every set criterion.
    pub fn matches(&self, record: &EntityRecord) -> bool {
        if let Some(owner) = &self.owner {
            if &record.owner != owner {
                return false;
            }
        }
        if let Some(entity_type) = &self.entity_type {
            if !record.profile.entity_type.eq_ignore_ascii_case(entity_type) {
                return false;
            }
        }
        if let Some(segment) = self.segment {
            if !record.segments.contains(&segment) {
                return false;
            }
        }
        !self.verified_only || record.integrity_verified
    }
}

/// Offset/limit window for [`RecordStore::query`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 100,
        }
    }
}

/// One page of records, ordered by address.
#[derive(Debug, Clone, Default)]
pub struct RecordPage {
    pub records: Vec<EntityRecord>,
    /// Number of records matching the filter across all pages.
    pub total: usize,
}

/// Durable storage for entity records and the sync cursor.
///
/// # Concurrency
/// The bootstrap pass and the event applier write concurrently. `upsert` is
/// last-write-wins by `last_checked_at`: a record older than the stored one is
/// ignored. Records are never deleted.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or replace the record keyed by its address.
    async fn upsert(&self, record: EntityRecord) -> Result<(), RegistryError>;

    async fn get(&self, address: &MemberAddress) -> Result<Option<EntityRecord>, RegistryError>;

    async fn query(
        &self,
        filter: &RecordFilter,
        page: PageRequest,
    ) -> Result<RecordPage, RegistryError>;

    async fn count(&self) -> Result<usize, RegistryError>;

    /// Last durably applied block, `None` before the first event.
    async fn get_cursor(&self) -> Result<Option<u64>, RegistryError>;

    /// Persist the cursor. Lower values than the stored one are ignored.
    async fn set_cursor(&self, block_number: u64) -> Result<(), RegistryError>;
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::types::{DocumentStatus, EntityProfile};

    fn record(n: u8, segments: &[u64], verified: bool) -> EntityRecord {
        EntityRecord {
            address: MemberAddress::parse(&format!("0x{:040x}", n)).unwrap(),
            owner: MemberAddress::parse(&format!("0x{:040x}", 0xee)).unwrap(),
            parent: None,
            segments: segments.iter().copied().collect::<BTreeSet<_>>(),
            document_uri: String::new(),
            document_hash: None,
            integrity_verified: verified,
            document_status: DocumentStatus::Missing,
            document: None,
            profile: EntityProfile {
                entity_type: "Bank".into(),
                ..Default::default()
            },
            keys: BTreeSet::new(),
            created_at_block: 1,
            deposit: None,
            last_checked_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn empty_filter_matches_all() {
        assert!(RecordFilter::default().matches(&record(1, &[], false)));
    }

    #[test]
    fn segment_and_verified_filters() {
        let filter = RecordFilter::segment(2).verified();
        assert!(filter.matches(&record(1, &[1, 2], true)));
        assert!(!filter.matches(&record(1, &[1, 2], false)));
        assert!(!filter.matches(&record(1, &[1], true)));
    }

    #[test]
    fn entity_type_is_case_insensitive() {
        let filter = RecordFilter {
            entity_type: Some("bank".into()),
            ..Default::default()
        };
        assert!(filter.matches(&record(1, &[], false)));
    }
}
