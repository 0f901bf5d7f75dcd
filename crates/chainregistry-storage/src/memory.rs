//! In-memory record store.
//!
//! Keeps entity records and the cursor in RAM. Useful for tests and one-shot
//! bootstrap runs that don't need persistence.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use chainregistry_core::{
    EntityRecord, MemberAddress, PageRequest, RecordFilter, RecordPage, RecordStore, RegistryError,
};

/// In-memory record store. All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: Mutex<BTreeMap<MemberAddress, EntityRecord>>,
    cursor: Mutex<Option<u64>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored record, ordered by address.
    pub fn snapshot(&self) -> Vec<EntityRecord> {
        self.records.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn upsert(&self, record: EntityRecord) -> Result<(), RegistryError> {
        let mut records = self.records.lock().unwrap();
        if let Some(existing) = records.get(&record.address) {
            if existing.last_checked_at > record.last_checked_at {
                tracing::debug!(member = %record.address, "stale upsert ignored");
                return Ok(());
            }
        }
        records.insert(record.address.clone(), record);
        Ok(())
    }

    async fn get(&self, address: &MemberAddress) -> Result<Option<EntityRecord>, RegistryError> {
        Ok(self.records.lock().unwrap().get(address).cloned())
    }

    async fn query(&self, filter: &RecordFilter, page: PageRequest) -> Result<RecordPage, RegistryError> {
        let records = self.records.lock().unwrap();
        let matching: Vec<&EntityRecord> = records.values().filter(|r| filter.matches(r)).collect();
        Ok(RecordPage {
            total: matching.len(),
            records: matching
                .into_iter()
                .skip(page.offset)
                .take(page.limit)
                .cloned()
                .collect(),
        })
    }

    async fn count(&self) -> Result<usize, RegistryError> {
        Ok(self.records.lock().unwrap().len())
    }

    async fn get_cursor(&self) -> Result<Option<u64>, RegistryError> {
        Ok(*self.cursor.lock().unwrap())
    }

    async fn set_cursor(&self, block_number: u64) -> Result<(), RegistryError> {
        let mut cursor = self.cursor.lock().unwrap();
        if cursor.map_or(true, |c| block_number > c) {
            *cursor = Some(block_number);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{Duration, Utc};

    use super::*;
    use chainregistry_core::{DocumentStatus, EntityProfile};

    fn record(n: u8, owner: u8) -> EntityRecord {
        EntityRecord {
            address: MemberAddress::parse(&format!("{:040x}", n)).unwrap(),
            owner: MemberAddress::parse(&format!("{:040x}", owner)).unwrap(),
            parent: None,
            segments: BTreeSet::from([1]),
            document_uri: String::new(),
            document_hash: None,
            integrity_verified: false,
            document_status: DocumentStatus::Missing,
            document: None,
            profile: EntityProfile::default(),
            keys: BTreeSet::new(),
            created_at_block: 1,
            deposit: None,
            last_checked_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn upsert_and_get() {
        let store = InMemoryRecordStore::new();
        let r = record(1, 9);
        store.upsert(r.clone()).await.unwrap();
        assert_eq!(store.get(&r.address).await.unwrap(), Some(r));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn older_write_never_overwrites_newer() {
        let store = InMemoryRecordStore::new();
        let newer = record(1, 9);
        let mut older = record(1, 8);
        older.last_checked_at = newer.last_checked_at - Duration::seconds(5);

        store.upsert(newer.clone()).await.unwrap();
        store.upsert(older).await.unwrap();
        assert_eq!(store.get(&newer.address).await.unwrap().unwrap().owner, newer.owner);
    }

    #[tokio::test]
    async fn query_filters_and_pages() {
        let store = InMemoryRecordStore::new();
        for n in 1..=5 {
            store.upsert(record(n, if n % 2 == 0 { 2 } else { 3 })).await.unwrap();
        }
        let filter = RecordFilter {
            owner: Some(MemberAddress::parse(&format!("{:040x}", 3)).unwrap()),
            ..Default::default()
        };
        let page = store
            .query(&filter, PageRequest { offset: 1, limit: 1 })
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].address.as_str(), format!("0x{:040x}", 3));
    }

    #[tokio::test]
    async fn cursor_is_monotonic() {
        let store = InMemoryRecordStore::new();
        assert_eq!(store.get_cursor().await.unwrap(), None);
        store.set_cursor(7).await.unwrap();
        store.set_cursor(6).await.unwrap();
        assert_eq!(store.get_cursor().await.unwrap(), Some(7));
    }
}
