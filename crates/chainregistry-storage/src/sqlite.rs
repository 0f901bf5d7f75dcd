//! SQLite record store.
//!
//! Persists entity records and the sync cursor to a single SQLite file. Each
//! record is stored as JSON next to the columns queries filter on. Uses
//! `sqlx` with WAL mode so the bootstrap pass and the event applier can
//! write while the API layer reads.
//!
//! # Usage
//! ```rust,no_run
//! use chainregistry_storage::sqlite::SqliteRecordStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = SqliteRecordStore::open("./registry.db").await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use chainregistry_core::{
    EntityRecord, MemberAddress, PageRequest, RecordFilter, RecordPage, RecordStore, RegistryError,
};

fn storage_err(e: impl std::fmt::Display) -> RegistryError {
    RegistryError::Storage(e.to_string())
}

/// SQLite-backed record store.
pub struct SqliteRecordStore {
    pool: SqlitePool,
}

impl SqliteRecordStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./registry.db"`) or a full
    /// SQLite URL (`"sqlite:./registry.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, RegistryError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };
        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory database. A single connection keeps every query on
    /// the same database.
    pub async fn in_memory() -> Result<Self, RegistryError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), RegistryError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS entities (
                address         TEXT    PRIMARY KEY,
                owner           TEXT    NOT NULL,
                entity_type     TEXT    NOT NULL,
                verified        INTEGER NOT NULL,
                checked_at_ms   INTEGER NOT NULL,
                record_json     TEXT    NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_owner ON entities (owner);")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sync_cursor (
                id           INTEGER PRIMARY KEY CHECK (id = 1),
                block_number INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    fn decode(row: &sqlx::sqlite::SqliteRow) -> Result<EntityRecord, RegistryError> {
        let json: String = row.get("record_json");
        serde_json::from_str(&json).map_err(storage_err)
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn upsert(&self, record: EntityRecord) -> Result<(), RegistryError> {
        let json = serde_json::to_string(&record).map_err(storage_err)?;
        let result = sqlx::query(
            "INSERT INTO entities (address, owner, entity_type, verified, checked_at_ms, record_json)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(address) DO UPDATE SET
                owner         = excluded.owner,
                entity_type   = excluded.entity_type,
                verified      = excluded.verified,
                checked_at_ms = excluded.checked_at_ms,
                record_json   = excluded.record_json
             WHERE excluded.checked_at_ms >= entities.checked_at_ms",
        )
        .bind(record.address.as_str())
        .bind(record.owner.as_str())
        .bind(record.profile.entity_type.to_ascii_lowercase())
        .bind(record.integrity_verified)
        .bind(record.last_checked_at.timestamp_millis())
        .bind(&json)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            debug!(member = %record.address, "stale upsert ignored");
        }
        Ok(())
    }

    async fn get(&self, address: &MemberAddress) -> Result<Option<EntityRecord>, RegistryError> {
        let row = sqlx::query("SELECT record_json FROM entities WHERE address = ?")
            .bind(address.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(Self::decode).transpose()
    }

    async fn query(&self, filter: &RecordFilter, page: PageRequest) -> Result<RecordPage, RegistryError> {
        // Owner and verification narrow in SQL; segment and type are checked
        // on the decoded record.
        let rows = sqlx::query(
            "SELECT record_json FROM entities
             WHERE (?1 IS NULL OR owner = ?1) AND (?2 = 0 OR verified = 1)
             ORDER BY address",
        )
        .bind(filter.owner.as_ref().map(|o| o.as_str().to_string()))
        .bind(filter.verified_only)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        let mut matching = Vec::new();
        for row in &rows {
            let record = Self::decode(row)?;
            if filter.matches(&record) {
                matching.push(record);
            }
        }
        Ok(RecordPage {
            total: matching.len(),
            records: matching.into_iter().skip(page.offset).take(page.limit).collect(),
        })
    }

    async fn count(&self) -> Result<usize, RegistryError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM entities")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.get::<i64, _>("cnt") as usize)
    }

    async fn get_cursor(&self) -> Result<Option<u64>, RegistryError> {
        let row = sqlx::query("SELECT block_number FROM sync_cursor WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(row.map(|r| r.get::<i64, _>("block_number") as u64))
    }

    async fn set_cursor(&self, block_number: u64) -> Result<(), RegistryError> {
        sqlx::query(
            "INSERT INTO sync_cursor (id, block_number) VALUES (1, ?)
             ON CONFLICT(id) DO UPDATE SET block_number = MAX(block_number, excluded.block_number)",
        )
        .bind(block_number as i64)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        debug!(block = block_number, "cursor saved");
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{Duration, Utc};

    use super::*;
    use chainregistry_core::{DocumentStatus, EntityProfile};

    fn record(n: u8, segments: &[u64], verified: bool) -> EntityRecord {
        EntityRecord {
            address: MemberAddress::parse(&format!("{:040x}", n)).unwrap(),
            owner: MemberAddress::parse(&format!("{:040x}", 0xee)).unwrap(),
            parent: None,
            segments: segments.iter().copied().collect(),
            document_uri: "https://example.org/doc.json".into(),
            document_hash: Some(format!("0x{}", "11".repeat(32))),
            integrity_verified: verified,
            document_status: if verified {
                DocumentStatus::Verified
            } else {
                DocumentStatus::Missing
            },
            document: verified.then(|| serde_json::json!({"name": "Entity"})),
            profile: EntityProfile {
                entity_type: "Bank".into(),
                ..Default::default()
            },
            keys: BTreeSet::from(["0x01".to_string()]),
            created_at_block: 10,
            deposit: Some("1000".into()),
            last_checked_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn record_roundtrip() {
        let store = SqliteRecordStore::in_memory().await.unwrap();
        let r = record(1, &[1, 2], true);
        store.upsert(r.clone()).await.unwrap();
        let loaded = store.get(&r.address).await.unwrap().unwrap();
        assert!(loaded.same_state(&r));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stale_write_is_ignored() {
        let store = SqliteRecordStore::in_memory().await.unwrap();
        let newer = record(1, &[1], true);
        let mut older = record(1, &[1], false);
        older.last_checked_at = newer.last_checked_at - Duration::seconds(10);

        store.upsert(newer).await.unwrap();
        store.upsert(older.clone()).await.unwrap();
        let loaded = store.get(&older.address).await.unwrap().unwrap();
        assert!(loaded.integrity_verified);
    }

    #[tokio::test]
    async fn query_by_segment_and_verification() {
        let store = SqliteRecordStore::in_memory().await.unwrap();
        store.upsert(record(1, &[1], true)).await.unwrap();
        store.upsert(record(2, &[1, 2], false)).await.unwrap();
        store.upsert(record(3, &[2], true)).await.unwrap();

        let page = store
            .query(&RecordFilter::segment(2).verified(), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.records[0].address.as_str(), format!("0x{:040x}", 3));

        let by_type = RecordFilter {
            entity_type: Some("bank".into()),
            ..Default::default()
        };
        let page = store.query(&by_type, PageRequest::default()).await.unwrap();
        assert_eq!(page.total, 3);
    }

    #[tokio::test]
    async fn cursor_never_regresses() {
        let store = SqliteRecordStore::in_memory().await.unwrap();
        assert_eq!(store.get_cursor().await.unwrap(), None);
        store.set_cursor(5).await.unwrap();
        store.set_cursor(7).await.unwrap();
        store.set_cursor(6).await.unwrap();
        assert_eq!(store.get_cursor().await.unwrap(), Some(7));
    }
}
