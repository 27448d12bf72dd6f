// ============================================================
// ENCODING METADATA STORE
// ============================================================
// Per (table, partition) record of original charset, hash and counters

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::encoding_metadata::{
    EncodingMetadata, ImportRecord, MetadataKey, ValidationStatus,
};
use crate::domain::error::{Result, SyncError};

const SELECT_COLUMNS: &str = r#"
    SELECT table_name, map_type, original_encoding, has_bom, original_file_hash,
           original_file_path, last_validation_result, import_count, export_count,
           last_import_time
    FROM file_encoding_metadata
"#;

/// Exclusive hold on one metadata key.
///
/// Mutating operations require the guard, so two jobs touching the same
/// table and partition are serialized while different keys proceed.
#[derive(Debug)]
pub struct KeyGuard {
    key: MetadataKey,
    _lock: OwnedMutexGuard<()>,
}

impl KeyGuard {
    pub fn key(&self) -> &MetadataKey {
        &self.key
    }
}

#[derive(Debug, Clone)]
pub struct EncodingMetadataStore {
    pool: SqlitePool,
    locks: Arc<Mutex<HashMap<MetadataKey, Arc<Mutex<()>>>>>,
}

impl EncodingMetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wait for exclusive access to a key.
    pub async fn acquire(&self, table_name: &str, partition: Option<&str>) -> KeyGuard {
        let key = MetadataKey::new(table_name, partition);
        let lock = {
            let mut locks = self.locks.lock().await;
            // Entries referenced only by the map have no holder and no waiter.
            locks.retain(|held, lock| *held == key || Arc::strong_count(lock) > 1);
            locks
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let guard = lock.lock_owned().await;
        tracing::debug!(key = %key, "Acquired metadata key guard");
        KeyGuard { key, _lock: guard }
    }

    #[cfg(test)]
    async fn tracked_keys(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn get(&self, key: &MetadataKey) -> Result<Option<EncodingMetadata>> {
        let row = sqlx::query(&format!(
            "{} WHERE table_name = ? AND map_type = ?",
            SELECT_COLUMNS
        ))
        .bind(&key.table_name)
        .bind(&key.partition)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(metadata_from_row).transpose()
    }

    /// Metadata or `NotFound`; callers must never guess an encoding.
    pub async fn require(&self, key: &MetadataKey) -> Result<EncodingMetadata> {
        self.get(key)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("no encoding metadata for {}", key)))
    }

    pub async fn list(&self) -> Result<Vec<EncodingMetadata>> {
        let rows = sqlx::query(&format!("{} ORDER BY table_name, map_type", SELECT_COLUMNS))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(metadata_from_row).collect()
    }

    pub async fn list_for_table(&self, table_name: &str) -> Result<Vec<EncodingMetadata>> {
        let rows = sqlx::query(&format!(
            "{} WHERE table_name = ? ORDER BY map_type",
            SELECT_COLUMNS
        ))
        .bind(table_name)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(metadata_from_row).collect()
    }

    /// Upsert after a successful import: counters up, validation reset.
    pub async fn record_import(&self, guard: &KeyGuard, record: &ImportRecord) -> Result<()> {
        let key = guard.key();
        sqlx::query(
            r#"
            INSERT INTO file_encoding_metadata (
                table_name, map_type, original_encoding, has_bom, original_file_hash,
                original_file_path, last_validation_result, import_count, export_count,
                last_import_time
            )
            VALUES (?, ?, ?, ?, ?, ?, NULL, 1, 0, ?)
            ON CONFLICT(table_name, map_type) DO UPDATE SET
                original_encoding = excluded.original_encoding,
                has_bom = excluded.has_bom,
                original_file_hash = excluded.original_file_hash,
                original_file_path = excluded.original_file_path,
                last_validation_result = NULL,
                import_count = import_count + 1,
                last_import_time = excluded.last_import_time
            "#,
        )
        .bind(&key.table_name)
        .bind(&key.partition)
        .bind(&record.encoding)
        .bind(record.has_bom)
        .bind(&record.content_hash)
        .bind(&record.source_path)
        .bind(record.imported_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_export(&self, guard: &KeyGuard) -> Result<()> {
        let key = guard.key();
        let result = sqlx::query(
            "UPDATE file_encoding_metadata SET export_count = export_count + 1 WHERE table_name = ? AND map_type = ?",
        )
        .bind(&key.table_name)
        .bind(&key.partition)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(SyncError::NotFound(format!("no encoding metadata for {}", key)));
        }
        Ok(())
    }

    pub async fn record_validation(&self, guard: &KeyGuard, status: ValidationStatus) -> Result<()> {
        let key = guard.key();
        let result = sqlx::query(
            "UPDATE file_encoding_metadata SET last_validation_result = ? WHERE table_name = ? AND map_type = ?",
        )
        .bind(status.as_db())
        .bind(&key.table_name)
        .bind(&key.partition)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(SyncError::NotFound(format!("no encoding metadata for {}", key)));
        }
        Ok(())
    }

    /// Insert metadata reconstructed from files on disk; existing entries win.
    ///
    /// Counters start at zero since no import through this engine happened.
    pub async fn insert_backfilled(&self, guard: &KeyGuard, record: &ImportRecord) -> Result<bool> {
        let key = guard.key();
        let result = sqlx::query(
            r#"
            INSERT INTO file_encoding_metadata (
                table_name, map_type, original_encoding, has_bom, original_file_hash,
                original_file_path, import_count, export_count, last_import_time
            )
            VALUES (?, ?, ?, ?, ?, ?, 0, 0, NULL)
            ON CONFLICT(table_name, map_type) DO NOTHING
            "#,
        )
        .bind(&key.table_name)
        .bind(&key.partition)
        .bind(&record.encoding)
        .bind(record.has_bom)
        .bind(&record.content_hash)
        .bind(&record.source_path)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, guard: &KeyGuard) -> Result<bool> {
        let key = guard.key();
        let result =
            sqlx::query("DELETE FROM file_encoding_metadata WHERE table_name = ? AND map_type = ?")
                .bind(&key.table_name)
                .bind(&key.partition)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn metadata_from_row(row: &SqliteRow) -> Result<EncodingMetadata> {
    let table_name: String = row.try_get("table_name")?;
    let partition: String = row.try_get("map_type")?;
    let validation: Option<String> = row.try_get("last_validation_result")?;
    let imported: Option<String> = row.try_get("last_import_time")?;
    let last_import_time = match imported {
        Some(text) => Some(
            DateTime::parse_from_rfc3339(&text)
                .map_err(|e| {
                    SyncError::Database(format!(
                        "Invalid last_import_time for {}: {}",
                        table_name, e
                    ))
                })?
                .with_timezone(&Utc),
        ),
        None => None,
    };

    Ok(EncodingMetadata {
        key: MetadataKey {
            table_name,
            partition,
        },
        original_encoding: row.try_get("original_encoding")?,
        has_bom: row.try_get("has_bom")?,
        original_content_hash: row.try_get("original_file_hash")?,
        original_file_path: row.try_get("original_file_path")?,
        last_validation_result: ValidationStatus::from_db(validation.as_deref()),
        import_count: row.try_get("import_count")?,
        export_count: row.try_get("export_count")?,
        last_import_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::db::Database;
    use std::time::Duration;

    fn import_record(hash: &str) -> ImportRecord {
        ImportRecord {
            encoding: "UTF-16LE".into(),
            has_bom: true,
            content_hash: hash.into(),
            source_path: Some("/data/skill.xml".into()),
            imported_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_released_key_locks_are_pruned() {
        let db = Database::in_memory().await.unwrap();
        let store = EncodingMetadataStore::new(db.pool().clone());

        let held = store.acquire("skill", None).await;
        for partition in ["1", "2", "3"] {
            let guard = store.acquire("skill", Some(partition)).await;
            drop(guard);
        }
        let latest = store.acquire("npc", None).await;
        // the held key and the one just acquired
        assert_eq!(store.tracked_keys().await, 2);

        drop(held);
        drop(latest);
        let _again = store.acquire("npc", None).await;
        assert_eq!(store.tracked_keys().await, 1);
    }

    #[tokio::test]
    async fn test_counters_are_monotonic() {
        let db = Database::in_memory().await.unwrap();
        let store = EncodingMetadataStore::new(db.pool().clone());
        let key = MetadataKey::new("skill", None);

        let guard = store.acquire("skill", None).await;
        store.record_import(&guard, &import_record("h1")).await.unwrap();
        store.record_validation(&guard, ValidationStatus::Pass).await.unwrap();
        store.record_export(&guard).await.unwrap();
        store.record_export(&guard).await.unwrap();
        store.record_import(&guard, &import_record("h2")).await.unwrap();
        drop(guard);

        let meta = store.require(&key).await.unwrap();
        assert_eq!(meta.import_count, 2);
        assert_eq!(meta.export_count, 2);
        assert_eq!(meta.original_content_hash.as_deref(), Some("h2"));
        assert_eq!(meta.original_encoding, "UTF-16LE");
        assert!(meta.has_bom);
        // re-import invalidates the previous validation
        assert_eq!(meta.last_validation_result, ValidationStatus::NotValidated);
        assert!(meta.last_import_time.is_some());
    }

    #[tokio::test]
    async fn test_missing_metadata() {
        let db = Database::in_memory().await.unwrap();
        let store = EncodingMetadataStore::new(db.pool().clone());
        let key = MetadataKey::new("npc", Some("210010000"));
        assert!(matches!(store.require(&key).await, Err(SyncError::NotFound(_))));

        let guard = store.acquire("npc", Some("210010000")).await;
        assert!(matches!(store.record_export(&guard).await, Err(SyncError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_backfill_does_not_overwrite() {
        let db = Database::in_memory().await.unwrap();
        let store = EncodingMetadataStore::new(db.pool().clone());
        let guard = store.acquire("skill", None).await;

        assert!(store.insert_backfilled(&guard, &import_record("h0")).await.unwrap());
        assert!(!store.insert_backfilled(&guard, &import_record("h9")).await.unwrap());
        let meta = store.get(guard.key()).await.unwrap().unwrap();
        assert_eq!(meta.import_count, 0);
        assert_eq!(meta.original_content_hash.as_deref(), Some("h0"));

        assert!(store.delete(&guard).await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let db = Database::in_memory().await.unwrap();
        let store = EncodingMetadataStore::new(db.pool().clone());

        let first = store.acquire("skill", None).await;
        let waiting = tokio::time::timeout(Duration::from_millis(50), store.acquire("skill", None)).await;
        assert!(waiting.is_err());

        // a different partition is independent
        let other = tokio::time::timeout(
            Duration::from_millis(50),
            store.acquire("skill", Some("110010000")),
        )
        .await;
        assert!(other.is_ok());

        drop(first);
        let second = tokio::time::timeout(Duration::from_millis(50), store.acquire("skill", None)).await;
        assert!(second.is_ok());
    }
}
