// ============================================================
// DATA TABLE ROWS
// ============================================================
// Typed row storage for inferred tables, partitioned by map

use chrono::NaiveDateTime;
use sqlx::sqlite::SqlitePool;
use sqlx::{Row, SqliteConnection};

use crate::domain::error::{Result, SyncError};
use crate::domain::schema::{
    quote_ident, ColumnType, TableSchema, FRAGMENT_COLUMN, LENGTH_CONSTRAINT_PREFIX,
    PARTITION_COLUMN, ROW_ID_COLUMN,
};
use crate::domain::value::{FieldValue, TypedRecord, STORED_DATETIME_PATTERN};

/// A stored row with the fragment file it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub fragment: String,
    pub record: TypedRecord,
}

/// Remove every row of a partition, returning how many were deleted.
pub async fn delete_partition(
    conn: &mut SqliteConnection,
    table_name: &str,
    partition: &str,
) -> Result<u64> {
    let result = sqlx::query(&format!(
        "DELETE FROM {} WHERE {} = ?",
        quote_ident(table_name),
        quote_ident(PARTITION_COLUMN)
    ))
    .bind(partition)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Insert one row; the raw driver error is returned so callers can classify it.
pub async fn insert_row(
    conn: &mut SqliteConnection,
    schema: &TableSchema,
    partition: &str,
    fragment: &str,
    record: &TypedRecord,
) -> std::result::Result<(), sqlx::Error> {
    let mut columns = vec![quote_ident(PARTITION_COLUMN), quote_ident(FRAGMENT_COLUMN)];
    columns.extend(schema.columns.iter().map(|c| quote_ident(&c.name)));
    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote_ident(&schema.table_name),
        columns.join(", "),
        placeholders
    );

    let mut query = sqlx::query(&sql).bind(partition).bind(fragment);
    for value in &record.values {
        query = match value {
            FieldValue::Integer(v) => query.bind(*v),
            FieldValue::Float(v) => query.bind(*v),
            FieldValue::Text(v) => query.bind(v.clone()),
            FieldValue::DateTime(v) => query.bind(v.format(STORED_DATETIME_PATTERN).to_string()),
            FieldValue::Null => query.bind(None::<String>),
        };
    }
    query.execute(&mut *conn).await?;
    Ok(())
}

/// Column named by a violated width constraint, if that is what the error is.
pub fn overflow_column(err: &sqlx::Error) -> Option<String> {
    let sqlx::Error::Database(db_err) = err else {
        return None;
    };
    let message = db_err.message();
    let marker = format!("CHECK constraint failed: {}", LENGTH_CONSTRAINT_PREFIX);
    let start = message.find(&marker)? + marker.len();
    Some(message[start..].trim().to_string())
}

/// Rows of a partition in document order.
pub async fn fetch_rows(
    pool: &SqlitePool,
    schema: &TableSchema,
    partition: &str,
) -> Result<Vec<StoredRow>> {
    let mut columns = vec![quote_ident(FRAGMENT_COLUMN)];
    columns.extend(schema.columns.iter().map(|c| quote_ident(&c.name)));
    let sql = format!(
        "SELECT {} FROM {} WHERE {} = ? ORDER BY {}",
        columns.join(", "),
        quote_ident(&schema.table_name),
        quote_ident(PARTITION_COLUMN),
        quote_ident(ROW_ID_COLUMN)
    );

    let rows = sqlx::query(&sql).bind(partition).fetch_all(pool).await?;

    let mut stored = Vec::with_capacity(rows.len());
    for row in rows {
        let fragment: String = row.try_get(0)?;
        let mut values = Vec::with_capacity(schema.columns.len());
        for (idx, column) in schema.columns.iter().enumerate() {
            let i = idx + 1;
            let value = match column.inferred_type {
                ColumnType::Integer => row
                    .try_get::<Option<i64>, _>(i)?
                    .map(FieldValue::Integer),
                ColumnType::Float => row.try_get::<Option<f64>, _>(i)?.map(FieldValue::Float),
                ColumnType::Varchar => row.try_get::<Option<String>, _>(i)?.map(FieldValue::Text),
                ColumnType::DateTime => match row.try_get::<Option<String>, _>(i)? {
                    Some(text) => Some(FieldValue::DateTime(
                        NaiveDateTime::parse_from_str(&text, STORED_DATETIME_PATTERN).map_err(
                            |e| {
                                SyncError::ValueType(format!(
                                    "{}.{} holds unreadable datetime '{}': {}",
                                    schema.table_name, column.name, text, e
                                ))
                            },
                        )?,
                    )),
                    None => None,
                },
            };
            values.push(value.unwrap_or(FieldValue::Null));
        }
        stored.push(StoredRow {
            fragment,
            record: TypedRecord { values },
        });
    }
    Ok(stored)
}

pub async fn count_rows(pool: &SqlitePool, table_name: &str, partition: &str) -> Result<i64> {
    let count = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM {} WHERE {} = ?",
        quote_ident(table_name),
        quote_ident(PARTITION_COLUMN)
    ))
    .bind(partition)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Partitions that currently hold rows.
pub async fn list_partitions(pool: &SqlitePool, table_name: &str) -> Result<Vec<String>> {
    let partitions = sqlx::query_scalar(&format!(
        "SELECT DISTINCT {p} FROM {t} ORDER BY {p}",
        p = quote_ident(PARTITION_COLUMN),
        t = quote_ident(table_name)
    ))
    .fetch_all(pool)
    .await?;
    Ok(partitions)
}

/// Fragment names of a partition in the order their first row was stored.
pub async fn list_fragments(
    pool: &SqlitePool,
    table_name: &str,
    partition: &str,
) -> Result<Vec<String>> {
    let fragments = sqlx::query_scalar(&format!(
        "SELECT {f} FROM {t} WHERE {p} = ? GROUP BY {f} ORDER BY MIN({id})",
        f = quote_ident(FRAGMENT_COLUMN),
        t = quote_ident(table_name),
        p = quote_ident(PARTITION_COLUMN),
        id = quote_ident(ROW_ID_COLUMN)
    ))
    .bind(partition)
    .fetch_all(pool)
    .await?;
    Ok(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::schema::{ColumnDef, DateTimeFormat, FieldPath};
    use crate::infrastructure::db::{schema_catalog, Database};

    fn schema() -> TableSchema {
        let column = |name: &str, ty: ColumnType, len: Option<u32>| ColumnDef {
            name: name.to_string(),
            path: FieldPath::element(vec![name.to_string()]),
            inferred_type: ty,
            max_length: len,
            nullable: true,
            datetime_format: if ty == ColumnType::DateTime {
                Some(DateTimeFormat::DashedDateTime)
            } else {
                None
            },
        };
        TableSchema {
            table_name: "npc".into(),
            root_tag: "npcs".into(),
            row_tag: "npc".into(),
            columns: vec![
                column("id", ColumnType::Integer, None),
                column("scale", ColumnType::Float, None),
                column("name", ColumnType::Varchar, Some(8)),
                column("spawned", ColumnType::DateTime, None),
            ],
        }
    }

    fn record(id: i64, name: &str) -> TypedRecord {
        let spawned =
            NaiveDateTime::parse_from_str("2024-03-01 10:00:00", STORED_DATETIME_PATTERN).unwrap();
        TypedRecord {
            values: vec![
                FieldValue::Integer(id),
                FieldValue::Float(1.5),
                FieldValue::Text(name.to_string()),
                FieldValue::DateTime(spawned),
            ],
        }
    }

    #[tokio::test]
    async fn test_insert_fetch_in_document_order() {
        let db = Database::in_memory().await.unwrap();
        let schema = schema();
        schema_catalog::create_table(db.pool(), &schema).await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        insert_row(&mut conn, &schema, "210010000", "npc_b.xml", &record(2, "b")).await.unwrap();
        insert_row(&mut conn, &schema, "210010000", "npc_a.xml", &record(1, "a")).await.unwrap();
        insert_row(&mut conn, &schema, "", "npc.xml", &TypedRecord::nulls(4)).await.unwrap();
        drop(conn);

        let rows = fetch_rows(db.pool(), &schema, "210010000").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].record, record(2, "b"));
        assert_eq!(rows[1].fragment, "npc_a.xml");

        let empty = fetch_rows(db.pool(), &schema, "").await.unwrap();
        assert!(empty[0].record.values.iter().all(|v| v.is_null()));

        assert_eq!(
            list_fragments(db.pool(), "npc", "210010000").await.unwrap(),
            vec!["npc_b.xml".to_string(), "npc_a.xml".to_string()]
        );
        assert_eq!(
            list_partitions(db.pool(), "npc").await.unwrap(),
            vec!["".to_string(), "210010000".to_string()]
        );
    }

    #[tokio::test]
    async fn test_overflow_is_reported_by_column() {
        let db = Database::in_memory().await.unwrap();
        let schema = schema();
        schema_catalog::create_table(db.pool(), &schema).await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let err = insert_row(&mut conn, &schema, "", "npc.xml", &record(1, "much too long"))
            .await
            .unwrap_err();
        assert_eq!(overflow_column(&err).as_deref(), Some("name"));

        assert_eq!(delete_partition(&mut conn, "npc", "").await.unwrap(), 0);
        drop(conn);
        assert_eq!(count_rows(db.pool(), "npc", "").await.unwrap(), 0);
    }
}
