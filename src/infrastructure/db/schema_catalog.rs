// ============================================================
// SCHEMA CATALOG REPOSITORY
// ============================================================
// Persisted TableSchema definitions plus data-table DDL and widening

use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::{Row, SqliteConnection};

use crate::domain::error::{Result, SyncError};
use crate::domain::schema::{
    quote_ident, validate_table_name, ColumnDef, ColumnType, DateTimeFormat, FieldKind, FieldPath,
    TableSchema,
};

/// Persist the schema and execute its DDL in one transaction.
pub async fn create_table(pool: &SqlitePool, schema: &TableSchema) -> Result<()> {
    validate_table_name(&schema.table_name).map_err(SyncError::Validation)?;

    let mut tx = pool.begin().await?;

    let existing: Option<String> =
        sqlx::query_scalar("SELECT table_name FROM xml_table_schema WHERE table_name = ?")
            .bind(&schema.table_name)
            .fetch_optional(&mut *tx)
            .await?;
    if existing.is_some() {
        return Err(SyncError::Validation(format!(
            "table {} already has a schema",
            schema.table_name
        )));
    }

    save_schema(&mut tx, schema).await?;
    for statement in schema.ddl() {
        sqlx::query(&statement).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    tracing::info!(
        table = %schema.table_name,
        columns = schema.columns.len(),
        "Created data table"
    );
    Ok(())
}

async fn save_schema(conn: &mut SqliteConnection, schema: &TableSchema) -> Result<()> {
    sqlx::query("INSERT INTO xml_table_schema (table_name, root_tag, row_tag) VALUES (?, ?, ?)")
        .bind(&schema.table_name)
        .bind(&schema.root_tag)
        .bind(&schema.row_tag)
        .execute(&mut *conn)
        .await?;

    for (ordinal, column) in schema.columns.iter().enumerate() {
        let segments = serde_json::to_string(&column.path.segments)
            .map_err(|e| SyncError::Database(format!("Failed to encode field path: {e}")))?;
        sqlx::query(
            r#"
            INSERT INTO xml_table_columns (
                table_name, ordinal, column_name, field_kind, field_path,
                inferred_type, max_length, nullable, datetime_format
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&schema.table_name)
        .bind(ordinal as i64)
        .bind(&column.name)
        .bind(column.path.kind.as_str())
        .bind(segments)
        .bind(column.inferred_type.as_str())
        .bind(column.max_length.map(i64::from))
        .bind(column.nullable)
        .bind(column.datetime_format.map(|f| f.as_str()))
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn load_schema(pool: &SqlitePool, table_name: &str) -> Result<Option<TableSchema>> {
    let mut conn = pool.acquire().await?;
    load_schema_with(&mut conn, table_name).await
}

/// Load a schema, failing with `SchemaNotFound` when the table is unknown.
pub async fn require_schema(pool: &SqlitePool, table_name: &str) -> Result<TableSchema> {
    load_schema(pool, table_name)
        .await?
        .ok_or_else(|| SyncError::SchemaNotFound(table_name.to_string()))
}

pub async fn load_schema_with(
    conn: &mut SqliteConnection,
    table_name: &str,
) -> Result<Option<TableSchema>> {
    let header = sqlx::query("SELECT root_tag, row_tag FROM xml_table_schema WHERE table_name = ?")
        .bind(table_name)
        .fetch_optional(&mut *conn)
        .await?;
    let Some(header) = header else {
        return Ok(None);
    };

    let rows = sqlx::query(
        r#"
        SELECT column_name, field_kind, field_path, inferred_type, max_length, nullable, datetime_format
        FROM xml_table_columns
        WHERE table_name = ?
        ORDER BY ordinal
        "#,
    )
    .bind(table_name)
    .fetch_all(&mut *conn)
    .await?;

    let columns = rows
        .iter()
        .map(|row| column_from_row(table_name, row))
        .collect::<Result<Vec<_>>>()?;

    Ok(Some(TableSchema {
        table_name: table_name.to_string(),
        root_tag: header.try_get("root_tag")?,
        row_tag: header.try_get("row_tag")?,
        columns,
    }))
}

fn column_from_row(table_name: &str, row: &SqliteRow) -> Result<ColumnDef> {
    let name: String = row.try_get("column_name")?;
    let corrupt = |what: &str| {
        SyncError::Database(format!(
            "Catalog entry {}.{} has invalid {}",
            table_name, name, what
        ))
    };

    let kind_text: String = row.try_get("field_kind")?;
    let kind = FieldKind::parse(&kind_text).ok_or_else(|| corrupt("field_kind"))?;
    let path_text: String = row.try_get("field_path")?;
    let segments: Vec<String> =
        serde_json::from_str(&path_text).map_err(|_| corrupt("field_path"))?;
    let type_text: String = row.try_get("inferred_type")?;
    let inferred_type = ColumnType::parse(&type_text).ok_or_else(|| corrupt("inferred_type"))?;
    let max_length: Option<i64> = row.try_get("max_length")?;
    let format_text: Option<String> = row.try_get("datetime_format")?;
    let datetime_format = match format_text {
        Some(text) => Some(DateTimeFormat::parse(&text).ok_or_else(|| corrupt("datetime_format"))?),
        None => None,
    };

    Ok(ColumnDef {
        name: name.clone(),
        path: FieldPath { segments, kind },
        inferred_type,
        max_length: max_length.map(|v| v as u32),
        nullable: row.try_get("nullable")?,
        datetime_format,
    })
}

pub async fn list_tables(pool: &SqlitePool) -> Result<Vec<String>> {
    let tables = sqlx::query_scalar("SELECT table_name FROM xml_table_schema ORDER BY table_name")
        .fetch_all(pool)
        .await?;
    Ok(tables)
}

/// Whether the physical data table exists, regardless of the catalog.
pub async fn data_table_exists(pool: &SqlitePool, table_name: &str) -> Result<bool> {
    let found: Option<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(table_name)
            .fetch_optional(pool)
            .await?;
    Ok(found.is_some())
}

/// Declared VARCHAR width of a column as the live table reports it.
pub async fn declared_length(
    conn: &mut SqliteConnection,
    table_name: &str,
    column: &str,
) -> Result<Option<u32>> {
    let rows = sqlx::query(&format!("PRAGMA table_info({})", quote_ident(table_name)))
        .fetch_all(&mut *conn)
        .await?;

    for row in rows {
        let name: String = row.try_get("name")?;
        if name != column {
            continue;
        }
        let declared: String = row.try_get("type")?;
        return Ok(parse_varchar_length(&declared));
    }
    Ok(None)
}

fn parse_varchar_length(declared: &str) -> Option<u32> {
    let upper = declared.trim().to_ascii_uppercase();
    let inner = upper.strip_prefix("VARCHAR(")?.strip_suffix(')')?;
    inner.trim().parse().ok()
}

/// Double a VARCHAR column's width by rebuilding the table, inside the caller's transaction.
///
/// SQLite cannot alter a CHECK constraint in place, so rows are copied into
/// a table created from the widened schema which then takes the old name.
pub async fn widen_column(
    conn: &mut SqliteConnection,
    schema: &mut TableSchema,
    column: &str,
) -> Result<u32> {
    let current = match declared_length(conn, &schema.table_name, column).await? {
        Some(len) => len,
        None => schema
            .column(column)
            .and_then(|c| c.max_length)
            .ok_or_else(|| {
                SyncError::Validation(format!(
                    "{}.{} is not a VARCHAR column",
                    schema.table_name, column
                ))
            })?,
    };
    let widened = current.saturating_mul(2).max(1);
    if !schema.set_max_length(column, widened) {
        return Err(SyncError::Validation(format!(
            "{}.{} is not a VARCHAR column",
            schema.table_name, column
        )));
    }

    let table = quote_ident(&schema.table_name);
    let scratch_name = format!("{}__widen", schema.table_name);
    let scratch = quote_ident(&scratch_name);
    let ddl = schema.ddl_for(&scratch_name);

    sqlx::query(&format!("DROP TABLE IF EXISTS {}", scratch))
        .execute(&mut *conn)
        .await?;
    sqlx::query(&ddl[0]).execute(&mut *conn).await?;
    sqlx::query(&format!("INSERT INTO {} SELECT * FROM {}", scratch, table))
        .execute(&mut *conn)
        .await?;
    sqlx::query(&format!("DROP TABLE {}", table))
        .execute(&mut *conn)
        .await?;
    sqlx::query(&format!("ALTER TABLE {} RENAME TO {}", scratch, table))
        .execute(&mut *conn)
        .await?;
    sqlx::query(&schema.ddl()[1]).execute(&mut *conn).await?;

    sqlx::query(
        "UPDATE xml_table_columns SET max_length = ? WHERE table_name = ? AND column_name = ?",
    )
    .bind(i64::from(widened))
    .bind(&schema.table_name)
    .bind(column)
    .execute(&mut *conn)
    .await?;

    tracing::info!(
        table = %schema.table_name,
        column,
        from = current,
        to = widened,
        "Widened VARCHAR column"
    );
    Ok(widened)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::db::Database;

    fn skill_schema() -> TableSchema {
        TableSchema {
            table_name: "skill".into(),
            root_tag: "skills".into(),
            row_tag: "skill".into(),
            columns: vec![
                ColumnDef {
                    name: "id".into(),
                    path: FieldPath::attribute(vec!["id".into()]),
                    inferred_type: ColumnType::Integer,
                    max_length: None,
                    nullable: false,
                    datetime_format: None,
                },
                ColumnDef {
                    name: "name".into(),
                    path: FieldPath::element(vec!["name".into()]),
                    inferred_type: ColumnType::Varchar,
                    max_length: Some(16),
                    nullable: true,
                    datetime_format: None,
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_create_and_load_schema() {
        let db = Database::in_memory().await.unwrap();
        create_table(db.pool(), &skill_schema()).await.unwrap();

        let loaded = load_schema(db.pool(), "skill").await.unwrap().unwrap();
        assert_eq!(loaded, skill_schema());
        assert!(data_table_exists(db.pool(), "skill").await.unwrap());
        assert_eq!(list_tables(db.pool()).await.unwrap(), vec!["skill".to_string()]);

        let again = create_table(db.pool(), &skill_schema()).await;
        assert!(matches!(again, Err(SyncError::Validation(_))));
    }

    #[tokio::test]
    async fn test_missing_schema() {
        let db = Database::in_memory().await.unwrap();
        assert!(load_schema(db.pool(), "nope").await.unwrap().is_none());
        assert!(matches!(
            require_schema(db.pool(), "nope").await,
            Err(SyncError::SchemaNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_widen_column_keeps_rows() {
        let db = Database::in_memory().await.unwrap();
        let mut schema = skill_schema();
        create_table(db.pool(), &schema).await.unwrap();
        sqlx::query("INSERT INTO skill (id, name) VALUES (1, 'short')")
            .execute(db.pool())
            .await
            .unwrap();

        let long = "x".repeat(20);
        let overflow = sqlx::query("INSERT INTO skill (id, name) VALUES (2, ?)")
            .bind(&long)
            .execute(db.pool())
            .await;
        assert!(overflow.is_err());

        let mut tx = db.pool().begin().await.unwrap();
        assert_eq!(declared_length(&mut tx, "skill", "name").await.unwrap(), Some(16));
        let widened = widen_column(&mut tx, &mut schema, "name").await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(widened, 32);

        sqlx::query("INSERT INTO skill (id, name) VALUES (2, ?)")
            .bind(&long)
            .execute(db.pool())
            .await
            .unwrap();
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM skill")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 2);

        let loaded = load_schema(db.pool(), "skill").await.unwrap().unwrap();
        assert_eq!(loaded.column("name").and_then(|c| c.max_length), Some(32));
    }

    #[test]
    fn test_parse_varchar_length() {
        assert_eq!(parse_varchar_length("VARCHAR(24)"), Some(24));
        assert_eq!(parse_varchar_length("varchar( 8 )"), Some(8));
        assert_eq!(parse_varchar_length("INTEGER"), None);
    }
}
