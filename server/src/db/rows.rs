//! Database operations for the rows table.
//!
//! Client tables share one table keyed by `(table_name, id)`. Field values
//! live in the `data` JSONB column; the server owns the id, owner and
//! timestamp columns.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use sqlx::{PgPool, Row as _};
use tether_engine::wire::{CREATED_AT_COLUMN, ID_COLUMN, OWNER_COLUMN, UPDATED_AT_COLUMN};
use tether_engine::Row;
use uuid::Uuid;

/// Columns clients cannot write through `data`.
const RESERVED_COLUMNS: [&str; 4] = [ID_COLUMN, OWNER_COLUMN, CREATED_AT_COLUMN, UPDATED_AT_COLUMN];

/// A stored row from the database.
#[derive(Debug, Clone)]
pub struct StoredRow {
    pub id: String,
    pub user_id: String,
    pub data: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredRow {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            data: row.try_get("data")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl StoredRow {
    /// Flatten into the object clients see: the data fields plus the server
    /// columns.
    pub fn into_wire(self) -> Row {
        let mut row = match self.data {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        row.insert(ID_COLUMN.to_string(), Value::String(self.id));
        row.insert(OWNER_COLUMN.to_string(), Value::String(self.user_id));
        row.insert(CREATED_AT_COLUMN.to_string(), timestamp(self.created_at));
        row.insert(UPDATED_AT_COLUMN.to_string(), timestamp(self.updated_at));
        row
    }
}

fn timestamp(at: DateTime<Utc>) -> Value {
    Value::String(at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Split an incoming row into its requested id and the data to store.
pub fn split_row(mut row: Row) -> (Option<String>, Value) {
    let id = match row.remove(ID_COLUMN) {
        Some(Value::String(id)) if !id.is_empty() => Some(id),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    for column in RESERVED_COLUMNS {
        row.remove(column);
    }
    (id, Value::Object(row))
}

/// What `ORDER BY` sorts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderKey<'a> {
    /// A server column
    Column(&'static str),
    /// A field inside `data`
    Field(&'a str),
}

impl<'a> OrderKey<'a> {
    pub fn parse(field: &'a str) -> Self {
        match field {
            CREATED_AT_COLUMN => OrderKey::Column("created_at"),
            UPDATED_AT_COLUMN => OrderKey::Column("updated_at"),
            ID_COLUMN => OrderKey::Column("id"),
            other => OrderKey::Field(other),
        }
    }

    fn expression(&self) -> &'static str {
        match self {
            OrderKey::Column(column) => *column,
            OrderKey::Field(_) => "data->>$3",
        }
    }
}

/// Column an upsert matches existing rows on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictTarget {
    /// One row per user in this table
    Owner,
    /// The row with the given id
    Id,
}

impl ConflictTarget {
    pub fn parse(column: &str) -> Option<Self> {
        match column {
            OWNER_COLUMN => Some(ConflictTarget::Owner),
            ID_COLUMN => Some(ConflictTarget::Id),
            _ => None,
        }
    }
}

/// All rows of `table` owned by `user_id`.
pub async fn select_rows(
    pool: &PgPool,
    table: &str,
    user_id: &str,
    order: OrderKey<'_>,
    ascending: bool,
) -> Result<Vec<StoredRow>, sqlx::Error> {
    let direction = if ascending { "ASC" } else { "DESC" };
    let sql = format!(
        "SELECT id, user_id, data, created_at, updated_at FROM rows \
         WHERE table_name = $1 AND user_id = $2 \
         ORDER BY {} {direction}, created_at {direction}",
        order.expression()
    );

    let mut query = sqlx::query_as::<_, StoredRow>(&sql)
        .bind(table)
        .bind(user_id);
    if let OrderKey::Field(field) = order {
        query = query.bind(field);
    }
    query.fetch_all(pool).await
}

/// Insert rows in one transaction; all or none are stored.
pub async fn insert_rows(
    pool: &PgPool,
    table: &str,
    user_id: &str,
    rows: Vec<Row>,
) -> Result<Vec<StoredRow>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut stored = Vec::with_capacity(rows.len());

    for row in rows {
        let (id, data) = split_row(row);
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let inserted = sqlx::query_as::<_, StoredRow>(
            r#"
            INSERT INTO rows (table_name, id, user_id, data)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, data, created_at, updated_at
            "#,
        )
        .bind(table)
        .bind(id)
        .bind(user_id)
        .bind(data)
        .fetch_one(&mut *tx)
        .await?;
        stored.push(inserted);
    }

    tx.commit().await?;
    Ok(stored)
}

/// Merge `patch` into a row's data. `None` when the user has no such row.
pub async fn update_row(
    pool: &PgPool,
    table: &str,
    user_id: &str,
    id: &str,
    patch: Row,
) -> Result<Option<StoredRow>, sqlx::Error> {
    let (_, patch) = split_row(patch);
    sqlx::query_as::<_, StoredRow>(
        r#"
        UPDATE rows SET data = data || $4, updated_at = now()
        WHERE table_name = $1 AND user_id = $2 AND id = $3
        RETURNING id, user_id, data, created_at, updated_at
        "#,
    )
    .bind(table)
    .bind(user_id)
    .bind(id)
    .bind(patch)
    .fetch_optional(pool)
    .await
}

/// Delete a row; returns whether one existed.
pub async fn delete_row(
    pool: &PgPool,
    table: &str,
    user_id: &str,
    id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM rows WHERE table_name = $1 AND user_id = $2 AND id = $3")
        .bind(table)
        .bind(user_id)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Insert a row or merge it into the one matching `target`.
///
/// With [`ConflictTarget::Id`], a row owned by another user is left alone and
/// `None` is returned.
pub async fn upsert_row(
    pool: &PgPool,
    table: &str,
    user_id: &str,
    row: Row,
    target: ConflictTarget,
) -> Result<Option<StoredRow>, sqlx::Error> {
    let (id, data) = split_row(row);
    let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());

    let sql = match target {
        ConflictTarget::Owner => {
            r#"
            INSERT INTO rows (table_name, id, user_id, data, singleton)
            VALUES ($1, $2, $3, $4, TRUE)
            ON CONFLICT (table_name, user_id) WHERE singleton
            DO UPDATE SET data = rows.data || EXCLUDED.data, updated_at = now()
            RETURNING id, user_id, data, created_at, updated_at
            "#
        }
        ConflictTarget::Id => {
            r#"
            INSERT INTO rows (table_name, id, user_id, data)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (table_name, id)
            DO UPDATE SET data = rows.data || EXCLUDED.data, updated_at = now()
            WHERE rows.user_id = EXCLUDED.user_id
            RETURNING id, user_id, data, created_at, updated_at
            "#
        }
    };

    sqlx::query_as::<_, StoredRow>(sql)
        .bind(table)
        .bind(id)
        .bind(user_id)
        .bind(data)
        .fetch_optional(pool)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn split_strips_server_columns() {
        let (id, data) = split_row(row(json!({
            "id": "t1",
            "user_id": "someone-else",
            "created_at": "2020-01-01T00:00:00Z",
            "title": "Buy milk",
            "due_date": null
        })));
        assert_eq!(id.as_deref(), Some("t1"));
        assert_eq!(data, json!({"title": "Buy milk", "due_date": null}));

        let (id, _) = split_row(row(json!({"id": 42})));
        assert_eq!(id.as_deref(), Some("42"));

        let (id, _) = split_row(row(json!({"id": ""})));
        assert_eq!(id, None);
    }

    #[test]
    fn wire_form_flattens_data() {
        let at = Utc.with_ymd_and_hms(2026, 1, 5, 9, 30, 0).unwrap();
        let stored = StoredRow {
            id: "t1".into(),
            user_id: "u1".into(),
            data: json!({"title": "Buy milk"}),
            created_at: at,
            updated_at: at,
        };
        assert_eq!(
            Value::Object(stored.into_wire()),
            json!({
                "id": "t1",
                "user_id": "u1",
                "title": "Buy milk",
                "created_at": "2026-01-05T09:30:00.000Z",
                "updated_at": "2026-01-05T09:30:00.000Z"
            })
        );
    }

    #[test]
    fn order_keys() {
        assert_eq!(OrderKey::parse("created_at"), OrderKey::Column("created_at"));
        assert_eq!(OrderKey::parse("id"), OrderKey::Column("id"));
        assert_eq!(OrderKey::parse("due_date"), OrderKey::Field("due_date"));
        assert_eq!(OrderKey::parse("due_date").expression(), "data->>$3");
        assert_eq!(OrderKey::parse("updated_at").expression(), "updated_at");
    }

    #[test]
    fn conflict_targets() {
        assert_eq!(ConflictTarget::parse("user_id"), Some(ConflictTarget::Owner));
        assert_eq!(ConflictTarget::parse("id"), Some(ConflictTarget::Id));
        assert_eq!(ConflictTarget::parse("email"), None);
    }
}
