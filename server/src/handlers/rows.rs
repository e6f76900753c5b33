//! Table handlers - read and write one user's rows of one table.

use crate::auth::AuthUser;
use crate::db::{self, ConflictTarget, OrderKey};
use crate::error::{AppError, Result};
use sqlx::PgPool;
use tether_engine::wire::{
    InsertBody, SelectParams, UpsertParams, CREATED_AT_COLUMN, ID_COLUMN, OWNER_COLUMN,
};
use tether_engine::Row;

/// List rows, newest first unless asked otherwise.
pub async fn handle_select(
    pool: &PgPool,
    table: &str,
    user: &AuthUser,
    params: SelectParams,
) -> Result<Vec<Row>> {
    let order = params.order.as_deref().unwrap_or(CREATED_AT_COLUMN);
    let ascending = params.ascending.unwrap_or(false);

    let rows = db::select_rows(pool, table, &user.user_id, OrderKey::parse(order), ascending).await?;
    tracing::debug!(table, user = %user.user_id, count = rows.len(), "Selected rows");
    Ok(rows.into_iter().map(db::StoredRow::into_wire).collect())
}

/// Create one row, or several atomically. The response mirrors the request
/// shape.
pub async fn handle_insert(
    pool: &PgPool,
    table: &str,
    user: &AuthUser,
    body: InsertBody,
) -> Result<InsertBody> {
    match body {
        InsertBody::One(row) => {
            let stored = db::insert_rows(pool, table, &user.user_id, vec![row])
                .await?
                .into_iter()
                .next()
                .ok_or(AppError::Database(sqlx::Error::RowNotFound))?;
            tracing::debug!(table, id = %stored.id, "Inserted row");
            Ok(InsertBody::One(stored.into_wire()))
        }
        InsertBody::Many(rows) => {
            if rows.is_empty() {
                return Ok(InsertBody::Many(Vec::new()));
            }
            let stored = db::insert_rows(pool, table, &user.user_id, rows).await?;
            tracing::debug!(table, count = stored.len(), "Inserted rows");
            Ok(InsertBody::Many(
                stored.into_iter().map(db::StoredRow::into_wire).collect(),
            ))
        }
    }
}

/// Merge a patch into one row.
pub async fn handle_update(
    pool: &PgPool,
    table: &str,
    user: &AuthUser,
    id: &str,
    patch: Row,
) -> Result<Row> {
    db::update_row(pool, table, &user.user_id, id, patch)
        .await?
        .map(db::StoredRow::into_wire)
        .ok_or_else(|| AppError::NotFound(format!("no row with id {id}")))
}

/// Delete one row. Deleting a row that does not exist succeeds.
pub async fn handle_delete(pool: &PgPool, table: &str, user: &AuthUser, id: &str) -> Result<()> {
    if !db::delete_row(pool, table, &user.user_id, id).await? {
        tracing::debug!(table, id, "Delete matched no row");
    }
    Ok(())
}

/// Insert or merge a row matched on the `on_conflict` column (default
/// `user_id`, one row per user).
pub async fn handle_upsert(
    pool: &PgPool,
    table: &str,
    user: &AuthUser,
    params: UpsertParams,
    row: Row,
) -> Result<Row> {
    let column = params.on_conflict.as_deref().unwrap_or(OWNER_COLUMN);
    let target = conflict_target(column, &row)?;

    db::upsert_row(pool, table, &user.user_id, row, target)
        .await?
        .map(db::StoredRow::into_wire)
        .ok_or_else(|| AppError::NotFound(format!("row belongs to another user in {table}")))
}

fn conflict_target(column: &str, row: &Row) -> Result<ConflictTarget> {
    let target = ConflictTarget::parse(column)
        .ok_or_else(|| AppError::BadRequest(format!("unsupported on_conflict column: {column}")))?;
    if target == ConflictTarget::Id && !row.contains_key(ID_COLUMN) {
        return Err(AppError::BadRequest(
            "on_conflict=id requires an id in the row".into(),
        ));
    }
    Ok(target)
}
