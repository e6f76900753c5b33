//! Table routes: `/rest/{table}` and `/rest/{table}/{id}`.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use tether_engine::wire::{InsertBody, SelectParams, UpsertParams, REST_PREFIX};
use tether_engine::Row;

use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::handlers::{handle_delete, handle_insert, handle_select, handle_update, handle_upsert};
use crate::AppState;

/// Create table routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            &format!("{REST_PREFIX}/{{table}}"),
            get(select_handler).post(insert_handler).put(upsert_handler),
        )
        .route(
            &format!("{REST_PREFIX}/{{table}}/{{id}}"),
            patch(update_handler).delete(delete_handler),
        )
}

/// Reject tables that are malformed or not allowlisted the way PostgreSQL
/// rejects a missing relation.
fn checked_table<'a>(state: &AppState, table: &'a str) -> Result<&'a str> {
    if state.config.allows(table) {
        Ok(table)
    } else {
        tracing::warn!(table, "Rejected unknown table");
        Err(AppError::UnknownTable(table.to_string()))
    }
}

/// GET /rest/{table} - List the caller's rows.
async fn select_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(table): Path<String>,
    Query(params): Query<SelectParams>,
) -> Result<Json<Vec<Row>>> {
    let table = checked_table(&state, &table)?;
    let rows = handle_select(&state.pool, table, &auth, params).await?;
    Ok(Json(rows))
}

/// POST /rest/{table} - Insert one row or an array of rows.
async fn insert_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(table): Path<String>,
    Json(body): Json<InsertBody>,
) -> Result<(StatusCode, Json<InsertBody>)> {
    let table = checked_table(&state, &table)?;
    let created = handle_insert(&state.pool, table, &auth, body).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// PUT /rest/{table}?on_conflict=... - Insert or merge one row.
async fn upsert_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(table): Path<String>,
    Query(params): Query<UpsertParams>,
    Json(row): Json<Row>,
) -> Result<Json<Row>> {
    let table = checked_table(&state, &table)?;
    let row = handle_upsert(&state.pool, table, &auth, params, row).await?;
    Ok(Json(row))
}

/// PATCH /rest/{table}/{id} - Merge fields into one row.
async fn update_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((table, id)): Path<(String, String)>,
    Json(patch): Json<Row>,
) -> Result<Json<Row>> {
    let table = checked_table(&state, &table)?;
    let row = handle_update(&state.pool, table, &auth, &id, patch).await?;
    Ok(Json(row))
}

/// DELETE /rest/{table}/{id} - Remove one row.
async fn delete_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((table, id)): Path<(String, String)>,
) -> Result<StatusCode> {
    let table = checked_table(&state, &table)?;
    handle_delete(&state.pool, table, &auth, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
