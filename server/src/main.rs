//! Tether Server - table-keyed REST backend for Tether collection stores.
//!
//! Serves `/rest/{table}` over a single PostgreSQL table. Every row belongs to
//! the user named by the request's bearer token.

mod auth;
mod config;
mod db;
mod error;
mod handlers;
mod routes;

use crate::config::Config;
use crate::db::Pool;
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub config: Arc<Config>,
}

/// Build the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tether_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Tether Server on {}:{}", config.host, config.port);
    match &config.tables {
        Some(tables) => tracing::info!("Serving tables: {}", tables.join(", ")),
        None => tracing::warn!("TETHER_TABLES not set; any valid table name is accepted"),
    }

    // Create database pool
    let pool = db::create_pool(&config.database_url).await?;

    // Run migrations
    tracing::info!("Running database migrations...");
    db::run_migrations(&pool).await?;

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState {
        pool,
        config: Arc::new(config),
    };

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app(state)).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use serde_json::Value;
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    // The pool never connects: every request below is answered before the
    // handler reaches the database.
    fn test_app(config: Config) -> Router {
        let pool = PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .unwrap();
        app(AppState {
            pool,
            config: Arc::new(config),
        })
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(Method::GET).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_needs_no_auth() {
        let (status, body) = send(test_app(config::test_config()), get("/health", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn table_routes_require_a_bearer_token() {
        let app = test_app(config::test_config());

        let (status, body) = send(app.clone(), get("/rest/tasks", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Missing authorization header");

        let request = Request::builder()
            .uri("/rest/tasks")
            .header(header::AUTHORIZATION, "Basic dXNlcjpwYXNz")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn wrong_secret_is_rejected() {
        let mut config = config::test_config();
        config.auth_secret = Some("s3cret".into());

        let (status, body) = send(test_app(config), get("/rest/tasks", Some("u1:nope"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid bearer token");
    }

    #[tokio::test]
    async fn unknown_tables_look_missing() {
        let mut config = config::test_config();
        config.tables = Some(vec!["tasks".into()]);
        let app = test_app(config);

        let (status, body) = send(app.clone(), get("/rest/habits", Some("u1"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "42P01");
        assert!(body["hint"].is_string());

        let request = Request::builder()
            .method(Method::DELETE)
            .uri("/rest/Bad-Table/abc")
            .header(header::AUTHORIZATION, "Bearer u1")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "42P01");
    }

    #[tokio::test]
    async fn unsupported_conflict_column_is_a_bad_request() {
        let request = Request::builder()
            .method(Method::PUT)
            .uri("/rest/settings?on_conflict=email")
            .header(header::AUTHORIZATION, "Bearer u1")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"theme":"dark"}"#))
            .unwrap();
        let (status, body) = send(test_app(config::test_config()), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "unsupported on_conflict column: email");
    }
}
