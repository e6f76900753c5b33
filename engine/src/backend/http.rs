//! HTTP backend speaking the `/rest/{table}` dialect of `tether-server`.

use super::{Backend, BackendResult, OrderBy, Row};
use crate::auth::AuthHandle;
use crate::error::{codes, BackendError};
use crate::wire::{ErrorBody, InsertBody, REST_PREFIX};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Remote backend over HTTP.
///
/// Every request carries the current access token of the [`AuthHandle`] as a
/// bearer token; the server scopes rows to that identity.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
    auth: AuthHandle,
}

impl HttpBackend {
    /// Create a backend for the server at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        auth: AuthHandle,
        timeout: Duration,
    ) -> BackendResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Network(format!("failed to build HTTP client: {e}")))?;
        Self::with_client(client, base_url, auth)
    }

    /// Create a backend reusing an existing client.
    pub fn with_client(
        client: Client,
        base_url: impl Into<String>,
        auth: AuthHandle,
    ) -> BackendResult<Self> {
        let raw = base_url.into();
        let base_url = Url::parse(&raw)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| BackendError::Network(format!("invalid base URL: {raw}")))?;
        Ok(Self {
            client,
            base_url,
            auth,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    fn table_url(&self, table: &str) -> Url {
        self.endpoint(&[table])
    }

    fn row_url(&self, table: &str, id: &str) -> Url {
        self.endpoint(&[table, id])
    }

    /// Each segment is percent-encoded, so ids may hold `/`, `?` or `#`.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty()
                .push(REST_PREFIX.trim_start_matches('/'))
                .extend(segments);
        }
        url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.auth.identity() {
            Some(identity) => request.bearer_auth(identity.access_token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> BackendResult<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(error_from_status(status, &body))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> BackendResult<T> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }
}

fn transport_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout
    } else {
        BackendError::Network(err.to_string())
    }
}

/// Map a non-success response to a backend error.
pub(crate) fn error_from_status(status: StatusCode, body: &str) -> BackendError {
    let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
    let message = parsed
        .as_ref()
        .map(|b| b.error.clone())
        .unwrap_or_else(|| body.trim().to_string());

    if status.is_server_error() {
        return BackendError::Unavailable {
            status: status.as_u16(),
            message,
        };
    }

    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        return BackendError::Unauthorized;
    }

    match parsed {
        Some(ErrorBody {
            code: Some(code), ..
        }) if code == codes::NO_ROWS => BackendError::NotFound(message),
        Some(ErrorBody {
            code: Some(code),
            details,
            ..
        }) => BackendError::Database {
            code,
            message,
            details,
        },
        _ if status == StatusCode::NOT_FOUND => BackendError::NotFound(message),
        _ => BackendError::Database {
            code: status.as_u16().to_string(),
            message,
            details: None,
        },
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn select(&self, table: &str, order: &OrderBy) -> BackendResult<Vec<Row>> {
        let ascending = if order.ascending { "true" } else { "false" };
        let request = self
            .client
            .get(self.table_url(table))
            .query(&[("order", order.field.as_str()), ("ascending", ascending)]);
        self.send_json(request).await
    }

    async fn insert(&self, table: &str, row: Row) -> BackendResult<Row> {
        let request = self
            .client
            .post(self.table_url(table))
            .json(&InsertBody::One(row));
        self.send_json(request).await
    }

    async fn insert_many(&self, table: &str, rows: Vec<Row>) -> BackendResult<Vec<Row>> {
        let request = self
            .client
            .post(self.table_url(table))
            .json(&InsertBody::Many(rows));
        self.send_json(request).await
    }

    async fn update(&self, table: &str, id: &str, patch: Row) -> BackendResult<()> {
        let request = self.client.patch(self.row_url(table, id)).json(&patch);
        self.send(request).await.map(drop)
    }

    async fn delete(&self, table: &str, id: &str) -> BackendResult<()> {
        let request = self.client.delete(self.row_url(table, id));
        self.send(request).await.map(drop)
    }

    async fn upsert(&self, table: &str, row: Row, conflict_key: &str) -> BackendResult<Row> {
        let request = self
            .client
            .put(self.table_url(table))
            .query(&[("on_conflict", conflict_key)])
            .json(&row);
        self.send_json(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Identity;

    fn backend(base_url: &str) -> HttpBackend {
        HttpBackend::with_client(Client::new(), base_url, AuthHandle::new()).unwrap()
    }

    #[test]
    fn urls() {
        let backend = backend("http://localhost:3000/");
        assert_eq!(backend.base_url(), "http://localhost:3000");
        assert_eq!(
            backend.table_url("tasks").as_str(),
            "http://localhost:3000/rest/tasks"
        );
        assert_eq!(
            backend.row_url("tasks", "abc").as_str(),
            "http://localhost:3000/rest/tasks/abc"
        );

        let mounted = self::backend("https://example.com/api");
        assert_eq!(
            mounted.table_url("tasks").as_str(),
            "https://example.com/api/rest/tasks"
        );
    }

    #[test]
    fn row_ids_are_percent_encoded() {
        let backend = backend("http://localhost:3000");
        assert_eq!(
            backend.row_url("tasks", "a/b?c#d").as_str(),
            "http://localhost:3000/rest/tasks/a%2Fb%3Fc%23d"
        );
        assert_eq!(
            backend.row_url("tasks", "two words").as_str(),
            "http://localhost:3000/rest/tasks/two%20words"
        );
    }

    #[test]
    fn unusable_base_urls_are_rejected() {
        for raw in ["localhost:3000", "not a url", "mailto:ops@example.com"] {
            assert!(
                HttpBackend::with_client(Client::new(), raw, AuthHandle::new()).is_err(),
                "{raw}"
            );
        }
    }

    #[test]
    fn server_errors_are_transient() {
        let err = error_from_status(StatusCode::SERVICE_UNAVAILABLE, "maintenance");
        assert_eq!(
            err,
            BackendError::Unavailable {
                status: 503,
                message: "maintenance".into()
            }
        );
        assert!(err.is_transient());
    }

    #[test]
    fn coded_bodies_become_database_errors() {
        let body = r#"{"error":"relation \"habits\" does not exist","code":"42P01","hint":"run migrations"}"#;
        let err = error_from_status(StatusCode::NOT_FOUND, body);
        assert_eq!(err.code(), Some(codes::UNDEFINED_TABLE));
        assert!(!err.is_transient());
        assert!(err.hint().is_some());

        let body = r#"{"error":"duplicate","code":"23505","details":"Key (id) exists"}"#;
        match error_from_status(StatusCode::CONFLICT, body) {
            BackendError::Database { code, details, .. } => {
                assert_eq!(code, "23505");
                assert_eq!(details.as_deref(), Some("Key (id) exists"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn no_rows_is_not_found() {
        let body = r#"{"error":"no row with id abc","code":"PGRST116"}"#;
        assert_eq!(
            error_from_status(StatusCode::NOT_FOUND, body),
            BackendError::NotFound("no row with id abc".into())
        );
        assert_eq!(
            error_from_status(StatusCode::NOT_FOUND, "gone"),
            BackendError::NotFound("gone".into())
        );
    }

    #[test]
    fn auth_failures() {
        assert_eq!(
            error_from_status(StatusCode::UNAUTHORIZED, r#"{"error":"missing token"}"#),
            BackendError::Unauthorized
        );
    }

    #[test]
    fn uncoded_client_errors_carry_status() {
        let err = error_from_status(StatusCode::BAD_REQUEST, "bad json");
        assert_eq!(err, BackendError::database("400", "bad json"));
    }

    #[tokio::test]
    async fn unreachable_server_is_transient() {
        let auth = AuthHandle::signed_in(Identity::new("u1", "u1"));
        let backend =
            HttpBackend::new("http://127.0.0.1:9", auth, Duration::from_millis(500)).unwrap();
        let err = backend
            .select("tasks", &OrderBy::descending("created_at"))
            .await
            .unwrap_err();
        assert!(err.is_transient(), "{err:?}");
    }
}
