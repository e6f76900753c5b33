//! Authentication extractor.
//!
//! The bearer token names the user. When `AUTH_SECRET` is configured the
//! token must be `{user_id}:{secret}`; otherwise the whole token is the user
//! id. Rows are always scoped to the extracted user.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::AppError;
use crate::AppState;

/// Authenticated user extracted from request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(AppError::Unauthorized("Missing authorization header"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(AppError::Unauthorized("Invalid authorization header format"))?
            .trim();

        user_from_token(token, state.config.auth_secret.as_deref())
    }
}

/// Resolve the user a token stands for.
fn user_from_token(token: &str, secret: Option<&str>) -> Result<AuthUser, AppError> {
    let user_id = match secret {
        Some(secret) => match token.rsplit_once(':') {
            Some((user, given)) if given == secret => user,
            _ => return Err(AppError::Unauthorized("Invalid bearer token")),
        },
        None => token,
    };

    if user_id.is_empty() {
        return Err(AppError::Unauthorized("Empty bearer token"));
    }

    Ok(AuthUser {
        user_id: user_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str) -> AuthUser {
        AuthUser {
            user_id: id.to_string(),
        }
    }

    #[test]
    fn token_is_user_without_secret() {
        assert_eq!(user_from_token("user-1", None).unwrap(), user("user-1"));
        assert!(user_from_token("", None).is_err());
    }

    #[test]
    fn secret_must_match() {
        assert_eq!(
            user_from_token("user-1:s3cret", Some("s3cret")).unwrap(),
            user("user-1")
        );
        assert!(user_from_token("user-1:wrong", Some("s3cret")).is_err());
        assert!(user_from_token("user-1", Some("s3cret")).is_err());
        assert!(user_from_token(":s3cret", Some("s3cret")).is_err());
    }
}
