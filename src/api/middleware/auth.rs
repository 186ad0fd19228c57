use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::models::Role;

/// Username of the principal, set by the authenticating gateway in front of this service.
pub const HEADER_AUTH_USER: &str = "x-auth-user";
/// Role of the principal (`USER` or `ADMIN`), set by the same gateway.
pub const HEADER_AUTH_ROLE: &str = "x-auth-role";

/// Authentication error responses
#[derive(Debug)]
pub enum AuthError {
    Unauthorized,
    Forbidden,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AuthError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "Authentication required.",
            ),
            AuthError::Forbidden => (
                StatusCode::FORBIDDEN,
                "forbidden",
                "Administrator role required.",
            ),
        };

        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}

/// The authenticated caller. Token verification happens upstream; this only
/// reads the identity the gateway forwarded.
#[derive(Debug, Clone)]
pub struct Principal {
    pub username: String,
    pub role: Role,
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let username = parts
            .headers
            .get(HEADER_AUTH_USER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(AuthError::Unauthorized)?
            .to_string();

        let role = match parts.headers.get(HEADER_AUTH_ROLE) {
            None => Role::User,
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|v| Role::try_from(v.to_string()).ok())
                .ok_or(AuthError::Unauthorized)?,
        };

        Ok(Principal { username, role })
    }
}

/// Principal holding the administrator role
#[derive(Debug, Clone)]
pub struct Admin(pub Principal);

#[async_trait]
impl<S> FromRequestParts<S> for Admin
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let principal = Principal::from_request_parts(parts, state).await?;

        if principal.role != Role::Admin {
            tracing::warn!(principal = %principal.username, "Administrative route refused");
            return Err(AuthError::Forbidden);
        }

        Ok(Admin(principal))
    }
}
