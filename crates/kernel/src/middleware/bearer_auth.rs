//! Bearer token authentication middleware.
//!
//! Checks `Authorization: Bearer <token>` headers, verifies the JWT and
//! stores the caller's [`Identity`] in request extensions.

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{Request, header, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;
use uuid::Uuid;

use crate::error::AppError;
use crate::media::MediaError;
use crate::state::AppState;

/// The authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity(pub Uuid);

impl Identity {
    pub fn user_id(self) -> Uuid {
        self.0
    }
}

/// Middleware to authenticate Bearer JWT tokens.
///
/// If a valid Bearer token is present, sets the identity in request
/// extensions. If no token is present, passes through without modification.
/// If an invalid token is present, returns 401.
pub async fn authenticate_bearer_token(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(token) = token else {
        return next.run(request).await;
    };

    match state.tokens().verify(token) {
        Ok(user_id) => {
            request.extensions_mut().insert(Identity(user_id));
            next.run(request).await
        }
        Err(e) => {
            debug!(error = %e, "invalid bearer token");
            (
                [(header::WWW_AUTHENTICATE, "Bearer error=\"invalid_token\"")],
                AppError::from(MediaError::Unauthorized),
            )
                .into_response()
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Identity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .copied()
            .ok_or(AppError::Media(MediaError::Unauthorized))
    }
}
