//! Bearer-token authentication extractor.

use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};

use crate::auth::{bearer_token, AuthError, Identity};
use crate::routes::ApiError;
use crate::state::AppState;

/// Caller identity verified from `Authorization: Bearer <token>`
#[derive(Debug, Clone)]
pub struct AuthUser(pub Identity);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let app_state = AppState::from_ref(state);
        let token = bearer_token(&parts.headers);

        async move {
            let token = token.ok_or(AuthError::MissingToken)?;
            let identity = app_state.auth.verify(&token).await.map_err(|e| {
                tracing::warn!("Bearer auth failed: {}", e);
                e
            })?;
            Ok(AuthUser(identity))
        }
    }
}
