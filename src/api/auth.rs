use axum::{extract::FromRequestParts, http::request::Parts};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use tracing::debug;

use crate::{
    api::AppState,
    auth::jwt::decode_jwt,
    error::ServiceError,
    model::user::User,
};

/// A request carrying a valid bearer token for a user that still exists.
pub struct AuthenticatedUser(pub User);

/// Like [`AuthenticatedUser`], but the user must have the admin role.
pub struct AdminUser(pub User);

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| ServiceError::unauthorized("Missing Authorization header"))?;

        let user_id = decode_jwt(bearer.token(), &state.jwt_secret).map_err(|err| {
            debug!(?err, "rejected bearer token");
            ServiceError::unauthorized("Invalid or expired token")
        })?;

        // tokens outlive deleted accounts
        let user = state
            .users
            .get_user_by_id(user_id)
            .await
            .map_err(|err| match err {
                ServiceError::NotFound(_) => ServiceError::unauthorized("User no longer exists"),
                other => other,
            })?;

        Ok(AuthenticatedUser(user))
    }
}

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthenticatedUser(user) = AuthenticatedUser::from_request_parts(parts, state).await?;
        if !user.role.is_admin() {
            return Err(ServiceError::Forbidden("Admin role required".into()));
        }
        Ok(AdminUser(user))
    }
}
