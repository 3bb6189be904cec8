use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};

use crate::{
    api::{
        auth::{AdminUser, AuthenticatedUser},
        extract::{ApiJson, ApiPath},
        types::{ChangePasswordRequest, NewPasswordRequest, ResetPasswordRequest},
        AppState,
    },
    error::ServiceError,
    model::{
        user::UserView,
        user_device::{AssignedDevice, UserDevice},
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/user/all", get(list_users))
        .route("/user/me", get(me))
        .route("/user/me/change-password", put(change_password))
        .route("/user/me/devices", get(my_devices))
        .route(
            "/user/me/devices/{serial_number}",
            post(assign_device).delete(unassign_device),
        )
        .route("/user/password-reset-request", post(request_password_reset))
        .route("/user/change-password-token", put(change_password_via_token))
        .route("/user/by-email/{email}", get(get_user_by_email))
        .route(
            "/user/by-username/{username}",
            get(get_user).delete(delete_user),
        )
}

pub async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<Vec<UserView>>, ServiceError> {
    let users = state.users.find_all().await?;
    Ok(Json(users.iter().map(UserView::from).collect()))
}

pub async fn me(AuthenticatedUser(user): AuthenticatedUser) -> Json<UserView> {
    Json(UserView::from(&user))
}

pub async fn get_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiPath(username): ApiPath<String>,
) -> Result<Json<UserView>, ServiceError> {
    let user = state.users.get_user_by_username(&username).await?;
    Ok(Json(UserView::from(&user)))
}

pub async fn get_user_by_email(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiPath(email): ApiPath<String>,
) -> Result<Json<UserView>, ServiceError> {
    let user = state.users.get_user_by_email(&email).await?;
    Ok(Json(UserView::from(&user)))
}

pub async fn delete_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiPath(username): ApiPath<String>,
) -> Result<StatusCode, ServiceError> {
    state.users.delete_user(&username).await?;
    Ok(StatusCode::OK)
}

// We don't respond with 404 for unknown usernames, so callers can't tell
// which accounts exist.
pub async fn request_password_reset(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ResetPasswordRequest>,
) -> Result<StatusCode, ServiceError> {
    if req.username.trim().is_empty() {
        return Err(ServiceError::bad_request("Username is required."));
    }
    state.users.request_password_reset(&req.username).await?;
    Ok(StatusCode::OK)
}

pub async fn change_password_via_token(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<NewPasswordRequest>,
) -> Result<StatusCode, ServiceError> {
    if req.token.trim().is_empty() {
        return Err(ServiceError::bad_request("Token is required."));
    }
    state.users.reset_password(&req.token, &req.password).await?;
    Ok(StatusCode::OK)
}

pub async fn change_password(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiJson(req): ApiJson<ChangePasswordRequest>,
) -> Result<StatusCode, ServiceError> {
    state
        .users
        .change_password(&user.username, &req.old_password, &req.new_password)
        .await?;
    Ok(StatusCode::OK)
}

pub async fn my_devices(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> Result<Json<Vec<AssignedDevice>>, ServiceError> {
    Ok(Json(state.user_devices.find_all_for_user(&user).await?))
}

pub async fn assign_device(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiPath(serial_number): ApiPath<String>,
) -> Result<Json<UserDevice>, ServiceError> {
    let link = state
        .user_devices
        .assign_device_to_user(&serial_number, &user)
        .await?;
    Ok(Json(link))
}

pub async fn unassign_device(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiPath(serial_number): ApiPath<String>,
) -> Result<StatusCode, ServiceError> {
    state
        .user_devices
        .unassign_device_from_user(&serial_number, &user)
        .await?;
    Ok(StatusCode::OK)
}
