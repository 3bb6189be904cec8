use axum::{extract::State, Json};
use tracing::info;

use crate::{
    api::{extract::ApiJson, AppState},
    auth::{jwt::make_jwt, types::*},
    error::ServiceError,
    model::user::{NewUser, User, UserRole, UserView},
};

pub async fn register_handler(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> Result<Json<AuthResponse>, ServiceError> {
    let user = state
        .users
        .save(NewUser {
            username: req.username,
            email: req.email,
            password: req.password,
            role: UserRole::User,
        })
        .await?;

    respond_with_token(&state, &user).map(Json)
}

pub async fn login_handler(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> Result<Json<AuthResponse>, ServiceError> {
    let user = state
        .users
        .authenticate(&req.username, &req.password)
        .await?;

    info!(user_id = user.id, "user logged in");
    respond_with_token(&state, &user).map(Json)
}

fn respond_with_token(state: &AppState, user: &User) -> Result<AuthResponse, ServiceError> {
    let token = make_jwt(user.id, &state.jwt_secret, state.jwt_ttl_secs)?;
    Ok(AuthResponse {
        token,
        user: UserView::from(user),
    })
}
