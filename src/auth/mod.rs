pub mod handlers;
pub mod hash;
pub mod jwt;
pub mod types;
pub mod utils;

use axum::{routing::post, Router};

use crate::{
    api::AppState,
    auth::handlers::{login_handler, register_handler},
};

/// Open auth routes: account registration and username/password login.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register_handler))
        .route("/auth/login", post(login_handler))
}
