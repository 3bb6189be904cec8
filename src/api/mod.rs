use std::sync::Arc;

use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod auth;
pub mod device;
pub mod extract;
pub mod sensor;
pub mod types;
pub mod user;

use crate::{
    auth::hash::HmacSha256Provider,
    config::AppConfig,
    db::DBLayer,
    service::{user::ResetNotifier, DeviceService, SensorService, UserDeviceService, UserService},
};

#[derive(Clone)]
pub struct AppState {
    pub users: UserService,
    pub devices: DeviceService,
    pub sensors: SensorService,
    pub user_devices: UserDeviceService,
    pub jwt_secret: String,
    pub jwt_ttl_secs: i64,
}

impl AppState {
    pub fn new(db: Arc<DBLayer>, config: &AppConfig, notifier: Arc<dyn ResetNotifier>) -> Self {
        Self {
            users: UserService::new(db.clone(), notifier, config.reset_token_ttl_secs),
            devices: DeviceService::new(db.clone(), Arc::new(HmacSha256Provider)),
            sensors: SensorService::new(db.clone()),
            user_devices: UserDeviceService::new(db),
            jwt_secret: config.jwt_secret.clone(),
            jwt_ttl_secs: config.jwt_ttl_secs,
        }
    }
}

/// Every route of the service with shared layers and state attached.
pub fn app(state: AppState) -> Router {
    Router::new()
        // /auth/register, /auth/login
        .merge(crate::auth::router())
        // accounts, password flows, device assignment
        .merge(user::router())
        .merge(device::router())
        .merge(sensor::router())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}
