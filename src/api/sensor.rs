use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};

use crate::{
    api::{
        auth::{AdminUser, AuthenticatedUser},
        extract::{ApiJson, ApiPath},
        types::CreateSensorRequest,
        AppState,
    },
    error::ServiceError,
    model::device::Sensor,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sensor", get(list_sensors).post(create_sensor))
        .route("/sensor/{serial_number}", get(get_sensor).delete(delete_sensor))
}

pub async fn list_sensors(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
) -> Result<Json<Vec<Sensor>>, ServiceError> {
    Ok(Json(state.sensors.find_all().await?))
}

pub async fn get_sensor(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiPath(serial_number): ApiPath<String>,
) -> Result<Json<Sensor>, ServiceError> {
    Ok(Json(state.sensors.find_by_serial_number(&serial_number).await?))
}

pub async fn create_sensor(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiJson(req): ApiJson<CreateSensorRequest>,
) -> Result<Json<Sensor>, ServiceError> {
    Ok(Json(state.sensors.create(&req.serial_number).await?))
}

pub async fn delete_sensor(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiPath(serial_number): ApiPath<String>,
) -> Result<StatusCode, ServiceError> {
    state.sensors.delete(&serial_number).await?;
    Ok(StatusCode::OK)
}
