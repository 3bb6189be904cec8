use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::{
    api::{
        auth::{AdminUser, AuthenticatedUser},
        extract::{ApiJson, ApiPath, ApiQuery},
        types::{DeviceAuthRequest, DeviceQuery, WithSensorsQuery},
        AppState,
    },
    error::ServiceError,
    model::device::{Device, DeviceDetails},
    service::device::{CreateDeviceRequest, UpdateDeviceRequest},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/device", get(list_devices).post(create_device))
        .route("/device/authenticate", post(authenticate_device))
        .route("/device/id/{id}", get(get_device_by_id).delete(delete_device_by_id))
        .route(
            "/device/{serial_number}",
            get(get_device)
                .put(update_device)
                .delete(delete_device),
        )
}

/// `GET /device?withSensors=&modelName=`
pub async fn list_devices(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiQuery(query): ApiQuery<DeviceQuery>,
) -> Result<Json<Vec<DeviceDetails>>, ServiceError> {
    let devices = match query.model_name.as_deref() {
        Some(model_name) => {
            state
                .devices
                .find_by_model_name(model_name, query.with_sensors)
                .await?
        }
        None => state.devices.find_all(query.with_sensors).await?,
    };
    Ok(Json(devices))
}

pub async fn get_device(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiPath(serial_number): ApiPath<String>,
    ApiQuery(query): ApiQuery<WithSensorsQuery>,
) -> Result<Json<DeviceDetails>, ServiceError> {
    let device = state
        .devices
        .find_by_serial_number(&serial_number, query.with_sensors)
        .await?;
    Ok(Json(device))
}

pub async fn get_device_by_id(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiPath(id): ApiPath<u64>,
    ApiQuery(query): ApiQuery<WithSensorsQuery>,
) -> Result<Json<DeviceDetails>, ServiceError> {
    let device = state.devices.find_by_id(id, query.with_sensors).await?;
    Ok(Json(device))
}

pub async fn create_device(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiJson(req): ApiJson<CreateDeviceRequest>,
) -> Result<Json<DeviceDetails>, ServiceError> {
    Ok(Json(state.devices.create(req).await?))
}

pub async fn update_device(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiPath(serial_number): ApiPath<String>,
    ApiJson(req): ApiJson<UpdateDeviceRequest>,
) -> Result<Json<DeviceDetails>, ServiceError> {
    Ok(Json(state.devices.update(&serial_number, req).await?))
}

pub async fn delete_device(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiPath(serial_number): ApiPath<String>,
) -> Result<StatusCode, ServiceError> {
    state.devices.delete_by_serial_number(&serial_number).await?;
    Ok(StatusCode::OK)
}

pub async fn delete_device_by_id(
    State(state): State<AppState>,
    _admin: AdminUser,
    ApiPath(id): ApiPath<u64>,
) -> Result<StatusCode, ServiceError> {
    state.devices.delete(id).await?;
    Ok(StatusCode::OK)
}

/// Open endpoint: a device proves itself with its serial number and API key hash.
pub async fn authenticate_device(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<DeviceAuthRequest>,
) -> Result<Json<Device>, ServiceError> {
    let device = state
        .devices
        .authenticate(&req.serial_number, &req.api_key_hash)
        .await?;
    Ok(Json(device))
}
