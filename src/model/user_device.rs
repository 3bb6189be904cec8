use serde::{Deserialize, Serialize};

use crate::model::device::Device;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDevice {
    pub id: String,     // UUID
    pub user_id: u64,   // FK → User.id
    pub device_id: u64, // FK → Device.id
    pub created_ts: i64,
}

/// A join record together with the device it points at.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignedDevice {
    pub id: String,
    pub created_ts: i64,
    pub device: Device,
}
