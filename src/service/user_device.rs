use std::sync::Arc;

use tracing::info;

use crate::{
    db::{DBLayer, StoreError},
    error::{ServiceError, ServiceResult},
    model::{
        device::Device,
        user::User,
        user_device::{AssignedDevice, UserDevice},
    },
};

#[derive(Clone)]
pub struct UserDeviceService {
    db: Arc<DBLayer>,
}

impl UserDeviceService {
    pub fn new(db: Arc<DBLayer>) -> Self {
        Self { db }
    }

    /// Join records of `user`, each with the device it references.
    pub async fn find_all_for_user(&self, user: &User) -> ServiceResult<Vec<AssignedDevice>> {
        let links = self.db.list_devices_for_user(user.id).await?;
        let mut out = Vec::with_capacity(links.len());
        for link in links {
            // a dangling link can only come from a torn write; skip it
            if let Some(device) = self.db.load_device(link.device_id).await? {
                out.push(AssignedDevice {
                    id: link.id,
                    created_ts: link.created_ts,
                    device,
                });
            }
        }
        Ok(out)
    }

    pub async fn assign_device_to_user(
        &self,
        serial_number: &str,
        user: &User,
    ) -> ServiceResult<UserDevice> {
        let device = self.require_device(serial_number).await?;

        if self.db.user_device_exists(user.id, device.id).await? {
            return Err(already_assigned(serial_number));
        }

        let link = self
            .db
            .add_device_for_user(user.id, device.id)
            .await
            .map_err(|err| match err {
                StoreError::UniqueViolation { .. } => already_assigned(serial_number),
                StoreError::NotFound { .. } => device_missing(serial_number),
                other => other.into(),
            })?;

        info!(user_id = user.id, serial_number, "device assigned to user");
        Ok(link)
    }

    pub async fn unassign_device_from_user(
        &self,
        serial_number: &str,
        user: &User,
    ) -> ServiceResult<()> {
        let device = self.require_device(serial_number).await?;

        if !self.db.remove_device_for_user(user.id, device.id).await? {
            return Err(ServiceError::not_found(format!(
                "Device with serial number {serial_number} is not assigned to the user."
            )));
        }

        info!(user_id = user.id, serial_number, "device unassigned from user");
        Ok(())
    }

    async fn require_device(&self, serial_number: &str) -> ServiceResult<Device> {
        self.db
            .find_device_by_serial(serial_number)
            .await?
            .ok_or_else(|| device_missing(serial_number))
    }
}

fn device_missing(serial_number: &str) -> ServiceError {
    ServiceError::not_found(format!(
        "Device with serial number {serial_number} does not exist."
    ))
}

fn already_assigned(serial_number: &str) -> ServiceError {
    ServiceError::conflict(format!(
        "Device with serial number {serial_number} is already assigned to the user."
    ))
}
