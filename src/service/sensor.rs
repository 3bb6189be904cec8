use std::sync::Arc;

use tracing::info;

use crate::{
    db::{DBLayer, StoreError},
    error::{ServiceError, ServiceResult},
    model::device::Sensor,
    service::device::validate_serial,
};

#[derive(Clone)]
pub struct SensorService {
    db: Arc<DBLayer>,
}

impl SensorService {
    pub fn new(db: Arc<DBLayer>) -> Self {
        Self { db }
    }

    pub async fn find_all(&self) -> ServiceResult<Vec<Sensor>> {
        Ok(self.db.list_sensors().await?)
    }

    pub async fn find_by_serial_number(&self, serial_number: &str) -> ServiceResult<Sensor> {
        self.db
            .load_sensor(serial_number)
            .await?
            .ok_or_else(|| ServiceError::not_found("Sensor not found"))
    }

    pub async fn create(&self, serial_number: &str) -> ServiceResult<Sensor> {
        validate_serial("Sensor", serial_number)?;

        let sensor = self
            .db
            .insert_sensor(serial_number)
            .await
            .map_err(|err| match err {
                StoreError::UniqueViolation { .. } => ServiceError::conflict(format!(
                    "Sensor with serial number '{serial_number}' already exists."
                )),
                other => other.into(),
            })?;

        info!(serial_number, "sensor created");
        Ok(sensor)
    }

    pub async fn delete(&self, serial_number: &str) -> ServiceResult<()> {
        if self.db.delete_sensor(serial_number).await? {
            info!(serial_number, "sensor deleted");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db;

    #[tokio::test]
    async fn create_find_delete() {
        let (_dir, db) = test_db();
        let sensors = SensorService::new(db);

        let created = sensors.create("S1").await.unwrap();
        assert_eq!(created.device_id, None);
        assert_eq!(sensors.find_by_serial_number("S1").await.unwrap(), created);

        let err = sensors.create("S1").await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        sensors.delete("S1").await.unwrap();
        sensors.delete("S1").await.unwrap();
        let err = sensors.find_by_serial_number("S1").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn rejects_malformed_serials() {
        let (_dir, db) = test_db();
        let err = SensorService::new(db).create("bad serial").await.unwrap_err();
        assert!(matches!(err, ServiceError::BadRequest(_)));
    }
}
