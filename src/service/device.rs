use std::{collections::HashSet, sync::Arc};

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{
    auth::hash::HashProvider,
    db::{DBLayer, StoreError},
    error::{ServiceError, ServiceResult},
    model::device::{
        is_valid_serial_number, Device, DeviceChanges, DeviceDetails, NewDevice, Sensor,
        SERIAL_NUMBER_MAX_LEN,
    },
};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeviceRequest {
    pub serial_number: String,
    pub model_name: String,
    #[serde(default)]
    pub sensors: Option<Vec<String>>,
    pub api_key_hash: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateDeviceRequest {
    pub serial_number: String,
    pub model_name: String,
    #[serde(default)]
    pub sensors: Option<Vec<String>>,
}

#[derive(Clone)]
pub struct DeviceService {
    db: Arc<DBLayer>,
    hasher: Arc<dyn HashProvider>,
}

impl DeviceService {
    pub fn new(db: Arc<DBLayer>, hasher: Arc<dyn HashProvider>) -> Self {
        Self { db, hasher }
    }

    pub async fn find_all(&self, with_sensors: bool) -> ServiceResult<Vec<DeviceDetails>> {
        let devices = self.db.list_devices().await?;
        self.with_details(devices, with_sensors).await
    }

    pub async fn find_by_id(&self, id: u64, with_sensors: bool) -> ServiceResult<DeviceDetails> {
        let device = self
            .db
            .load_device(id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Device not found"))?;
        self.details(device, with_sensors).await
    }

    pub async fn find_by_serial_number(
        &self,
        serial_number: &str,
        with_sensors: bool,
    ) -> ServiceResult<DeviceDetails> {
        let device = self
            .db
            .find_device_by_serial(serial_number)
            .await?
            .ok_or_else(|| ServiceError::not_found("Device not found"))?;
        self.details(device, with_sensors).await
    }

    pub async fn find_by_model_name(
        &self,
        model_name: &str,
        with_sensors: bool,
    ) -> ServiceResult<Vec<DeviceDetails>> {
        let devices = self.db.list_devices_by_model(model_name).await?;
        self.with_details(devices, with_sensors).await
    }

    pub async fn create(&self, request: CreateDeviceRequest) -> ServiceResult<DeviceDetails> {
        validate_serial("Device", &request.serial_number)?;
        validate_model_name(&request.model_name)?;
        if request.api_key_hash.trim().is_empty() {
            return Err(ServiceError::bad_request("API key hash is required."));
        }
        if let Some(sensors) = &request.sensors {
            for serial in sensors {
                validate_serial("Sensor", serial)?;
            }
        }

        let serial_number = request.serial_number;
        if self.db.device_serial_exists(&serial_number).await? {
            return Err(duplicate_device(&serial_number));
        }

        let sensors = match request.sensors {
            Some(requested) => {
                let found = self.db.find_sensors(&requested).await?;
                if let Some(missing) = missing_serial_numbers(&requested, &found) {
                    return Err(missing_sensors(&missing));
                }
                requested
            }
            None => Vec::new(),
        };

        let new = NewDevice {
            derived_id: self.hasher.hmac(&serial_number, &request.api_key_hash),
            serial_number,
            model_name: request.model_name,
            sensors,
            api_key_hash: request.api_key_hash,
            created_at: Utc::now(),
        };

        let device = self.db.insert_device(&new).await.map_err(|err| match err {
            StoreError::UniqueViolation { .. } => duplicate_device(&new.serial_number),
            StoreError::MissingSensors(missing) => missing_sensors(&missing.join(", ")),
            other => other.into(),
        })?;

        info!(
            id = device.id,
            serial_number = %device.serial_number,
            sensors = new.sensors.len(),
            "device created"
        );
        self.details(device, true).await
    }

    pub async fn update(
        &self,
        old_serial_number: &str,
        request: UpdateDeviceRequest,
    ) -> ServiceResult<DeviceDetails> {
        validate_serial("Device", &request.serial_number)?;
        validate_model_name(&request.model_name)?;
        if let Some(sensors) = &request.sensors {
            for serial in sensors {
                validate_serial("Sensor", serial)?;
            }
        }

        let existing = self
            .db
            .find_device_by_serial(old_serial_number)
            .await?
            .ok_or_else(|| {
                ServiceError::not_found(format!(
                    "Device with serial number '{old_serial_number}' does not exist."
                ))
            })?;

        let renamed = request.serial_number != old_serial_number;
        if renamed && self.db.device_serial_exists(&request.serial_number).await? {
            return Err(duplicate_device(&request.serial_number));
        }

        if let Some(requested) = &request.sensors {
            let found = self.db.find_sensors(requested).await?;
            if let Some(missing) = missing_serial_numbers(requested, &found) {
                return Err(missing_sensors(&missing));
            }
        }

        let derived_id = if renamed {
            self.db
                .load_credential(existing.id)
                .await?
                .map(|cred| self.hasher.hmac(&request.serial_number, &cred.api_key_hash))
        } else {
            None
        };

        let changes = DeviceChanges {
            serial_number: request.serial_number,
            model_name: request.model_name,
            sensors: request.sensors,
            derived_id,
        };

        let device = self
            .db
            .update_device(existing.id, &changes)
            .await
            .map_err(|err| match err {
                StoreError::UniqueViolation { .. } => duplicate_device(&changes.serial_number),
                StoreError::MissingSensors(missing) => missing_sensors(&missing.join(", ")),
                StoreError::NotFound { .. } => ServiceError::not_found(format!(
                    "Device with serial number '{old_serial_number}' does not exist."
                )),
                other => other.into(),
            })?;

        info!(id = device.id, serial_number = %device.serial_number, "device updated");
        self.details(device, true).await
    }

    /// Deleting a missing device is a no-op.
    pub async fn delete(&self, id: u64) -> ServiceResult<()> {
        if self.db.delete_device(id).await? {
            info!(id, "device deleted");
        }
        Ok(())
    }

    pub async fn delete_by_serial_number(&self, serial_number: &str) -> ServiceResult<()> {
        if self.db.delete_device_by_serial(serial_number).await? {
            info!(serial_number, "device deleted");
        }
        Ok(())
    }

    /// Resolve a device from the credential pair it presents.
    pub async fn authenticate(&self, serial_number: &str, api_key_hash: &str) -> ServiceResult<Device> {
        let derived_id = self.hasher.hmac(serial_number, api_key_hash);
        let rejected = || ServiceError::unauthorized("Invalid device credentials.");

        let Some(credential) = self.db.find_credential_by_derived_id(&derived_id).await? else {
            warn!(serial_number, "device presented unknown credentials");
            return Err(rejected());
        };
        let device = self
            .db
            .load_device(credential.device_id)
            .await?
            .ok_or_else(rejected)?;

        if device.serial_number != serial_number {
            warn!(serial_number, "derived id matched a different device");
            return Err(rejected());
        }

        debug!(id = device.id, "device authenticated");
        Ok(device)
    }

    async fn details(&self, device: Device, with_sensors: bool) -> ServiceResult<DeviceDetails> {
        let sensors = if with_sensors {
            Some(self.db.sensors_for_device(device.id).await?)
        } else {
            None
        };
        Ok(DeviceDetails { device, sensors })
    }

    async fn with_details(
        &self,
        devices: Vec<Device>,
        with_sensors: bool,
    ) -> ServiceResult<Vec<DeviceDetails>> {
        let mut out = Vec::with_capacity(devices.len());
        for device in devices {
            out.push(self.details(device, with_sensors).await?);
        }
        Ok(out)
    }
}

/// Requested serials with no matching sensor, each listed once in request
/// order and joined by `", "`. `None` when everything resolved.
fn missing_serial_numbers(requested: &[String], found: &[Sensor]) -> Option<String> {
    let found: HashSet<&str> = found.iter().map(|s| s.serial_number.as_str()).collect();
    let mut seen = HashSet::new();
    let missing: Vec<&str> = requested
        .iter()
        .map(String::as_str)
        .filter(|serial| !found.contains(serial) && seen.insert(*serial))
        .collect();

    if missing.is_empty() {
        None
    } else {
        Some(missing.join(", "))
    }
}

fn duplicate_device(serial_number: &str) -> ServiceError {
    ServiceError::conflict(format!(
        "Device with serial number '{serial_number}' already exists."
    ))
}

fn missing_sensors(serials: &str) -> ServiceError {
    ServiceError::bad_request(format!(
        "Sensors with serial numbers '{serials}' do not exist."
    ))
}

pub(crate) fn validate_serial(kind: &str, serial: &str) -> ServiceResult<()> {
    if is_valid_serial_number(serial) {
        Ok(())
    } else {
        Err(ServiceError::bad_request(format!(
            "{kind} serial number '{serial}' must be 1 to {SERIAL_NUMBER_MAX_LEN} letters or digits."
        )))
    }
}

fn validate_model_name(model_name: &str) -> ServiceResult<()> {
    if model_name.trim().is_empty() {
        Err(ServiceError::bad_request("Model name is required."))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::hash::HmacSha256Provider, db::test_db};

    fn service(db: Arc<DBLayer>) -> DeviceService {
        DeviceService::new(db, Arc::new(HmacSha256Provider))
    }

    fn create_request(serial: &str, sensors: Option<&[&str]>) -> CreateDeviceRequest {
        CreateDeviceRequest {
            serial_number: serial.to_string(),
            model_name: "ESP32".to_string(),
            sensors: sensors.map(|s| s.iter().map(|x| x.to_string()).collect()),
            api_key_hash: "api-key-hash".to_string(),
        }
    }

    fn sensor(serial: &str) -> Sensor {
        Sensor {
            serial_number: serial.to_string(),
            device_id: None,
        }
    }

    #[test]
    fn missing_serials_keep_first_occurrence_order() {
        let requested: Vec<String> = ["S3", "S1", "S2", "S3", "S4"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let found = vec![sensor("S1"), sensor("S4")];
        assert_eq!(
            missing_serial_numbers(&requested, &found).as_deref(),
            Some("S3, S2")
        );
        assert_eq!(missing_serial_numbers(&requested[1..2], &found), None);
    }

    #[tokio::test]
    async fn unknown_sensor_is_a_bad_request_naming_only_it() {
        let (_dir, db) = test_db();
        db.insert_sensor("S1").await.unwrap();
        let devices = service(db.clone());

        let err = devices
            .create(create_request("DEADBEEF1234", Some(&["S1", "S2"])))
            .await
            .unwrap_err();

        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_REQUEST);
        assert_eq!(
            err.to_string(),
            "Sensors with serial numbers 'S2' do not exist."
        );
        assert!(!db.device_serial_exists("DEADBEEF1234").await.unwrap());
    }

    #[tokio::test]
    async fn create_attaches_sensors_and_issues_credentials() {
        let (_dir, db) = test_db();
        db.insert_sensor("S1").await.unwrap();
        db.insert_sensor("S2").await.unwrap();
        let devices = service(db.clone());

        let created = devices
            .create(create_request("DEADBEEF1234", Some(&["S1", "S2"])))
            .await
            .unwrap();
        assert_eq!(created.sensors, Some(vec!["S1".to_string(), "S2".to_string()]));

        let cred = db.load_credential(created.device.id).await.unwrap().unwrap();
        assert_eq!(cred.api_key_hash, "api-key-hash");
        assert_eq!(
            cred.derived_id,
            HmacSha256Provider.hmac("DEADBEEF1234", "api-key-hash")
        );
        assert_eq!(
            db.load_sensor("S2").await.unwrap().unwrap().device_id,
            Some(created.device.id)
        );
    }

    #[tokio::test]
    async fn duplicate_serial_conflicts_without_touching_storage() {
        let (_dir, db) = test_db();
        db.insert_sensor("S1").await.unwrap();
        let devices = service(db.clone());
        devices.create(create_request("AAA", None)).await.unwrap();

        let err = devices
            .create(create_request("AAA", Some(&["S1"])))
            .await
            .unwrap_err();

        assert!(matches!(err, ServiceError::Conflict(_)));
        assert_eq!(db.list_devices().await.unwrap().len(), 1);
        assert_eq!(db.load_sensor("S1").await.unwrap().unwrap().device_id, None);
    }

    #[tokio::test]
    async fn invalid_serial_is_rejected_before_lookup() {
        let (_dir, db) = test_db();
        let err = service(db)
            .create(create_request("WAY-TOO-LONG-SERIAL", None))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::BadRequest(_)));
    }

    #[tokio::test]
    async fn find_honours_with_sensors() {
        let (_dir, db) = test_db();
        db.insert_sensor("S1").await.unwrap();
        let devices = service(db);
        devices
            .create(create_request("AAA", Some(&["S1"])))
            .await
            .unwrap();

        let lazy = devices.find_by_serial_number("AAA", false).await.unwrap();
        assert_eq!(lazy.sensors, None);
        let eager = devices.find_all(true).await.unwrap();
        assert_eq!(eager[0].sensors, Some(vec!["S1".to_string()]));

        let err = devices.find_by_id(999, false).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert!(devices.find_by_model_name("RP2040", false).await.unwrap().is_empty());
        assert_eq!(devices.find_by_model_name("ESP32", false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_checks_existence_and_conflicts() {
        let (_dir, db) = test_db();
        let devices = service(db);
        devices.create(create_request("AAA", None)).await.unwrap();
        devices.create(create_request("BBB", None)).await.unwrap();

        let rename = |serial: &str| UpdateDeviceRequest {
            serial_number: serial.to_string(),
            model_name: "ESP32".to_string(),
            sensors: None,
        };

        let err = devices.update("ZZZ", rename("ZZZ")).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        let err = devices.update("AAA", rename("BBB")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        // keeping the same serial is not a conflict with itself
        devices.update("AAA", rename("AAA")).await.unwrap();
    }

    #[tokio::test]
    async fn rename_keeps_the_device_authenticatable() {
        let (_dir, db) = test_db();
        let devices = service(db);
        devices.create(create_request("AAA", None)).await.unwrap();

        devices
            .update(
                "AAA",
                UpdateDeviceRequest {
                    serial_number: "AAB".into(),
                    model_name: "ESP32".into(),
                    sensors: None,
                },
            )
            .await
            .unwrap();

        let device = devices.authenticate("AAB", "api-key-hash").await.unwrap();
        assert_eq!(device.serial_number, "AAB");
        let err = devices.authenticate("AAA", "api-key-hash").await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));
        let err = devices.authenticate("AAB", "wrong").await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn update_replaces_the_sensor_set() {
        let (_dir, db) = test_db();
        for s in ["S1", "S2", "S3"] {
            db.insert_sensor(s).await.unwrap();
        }
        let devices = service(db.clone());
        devices
            .create(create_request("AAA", Some(&["S1", "S2"])))
            .await
            .unwrap();

        let updated = devices
            .update(
                "AAA",
                UpdateDeviceRequest {
                    serial_number: "AAA".into(),
                    model_name: "ESP32".into(),
                    sensors: Some(vec!["S2".into(), "S3".into()]),
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.sensors, Some(vec!["S2".to_string(), "S3".to_string()]));
        // detached, not deleted
        assert_eq!(db.load_sensor("S1").await.unwrap().unwrap().device_id, None);
    }

    #[tokio::test]
    async fn delete_of_unknown_device_succeeds() {
        let (_dir, db) = test_db();
        let devices = service(db);
        devices.delete(12345).await.unwrap();
        devices.delete_by_serial_number("NOPE").await.unwrap();

        devices.create(create_request("AAA", None)).await.unwrap();
        devices.delete_by_serial_number("AAA").await.unwrap();
        assert!(devices.find_all(false).await.unwrap().is_empty());
    }

    /// Registers a rival device under the same serial while `create` derives
    /// its credential, i.e. after the serial pre-check has already passed.
    struct RacingHasher {
        db: Arc<DBLayer>,
    }

    impl HashProvider for RacingHasher {
        fn hmac(&self, message: &str, key: &str) -> String {
            let rival = NewDevice {
                serial_number: message.to_string(),
                model_name: "rival".into(),
                sensors: Vec::new(),
                api_key_hash: "rival-key".into(),
                derived_id: "rival-derived".into(),
                created_at: Utc::now(),
            };
            tokio::task::block_in_place(|| {
                tokio::runtime::Handle::current().block_on(self.db.insert_device(&rival))
            })
            .unwrap();
            HmacSha256Provider.hmac(message, key)
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn serial_taken_after_the_pre_check_is_a_conflict() {
        let (_dir, db) = test_db();
        let devices = DeviceService::new(db.clone(), Arc::new(RacingHasher { db: db.clone() }));

        let err = devices.create(create_request("AAA", None)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)), "{err}");

        let all = db.list_devices().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].model_name, "rival");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_creates_of_one_serial_keep_a_single_device() {
        let (_dir, db) = test_db();
        let devices = service(db.clone());

        let spawn_create = |devices: DeviceService| {
            tokio::spawn(async move { devices.create(create_request("AAA", None)).await })
        };
        let (a, b) = tokio::join!(spawn_create(devices.clone()), spawn_create(devices.clone()));
        let results = [a.unwrap(), b.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(ServiceError::Conflict(_)))));
        assert_eq!(devices.find_all(false).await.unwrap().len(), 1);
    }
}
