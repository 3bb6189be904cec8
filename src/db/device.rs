use std::collections::HashSet;

use rocksdb::WriteBatch;

use super::{DBLayer, StoreError, StoreResult};
use crate::model::device::{Device, DeviceChanges, DeviceCredential, NewDevice, Sensor};

const DEVICE: &str = "device";
const SENSOR: &str = "sensor";
const CREDENTIAL: &str = "credential";

impl DBLayer {
    fn device_serial_key(serial: &str) -> String {
        format!("device_serial:{serial}")
    }

    fn device_sensor_prefix(device_id: u64) -> String {
        format!("device_sensor:{device_id:020}:")
    }

    fn device_sensor_key(device_id: u64, sensor_serial: &str) -> String {
        format!("{}{sensor_serial}", Self::device_sensor_prefix(device_id))
    }

    fn sensor_key(serial: &str) -> String {
        format!("{SENSOR}:{serial}")
    }

    fn credential_derived_key(derived_id: &str) -> String {
        format!("credential_derived:{derived_id}")
    }

    pub(super) fn device_user_prefix(device_id: u64) -> String {
        format!("device_user:{device_id:020}:")
    }

    // ============================================================
    // DEVICE READS
    // ============================================================
    pub async fn load_device(&self, id: u64) -> StoreResult<Option<Device>> {
        self.get_json(&Self::id_key(DEVICE, id))
    }

    pub async fn find_device_by_serial(&self, serial: &str) -> StoreResult<Option<Device>> {
        match self.get_id(&Self::device_serial_key(serial))? {
            Some(id) => self.load_device(id).await,
            None => Ok(None),
        }
    }

    pub async fn device_serial_exists(&self, serial: &str) -> StoreResult<bool> {
        self.exists(&Self::device_serial_key(serial))
    }

    pub async fn list_devices(&self) -> StoreResult<Vec<Device>> {
        self.scan_json(&format!("{DEVICE}:"))
    }

    pub async fn list_devices_by_model(&self, model_name: &str) -> StoreResult<Vec<Device>> {
        let devices = self.list_devices().await?;
        Ok(devices
            .into_iter()
            .filter(|d| d.model_name == model_name)
            .collect())
    }

    /// Serial numbers of the sensors attached to a device, sorted.
    pub async fn sensors_for_device(&self, device_id: u64) -> StoreResult<Vec<String>> {
        self.scan_suffixes(&Self::device_sensor_prefix(device_id))
    }

    pub async fn load_credential(&self, device_id: u64) -> StoreResult<Option<DeviceCredential>> {
        self.get_json(&Self::id_key(CREDENTIAL, device_id))
    }

    pub async fn find_credential_by_derived_id(
        &self,
        derived_id: &str,
    ) -> StoreResult<Option<DeviceCredential>> {
        match self.get_id(&Self::credential_derived_key(derived_id))? {
            Some(device_id) => self.load_credential(device_id).await,
            None => Ok(None),
        }
    }

    // ============================================================
    // SENSOR READS
    // ============================================================
    pub async fn load_sensor(&self, serial: &str) -> StoreResult<Option<Sensor>> {
        self.get_json(&Self::sensor_key(serial))
    }

    pub async fn list_sensors(&self) -> StoreResult<Vec<Sensor>> {
        self.scan_json(&format!("{SENSOR}:"))
    }

    /// The subset of `serials` that exist, in request order.
    pub async fn find_sensors(&self, serials: &[String]) -> StoreResult<Vec<Sensor>> {
        let mut found = Vec::new();
        let mut seen = HashSet::new();
        for serial in serials {
            if !seen.insert(serial.as_str()) {
                continue;
            }
            if let Some(sensor) = self.load_sensor(serial).await? {
                found.push(sensor);
            }
        }
        Ok(found)
    }

    // ============================================================
    // DEVICE WRITES
    // ============================================================
    pub async fn insert_device(&self, new: &NewDevice) -> StoreResult<Device> {
        let _guard = self.write_lock.lock().await;

        if self.exists(&Self::device_serial_key(&new.serial_number))? {
            return Err(StoreError::UniqueViolation {
                index: "device_serial",
                value: new.serial_number.clone(),
            });
        }
        if self.exists(&Self::credential_derived_key(&new.derived_id))? {
            return Err(StoreError::UniqueViolation {
                index: "credential_derived",
                value: new.derived_id.clone(),
            });
        }
        self.ensure_sensors_exist(&new.sensors)?;

        let mut batch = WriteBatch::default();
        let id = self.next_id(&mut batch, DEVICE)?;
        let device = Device {
            id,
            serial_number: new.serial_number.clone(),
            model_name: new.model_name.clone(),
        };
        Self::put_json(&mut batch, &Self::id_key(DEVICE, id), &device)?;
        Self::put_id(&mut batch, &Self::device_serial_key(&device.serial_number), id);

        self.attach_sensors(&mut batch, id, &new.sensors)?;

        let credential = DeviceCredential {
            device_id: id,
            api_key_hash: new.api_key_hash.clone(),
            derived_id: new.derived_id.clone(),
            created_at: new.created_at,
        };
        Self::put_json(&mut batch, &Self::id_key(CREDENTIAL, id), &credential)?;
        Self::put_id(&mut batch, &Self::credential_derived_key(&credential.derived_id), id);

        self.db.write(batch)?;
        Ok(device)
    }

    pub async fn update_device(&self, id: u64, changes: &DeviceChanges) -> StoreResult<Device> {
        let _guard = self.write_lock.lock().await;

        let mut device: Device = self
            .get_json(&Self::id_key(DEVICE, id))?
            .ok_or_else(|| StoreError::NotFound {
                entity: "device",
                key: id.to_string(),
            })?;

        let mut batch = WriteBatch::default();

        if changes.serial_number != device.serial_number {
            let new_key = Self::device_serial_key(&changes.serial_number);
            if matches!(self.get_id(&new_key)?, Some(other) if other != id) {
                return Err(StoreError::UniqueViolation {
                    index: "device_serial",
                    value: changes.serial_number.clone(),
                });
            }
            batch.delete(Self::device_serial_key(&device.serial_number));
            Self::put_id(&mut batch, &new_key, id);
        }

        if let Some(sensors) = &changes.sensors {
            self.ensure_sensors_exist(sensors)?;
            let keep: HashSet<&str> = sensors.iter().map(String::as_str).collect();
            for serial in self.scan_suffixes(&Self::device_sensor_prefix(id))? {
                if keep.contains(serial.as_str()) {
                    continue;
                }
                if let Some(mut sensor) = self.get_json::<Sensor>(&Self::sensor_key(&serial))? {
                    sensor.device_id = None;
                    Self::put_json(&mut batch, &Self::sensor_key(&serial), &sensor)?;
                }
                batch.delete(Self::device_sensor_key(id, &serial));
            }
            self.attach_sensors(&mut batch, id, sensors)?;
        }

        if let Some(derived_id) = &changes.derived_id {
            let cred_key = Self::id_key(CREDENTIAL, id);
            if let Some(mut credential) = self.get_json::<DeviceCredential>(&cred_key)? {
                let new_key = Self::credential_derived_key(derived_id);
                if matches!(self.get_id(&new_key)?, Some(other) if other != id) {
                    return Err(StoreError::UniqueViolation {
                        index: "credential_derived",
                        value: derived_id.clone(),
                    });
                }
                batch.delete(Self::credential_derived_key(&credential.derived_id));
                credential.derived_id = derived_id.clone();
                Self::put_json(&mut batch, &cred_key, &credential)?;
                Self::put_id(&mut batch, &new_key, id);
            }
        }

        device.serial_number = changes.serial_number.clone();
        device.model_name = changes.model_name.clone();
        Self::put_json(&mut batch, &Self::id_key(DEVICE, id), &device)?;

        self.db.write(batch)?;
        Ok(device)
    }

    /// Removes the device with its sensors, credential and assignments.
    /// Returns `false` when there was nothing to delete.
    pub async fn delete_device(&self, id: u64) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        self.delete_device_locked(id)
    }

    pub async fn delete_device_by_serial(&self, serial: &str) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        match self.get_id(&Self::device_serial_key(serial))? {
            Some(id) => self.delete_device_locked(id),
            None => Ok(false),
        }
    }

    fn delete_device_locked(&self, id: u64) -> StoreResult<bool> {
        let Some(device) = self.get_json::<Device>(&Self::id_key(DEVICE, id))? else {
            return Ok(false);
        };

        let mut batch = WriteBatch::default();
        batch.delete(Self::id_key(DEVICE, id));
        batch.delete(Self::device_serial_key(&device.serial_number));

        for serial in self.scan_suffixes(&Self::device_sensor_prefix(id))? {
            batch.delete(Self::sensor_key(&serial));
            batch.delete(Self::device_sensor_key(id, &serial));
        }

        let cred_key = Self::id_key(CREDENTIAL, id);
        if let Some(credential) = self.get_json::<DeviceCredential>(&cred_key)? {
            batch.delete(Self::credential_derived_key(&credential.derived_id));
            batch.delete(cred_key);
        }

        for user_id in self.scan_suffixes(&Self::device_user_prefix(id))? {
            if let Ok(user_id) = user_id.parse::<u64>() {
                batch.delete(Self::user_device_key(user_id, id));
            }
            batch.delete(format!("{}{user_id}", Self::device_user_prefix(id)));
        }

        self.db.write(batch)?;
        Ok(true)
    }

    // ============================================================
    // SENSOR WRITES
    // ============================================================
    pub async fn insert_sensor(&self, serial: &str) -> StoreResult<Sensor> {
        let _guard = self.write_lock.lock().await;

        let key = Self::sensor_key(serial);
        if self.exists(&key)? {
            return Err(StoreError::UniqueViolation {
                index: "sensor",
                value: serial.to_string(),
            });
        }

        let sensor = Sensor {
            serial_number: serial.to_string(),
            device_id: None,
        };
        let mut batch = WriteBatch::default();
        Self::put_json(&mut batch, &key, &sensor)?;
        self.db.write(batch)?;
        Ok(sensor)
    }

    pub async fn delete_sensor(&self, serial: &str) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;

        let key = Self::sensor_key(serial);
        let Some(sensor) = self.get_json::<Sensor>(&key)? else {
            return Ok(false);
        };

        let mut batch = WriteBatch::default();
        batch.delete(&key);
        if let Some(device_id) = sensor.device_id {
            batch.delete(Self::device_sensor_key(device_id, serial));
        }
        self.db.write(batch)?;
        Ok(true)
    }

    // ============================================================
    // HELPERS (write lock held)
    // ============================================================
    fn ensure_sensors_exist(&self, serials: &[String]) -> StoreResult<()> {
        let mut missing = Vec::new();
        for serial in serials {
            if !self.exists(&Self::sensor_key(serial))? && !missing.contains(serial) {
                missing.push(serial.clone());
            }
        }
        if missing.is_empty() {
            Ok(())
        } else {
            Err(StoreError::MissingSensors(missing))
        }
    }

    /// Point every sensor in `serials` at `device_id`, moving it off any
    /// other device so both sides of the relation stay in sync.
    fn attach_sensors(
        &self,
        batch: &mut WriteBatch,
        device_id: u64,
        serials: &[String],
    ) -> StoreResult<()> {
        let mut seen = HashSet::new();
        for serial in serials {
            if !seen.insert(serial.as_str()) {
                continue;
            }
            let key = Self::sensor_key(serial);
            let mut sensor: Sensor = self
                .get_json(&key)?
                .ok_or_else(|| StoreError::MissingSensors(vec![serial.clone()]))?;

            if let Some(previous) = sensor.device_id {
                if previous != device_id {
                    batch.delete(Self::device_sensor_key(previous, serial));
                }
            }
            sensor.device_id = Some(device_id);
            Self::put_json(batch, &key, &sensor)?;
            batch.put(Self::device_sensor_key(device_id, serial), b"");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::db::{test_db, StoreError};
    use crate::model::device::{DeviceChanges, NewDevice};

    fn new_device(serial: &str, sensors: &[&str]) -> NewDevice {
        NewDevice {
            serial_number: serial.to_string(),
            model_name: "ESP32".to_string(),
            sensors: sensors.iter().map(|s| s.to_string()).collect(),
            api_key_hash: "key-hash".to_string(),
            derived_id: format!("derived-{serial}"),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_serial_is_a_unique_violation() {
        let (_dir, db) = test_db();
        db.insert_device(&new_device("AAA", &[])).await.unwrap();

        let mut dup = new_device("AAA", &[]);
        dup.derived_id = "other".into();
        let err = db.insert_device(&dup).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::UniqueViolation { index: "device_serial", .. }
        ));
        assert_eq!(db.list_devices().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ids_are_allocated_in_order() {
        let (_dir, db) = test_db();
        let a = db.insert_device(&new_device("AAA", &[])).await.unwrap();
        let b = db.insert_device(&new_device("BBB", &[])).await.unwrap();
        assert_eq!(a.id + 1, b.id);

        let listed: Vec<_> = db
            .list_devices()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.serial_number)
            .collect();
        assert_eq!(listed, vec!["AAA", "BBB"]);
    }

    #[tokio::test]
    async fn attaching_a_sensor_moves_it_between_devices() {
        let (_dir, db) = test_db();
        db.insert_sensor("S1").await.unwrap();

        let first = db.insert_device(&new_device("AAA", &["S1"])).await.unwrap();
        let second = db.insert_device(&new_device("BBB", &["S1"])).await.unwrap();

        assert!(db.sensors_for_device(first.id).await.unwrap().is_empty());
        assert_eq!(db.sensors_for_device(second.id).await.unwrap(), vec!["S1"]);
        let sensor = db.load_sensor("S1").await.unwrap().unwrap();
        assert_eq!(sensor.device_id, Some(second.id));
    }

    #[tokio::test]
    async fn missing_sensor_aborts_the_insert() {
        let (_dir, db) = test_db();
        db.insert_sensor("S1").await.unwrap();

        let err = db
            .insert_device(&new_device("AAA", &["S1", "S2", "S2"]))
            .await
            .unwrap_err();
        match err {
            StoreError::MissingSensors(missing) => assert_eq!(missing, vec!["S2"]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!db.device_serial_exists("AAA").await.unwrap());
        assert_eq!(db.load_sensor("S1").await.unwrap().unwrap().device_id, None);
    }

    #[tokio::test]
    async fn update_detaches_sensors_left_out() {
        let (_dir, db) = test_db();
        db.insert_sensor("S1").await.unwrap();
        db.insert_sensor("S2").await.unwrap();
        let device = db.insert_device(&new_device("AAA", &["S1", "S2"])).await.unwrap();

        let changes = DeviceChanges {
            serial_number: "AAB".into(),
            model_name: "ESP32-S3".into(),
            sensors: Some(vec!["S2".into()]),
            derived_id: Some("derived-AAB".into()),
        };
        let updated = db.update_device(device.id, &changes).await.unwrap();

        assert_eq!(updated.serial_number, "AAB");
        assert!(!db.device_serial_exists("AAA").await.unwrap());
        assert!(db.device_serial_exists("AAB").await.unwrap());
        assert_eq!(db.sensors_for_device(device.id).await.unwrap(), vec!["S2"]);
        assert_eq!(db.load_sensor("S1").await.unwrap().unwrap().device_id, None);

        assert!(db.find_credential_by_derived_id("derived-AAA").await.unwrap().is_none());
        let cred = db.find_credential_by_derived_id("derived-AAB").await.unwrap().unwrap();
        assert_eq!(cred.device_id, device.id);
    }

    #[tokio::test]
    async fn delete_cascades_to_sensors_and_credential() {
        let (_dir, db) = test_db();
        db.insert_sensor("S1").await.unwrap();
        let device = db.insert_device(&new_device("AAA", &["S1"])).await.unwrap();

        assert!(db.delete_device(device.id).await.unwrap());
        assert!(db.load_sensor("S1").await.unwrap().is_none());
        assert!(db.load_credential(device.id).await.unwrap().is_none());
        assert!(db.find_credential_by_derived_id("derived-AAA").await.unwrap().is_none());
        assert!(!db.device_serial_exists("AAA").await.unwrap());

        assert!(!db.delete_device(device.id).await.unwrap());
    }

    #[tokio::test]
    async fn deleting_a_sensor_clears_the_membership_index() {
        let (_dir, db) = test_db();
        db.insert_sensor("S1").await.unwrap();
        let device = db.insert_device(&new_device("AAA", &["S1"])).await.unwrap();

        assert!(db.delete_sensor("S1").await.unwrap());
        assert!(db.sensors_for_device(device.id).await.unwrap().is_empty());
        assert!(!db.delete_sensor("S1").await.unwrap());
    }
}
