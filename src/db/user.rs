use rocksdb::WriteBatch;

use super::{DBLayer, StoreError, StoreResult};
use crate::model::{
    user::{PasswordResetToken, User, UserRole},
    user_device::UserDevice,
};

const USER: &str = "user";
const DEVICE: &str = "device";

impl DBLayer {
    fn username_key(username: &str) -> String {
        format!("user_username:{username}")
    }

    fn email_key(email: &str) -> String {
        format!("user_email:{email}")
    }

    fn user_device_prefix(user_id: u64) -> String {
        format!("user_device:{user_id:020}:")
    }

    pub(super) fn user_device_key(user_id: u64, device_id: u64) -> String {
        format!("{}{device_id:020}", Self::user_device_prefix(user_id))
    }

    fn device_user_key(device_id: u64, user_id: u64) -> String {
        format!("{}{user_id:020}", Self::device_user_prefix(device_id))
    }

    fn reset_token_key(token_hash: &str) -> String {
        format!("reset_token:{token_hash}")
    }

    // ============================================================
    // USER STORAGE
    // ============================================================
    pub async fn load_user(&self, id: u64) -> StoreResult<Option<User>> {
        self.get_json(&Self::id_key(USER, id))
    }

    pub async fn find_user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        match self.get_id(&Self::username_key(username))? {
            Some(id) => self.load_user(id).await,
            None => Ok(None),
        }
    }

    pub async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        match self.get_id(&Self::email_key(email))? {
            Some(id) => self.load_user(id).await,
            None => Ok(None),
        }
    }

    pub async fn user_exists_by_username_or_email(
        &self,
        username: &str,
        email: &str,
    ) -> StoreResult<bool> {
        Ok(self.exists(&Self::username_key(username))? || self.exists(&Self::email_key(email))?)
    }

    pub async fn list_users(&self) -> StoreResult<Vec<User>> {
        self.scan_json(&format!("{USER}:"))
    }

    pub async fn insert_user(
        &self,
        username: &str,
        email: &str,
        password_hash: String,
        role: UserRole,
    ) -> StoreResult<User> {
        let _guard = self.write_lock.lock().await;

        if self.exists(&Self::username_key(username))? {
            return Err(StoreError::UniqueViolation {
                index: "user_username",
                value: username.to_string(),
            });
        }
        if self.exists(&Self::email_key(email))? {
            return Err(StoreError::UniqueViolation {
                index: "user_email",
                value: email.to_string(),
            });
        }

        let mut batch = WriteBatch::default();
        let id = self.next_id(&mut batch, USER)?;
        let user = User {
            id,
            username: username.to_string(),
            email: email.to_string(),
            password_hash,
            role,
            created_ts: chrono::Utc::now().timestamp(),
        };
        Self::put_json(&mut batch, &Self::id_key(USER, id), &user)?;
        Self::put_id(&mut batch, &Self::username_key(username), id);
        Self::put_id(&mut batch, &Self::email_key(email), id);

        self.db.write(batch)?;
        Ok(user)
    }

    pub async fn update_password(&self, user_id: u64, password_hash: String) -> StoreResult<User> {
        let _guard = self.write_lock.lock().await;

        let key = Self::id_key(USER, user_id);
        let mut user: User = self.get_json(&key)?.ok_or_else(|| StoreError::NotFound {
            entity: "user",
            key: user_id.to_string(),
        })?;
        user.password_hash = password_hash;

        let mut batch = WriteBatch::default();
        Self::put_json(&mut batch, &key, &user)?;
        self.db.write(batch)?;
        Ok(user)
    }

    /// Removes the user and every device assignment it holds.
    pub async fn delete_user(&self, username: &str) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;

        let Some(id) = self.get_id(&Self::username_key(username))? else {
            return Ok(false);
        };

        let mut batch = WriteBatch::default();
        if let Some(user) = self.get_json::<User>(&Self::id_key(USER, id))? {
            batch.delete(Self::email_key(&user.email));
        }
        batch.delete(Self::id_key(USER, id));
        batch.delete(Self::username_key(username));

        for link in self.scan_json::<UserDevice>(&Self::user_device_prefix(id))? {
            batch.delete(Self::user_device_key(id, link.device_id));
            batch.delete(Self::device_user_key(link.device_id, id));
        }

        self.db.write(batch)?;
        Ok(true)
    }

    // ============================================================
    // USER ↔ DEVICE
    // ============================================================
    pub async fn list_devices_for_user(&self, user_id: u64) -> StoreResult<Vec<UserDevice>> {
        self.scan_json(&Self::user_device_prefix(user_id))
    }

    pub async fn user_device_exists(&self, user_id: u64, device_id: u64) -> StoreResult<bool> {
        self.exists(&Self::user_device_key(user_id, device_id))
    }

    pub async fn add_device_for_user(&self, user_id: u64, device_id: u64) -> StoreResult<UserDevice> {
        let _guard = self.write_lock.lock().await;

        if !self.exists(&Self::id_key(USER, user_id))? {
            return Err(StoreError::NotFound {
                entity: "user",
                key: user_id.to_string(),
            });
        }
        if !self.exists(&Self::id_key(DEVICE, device_id))? {
            return Err(StoreError::NotFound {
                entity: "device",
                key: device_id.to_string(),
            });
        }

        let key = Self::user_device_key(user_id, device_id);
        if self.exists(&key)? {
            return Err(StoreError::UniqueViolation {
                index: "user_device",
                value: format!("{user_id}:{device_id}"),
            });
        }

        let link = UserDevice {
            id: uuid::Uuid::new_v4().to_string(),
            user_id,
            device_id,
            created_ts: chrono::Utc::now().timestamp(),
        };

        let mut batch = WriteBatch::default();
        Self::put_json(&mut batch, &key, &link)?;
        // reverse lookup: device → users, used when a device is deleted
        batch.put(Self::device_user_key(device_id, user_id), b"");
        self.db.write(batch)?;
        Ok(link)
    }

    pub async fn remove_device_for_user(&self, user_id: u64, device_id: u64) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;

        let key = Self::user_device_key(user_id, device_id);
        if !self.exists(&key)? {
            return Ok(false);
        }

        let mut batch = WriteBatch::default();
        batch.delete(&key);
        batch.delete(Self::device_user_key(device_id, user_id));
        self.db.write(batch)?;
        Ok(true)
    }

    // ============================================================
    // PASSWORD RESET TOKENS
    // ============================================================
    pub async fn save_reset_token(
        &self,
        token_hash: &str,
        token: &PasswordResetToken,
    ) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut batch = WriteBatch::default();
        Self::put_json(&mut batch, &Self::reset_token_key(token_hash), token)?;
        self.db.write(batch)?;
        Ok(())
    }

    /// Fetch and delete a reset token in one step so it can only be used once.
    pub async fn take_reset_token(
        &self,
        token_hash: &str,
    ) -> StoreResult<Option<PasswordResetToken>> {
        let _guard = self.write_lock.lock().await;

        let key = Self::reset_token_key(token_hash);
        let token = self.get_json::<PasswordResetToken>(&key)?;
        if token.is_some() {
            self.db.delete(&key)?;
        }
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::db::{test_db, StoreError};
    use crate::model::{
        device::NewDevice,
        user::{PasswordResetToken, UserRole},
    };

    #[tokio::test]
    async fn username_and_email_are_unique() {
        let (_dir, db) = test_db();
        db.insert_user("alice", "alice@example.com", "h".into(), UserRole::User)
            .await
            .unwrap();

        let err = db
            .insert_user("alice", "other@example.com", "h".into(), UserRole::User)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { index: "user_username", .. }));

        let err = db
            .insert_user("bob", "alice@example.com", "h".into(), UserRole::User)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { index: "user_email", .. }));
    }

    #[tokio::test]
    async fn assignments_are_unique_and_cleaned_up_with_the_device() {
        let (_dir, db) = test_db();
        let user = db
            .insert_user("alice", "alice@example.com", "h".into(), UserRole::User)
            .await
            .unwrap();
        let device = db
            .insert_device(&NewDevice {
                serial_number: "AAA".into(),
                model_name: "ESP32".into(),
                sensors: Vec::new(),
                api_key_hash: "k".into(),
                derived_id: "d".into(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        db.add_device_for_user(user.id, device.id).await.unwrap();
        let err = db.add_device_for_user(user.id, device.id).await.unwrap_err();
        assert!(matches!(err, StoreError::UniqueViolation { index: "user_device", .. }));
        assert_eq!(db.list_devices_for_user(user.id).await.unwrap().len(), 1);

        db.delete_device(device.id).await.unwrap();
        assert!(db.list_devices_for_user(user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_a_user_frees_username_and_email() {
        let (_dir, db) = test_db();
        db.insert_user("alice", "alice@example.com", "h".into(), UserRole::User)
            .await
            .unwrap();

        assert!(db.delete_user("alice").await.unwrap());
        assert!(!db.delete_user("alice").await.unwrap());
        assert!(!db
            .user_exists_by_username_or_email("alice", "alice@example.com")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn reset_tokens_are_single_use() {
        let (_dir, db) = test_db();
        let token = PasswordResetToken {
            user_id: 1,
            expires_ts: Utc::now().timestamp() + 60,
        };
        db.save_reset_token("abc", &token).await.unwrap();

        assert!(db.take_reset_token("abc").await.unwrap().is_some());
        assert!(db.take_reset_token("abc").await.unwrap().is_none());
    }
}
