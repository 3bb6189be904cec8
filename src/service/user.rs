use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    auth::{
        hash::hash_token,
        utils::{generate_token, hash_password, verify_password},
    },
    config::AdminSeed,
    db::{DBLayer, StoreError},
    error::{ServiceError, ServiceResult},
    model::user::{NewUser, PasswordResetToken, User, UserRole},
};

const USERNAME_MAX_LEN: usize = 64;
const PASSWORD_MIN_LEN: usize = 8;

/// Hands an issued password-reset token to the account owner.
pub trait ResetNotifier: Send + Sync {
    fn send_reset_token(&self, user: &User, token: &str);
}

/// Default notifier: no mail transport is wired, so the token only goes to the
/// debug log.
#[derive(Debug, Default)]
pub struct LogResetNotifier;

impl ResetNotifier for LogResetNotifier {
    fn send_reset_token(&self, user: &User, token: &str) {
        info!(user_id = user.id, "password reset token issued");
        debug!(username = %user.username, token, "password reset token");
    }
}

#[derive(Clone)]
pub struct UserService {
    db: Arc<DBLayer>,
    notifier: Arc<dyn ResetNotifier>,
    reset_token_ttl_secs: i64,
}

impl UserService {
    pub fn new(
        db: Arc<DBLayer>,
        notifier: Arc<dyn ResetNotifier>,
        reset_token_ttl_secs: i64,
    ) -> Self {
        Self {
            db,
            notifier,
            reset_token_ttl_secs,
        }
    }

    pub async fn find_all(&self) -> ServiceResult<Vec<User>> {
        Ok(self.db.list_users().await?)
    }

    pub async fn get_user_by_id(&self, id: u64) -> ServiceResult<User> {
        self.db.load_user(id).await?.ok_or_else(user_not_found)
    }

    pub async fn get_user_by_username(&self, username: &str) -> ServiceResult<User> {
        self.db
            .find_user_by_username(username)
            .await?
            .ok_or_else(user_not_found)
    }

    pub async fn get_user_by_email(&self, email: &str) -> ServiceResult<User> {
        self.db
            .find_user_by_email(&normalize_email(email))
            .await?
            .ok_or_else(user_not_found)
    }

    pub async fn save(&self, new: NewUser) -> ServiceResult<User> {
        let username = new.username.trim().to_string();
        let email = normalize_email(&new.email);

        if username.is_empty() || username.chars().count() > USERNAME_MAX_LEN {
            return Err(ServiceError::bad_request(format!(
                "Username must be 1 to {USERNAME_MAX_LEN} characters."
            )));
        }
        if !email.contains('@') {
            return Err(ServiceError::bad_request("Email address is invalid."));
        }
        validate_password(&new.password)?;

        if self.db.user_exists_by_username_or_email(&username, &email).await? {
            return Err(user_taken());
        }

        let hash = hash_password(&new.password)?;
        let user = self
            .db
            .insert_user(&username, &email, hash, new.role)
            .await
            .map_err(|err| match err {
                StoreError::UniqueViolation { .. } => user_taken(),
                other => other.into(),
            })?;

        info!(user_id = user.id, username = %user.username, role = ?user.role, "user created");
        Ok(user)
    }

    /// Deleting an unknown username is a no-op.
    pub async fn delete_user(&self, username: &str) -> ServiceResult<()> {
        if self.db.delete_user(username).await? {
            info!(username, "user deleted");
        }
        Ok(())
    }

    /// Username/password login. Unknown users and wrong passwords are
    /// indistinguishable to the caller.
    pub async fn authenticate(&self, username: &str, password: &str) -> ServiceResult<User> {
        let invalid = || ServiceError::unauthorized("Invalid credentials");

        let user = self
            .db
            .find_user_by_username(username.trim())
            .await?
            .ok_or_else(invalid)?;

        if !verify_password(&user.password_hash, password)? {
            warn!(user_id = user.id, "login with wrong password");
            return Err(invalid());
        }
        Ok(user)
    }

    pub async fn change_password(
        &self,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> ServiceResult<()> {
        let user = self.get_user_by_username(username).await?;

        if !verify_password(&user.password_hash, old_password)? {
            return Err(ServiceError::unauthorized("Old password is incorrect."));
        }
        validate_password(new_password)?;

        let hash = hash_password(new_password)?;
        self.db.update_password(user.id, hash).await?;
        info!(user_id = user.id, "password changed");
        Ok(())
    }

    /// Always succeeds so callers cannot tell which usernames exist.
    pub async fn request_password_reset(&self, username: &str) -> ServiceResult<()> {
        let Some(user) = self.db.find_user_by_username(username.trim()).await? else {
            debug!(username, "password reset requested for unknown user");
            return Ok(());
        };

        let token = generate_token();
        let record = PasswordResetToken {
            user_id: user.id,
            expires_ts: chrono::Utc::now().timestamp() + self.reset_token_ttl_secs,
        };
        self.db.save_reset_token(&hash_token(&token), &record).await?;
        self.notifier.send_reset_token(&user, &token);
        Ok(())
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> ServiceResult<()> {
        validate_password(new_password)?;
        let invalid = || ServiceError::unauthorized("Invalid or expired token.");

        let record = self
            .db
            .take_reset_token(&hash_token(token))
            .await?
            .ok_or_else(invalid)?;
        if record.is_expired(chrono::Utc::now().timestamp()) {
            return Err(invalid());
        }

        let hash = hash_password(new_password)?;
        let user = self
            .db
            .update_password(record.user_id, hash)
            .await
            .map_err(|err| match err {
                StoreError::NotFound { .. } => invalid(),
                other => other.into(),
            })?;

        info!(user_id = user.id, "password reset via token");
        Ok(())
    }

    /// Create the configured admin account unless the username is taken.
    pub async fn ensure_admin(&self, seed: &AdminSeed) -> ServiceResult<()> {
        if self.db.find_user_by_username(seed.username.trim()).await?.is_some() {
            debug!(username = %seed.username, "admin account already present");
            return Ok(());
        }

        self.save(NewUser {
            username: seed.username.clone(),
            email: seed.email.clone(),
            password: seed.password.clone(),
            role: UserRole::Admin,
        })
        .await?;
        Ok(())
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_password(password: &str) -> ServiceResult<()> {
    if password.chars().count() < PASSWORD_MIN_LEN {
        return Err(ServiceError::bad_request(format!(
            "Password must be at least {PASSWORD_MIN_LEN} characters."
        )));
    }
    Ok(())
}

fn user_not_found() -> ServiceError {
    ServiceError::not_found("User not found")
}

fn user_taken() -> ServiceError {
    ServiceError::conflict("User with provided username or email already exists.")
}
