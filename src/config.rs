use anyhow::{Context, Result};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_DB_PATH: &str = "nnpda-db";
const DEFAULT_JWT_TTL_SECS: i64 = 60 * 60 * 24;
const DEFAULT_RESET_TOKEN_TTL_SECS: i64 = 15 * 60;

/// Runtime configuration, read from the environment (and `.env` when present).
///
/// | variable | default |
/// |----------|---------|
/// | `BIND_ADDR` | `0.0.0.0:3000` |
/// | `DB_PATH` | `nnpda-db` |
/// | `JWT_SECRET` | required |
/// | `JWT_TTL_SECS` | 86400 |
/// | `RESET_TOKEN_TTL_SECS` | 900 |
/// | `ADMIN_USERNAME`, `ADMIN_EMAIL`, `ADMIN_PASSWORD` | unset |
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub db_path: String,
    pub jwt_secret: String,
    pub jwt_ttl_secs: i64,
    pub reset_token_ttl_secs: i64,
    pub admin: Option<AdminSeed>,
}

/// Admin account created on startup when all three variables are set.
#[derive(Debug, Clone)]
pub struct AdminSeed {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let jwt_secret = dotenvy::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        if jwt_secret.is_empty() {
            anyhow::bail!("JWT_SECRET must not be empty");
        }

        let admin = match (
            dotenvy::var("ADMIN_USERNAME").ok(),
            dotenvy::var("ADMIN_EMAIL").ok(),
            dotenvy::var("ADMIN_PASSWORD").ok(),
        ) {
            (Some(username), Some(email), Some(password)) => Some(AdminSeed {
                username,
                email,
                password,
            }),
            _ => None,
        };

        Ok(Self {
            bind_addr: dotenvy::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string()),
            db_path: dotenvy::var("DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string()),
            jwt_secret,
            jwt_ttl_secs: parse_secs("JWT_TTL_SECS", DEFAULT_JWT_TTL_SECS)?,
            reset_token_ttl_secs: parse_secs(
                "RESET_TOKEN_TTL_SECS",
                DEFAULT_RESET_TOKEN_TTL_SECS,
            )?,
            admin,
        })
    }
}

fn parse_secs(name: &str, default: i64) -> Result<i64> {
    match dotenvy::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|secs| *secs > 0)
            .with_context(|| format!("{name} must be a positive number of seconds, got {raw:?}")),
        Err(_) => Ok(default),
    }
}
