use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

/// Request and response header carrying the anti-forgery token.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Pre-authentication routes: no token binding can exist yet.
pub const CSRF_EXEMPT_PATHS: &[&str] = &[
    "/api/auth/signin",
    "/api/auth/signup",
    "/api/auth/verify-otp",
    "/api/auth/forgot-password",
    "/api/auth/reset-password",
];

const MAX_TOKEN_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;
const MAX_AUDIT_RETENTION_DAYS: u32 = 10 * 365;

#[derive(Debug, Clone, Deserialize)]
pub struct GuardConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub mongodb: MongoConfig,
    pub csrf: CsrfConfig,
    pub audit: AuditConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CsrfConfig {
    /// Hard lifetime of a token from issuance; no sliding renewal.
    pub token_ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl CsrfConfig {
    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_ttl_seconds as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            token_ttl_seconds: 60 * 60,
            sweep_interval_seconds: 15 * 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    pub retention_days: u32,
}

impl AuditConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { retention_days: 90 }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

impl GuardConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let config = GuardConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("guard-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|s| !s.is_empty()),
            mongodb: MongoConfig {
                uri: get_env("MONGODB_URI", None, is_prod)?,
                database: get_env("MONGODB_DATABASE", Some("guard_db"), is_prod)?,
            },
            csrf: CsrfConfig {
                token_ttl_seconds: parse_env("CSRF_TOKEN_TTL_SECONDS", "3600", is_prod)?,
                sweep_interval_seconds: parse_env("CSRF_SWEEP_INTERVAL_SECONDS", "900", is_prod)?,
            },
            audit: AuditConfig {
                retention_days: parse_env("AUDIT_RETENTION_DAYS", "90", is_prod)?,
            },
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        let ttl = self.csrf.token_ttl_seconds;
        if ttl == 0 || ttl > MAX_TOKEN_TTL_SECONDS {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "CSRF_TOKEN_TTL_SECONDS must be between 1 and {}",
                MAX_TOKEN_TTL_SECONDS
            )));
        }

        if self.csrf.sweep_interval_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "CSRF_SWEEP_INTERVAL_SECONDS must be positive"
            )));
        }

        let retention_days = self.audit.retention_days;
        if retention_days == 0 || retention_days > MAX_AUDIT_RETENTION_DAYS {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "AUDIT_RETENTION_DAYS must be between 1 and {}",
                MAX_AUDIT_RETENTION_DAYS
            )));
        }

        if self.environment == Environment::Prod
            && self.security.allowed_origins.iter().any(|o| o == "*")
        {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "Wildcard CORS origin not allowed in production"
            )));
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}
