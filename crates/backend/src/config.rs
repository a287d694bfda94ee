//! Process configuration, resolved once at startup and passed down explicitly.

use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Well-known signing secrets used when none are configured. Never secure.
pub const FALLBACK_ACCESS_SECRET: &str = "my_secret_key";
pub const FALLBACK_REFRESH_SECRET: &str = "my_refresh_secret_key";

/// Upper bound for either token lifetime (ten years).
pub const MAX_TOKEN_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres { database_url: String },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub env: String,
    pub port: u16,
    pub request_timeout: Duration,
    pub log_level: String,
    pub log_format: LogFormat,
    pub store_backend: StoreBackend,
    pub store_timeout: Duration,
    /// Zero disables the background registry sweeper.
    pub registry_sweep_interval: Duration,
    /// `None` means permissive CORS (development only).
    pub cors_allowed_origins: Option<Vec<String>>,
    pub auth: AuthConfig,
}

/// Token and password-hashing settings handed to the auth engine.
#[derive(Clone)]
pub struct AuthConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    /// True when either secret was missing and the well-known pair is in use.
    pub secrets_from_fallback: bool,
    pub issuer: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub argon2_m_cost_kib: u32,
    pub argon2_t_cost: u32,
    pub argon2_p_cost: u32,
}

// Secrets stay out of Debug output.
impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secrets_from_fallback", &self.secrets_from_fallback)
            .field("issuer", &self.issuer)
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("argon2_m_cost_kib", &self.argon2_m_cost_kib)
            .field("argon2_t_cost", &self.argon2_t_cost)
            .field("argon2_p_cost", &self.argon2_p_cost)
            .finish_non_exhaustive()
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Split a comma-separated origin list, dropping blanks.
fn parse_origins(origins: &str) -> Vec<String> {
    origins
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// A token lifetime must be positive and fit the signed timestamps in claims.
fn checked_token_ttl(key: &str, secs: u64) -> Result<Duration> {
    let signed = i64::try_from(secs).with_context(|| format!("{} is out of range", key))?;
    if signed <= 0 || secs > MAX_TOKEN_TTL_SECS {
        bail!("{} must be between 1 and {} seconds", key, MAX_TOKEN_TTL_SECS);
    }

    Ok(Duration::from_secs(secs))
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Call `dotenvy::dotenv()` first to pick up a local `.env` file.
    pub fn from_env() -> Result<Self> {
        let app_name = non_empty_env("APP_NAME").unwrap_or_else(|| "auth-service".to_string());
        let env_name = non_empty_env("APP_ENV").unwrap_or_else(|| "dev".to_string());

        let port = match env::var("HTTP_PORT") {
            Ok(port) => port.parse().context("HTTP_PORT must be a valid port number")?,
            Err(_) => 9001,
        };

        let log_format = match env::var("LOG_FORMAT").as_deref() {
            Ok("pretty") => LogFormat::Pretty,
            _ => LogFormat::Json,
        };

        let database_url = non_empty_env("DATABASE_URL");
        let store_backend = match (non_empty_env("STORE_BACKEND").as_deref(), database_url) {
            (Some("memory"), _) => StoreBackend::Memory,
            (Some("postgres"), None) => bail!("STORE_BACKEND=postgres requires DATABASE_URL"),
            (Some("postgres") | None, Some(database_url)) => StoreBackend::Postgres { database_url },
            (None, None) => StoreBackend::Memory,
            (Some(other), _) => bail!("Unknown STORE_BACKEND: {}", other),
        };

        let auth = AuthConfig::from_env(&app_name)?;
        let config = Self {
            app_name,
            env: env_name,
            port,
            request_timeout: Duration::from_secs(env_or("REQUEST_TIMEOUT_SECS", 20)),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            log_format,
            store_backend,
            store_timeout: Duration::from_millis(env_or("STORE_TIMEOUT_MS", 5000)),
            registry_sweep_interval: Duration::from_secs(env_or("REGISTRY_SWEEP_SECS", 300)),
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .ok()
                .map(|origins| parse_origins(&origins)),
            auth,
        };

        config.check_production()?;

        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.env.eq_ignore_ascii_case("production")
    }

    /// Production refuses the insecure fallbacks that dev tolerates.
    fn check_production(&self) -> Result<()> {
        if !self.is_production() {
            return Ok(());
        }

        if self.auth.secrets_from_fallback {
            bail!("ACCESS_SECRET and REFRESH_SECRET must be set in production");
        }

        if self.store_backend == StoreBackend::Memory {
            bail!("The in-memory store is not allowed in production; set DATABASE_URL");
        }

        Ok(())
    }

    /// Map `LOG_LEVEL` (ERROR|WARN|INFO|DEBUG) onto a tracing filter directive.
    pub fn log_directive(&self) -> &'static str {
        match self.log_level.to_ascii_uppercase().as_str() {
            "ERROR" => "error",
            "WARN" => "warn",
            "DEBUG" => "debug",
            _ => "info",
        }
    }
}

impl AuthConfig {
    /// Resolve signing secrets and token settings.
    ///
    /// A missing secret is not fatal here: both fall back to the well-known
    /// pair and `secrets_from_fallback` is set so the caller can log it.
    pub fn from_env(issuer: &str) -> Result<Self> {
        let (access_secret, refresh_secret, secrets_from_fallback) = match (
            non_empty_env("ACCESS_SECRET"),
            non_empty_env("REFRESH_SECRET"),
        ) {
            (Some(access), Some(refresh)) => (access, refresh, false),
            _ => (
                FALLBACK_ACCESS_SECRET.to_string(),
                FALLBACK_REFRESH_SECRET.to_string(),
                true,
            ),
        };

        if access_secret == refresh_secret {
            bail!("ACCESS_SECRET and REFRESH_SECRET must differ");
        }

        Ok(Self {
            access_secret,
            refresh_secret,
            secrets_from_fallback,
            issuer: issuer.to_string(),
            access_token_ttl: checked_token_ttl(
                "ACCESS_TOKEN_TTL_SECS",
                env_or("ACCESS_TOKEN_TTL_SECS", 15 * 60),
            )?,
            refresh_token_ttl: checked_token_ttl(
                "REFRESH_TOKEN_TTL_SECS",
                env_or("REFRESH_TOKEN_TTL_SECS", 24 * 60 * 60),
            )?,
            argon2_m_cost_kib: env_or("ARGON2_M_COST_KIB", 19 * 1024),
            argon2_t_cost: env_or("ARGON2_T_COST", 2),
            argon2_p_cost: env_or("ARGON2_P_COST", 1),
        })
    }
}

#[cfg(test)]
impl AuthConfig {
    /// Distinct secrets and a cheap Argon2 cost so tests stay fast.
    pub fn for_tests() -> Self {
        Self {
            access_secret: "ABCD-access-secret-for-tests".to_string(),
            refresh_secret: "XYZ-refresh-secret-for-tests".to_string(),
            secrets_from_fallback: false,
            issuer: "auth-service-test".to_string(),
            access_token_ttl: Duration::from_secs(15 * 60),
            refresh_token_ttl: Duration::from_secs(24 * 60 * 60),
            argon2_m_cost_kib: 256,
            argon2_t_cost: 1,
            argon2_p_cost: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            app_name: "auth-service".to_string(),
            env: "dev".to_string(),
            port: 9001,
            request_timeout: Duration::from_secs(20),
            log_level: "INFO".to_string(),
            log_format: LogFormat::Json,
            store_backend: StoreBackend::Memory,
            store_timeout: Duration::from_secs(5),
            registry_sweep_interval: Duration::from_secs(300),
            cors_allowed_origins: None,
            auth: AuthConfig::for_tests(),
        }
    }

    #[test]
    fn test_dev_tolerates_fallback_secrets() {
        let mut config = base_config();
        config.auth.secrets_from_fallback = true;
        assert!(config.check_production().is_ok());
    }

    #[test]
    fn test_production_rejects_fallback_secrets() {
        let mut config = base_config();
        config.env = "production".to_string();
        config.store_backend = StoreBackend::Postgres {
            database_url: "postgres://localhost/auth".to_string(),
        };
        assert!(config.check_production().is_ok());

        config.auth.secrets_from_fallback = true;
        assert!(config.check_production().is_err());
    }

    #[test]
    fn test_production_rejects_memory_store() {
        let mut config = base_config();
        config.env = "Production".to_string();
        assert!(config.check_production().is_err());
    }

    #[test]
    fn test_log_directive() {
        let mut config = base_config();
        for (level, expected) in [
            ("ERROR", "error"),
            ("warn", "warn"),
            ("DEBUG", "debug"),
            ("INFO", "info"),
            ("bogus", "info"),
        ] {
            config.log_level = level.to_string();
            assert_eq!(config.log_directive(), expected);
        }
    }

    #[test]
    fn test_parse_origins() {
        assert_eq!(
            parse_origins(" https://a.example , ,https://b.example"),
            vec!["https://a.example", "https://b.example"]
        );
        assert!(parse_origins("  ").is_empty());
    }

    #[test]
    fn test_token_ttl_bounds() {
        assert_eq!(
            checked_token_ttl("ACCESS_TOKEN_TTL_SECS", 900).unwrap(),
            Duration::from_secs(900)
        );
        assert!(checked_token_ttl("ACCESS_TOKEN_TTL_SECS", 0).is_err());
        assert!(checked_token_ttl("REFRESH_TOKEN_TTL_SECS", MAX_TOKEN_TTL_SECS + 1).is_err());
        assert!(checked_token_ttl("REFRESH_TOKEN_TTL_SECS", u64::MAX).is_err());
    }

    #[test]
    fn test_debug_output_hides_secrets() {
        let rendered = format!("{:?}", AuthConfig::for_tests());
        assert!(!rendered.contains("ABCD-access-secret-for-tests"));
        assert!(!rendered.contains("XYZ-refresh-secret-for-tests"));
    }
}
