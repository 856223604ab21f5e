//! Configuration module for the portal backend.
//!
//! All configuration is loaded from environment variables (or a `.env` file)
//! with the defaults documented on each field.

use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::AppError;

/// Request bodies above this size are rejected (uploaded receipts included).
const DEFAULT_MAX_CONTENT_LENGTH: usize = 25 * 1024 * 1024;

/// Stripe is called inline while serving invoice pages.
const DEFAULT_STRIPE_TIMEOUT_SECS: u64 = 10;

/// Stripe credentials and redirect targets.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// `STRIPE_API_KEY`, `STRIPE_SECRET_KEY`, `STRIPE_SECRET` or `STRIPE_SK`
    pub secret_key: Option<String>,
    /// `STRIPE_SUCCESS_URL`
    pub success_url: Option<String>,
    /// `STRIPE_CANCEL_URL` (falls back to the success URL)
    pub cancel_url: Option<String>,
    /// `STRIPE_API_BASE`, default `https://api.stripe.com`
    pub api_base: String,
    /// `STRIPE_TIMEOUT_SECS`, default 10
    pub timeout: Duration,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            success_url: None,
            cancel_url: None,
            api_base: "https://api.stripe.com".to_string(),
            timeout: Duration::from_secs(DEFAULT_STRIPE_TIMEOUT_SECS),
        }
    }
}

/// Branding and pricing of the public course registration page.
#[derive(Debug, Clone)]
pub struct CourseConfig {
    pub brand_name: String,
    pub brand_logo_url: String,
    pub powered_by: String,
    pub access_code: String,
    pub base_price_eur: i64,
    pub promo_code: String,
    pub promo_price_eur: i64,
}

impl Default for CourseConfig {
    fn default() -> Self {
        Self {
            brand_name: "Ai For Impact".to_string(),
            brand_logo_url: "https://i.imgur.com/STm5VaG.png".to_string(),
            powered_by: "Climate Fundraising Platform B.V.".to_string(),
            access_code: "letmein".to_string(),
            base_price_eur: 480,
            promo_code: "IMPACT-439".to_string(),
            promo_price_eur: 439,
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the server to (`PORTAL_BIND_ADDR`, or `PORT` on all interfaces)
    pub bind_addr: SocketAddr,
    /// Primary SQLite database (`DATABASE_URL` or `PORTAL_DB_PATH`)
    pub db_path: PathBuf,
    /// Customers SQLite database (`CUSTOMERS_DATABASE_URL` or `CUSTOMERS_DB_PATH`)
    pub customers_db_path: Option<PathBuf>,
    /// Tantivy index directory for the invoice lookup (`PORTAL_INDEX_PATH`)
    pub index_path: PathBuf,
    /// Receipt upload directory (`UPLOAD_FOLDER`)
    pub upload_dir: PathBuf,
    /// Maximum request body size in bytes (`MAX_CONTENT_LENGTH`)
    pub max_content_length: usize,
    /// Session signing key (`SECRET_KEY`)
    pub secret_key: String,
    /// Session lifetime in minutes (`SESSION_MINUTES`)
    pub session_minutes: i64,
    /// Mark the session cookie `Secure` (`SESSION_COOKIE_SECURE`)
    pub session_cookie_secure: bool,
    /// Display name of the single operator (`APP_USERNAME`)
    pub app_username: String,
    /// Plain login password (`APP_PASSWORD`)
    pub app_password: Option<String>,
    /// Werkzeug-style password hash (`APP_PASSWORD_HASH`), preferred over the plain password
    pub app_password_hash: Option<String>,
    /// Debug mode (`APP_DEBUG`)
    pub debug: bool,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub stripe: StripeConfig,
    pub course: CourseConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let flag = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string()) == "1";

        let bind_addr = match (get("PORTAL_BIND_ADDR"), get("PORT")) {
            (Some(addr), _) => addr,
            (None, Some(port)) => format!("0.0.0.0:{}", port),
            (None, None) => "127.0.0.1:8080".to_string(),
        };
        let bind_addr: SocketAddr = bind_addr
            .parse()
            .map_err(|e| AppError::Internal(format!("Invalid bind address {}: {}", bind_addr, e)))?;

        let db_path = match get("DATABASE_URL") {
            Some(url) => sqlite_path_from_url(&url)?,
            None => get("PORTAL_DB_PATH")
                .unwrap_or_else(|| "./data/app.db".to_string())
                .into(),
        };

        let customers_db_path = match get("CUSTOMERS_DATABASE_URL") {
            Some(url) => Some(sqlite_path_from_url(&url)?),
            None => get("CUSTOMERS_DB_PATH").map(PathBuf::from),
        };

        let index_path = get("PORTAL_INDEX_PATH")
            .unwrap_or_else(|| "./data/index".to_string())
            .into();

        let serverless = get("GAE_ENV").is_some() || get("K_SERVICE").is_some();
        let upload_dir = get("UPLOAD_FOLDER").map(PathBuf::from).unwrap_or_else(|| {
            if serverless {
                PathBuf::from("/tmp/uploads")
            } else {
                PathBuf::from("./uploads")
            }
        });

        let max_content_length = parse_number(
            get("MAX_CONTENT_LENGTH"),
            DEFAULT_MAX_CONTENT_LENGTH,
            "MAX_CONTENT_LENGTH",
        )?;
        let session_minutes = parse_number(get("SESSION_MINUTES"), 720, "SESSION_MINUTES")?;

        let secret_key = get("SECRET_KEY").unwrap_or_else(|| format!("dev-{}", random_hex(16)));

        let stripe = StripeConfig {
            secret_key: get("STRIPE_API_KEY")
                .or_else(|| get("STRIPE_SECRET_KEY"))
                .or_else(|| get("STRIPE_SECRET"))
                .or_else(|| get("STRIPE_SK")),
            success_url: get("STRIPE_SUCCESS_URL"),
            cancel_url: get("STRIPE_CANCEL_URL"),
            api_base: get("STRIPE_API_BASE").unwrap_or_else(|| "https://api.stripe.com".to_string()),
            timeout: Duration::from_secs(parse_number(
                get("STRIPE_TIMEOUT_SECS"),
                DEFAULT_STRIPE_TIMEOUT_SECS,
                "STRIPE_TIMEOUT_SECS",
            )?),
        };

        let defaults = CourseConfig::default();
        let course = CourseConfig {
            brand_name: get("BRAND_NAME").unwrap_or(defaults.brand_name),
            brand_logo_url: get("BRAND_LOGO_URL").unwrap_or(defaults.brand_logo_url),
            powered_by: get("POWERED_BY").unwrap_or(defaults.powered_by),
            access_code: get("COURSE_ACCESS_CODE").unwrap_or(defaults.access_code),
            base_price_eur: parse_number(
                get("BASE_PRICE_EUR"),
                defaults.base_price_eur,
                "BASE_PRICE_EUR",
            )?,
            promo_code: get("PROMO_CODE").unwrap_or(defaults.promo_code),
            promo_price_eur: parse_number(
                get("PROMO_PRICE_EUR"),
                defaults.promo_price_eur,
                "PROMO_PRICE_EUR",
            )?,
        };

        Ok(Self {
            bind_addr,
            db_path,
            customers_db_path,
            index_path,
            upload_dir,
            max_content_length,
            secret_key,
            session_minutes,
            session_cookie_secure: flag("SESSION_COOKIE_SECURE", "1"),
            app_username: get("APP_USERNAME").unwrap_or_else(|| "admin".to_string()),
            app_password: get("APP_PASSWORD"),
            app_password_hash: get("APP_PASSWORD_HASH"),
            debug: flag("APP_DEBUG", "0"),
            log_level: get("PORTAL_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            stripe,
            course,
        })
    }
}

fn parse_number<T: std::str::FromStr>(
    value: Option<String>,
    default: T,
    key: &str,
) -> Result<T, AppError> {
    match value {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| AppError::Internal(format!("Invalid {} value: {}", key, v))),
        None => Ok(default),
    }
}

/// Accept `sqlite:////abs/path`, `sqlite:///rel/path`, `sqlite:path` or a bare path.
fn sqlite_path_from_url(url: &str) -> Result<PathBuf, AppError> {
    let trimmed = url.trim();
    let path = if let Some(rest) = trimmed.strip_prefix("sqlite:///") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("sqlite://") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("sqlite:") {
        rest
    } else if trimmed.contains("://") {
        return Err(AppError::Internal(format!(
            "Unsupported database URL (only sqlite is supported): {}",
            trimmed
        )));
    } else {
        trimmed
    };
    let path = path.split('?').next().unwrap_or(path);
    Ok(Path::new(path).to_path_buf())
}

pub(crate) fn random_hex(bytes: usize) -> String {
    use rand::RngCore;
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, AppError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.db_path, PathBuf::from("./data/app.db"));
        assert!(config.customers_db_path.is_none());
        assert_eq!(config.upload_dir, PathBuf::from("./uploads"));
        assert_eq!(config.max_content_length, 25 * 1024 * 1024);
        assert_eq!(config.session_minutes, 720);
        assert!(config.session_cookie_secure);
        assert_eq!(config.app_username, "admin");
        assert!(config.secret_key.starts_with("dev-"));
        assert!(!config.debug);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.course.base_price_eur, 480);
        assert_eq!(config.stripe.api_base, "https://api.stripe.com");
        assert_eq!(config.stripe.timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_serverless_upload_dir_and_port() {
        let config = config_from(&[("K_SERVICE", "portal"), ("PORT", "9000")]).unwrap();
        assert_eq!(config.upload_dir, PathBuf::from("/tmp/uploads"));
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:9000");
    }

    #[test]
    fn test_database_urls() {
        let config = config_from(&[
            ("DATABASE_URL", "sqlite:////var/lib/portal/app.db"),
            ("CUSTOMERS_DATABASE_URL", "sqlite:customers.db?mode=rwc"),
        ])
        .unwrap();
        assert_eq!(config.db_path, PathBuf::from("/var/lib/portal/app.db"));
        assert_eq!(config.customers_db_path, Some(PathBuf::from("customers.db")));

        assert!(config_from(&[("DATABASE_URL", "postgresql://u:p@h/db")]).is_err());
    }

    #[test]
    fn test_stripe_key_aliases() {
        let config = config_from(&[("STRIPE_SK", "sk_test_1")]).unwrap();
        assert_eq!(config.stripe.secret_key.as_deref(), Some("sk_test_1"));

        let config = config_from(&[("STRIPE_API_KEY", "a"), ("STRIPE_SECRET_KEY", "b")]).unwrap();
        assert_eq!(config.stripe.secret_key.as_deref(), Some("a"));

        let config = config_from(&[("STRIPE_TIMEOUT_SECS", "3")]).unwrap();
        assert_eq!(config.stripe.timeout, Duration::from_secs(3));
        assert!(config_from(&[("STRIPE_TIMEOUT_SECS", "never")]).is_err());
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        assert!(config_from(&[("SESSION_MINUTES", "soon")]).is_err());
        assert!(config_from(&[("PORTAL_BIND_ADDR", "nowhere")]).is_err());
    }
}
