use std::env;
use std::time::Duration;

use crate::models::VerificationSource;
use crate::verification_log::MAX_RETENTION_DAYS;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    pub dev_mode: bool,
    /// Bearer token for the admin API. Admin routes reject everything when unset.
    pub admin_api_token: Option<String>,
    /// HS256 secret for KB access tokens (random per process when unset)
    pub access_token_secret: Option<String>,
    /// Deployment-wide verification source; KB categories may override it
    pub verification_source: VerificationSource,
    pub envato_api_token: Option<String>,
    pub envato_api_base_url: String,
    pub verification_timeout: Duration,
    /// Days to retain verification logs before purging (0 = never purge)
    pub verification_log_retention_days: i64,
    /// Seconds to replenish one request of a client's public-route quota
    pub rate_limit_replenish_secs: u64,
    pub rate_limit_burst: u32,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("LICENSEGATE_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let verification_source = env::var("VERIFICATION_SOURCE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(VerificationSource::Local);

        let verification_timeout = env::var("VERIFICATION_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(10));

        let verification_log_retention_days: i64 = env::var("VERIFICATION_LOG_RETENTION_DAYS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .map(|days| days.clamp(0, MAX_RETENTION_DAYS))
            .unwrap_or(0);

        Self {
            host,
            port,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "licensegate.db".to_string()),
            dev_mode,
            admin_api_token: env::var("ADMIN_API_TOKEN").ok().filter(|t| !t.is_empty()),
            access_token_secret: env::var("ACCESS_TOKEN_SECRET").ok().filter(|s| !s.is_empty()),
            verification_source,
            envato_api_token: env::var("ENVATO_API_TOKEN").ok().filter(|t| !t.is_empty()),
            envato_api_base_url: env::var("ENVATO_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.envato.com".to_string()),
            verification_timeout,
            verification_log_retention_days,
            rate_limit_replenish_secs: env::var("RATE_LIMIT_REPLENISH_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(2),
            rate_limit_burst: env::var("RATE_LIMIT_BURST")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .filter(|burst| *burst > 0)
                .unwrap_or(10),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
