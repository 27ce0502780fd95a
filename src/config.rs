// config.rs
// Runtime settings read from the environment (after dotenvy has loaded .env).

use std::{env, net::SocketAddr, time::Duration};

use anyhow::{Context, Result};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub mongodb_uri: String,
    pub mongodb_db: String,
    pub bind_addr: SocketAddr,
    pub users_file: String,
    pub report_cache_ttl: Duration,
    pub report_cache_max_entries: usize,
    pub sms: SmsConfig,
    pub typst_bin: String,
    pub currency: String,
}

/// SMS gateway settings. Sending is disabled when no API key is configured.
#[derive(Clone, Debug, Default)]
pub struct SmsConfig {
    pub api_key: Option<String>,
    pub sender_id: String,
    pub base_url: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let bind_raw = var_or("BIND_ADDR", "0.0.0.0:8080");
        let bind_addr = bind_raw
            .parse::<SocketAddr>()
            .with_context(|| format!("invalid BIND_ADDR `{bind_raw}`"))?;

        Ok(AppConfig {
            mongodb_uri: var_or("MONGODB_URI", "mongodb://localhost:27017"),
            mongodb_db: var_or("MONGODB_DB", "salesdesk"),
            bind_addr,
            users_file: var_or("USERS_FILE", "./data/users.json"),
            report_cache_ttl: Duration::from_secs(parse_var("REPORT_CACHE_TTL_SECS", 60)?),
            report_cache_max_entries: parse_var("REPORT_CACHE_MAX_ENTRIES", 256)?,
            sms: SmsConfig {
                api_key: env::var("SMS_API_KEY").ok().filter(|v| !v.trim().is_empty()),
                sender_id: var_or("SMS_SENDER_ID", "SalesDesk"),
                base_url: var_or("SMS_BASE_URL", "https://sms.arkesel.com/sms/api"),
            },
            typst_bin: var_or("TYPST_BIN", "typst"),
            currency: var_or("CURRENCY", "GHS"),
        })
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: `{raw}`")),
        _ => Ok(default),
    }
}
