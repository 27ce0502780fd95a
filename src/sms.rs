// sms.rs
// Payment receipts over the SMS gateway (HTTP GET, API key in the query string).

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::config::SmsConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SmsStatus {
    Sent,
    Failed,
    Error,
    InvalidPhone,
    Disabled,
}

impl SmsStatus {
    pub fn payment_message(&self) -> &'static str {
        match self {
            SmsStatus::Sent => "Payment added and SMS sent successfully.",
            SmsStatus::Failed | SmsStatus::Error => "Payment added, but SMS delivery failed.",
            SmsStatus::InvalidPhone => "Payment added; phone number invalid for SMS.",
            SmsStatus::Disabled => "Payment added successfully.",
        }
    }
}

/// Normalizes local numbers to the international form: `0241234567` -> `233241234567`.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.len() {
        10 if digits.starts_with('0') => Some(format!("233{}", &digits[1..])),
        9 if !digits.starts_with('0') => Some(format!("233{digits}")),
        12 if digits.starts_with("233") => Some(digits),
        _ => None,
    }
}

pub fn first_name(full_name: &str) -> &str {
    full_name.split_whitespace().next().unwrap_or("Customer")
}

#[derive(Clone)]
pub struct SmsClient {
    http: reqwest::Client,
    config: SmsConfig,
}

impl SmsClient {
    pub fn new(config: SmsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(12))
            .build()
            .context("failed to build SMS http client")?;
        Ok(SmsClient { http, config })
    }

    pub fn enabled(&self) -> bool {
        self.config.api_key.is_some()
    }

    /// Sends one message. Gateway failures are reported through the status, not as errors.
    pub async fn send(&self, phone: &str, message: &str) -> SmsStatus {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return SmsStatus::Disabled;
        };
        let Some(to) = normalize_phone(phone) else {
            return SmsStatus::InvalidPhone;
        };

        let request = self.http.get(&self.config.base_url).query(&[
            ("action", "send-sms"),
            ("api_key", api_key),
            ("to", to.as_str()),
            ("from", self.config.sender_id.as_str()),
            ("sms", message),
        ]);

        match request.send().await {
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                if status.is_success() && body.contains("\"code\":\"ok\"") {
                    SmsStatus::Sent
                } else {
                    tracing::warn!(%status, body = %body, "sms gateway rejected message");
                    SmsStatus::Failed
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "sms gateway unreachable");
                SmsStatus::Error
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_local_and_international_numbers() {
        assert_eq!(normalize_phone("024 123 4567").as_deref(), Some("233241234567"));
        assert_eq!(normalize_phone("+233-24-123-4567").as_deref(), Some("233241234567"));
        assert_eq!(normalize_phone("241234567").as_deref(), Some("233241234567"));
        assert_eq!(normalize_phone("12345"), None);
        assert_eq!(normalize_phone(""), None);
    }

    #[test]
    fn first_name_defaults() {
        assert_eq!(first_name("  Akosua Mensah "), "Akosua");
        assert_eq!(first_name(""), "Customer");
    }

    #[tokio::test]
    async fn disabled_without_api_key() {
        let client = SmsClient::new(SmsConfig::default()).unwrap();
        assert!(!client.enabled());
        assert_eq!(client.send("0241234567", "hi").await, SmsStatus::Disabled);
    }
}
