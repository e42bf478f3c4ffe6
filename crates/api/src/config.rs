//! Process configuration from environment variables.

use std::net::SocketAddr;

use thiserror::Error;
use tracing::warn;

use agriconnect_infra::command_dispatcher::DEFAULT_MAX_RETRIES;
use agriconnect_infra::notifications::{DEFAULT_SMTP_PORT, SmtpSettings};
use agriconnect_observability::LogFormat;

const DEV_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub log_format: LogFormat,
    pub dispatch_max_retries: u32,
    pub mail_from: String,
    /// Outgoing SMTP relay; mail is only logged when unset.
    pub smtp: Option<SmtpSettings>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            jwt_secret: DEV_JWT_SECRET.to_string(),
            log_format: LogFormat::Json,
            dispatch_max_retries: DEFAULT_MAX_RETRIES,
            mail_from: "AgriConnect <noreply@agriconnect.local>".to_string(),
            smtp: None,
        }
    }
}

impl ApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; unset variables keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(raw) = lookup("BIND_ADDR") {
            cfg.bind_addr = raw.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
                var: "BIND_ADDR",
                reason: e.to_string(),
            })?;
        }

        if let Some(secret) = lookup("JWT_SECRET") {
            if secret.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    var: "JWT_SECRET",
                    reason: "must not be empty".to_string(),
                });
            }
            cfg.jwt_secret = secret;
        }

        if let Some(raw) = lookup("LOG_FORMAT") {
            cfg.log_format = raw.parse().map_err(|e: agriconnect_observability::ParseLogFormatError| {
                ConfigError::Invalid {
                    var: "LOG_FORMAT",
                    reason: e.to_string(),
                }
            })?;
        }

        if let Some(raw) = lookup("DISPATCH_MAX_RETRIES") {
            cfg.dispatch_max_retries = raw.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::Invalid {
                    var: "DISPATCH_MAX_RETRIES",
                    reason: e.to_string(),
                }
            })?;
        }

        cfg.smtp = smtp_from_lookup(&lookup)?;
        if let Some(from) = lookup("MAIL_FROM") {
            cfg.mail_from = from;
        } else if let Some(user) = cfg.smtp.as_ref().and_then(|s| s.username.as_deref()) {
            cfg.mail_from = format!("AgriConnect <{user}>");
        }

        Ok(cfg)
    }

    /// Log settings that are unsafe outside development. Call after the
    /// subscriber is installed.
    pub fn warn_insecure_defaults(&self) {
        if self.jwt_secret == DEV_JWT_SECRET {
            warn!("JWT_SECRET not set; using insecure dev default");
        }
    }
}

fn smtp_from_lookup(lookup: &impl Fn(&str) -> Option<String>) -> Result<Option<SmtpSettings>, ConfigError> {
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    let Some(host) = non_empty("SMTP_HOST") else {
        return Ok(None);
    };
    let port = match non_empty("SMTP_PORT") {
        Some(raw) => raw.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError::Invalid {
            var: "SMTP_PORT",
            reason: e.to_string(),
        })?,
        None => DEFAULT_SMTP_PORT,
    };

    Ok(Some(SmtpSettings {
        host: host.trim().to_string(),
        port,
        username: non_empty("SMTP_USER"),
        password: non_empty("SMTP_PASS"),
    }))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = ApiConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.bind_addr.port(), 8080);
        assert_eq!(cfg.jwt_secret, DEV_JWT_SECRET);
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(cfg.dispatch_max_retries, DEFAULT_MAX_RETRIES);
        assert!(cfg.smtp.is_none());
    }

    #[test]
    fn values_are_read_and_validated() {
        let cfg = ApiConfig::from_lookup(lookup(&[
            ("BIND_ADDR", "127.0.0.1:9090"),
            ("JWT_SECRET", "s3cret"),
            ("LOG_FORMAT", "pretty"),
            ("DISPATCH_MAX_RETRIES", "3"),
        ]))
        .unwrap();
        assert_eq!(cfg.bind_addr.to_string(), "127.0.0.1:9090");
        assert_eq!(cfg.jwt_secret, "s3cret");
        assert_eq!(cfg.log_format, LogFormat::Pretty);
        assert_eq!(cfg.dispatch_max_retries, 3);

        assert!(ApiConfig::from_lookup(lookup(&[("BIND_ADDR", "nowhere")])).is_err());
        assert!(ApiConfig::from_lookup(lookup(&[("DISPATCH_MAX_RETRIES", "-1")])).is_err());
        assert!(ApiConfig::from_lookup(lookup(&[("JWT_SECRET", " ")])).is_err());
    }

    #[test]
    fn smtp_relay_is_read_when_host_is_set() {
        let cfg = ApiConfig::from_lookup(lookup(&[
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_USER", "orders@example.com"),
            ("SMTP_PASS", "app-password"),
        ]))
        .unwrap();
        let smtp = cfg.smtp.unwrap();
        assert_eq!(smtp.host, "smtp.example.com");
        assert_eq!(smtp.port, DEFAULT_SMTP_PORT);
        assert_eq!(smtp.username.as_deref(), Some("orders@example.com"));
        assert_eq!(smtp.password.as_deref(), Some("app-password"));
        assert_eq!(cfg.mail_from, "AgriConnect <orders@example.com>");

        let cfg = ApiConfig::from_lookup(lookup(&[
            ("SMTP_HOST", "mail.local"),
            ("SMTP_PORT", "465"),
            ("MAIL_FROM", "Shop <shop@mail.local>"),
        ]))
        .unwrap();
        assert_eq!(cfg.smtp.as_ref().map(|s| s.port), Some(465));
        assert_eq!(cfg.mail_from, "Shop <shop@mail.local>");

        assert!(ApiConfig::from_lookup(lookup(&[("SMTP_HOST", "h"), ("SMTP_PORT", "99999")])).is_err());
        assert!(ApiConfig::from_lookup(lookup(&[("SMTP_PORT", "25")])).unwrap().smtp.is_none());
    }
}
