// crates/gem-server/src/config/env.rs
// Environment-based configuration - single source of truth for all env vars

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Default HTTP port for the Router.
pub const DEFAULT_PORT: u16 = 3000;
/// Default worker poll interval.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;
/// Default reclaim sweep interval.
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 30_000;

/// Per-provider secrets loaded from environment variables.
///
/// All optional: a missing secret turns the corresponding tool into
/// `not_configured` rather than an error.
#[derive(Debug, Clone, Default)]
pub struct ProviderSecrets {
    /// Shared secret for GHL webhook signatures (GHL_WEBHOOK_SECRET)
    pub ghl_webhook: Option<String>,
    /// SMS provider API key (SMS_API_KEY)
    pub sms_api_key: Option<String>,
    /// SMS sender number (SMS_FROM_NUMBER)
    pub sms_from_number: Option<String>,
    /// SMS provider endpoint override (SMS_API_URL)
    pub sms_api_url: Option<String>,
}

impl ProviderSecrets {
    pub fn from_env() -> Self {
        let secrets = Self {
            ghl_webhook: read_var("GHL_WEBHOOK_SECRET"),
            sms_api_key: read_var("SMS_API_KEY"),
            sms_from_number: read_var("SMS_FROM_NUMBER"),
            sms_api_url: read_var("SMS_API_URL"),
        };
        secrets.log_status();
        secrets
    }

    /// SMS sending needs both the key and a sender number.
    pub fn has_sms(&self) -> bool {
        self.sms_api_key.is_some() && self.sms_from_number.is_some()
    }

    /// Log which secrets are present (never their values).
    fn log_status(&self) {
        let mut configured = Vec::new();
        if self.ghl_webhook.is_some() {
            configured.push("GHL webhook");
        }
        if self.has_sms() {
            configured.push("SMS provider");
        }
        if configured.is_empty() {
            debug!("No provider secrets configured - provider-backed tools return not_configured");
        } else {
            debug!(providers = ?configured, "Provider secrets loaded");
        }
    }
}

/// Environment configuration for both the Router and the Worker.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// SQLite database path or URI (DATABASE_URL, required)
    pub database_url: String,
    /// Router HTTP port (PORT)
    pub port: u16,
    /// Worker queue poll interval (POLL_INTERVAL_MS)
    pub poll_interval_ms: u64,
    /// Reclaim sweeper interval (SWEEP_INTERVAL_MS)
    pub sweep_interval_ms: u64,
    pub secrets: ProviderSecrets,
}

impl EnvConfig {
    /// Load configuration from environment variables.
    ///
    /// `DATABASE_URL` is the only required variable; everything else has a
    /// default or degrades to `not_configured` behaviour.
    pub fn from_env() -> Result<Self> {
        let database_url =
            read_var("DATABASE_URL").context("DATABASE_URL is required (path to the SQLite db)")?;

        let port = parse_var("PORT", DEFAULT_PORT);
        let poll_interval_ms = parse_var("POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS);
        let sweep_interval_ms = parse_var("SWEEP_INTERVAL_MS", DEFAULT_SWEEP_INTERVAL_MS);

        Ok(Self {
            database_url,
            port,
            poll_interval_ms,
            sweep_interval_ms,
            secrets: ProviderSecrets::from_env(),
        })
    }
}

/// Read an environment variable, filtering empty values.
fn read_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a numeric environment variable, warning and falling back on junk.
fn parse_var<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match read_var(name) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(var = name, value = %raw, "Unparseable value, using default");
            default
        }),
    }
}
