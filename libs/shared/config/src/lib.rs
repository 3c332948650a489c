use std::env;
use std::str::FromStr;
use tracing::warn;

/// Tuning for the offline sync pipeline. Defaults match production cadence.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub sync_interval_seconds: u64,
    pub health_probe_interval_seconds: u64,
    pub sync_item_delay_ms: u64,
    pub sync_max_retries: u32,
    pub offline_failure_threshold: u32,
    pub retry_base_delay_ms: u64,
    pub remote_max_retries: u32,
    pub outbox_interval_seconds: u64,
    pub outbox_max_attempts: u32,
    pub strict_data_validation: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            sync_interval_seconds: 30,
            health_probe_interval_seconds: 300,
            sync_item_delay_ms: 500,
            sync_max_retries: 3,
            offline_failure_threshold: 3,
            retry_base_delay_ms: 1000,
            remote_max_retries: 3,
            outbox_interval_seconds: 15,
            outbox_max_attempts: 5,
            strict_data_validation: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    pub supabase_service_key: Option<String>,
    pub redis_url: Option<String>,
    pub email_function_name: String,
    pub email_from_name: Option<String>,
    pub email_provider: Option<String>,
    pub sync: SyncSettings,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = SyncSettings::default();

        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            supabase_service_key: env::var("SUPABASE_SERVICE_ROLE_KEY").ok(),
            redis_url: env::var("REDIS_URL").ok(),
            email_function_name: env::var("EMAIL_FUNCTION_NAME")
                .unwrap_or_else(|_| "send-email".to_string()),
            email_from_name: env::var("EMAIL_FROM_NAME").ok(),
            email_provider: env::var("EMAIL_PROVIDER").ok(),
            sync: SyncSettings {
                sync_interval_seconds: parse_env("SYNC_INTERVAL_SECONDS", defaults.sync_interval_seconds),
                health_probe_interval_seconds: parse_env(
                    "HEALTH_PROBE_INTERVAL_SECONDS",
                    defaults.health_probe_interval_seconds,
                ),
                sync_item_delay_ms: parse_env("SYNC_ITEM_DELAY_MS", defaults.sync_item_delay_ms),
                sync_max_retries: parse_env("SYNC_MAX_RETRIES", defaults.sync_max_retries),
                offline_failure_threshold: parse_env(
                    "OFFLINE_FAILURE_THRESHOLD",
                    defaults.offline_failure_threshold,
                ),
                retry_base_delay_ms: parse_env("RETRY_BASE_DELAY_MS", defaults.retry_base_delay_ms),
                remote_max_retries: parse_env("REMOTE_MAX_RETRIES", defaults.remote_max_retries),
                outbox_interval_seconds: parse_env("OUTBOX_INTERVAL_SECONDS", defaults.outbox_interval_seconds),
                outbox_max_attempts: parse_env("OUTBOX_MAX_ATTEMPTS", defaults.outbox_max_attempts),
                strict_data_validation: parse_env("STRICT_DATA_VALIDATION", defaults.strict_data_validation),
            },
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        if config.redis_url.is_none() {
            warn!("REDIS_URL not set, offline queue will be kept in memory only");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    /// Token used by background workers, which act without a user session.
    pub fn service_token(&self) -> &str {
        self.supabase_service_key
            .as_deref()
            .unwrap_or(&self.supabase_anon_key)
    }
}

fn parse_env<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value '{}', using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}
