use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use case_booking_cell::CaseStatus;
use shared_config::AppConfig;
use shared_database::supabase::{encode_filter_value, SupabaseClient};

use crate::error::NotificationError;
use crate::models::NotificationRule;

pub const RULES_TABLE: &str = "email_notification_rules";

#[async_trait]
pub trait NotificationRuleStore: Send + Sync {
    /// Enabled rules for one (country, status) pair.
    async fn enabled_rules(&self, country: &str, status: CaseStatus) -> Result<Vec<NotificationRule>, NotificationError>;
}

pub struct SupabaseRuleStore {
    supabase: SupabaseClient,
    auth_token: String,
}

impl SupabaseRuleStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            auth_token: config.service_token().to_string(),
        }
    }
}

#[async_trait]
impl NotificationRuleStore for SupabaseRuleStore {
    async fn enabled_rules(&self, country: &str, status: CaseStatus) -> Result<Vec<NotificationRule>, NotificationError> {
        let query = format!(
            "country=eq.{}&status=eq.{}&enabled=eq.true",
            encode_filter_value(country),
            encode_filter_value(status.as_str())
        );
        let rows: Vec<Value> = self
            .supabase
            .select(RULES_TABLE, &query, Some(&self.auth_token))
            .await?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            match serde_json::from_value::<NotificationRule>(row) {
                Ok(rule) => rules.push(rule),
                // One malformed row must not block the others
                Err(e) => warn!(country, %status, "Skipping malformed notification rule: {}", e),
            }
        }
        debug!(country, %status, count = rules.len(), "Loaded notification rules");
        Ok(rules)
    }
}

/// Rules held in memory; used when no backend is configured and in tests.
#[derive(Default)]
pub struct StaticRuleStore {
    rules: RwLock<Vec<NotificationRule>>,
}

impl StaticRuleStore {
    pub fn new(rules: Vec<NotificationRule>) -> Self {
        Self {
            rules: RwLock::new(rules),
        }
    }
}

#[async_trait]
impl NotificationRuleStore for StaticRuleStore {
    async fn enabled_rules(&self, country: &str, status: CaseStatus) -> Result<Vec<NotificationRule>, NotificationError> {
        Ok(self
            .rules
            .read()
            .await
            .iter()
            .filter(|r| r.enabled && r.status == status && r.country.eq_ignore_ascii_case(country))
            .cloned()
            .collect())
    }
}
