use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use case_booking_cell::{CaseBooking, CaseStatus};

fn enabled_by_default() -> bool {
    true
}

/// Who receives the e-mail for a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientConfig {
    #[serde(default)]
    pub roles: Vec<String>,
    /// Explicit members, by e-mail address or user id.
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub department_filter: Vec<String>,
    #[serde(default)]
    pub require_same_department: bool,
    #[serde(default)]
    pub include_submitter: bool,
    /// Admins skip department checks while this is set.
    #[serde(default = "enabled_by_default")]
    pub admin_override: bool,
    /// Admins skip country checks while this is set.
    #[serde(default = "enabled_by_default")]
    pub admin_global_access: bool,
}

impl Default for RecipientConfig {
    fn default() -> Self {
        Self {
            roles: Vec::new(),
            members: Vec::new(),
            department_filter: Vec::new(),
            require_same_department: false,
            include_submitter: false,
            admin_override: true,
            admin_global_access: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub subject: String,
    pub body: String,
}

/// Allow-lists a case must satisfy. Empty lists allow everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleConditions {
    #[serde(default)]
    pub hospitals: Vec<String>,
    #[serde(default)]
    pub departments: Vec<String>,
}

impl RuleConditions {
    pub fn matches(&self, case: &CaseBooking) -> bool {
        let allowed = |list: &[String], value: &str| {
            list.is_empty() || list.iter().any(|v| v.eq_ignore_ascii_case(value))
        };
        allowed(&self.hospitals, &case.hospital) && allowed(&self.departments, &case.department)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRule {
    pub id: Uuid,
    pub country: String,
    pub status: CaseStatus,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub recipients: RecipientConfig,
    pub template: EmailTemplate,
    #[serde(default)]
    pub conditions: Option<RuleConditions>,
}

impl NotificationRule {
    pub fn applies_to(&self, case: &CaseBooking) -> bool {
        self.conditions.as_ref().map_or(true, |c| c.matches(case))
    }
}

/// Outbox record for one status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub id: Uuid,
    pub case: CaseBooking,
    pub new_status: CaseStatus,
    pub changed_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl NotificationEvent {
    pub fn new(case: CaseBooking, new_status: CaseStatus, changed_by: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            case,
            new_status,
            changed_by: changed_by.into(),
            created_at: Utc::now(),
            attempts: 0,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum NotificationOutcome {
    Sent { recipients: Vec<String> },
    NoRule,
    /// A rule exists but must not fire, e.g. conditions not met or conflicting rules.
    Skipped { reason: String },
    NoRecipients,
    Failed { error: String },
}

impl NotificationOutcome {
    /// Everything except `Failed` is final for the outbox.
    pub fn is_final(&self) -> bool {
        !matches!(self, NotificationOutcome::Failed { .. })
    }
}
