use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use offline_sync_cell::{HybridStorage, UiLevel};

use crate::error::NotificationError;
use crate::models::{NotificationEvent, NotificationOutcome};
use crate::services::email::EmailDispatcher;
use crate::services::recipients::RecipientResolver;
use crate::services::rules::NotificationRuleStore;
use crate::services::template::{TemplateContext, TemplateRenderer};

/// Turns a status change into at most one e-mail.
pub struct NotificationService {
    rules: Arc<dyn NotificationRuleStore>,
    dispatcher: Arc<dyn EmailDispatcher>,
    storage: Arc<HybridStorage>,
    renderer: TemplateRenderer,
}

impl NotificationService {
    pub fn new(
        rules: Arc<dyn NotificationRuleStore>,
        dispatcher: Arc<dyn EmailDispatcher>,
        storage: Arc<HybridStorage>,
    ) -> Result<Self, NotificationError> {
        Ok(Self {
            rules,
            dispatcher,
            storage,
            renderer: TemplateRenderer::new()?,
        })
    }

    /// Never returns an error: every failure is logged and reported as
    /// [`NotificationOutcome::Failed`] so the caller's write is unaffected.
    #[instrument(skip(self, event), fields(case_id = %event.case.id, status = %event.new_status))]
    pub async fn notify_status_change(&self, event: &NotificationEvent) -> NotificationOutcome {
        match self.try_notify(event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Status change notification failed: {}", e);
                NotificationOutcome::Failed { error: e.to_string() }
            }
        }
    }

    async fn try_notify(&self, event: &NotificationEvent) -> Result<NotificationOutcome, NotificationError> {
        let case = &event.case;

        let mut rules = self.rules.enabled_rules(&case.country, event.new_status).await?;
        let rule = match rules.len() {
            0 => {
                debug!("No notification rule for {} / {}", case.country, event.new_status);
                return Ok(NotificationOutcome::NoRule);
            }
            1 => rules.remove(0),
            count => {
                error!(
                    country = %case.country,
                    count,
                    "Conflicting notification rules, nothing sent"
                );
                return Ok(NotificationOutcome::Skipped {
                    reason: format!("{} enabled rules for {} / {}", count, case.country, event.new_status),
                });
            }
        };

        if !rule.applies_to(case) {
            debug!(rule_id = %rule.id, "Rule conditions not met");
            return Ok(NotificationOutcome::Skipped {
                reason: "rule conditions not met".to_string(),
            });
        }

        let users = self.storage.list_users().await?;
        let recipients = RecipientResolver::new(&rule.recipients, case).resolve(&users);
        if recipients.is_empty() {
            info!(rule_id = %rule.id, "Notification rule matched no recipients");
            return Ok(NotificationOutcome::NoRecipients);
        }

        let quantities = match self.storage.get_case_quantities(case.id).await {
            Ok(quantities) => quantities,
            Err(e) => {
                warn!("Rendering without quantities: {}", e);
                Vec::new()
            }
        };
        let ctx = TemplateContext::for_case(case, event.new_status, &event.changed_by, &quantities);
        let message = self.renderer.render_email(&rule.template, &ctx, recipients.clone());

        self.dispatcher.send(&message).await?;

        info!(count = recipients.len(), "Status change notification sent");
        self.storage.events().notify(
            UiLevel::Info,
            format!(
                "Email notification sent to {} recipient(s) for {}",
                recipients.len(),
                case.case_reference_number
            ),
        );
        Ok(NotificationOutcome::Sent { recipients })
    }
}
