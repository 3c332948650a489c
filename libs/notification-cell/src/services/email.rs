use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, instrument};

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::error::NotificationError;
use crate::models::EmailMessage;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmailDispatcher: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError>;
}

/// Sends mail through the `send-email` edge function so provider credentials
/// stay server-side.
pub struct EdgeFunctionEmailDispatcher {
    supabase: SupabaseClient,
    auth_token: String,
    function_name: String,
    from_name: Option<String>,
    provider: Option<String>,
}

impl EdgeFunctionEmailDispatcher {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
            auth_token: config.service_token().to_string(),
            function_name: config.email_function_name.clone(),
            from_name: config.email_from_name.clone(),
            provider: config.email_provider.clone(),
        }
    }

    fn payload(&self, message: &EmailMessage) -> Value {
        let mut payload = json!({
            "to": message.to,
            "subject": message.subject,
            "body": message.body,
        });
        if let Some(from_name) = &self.from_name {
            payload["fromName"] = json!(from_name);
        }
        if let Some(provider) = &self.provider {
            payload["provider"] = json!(provider);
        }
        payload
    }
}

#[async_trait]
impl EmailDispatcher for EdgeFunctionEmailDispatcher {
    #[instrument(skip(self, message), fields(recipients = message.to.len()))]
    async fn send(&self, message: &EmailMessage) -> Result<(), NotificationError> {
        let response = self
            .supabase
            .invoke_function(&self.function_name, Some(&self.auth_token), self.payload(message))
            .await?;

        if response.get("success").and_then(Value::as_bool) != Some(true) {
            let reason = response
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("email function reported failure")
                .to_string();
            return Err(NotificationError::Dispatch(reason));
        }

        info!("Notification email sent: {}", message.subject);
        Ok(())
    }
}
