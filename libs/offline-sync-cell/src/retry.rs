use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use case_booking_cell::CaseBookingError;
use shared_config::SyncSettings;
use shared_database::SupabaseError;

use crate::events::{UiEventBus, UiLevel};
use crate::validation::{is_empty_result, validator_for, DataValidator};
use crate::SyncError;

/// Error classification used to decide whether a failed call is retried.
pub trait RetryableError: fmt::Display {
    fn is_permission_denied(&self) -> bool;

    fn is_retryable(&self) -> bool;
}

impl RetryableError for CaseBookingError {
    fn is_permission_denied(&self) -> bool {
        CaseBookingError::is_permission_denied(self)
    }

    fn is_retryable(&self) -> bool {
        !self.is_permanent()
    }
}

impl RetryableError for SyncError {
    fn is_permission_denied(&self) -> bool {
        match self {
            SyncError::PermissionDenied(_) => true,
            SyncError::Booking(e) => e.is_permission_denied(),
            _ => false,
        }
    }

    fn is_retryable(&self) -> bool {
        match self {
            SyncError::RedisError(_) | SyncError::Unavailable(_) => true,
            SyncError::Booking(e) => !e.is_permanent(),
            _ => false,
        }
    }
}

impl RetryableError for anyhow::Error {
    fn is_permission_denied(&self) -> bool {
        if let Some(e) = self.downcast_ref::<SupabaseError>() {
            return e.is_auth();
        }
        if let Some(e) = self.downcast_ref::<CaseBookingError>() {
            return e.is_permission_denied();
        }
        let message = self.to_string().to_lowercase();
        message.contains("permission denied") || message.contains("jwt")
    }

    fn is_retryable(&self) -> bool {
        if let Some(e) = self.downcast_ref::<CaseBookingError>() {
            return !e.is_permanent();
        }
        match self.downcast_ref::<SupabaseError>() {
            Some(SupabaseError::Api { status, .. }) => *status >= 500 || *status == 408 || *status == 429,
            Some(_) => false,
            None => !self.is_permission_denied(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryOptions {
    pub operation_name: String,
    pub max_retries: u32,
    pub auto_retry: bool,
    pub allow_empty_result: bool,
    pub prevent_fake_data: bool,
    pub fallback_to_local_storage: bool,
    pub notify_user: bool,
}

impl RetryOptions {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            max_retries: 3,
            auto_retry: true,
            allow_empty_result: true,
            prevent_fake_data: false,
            fallback_to_local_storage: false,
            notify_user: true,
        }
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn no_retry(mut self) -> Self {
        self.auto_retry = false;
        self
    }

    pub fn require_data(mut self) -> Self {
        self.allow_empty_result = false;
        self
    }

    pub fn prevent_fake_data(mut self) -> Self {
        self.prevent_fake_data = true;
        self
    }

    pub fn with_local_fallback(mut self) -> Self {
        self.fallback_to_local_storage = true;
        self
    }

    pub fn silent(mut self) -> Self {
        self.notify_user = false;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Remote,
    LocalStorage,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    PermissionDenied,
    Rejected,
    Validation,
    EmptyResult,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationResult<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub failure: Option<FailureKind>,
    pub retry_count: u32,
    pub data_source: DataSource,
}

impl<T> OperationResult<T> {
    fn remote(data: T, retry_count: u32) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            failure: None,
            retry_count,
            data_source: DataSource::Remote,
        }
    }

    fn failed(error: String, failure: FailureKind, retry_count: u32) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error),
            failure: Some(failure),
            retry_count,
            data_source: DataSource::None,
        }
    }

    pub fn is_transient_failure(&self) -> bool {
        self.failure == Some(FailureKind::Transient)
    }

    /// Collapses the envelope into a `Result`, mapping the failure kind onto [`SyncError`].
    pub fn into_result(self) -> Result<T, SyncError> {
        let message = self.error.unwrap_or_else(|| "operation returned no data".to_string());
        match (self.data, self.failure) {
            (Some(data), _) if self.success => Ok(data),
            (_, Some(FailureKind::PermissionDenied)) => Err(SyncError::PermissionDenied(message)),
            (_, Some(FailureKind::Validation)) | (_, Some(FailureKind::EmptyResult)) => {
                Err(SyncError::Validation(message))
            }
            (_, Some(FailureKind::Transient)) => Err(SyncError::Unavailable(message)),
            _ => Err(SyncError::Rejected(message)),
        }
    }
}

struct Failure {
    message: String,
    kind: FailureKind,
    attempts: u32,
}

/// Runs remote operations with exponential backoff, result validation and
/// user-facing error events.
#[derive(Clone)]
pub struct RetryExecutor {
    validator: Arc<dyn DataValidator>,
    events: UiEventBus,
    base_delay: Duration,
}

impl RetryExecutor {
    pub fn new(validator: Arc<dyn DataValidator>, events: UiEventBus, base_delay: Duration) -> Self {
        Self {
            validator,
            events,
            base_delay,
        }
    }

    pub fn from_settings(settings: &SyncSettings, events: UiEventBus) -> Self {
        Self::new(
            validator_for(settings.strict_data_validation),
            events,
            Duration::from_millis(settings.retry_base_delay_ms),
        )
    }

    /// Delay before retry number `attempt + 1`: base, 2x base, 4x base...
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }

    pub async fn execute<T, E, F, Fut>(&self, options: &RetryOptions, operation: F) -> OperationResult<T>
    where
        T: Serialize,
        E: RetryableError,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.run(options, operation).await {
            Ok((data, attempts)) => OperationResult::remote(data, attempts),
            Err(failure) => {
                self.report(options, &failure);
                OperationResult::failed(failure.message, failure.kind, failure.attempts)
            }
        }
    }

    /// Like [`execute`](Self::execute), but when the remote call fails
    /// transiently and `fallback_to_local_storage` is set, `fallback` may
    /// supply cached data instead.
    pub async fn execute_with_fallback<T, E, F, Fut, FB, FbFut>(
        &self,
        options: &RetryOptions,
        operation: F,
        fallback: FB,
    ) -> OperationResult<T>
    where
        T: Serialize,
        E: RetryableError,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce() -> FbFut,
        FbFut: Future<Output = Option<T>>,
    {
        let failure = match self.run(options, operation).await {
            Ok((data, attempts)) => return OperationResult::remote(data, attempts),
            Err(failure) => failure,
        };

        if options.fallback_to_local_storage && failure.kind == FailureKind::Transient {
            if let Some(data) = fallback().await {
                warn!(
                    operation = %options.operation_name,
                    "Remote call failed, serving cached data: {}", failure.message
                );
                if options.notify_user {
                    self.events
                        .toast(UiLevel::Warning, "Connection problem. Showing locally cached data.");
                }
                return OperationResult {
                    success: true,
                    data: Some(data),
                    error: Some(failure.message),
                    failure: Some(FailureKind::Transient),
                    retry_count: failure.attempts,
                    data_source: DataSource::LocalStorage,
                };
            }
        }

        self.report(options, &failure);
        OperationResult::failed(failure.message, failure.kind, failure.attempts)
    }

    async fn run<T, E, F, Fut>(&self, options: &RetryOptions, mut operation: F) -> Result<(T, u32), Failure>
    where
        T: Serialize,
        E: RetryableError,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(data) => {
                    self.check(options, &data, attempt)?;
                    if attempt > 0 {
                        debug!(operation = %options.operation_name, attempt, "Succeeded after retry");
                    }
                    return Ok((data, attempt));
                }
                Err(e) => {
                    let permission_denied = e.is_permission_denied();
                    let retryable = !permission_denied && e.is_retryable();

                    if options.auto_retry && retryable && attempt < options.max_retries {
                        let delay = self.backoff(attempt);
                        warn!(
                            operation = %options.operation_name,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            "Retrying after error: {}", e
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    let kind = if permission_denied {
                        FailureKind::PermissionDenied
                    } else if retryable {
                        FailureKind::Transient
                    } else {
                        FailureKind::Rejected
                    };
                    return Err(Failure {
                        message: e.to_string(),
                        kind,
                        attempts: attempt,
                    });
                }
            }
        }
    }

    fn check<T: Serialize>(&self, options: &RetryOptions, data: &T, attempts: u32) -> Result<(), Failure> {
        if options.allow_empty_result && !options.prevent_fake_data {
            return Ok(());
        }

        let value = serde_json::to_value(data).map_err(|e| Failure {
            message: format!("Result could not be inspected: {}", e),
            kind: FailureKind::Validation,
            attempts,
        })?;

        if !options.allow_empty_result && is_empty_result(&value) {
            return Err(Failure {
                message: format!("{} returned no data", options.operation_name),
                kind: FailureKind::EmptyResult,
                attempts,
            });
        }

        if options.prevent_fake_data {
            self.validator
                .validate(&options.operation_name, &value)
                .map_err(|reason| Failure {
                    message: reason,
                    kind: FailureKind::Validation,
                    attempts,
                })?;
        }

        Ok(())
    }

    fn report(&self, options: &RetryOptions, failure: &Failure) {
        error!(
            operation = %options.operation_name,
            kind = ?failure.kind,
            retries = failure.attempts,
            "Operation failed: {}", failure.message
        );

        if !options.notify_user {
            return;
        }

        let message = match failure.kind {
            FailureKind::PermissionDenied => {
                format!("You do not have permission to {}.", options.operation_name)
            }
            FailureKind::Validation | FailureKind::EmptyResult => {
                format!("{} returned invalid data: {}", options.operation_name, failure.message)
            }
            _ => format!("Failed to {}: {}", options.operation_name, failure.message),
        };
        self.events.toast(UiLevel::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::UiEvent;
    use crate::validation::{FakeDataValidator, LEGACY_COUNTRIES};
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn executor(events: UiEventBus) -> RetryExecutor {
        RetryExecutor::new(Arc::new(FakeDataValidator), events, Duration::from_millis(1))
    }

    fn transient() -> CaseBookingError {
        CaseBookingError::Remote(anyhow::anyhow!("connection reset"))
    }

    fn forbidden() -> CaseBookingError {
        CaseBookingError::Remote(SupabaseError::Auth("permission denied for table".to_string()).into())
    }

    #[test]
    fn test_backoff_doubles() {
        let executor = RetryExecutor::new(Arc::new(FakeDataValidator), UiEventBus::default(), Duration::from_secs(1));
        assert_eq!(executor.backoff(0), Duration::from_secs(1));
        assert_eq!(executor.backoff(1), Duration::from_secs(2));
        assert_eq!(executor.backoff(2), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = executor(UiEventBus::default())
            .execute(&RetryOptions::new("load cases"), move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok(vec!["case"])
                }
            })
            .await;

        assert!(result.success);
        assert_eq!(result.retry_count, 2);
        assert_eq!(result.data_source, DataSource::Remote);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permission_errors_are_not_retried() {
        let events = UiEventBus::default();
        let mut rx = events.subscribe();
        let calls = AtomicU32::new(0);
        let counter = &calls;

        let result: OperationResult<Vec<String>> = executor(events)
            .execute(&RetryOptions::new("update case status"), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(forbidden())
            })
            .await;

        assert!(!result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.failure, Some(FailureKind::PermissionDenied));
        assert_matches!(rx.try_recv(), Ok(UiEvent::ShowToast { level: UiLevel::Error, .. }));
        assert_matches!(result.into_result(), Err(SyncError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_exhaustion_reports_retry_count() {
        let result: OperationResult<Vec<String>> = executor(UiEventBus::default())
            .execute(&RetryOptions::new("load cases").max_retries(2).silent(), || async {
                Err(transient())
            })
            .await;

        assert!(!result.success);
        assert_eq!(result.retry_count, 2);
        assert!(result.is_transient_failure());
    }

    #[tokio::test]
    async fn test_fake_data_is_a_hard_failure() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = executor(UiEventBus::default())
            .execute(&RetryOptions::new("load countries").prevent_fake_data(), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, CaseBookingError>(LEGACY_COUNTRIES.to_vec())
            })
            .await;

        assert!(!result.success);
        assert_eq!(result.failure, Some(FailureKind::Validation));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_result_policy() {
        let exec = executor(UiEventBus::default());

        let allowed = exec
            .execute(&RetryOptions::new("load users"), || async { Ok::<Vec<String>, CaseBookingError>(vec![]) })
            .await;
        assert!(allowed.success);

        let rejected = exec
            .execute(&RetryOptions::new("load users").require_data().silent(), || async {
                Ok::<Vec<String>, CaseBookingError>(vec![])
            })
            .await;
        assert_eq!(rejected.failure, Some(FailureKind::EmptyResult));
    }

    #[tokio::test]
    async fn test_fallback_serves_cached_data() {
        let events = UiEventBus::default();
        let mut rx = events.subscribe();

        let result = executor(events)
            .execute_with_fallback(
                &RetryOptions::new("load cases").no_retry().with_local_fallback(),
                || async { Err::<Vec<String>, _>(transient()) },
                || async { Some(vec!["cached".to_string()]) },
            )
            .await;

        assert!(result.success);
        assert_eq!(result.data_source, DataSource::LocalStorage);
        assert_eq!(result.data, Some(vec!["cached".to_string()]));
        assert_matches!(rx.try_recv(), Ok(UiEvent::ShowToast { level: UiLevel::Warning, .. }));
    }

    #[tokio::test]
    async fn test_fallback_skipped_for_permission_errors() {
        let result = executor(UiEventBus::default())
            .execute_with_fallback(
                &RetryOptions::new("load cases").with_local_fallback().silent(),
                || async { Err::<Vec<String>, _>(forbidden()) },
                || async { Some(vec!["cached".to_string()]) },
            )
            .await;

        assert!(!result.success);
        assert_eq!(result.data_source, DataSource::None);
    }

    #[test]
    fn test_anyhow_classification() {
        let api_500: anyhow::Error = SupabaseError::Api { status: 500, message: "boom".into() }.into();
        let api_400: anyhow::Error = SupabaseError::Api { status: 400, message: "bad".into() }.into();
        let network = anyhow::anyhow!("error sending request");

        assert!(api_500.is_retryable());
        assert!(!api_400.is_retryable());
        assert!(network.is_retryable());
        assert!(!network.is_permission_denied());
    }
}
