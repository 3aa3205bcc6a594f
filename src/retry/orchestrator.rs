use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::retry::classifier::{ErrorClassifier, FailureClass, SubstringClassifier};
use crate::retry::credentials::CredentialPicker;

/// Lifecycle of a single wrapped call. Nothing carries over between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Init,
    Attempting,
    Retrying,
    AuthPrompt,
    Success,
    Failed,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub budget: u32,
    pub server_fault_delay: Duration,
    pub overload_delay: Duration,
    pub reauth_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            budget: cfg.budget,
            server_fault_delay: Duration::from_millis(cfg.server_fault_delay_ms),
            overload_delay: Duration::from_millis(cfg.overload_delay_ms),
            reauth_delay: Duration::from_millis(cfg.reauth_delay_ms),
        }
    }
}

/// Wraps hosted-API calls with transient retry and interactive re-authentication.
#[derive(Clone)]
pub struct RetryOrchestrator {
    policy: RetryPolicy,
    classifier: Arc<dyn ErrorClassifier>,
    picker: Option<Arc<dyn CredentialPicker>>,
}

impl RetryOrchestrator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            classifier: Arc::new(SubstringClassifier),
            picker: None,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_picker(mut self, picker: Arc<dyn CredentialPicker>) -> Self {
        self.picker = Some(picker);
        self
    }

    /// Opens the picker when the host has one and no key is selected yet.
    /// A failed or cancelled selection is logged and the call proceeds anyway.
    pub async fn ensure_key_selected(&self) {
        let Some(picker) = &self.picker else {
            return;
        };
        if picker.has_selected_key().await {
            return;
        }
        tracing::info!("no API key selected, opening key picker");
        if let Err(e) = picker.open_select_key().await {
            tracing::warn!(error = %e, "initial key selection failed");
        }
    }

    /// Runs `op` with the configured retry budget.
    pub async fn run<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.run_with_budget(op, self.policy.budget).await
    }

    /// Runs `op`, retrying classified failures while `budget` lasts.
    ///
    /// The error returned is always the last one `op` produced, untouched.
    pub async fn run_with_budget<T, E, F, Fut>(&self, mut op: F, budget: u32) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut remaining = budget;
        let mut attempt: u32 = 0;
        let mut state = CallState::Init;

        loop {
            state = transition(state, CallState::Attempting, attempt);
            attempt += 1;

            let err = match op().await {
                Ok(value) => {
                    transition(state, CallState::Success, attempt);
                    return Ok(value);
                }
                Err(e) => e,
            };

            let message = err.to_string();
            let class = self.classifier.classify(&message);

            if remaining == 0 || class == FailureClass::Terminal {
                tracing::debug!(class = ?class, remaining, error = %message, "propagating API error");
                transition(state, CallState::Failed, attempt);
                return Err(err);
            }

            match class {
                FailureClass::ServerFault | FailureClass::Overload => {
                    let delay = if class == FailureClass::ServerFault {
                        self.policy.server_fault_delay
                    } else {
                        self.policy.overload_delay
                    };
                    tracing::warn!(
                        class = ?class,
                        attempt,
                        remaining,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "transient API failure, retrying"
                    );
                    state = transition(state, CallState::Retrying, attempt);
                    tokio::time::sleep(delay).await;
                }
                FailureClass::Auth => {
                    let Some(picker) = &self.picker else {
                        tracing::debug!(error = %message, "auth failure and no key picker available");
                        transition(state, CallState::Failed, attempt);
                        return Err(err);
                    };
                    tracing::warn!(attempt, remaining, error = %message, "auth failure, prompting for a new API key");
                    state = transition(state, CallState::AuthPrompt, attempt);
                    if let Err(pick_err) = picker.open_select_key().await {
                        tracing::warn!(error = %pick_err, "key selection failed, giving up");
                        transition(state, CallState::Failed, attempt);
                        return Err(err);
                    }
                    tokio::time::sleep(self.policy.reauth_delay).await;
                }
                FailureClass::Terminal => return Err(err),
            }

            remaining -= 1;
        }
    }
}

fn transition(from: CallState, to: CallState, attempt: u32) -> CallState {
    tracing::trace!(from = ?from, to = ?to, attempt, "call state");
    to
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;
    use crate::errors::{StudioError, StudioResult};

    struct FakePicker {
        selected: bool,
        succeed: bool,
        opened: AtomicU32,
    }

    impl FakePicker {
        fn new(succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                selected: true,
                succeed,
                opened: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl CredentialPicker for FakePicker {
        async fn has_selected_key(&self) -> bool {
            self.selected
        }

        async fn open_select_key(&self) -> StudioResult<()> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                Ok(())
            } else {
                Err(StudioError::KeySelection("cancelled".into()))
            }
        }
    }

    /// Fails with each scripted message in turn, then succeeds with the attempt count.
    async fn scripted(calls: &AtomicU32, failures: &[&str]) -> Result<u32, String> {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        match failures.get(n as usize) {
            Some(msg) => Err(msg.to_string()),
            None => Ok(n + 1),
        }
    }

    fn assert_waited(start: Instant, millis: u64) {
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(millis), "waited {elapsed:?}, expected {millis}ms");
        assert!(elapsed < Duration::from_millis(millis + 50), "waited {elapsed:?}, expected {millis}ms");
    }

    fn orchestrator() -> RetryOrchestrator {
        RetryOrchestrator::new(RetryPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn server_fault_waits_three_seconds_and_retries_once() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let result = orchestrator()
            .run(|| scripted(&calls, &["500 Internal Server Error"]))
            .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_waited(start, 3000);
    }

    #[tokio::test(start_paused = true)]
    async fn overload_variants_wait_two_seconds() {
        for msg in ["503 Service Unavailable", "UNAVAILABLE", "model overloaded", "fetch failed"] {
            let script = [msg];
            let calls = AtomicU32::new(0);
            let start = Instant::now();
            let result = orchestrator().run(|| scripted(&calls, &script)).await;
            assert_eq!(result, Ok(2), "message {msg}");
            assert_waited(start, 2000);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_returns_original_error() {
        let calls = AtomicU32::new(0);
        let result = orchestrator()
            .run(|| scripted(&calls, &["500 first", "500 second", "500 third"]))
            .await;
        assert_eq!(result, Err("500 second".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn larger_budget_allows_more_attempts() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let result = orchestrator()
            .run_with_budget(|| scripted(&calls, &["503", "500"]), 2)
            .await;
        assert_eq!(result, Ok(3));
        assert_waited(start, 5000);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_budget_never_retries() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let result = orchestrator()
            .run_with_budget(|| scripted(&calls, &["503"]), 0)
            .await;
        assert_eq!(result, Err("503".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn unrecognised_error_propagates_immediately() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let result = orchestrator()
            .run(|| scripted(&calls, &["content blocked by safety filter"]))
            .await;
        assert_eq!(result, Err("content blocked by safety filter".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_without_picker_propagates_without_delay() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let result = orchestrator().run(|| scripted(&calls, &["403 Forbidden"])).await;
        assert_eq!(result, Err("403 Forbidden".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_with_picker_reselects_and_retries() {
        let picker = FakePicker::new(true);
        let orch = orchestrator().with_picker(picker.clone());
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let result = orch.run(|| scripted(&calls, &["403 permission denied"])).await;
        assert_eq!(result, Ok(2));
        assert_eq!(picker.opened.load(Ordering::SeqCst), 1);
        assert_waited(start, 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_picker_propagates_original_error() {
        let picker = FakePicker::new(false);
        let orch = orchestrator().with_picker(picker.clone());
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let result = orch
            .run(|| scripted(&calls, &["Requested entity was not found."]))
            .await;
        assert_eq!(result, Err("Requested entity was not found.".to_string()));
        assert_eq!(picker.opened.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_retry_spends_budget_before_auth() {
        let picker = FakePicker::new(true);
        let orch = orchestrator().with_picker(picker.clone());
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let result = orch
            .run(|| scripted(&calls, &["503 Service Unavailable", "403 Forbidden"]))
            .await;
        assert_eq!(result, Err("403 Forbidden".to_string()));
        assert_eq!(picker.opened.load(Ordering::SeqCst), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_waited(start, 2000);
    }

    #[tokio::test(start_paused = true)]
    async fn second_auth_failure_after_reselection_is_returned() {
        let picker = FakePicker::new(true);
        let orch = orchestrator().with_picker(picker.clone());
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let result = orch
            .run(|| scripted(&calls, &["403 first key", "403 second key"]))
            .await;
        assert_eq!(result, Err("403 second key".to_string()));
        assert_eq!(picker.opened.load(Ordering::SeqCst), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_waited(start, 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_budget_skips_picker_on_auth_failure() {
        let picker = FakePicker::new(true);
        let orch = orchestrator().with_picker(picker.clone());
        let calls = AtomicU32::new(0);
        let result = orch
            .run_with_budget(|| scripted(&calls, &["403 Forbidden"]), 0)
            .await;
        assert_eq!(result, Err("403 Forbidden".to_string()));
        assert_eq!(picker.opened.load(Ordering::SeqCst), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_classifier_overrides_policy() {
        struct EverythingTransient;
        impl ErrorClassifier for EverythingTransient {
            fn classify(&self, _message: &str) -> FailureClass {
                FailureClass::Overload
            }
        }

        let orch = orchestrator().with_classifier(Arc::new(EverythingTransient));
        let calls = AtomicU32::new(0);
        let result = orch.run(|| scripted(&calls, &["quota hiccup"])).await;
        assert_eq!(result, Ok(2));
    }

    #[tokio::test]
    async fn ensure_key_selected_opens_picker_only_when_unset() {
        let picker = Arc::new(FakePicker {
            selected: false,
            succeed: false,
            opened: AtomicU32::new(0),
        });
        let orch = orchestrator().with_picker(picker.clone());
        orch.ensure_key_selected().await;
        assert_eq!(picker.opened.load(Ordering::SeqCst), 1);

        let selected = FakePicker::new(true);
        let orch = orchestrator().with_picker(selected.clone());
        orch.ensure_key_selected().await;
        assert_eq!(selected.opened.load(Ordering::SeqCst), 0);
    }
}
