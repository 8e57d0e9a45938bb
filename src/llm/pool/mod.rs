#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{
    Admission, CircuitBreaker, CircuitState, Completion, CompletionRequest, LanguageModelProvider,
    LlmError, MetricsSnapshot, PoolMetrics, RetryPolicy, build_provider,
};
use crate::config::LlmConfig;

const HEALTH_CHECK_PROMPT: &str = "Hello, this is a health check. Please respond with 'OK'.";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ProviderSlot {
    provider: Arc<dyn LanguageModelProvider>,
    breaker: Mutex<CircuitBreaker>,
}

/// Ordered set of language-model providers with per-provider retry and circuit breaking.
///
/// Holds the only cross-call mutable state of the engine: one breaker per provider
/// and the aggregate metrics, each behind its own lock.
pub struct LlmPool {
    slots: Vec<ProviderSlot>,
    retry: RetryPolicy,
    metrics: Mutex<PoolMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderHealth {
    pub name: String,
    pub model: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_transition: DateTime<Utc>,
    pub cooldown_remaining_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub providers: Vec<ProviderHealth>,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub provider: String,
    pub healthy: bool,
    pub latency_ms: Option<u128>,
    pub error: Option<String>,
}

/// Settles one attempt against the breaker and metrics.
/// Dropped unsettled means the caller went away mid-request: a timeout-class failure.
struct AttemptGuard<'a> {
    pool: &'a LlmPool,
    slot: &'a ProviderSlot,
    armed: bool,
}

impl<'a> AttemptGuard<'a> {
    fn new(pool: &'a LlmPool, slot: &'a ProviderSlot) -> Self {
        Self {
            pool,
            slot,
            armed: true,
        }
    }

    fn settle(mut self, result: &Result<Completion, LlmError>) {
        self.armed = false;
        match result {
            Ok(completion) => {
                lock(&self.slot.breaker).record_success();
                lock(&self.pool.metrics).record_success(completion);
            }
            Err(error) => self.fail(error),
        }
    }

    fn fail(&self, error: &LlmError) {
        lock(&self.slot.breaker).record_failure(Instant::now());
        lock(&self.pool.metrics).record_attempt_failure(error);
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let provider = self.slot.provider.name().to_string();
            warn!("Request to {} cancelled in flight, counted as timeout", provider);
            self.fail(&LlmError::Timeout { provider });
        }
    }
}

impl LlmPool {
    #[inline]
    pub fn new(
        providers: Vec<Arc<dyn LanguageModelProvider>>,
        retry: RetryPolicy,
        failure_threshold: u32,
        cooldown: Duration,
    ) -> Self {
        let slots = providers
            .into_iter()
            .map(|provider| ProviderSlot {
                provider,
                breaker: Mutex::new(CircuitBreaker::new(failure_threshold, cooldown)),
            })
            .collect();

        Self {
            slots,
            retry: RetryPolicy {
                max_retries: retry.max_retries.max(1),
                ..retry
            },
            metrics: Mutex::default(),
        }
    }

    /// Build every configured provider that has its credentials available
    #[inline]
    pub fn from_config(config: &LlmConfig) -> Self {
        let providers: Vec<_> = config.providers.iter().filter_map(build_provider).collect();

        if providers.is_empty() {
            warn!("No language-model providers available; every generation will fall back");
        } else {
            info!(
                "Language-model pool initialized with {} providers",
                providers.len()
            );
        }

        Self::new(
            providers,
            RetryPolicy::from(config),
            config.failure_threshold,
            config.cooldown(),
        )
    }

    #[inline]
    pub fn provider_names(&self) -> Vec<&str> {
        self.slots.iter().map(|slot| slot.provider.name()).collect()
    }

    /// First successful completion across providers in configured order.
    ///
    /// `deadline` bounds every attempt and every backoff wait.
    #[inline]
    pub async fn generate(
        &self,
        request: &CompletionRequest,
        deadline: Option<Instant>,
    ) -> Result<Completion, LlmError> {
        lock(&self.metrics).record_request();
        let mut failures = Vec::with_capacity(self.slots.len());

        for slot in &self.slots {
            let name = slot.provider.name();

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                failures.push(format!("{name}: deadline exceeded before attempt"));
                continue;
            }

            match self.generate_with(slot, request, deadline).await {
                Ok(completion) => {
                    info!(
                        provider = %completion.provider,
                        model = %completion.model,
                        tokens = completion.tokens_used,
                        latency_ms = completion.latency.as_millis() as u64,
                        "Generation succeeded"
                    );
                    return Ok(completion);
                }
                Err(error) => {
                    warn!("Provider {} failed: {}", name, error);
                    failures.push(format!("{name}: {error}"));
                }
            }
        }

        lock(&self.metrics).record_exhausted();
        error!(
            "All {} language-model providers exhausted",
            self.slots.len()
        );
        Err(LlmError::Exhausted { failures })
    }

    async fn generate_with(
        &self,
        slot: &ProviderSlot,
        request: &CompletionRequest,
        deadline: Option<Instant>,
    ) -> Result<Completion, LlmError> {
        let name = slot.provider.name();
        let timeout_error = || LlmError::Timeout {
            provider: name.to_string(),
        };

        let mut last_error = None;
        for attempt in 1..=self.retry.max_retries {
            let now = Instant::now();
            let remaining = match deadline {
                Some(deadline) if deadline <= now => return Err(timeout_error()),
                Some(deadline) => Some(deadline - now),
                None => None,
            };

            let admission = lock(&slot.breaker).try_acquire(now);
            match admission {
                Admission::Allowed => {}
                Admission::Probe => info!("Sending half-open probe to {}", name),
                Admission::Rejected => {
                    lock(&self.metrics).record_rejection();
                    debug!("Circuit for {} is open, skipping", name);
                    return Err(last_error.unwrap_or_else(|| LlmError::CircuitOpen {
                        provider: name.to_string(),
                    }));
                }
            }

            let guard = AttemptGuard::new(self, slot);
            let result = match remaining {
                Some(remaining) => {
                    tokio::time::timeout(remaining, slot.provider.complete(request))
                        .await
                        .unwrap_or_else(|_| Err(timeout_error()))
                }
                None => slot.provider.complete(request).await,
            };
            guard.settle(&result);

            let error = match result {
                Ok(completion) => return Ok(completion),
                Err(error) => error,
            };

            if !error.is_transient() {
                debug!("Hard error from {}, not retrying: {}", name, error);
                return Err(error);
            }
            if attempt == self.retry.max_retries {
                return Err(error);
            }

            let state = lock(&slot.breaker).state();
            if state == CircuitState::Open {
                debug!("Circuit for {} opened, failing over without backoff", name);
                return Err(error);
            }

            let delay = self.retry.delay_for(attempt);
            if deadline.is_some_and(|deadline| Instant::now() + delay >= deadline) {
                warn!("Backoff of {:?} would overrun the deadline for {}", delay, name);
                return Err(error);
            }

            warn!(
                "Attempt {}/{} on {} failed: {}, retrying in {:?}",
                attempt, self.retry.max_retries, name, error, delay
            );
            tokio::time::sleep(delay).await;
            last_error = Some(error);
        }

        Err(last_error.unwrap_or_else(timeout_error))
    }

    /// Read-only view of every breaker and the aggregate metrics
    #[inline]
    pub fn health_snapshot(&self) -> HealthSnapshot {
        let now = Instant::now();
        let providers = self
            .slots
            .iter()
            .map(|slot| {
                let breaker = lock(&slot.breaker);
                ProviderHealth {
                    name: slot.provider.name().to_string(),
                    model: slot.provider.model().to_string(),
                    state: breaker.state(),
                    consecutive_failures: breaker.consecutive_failures(),
                    last_transition: breaker.last_transition(),
                    cooldown_remaining_secs: breaker.remaining_cooldown(now).as_secs(),
                }
            })
            .collect();

        HealthSnapshot {
            providers,
            metrics: lock(&self.metrics).snapshot(),
        }
    }

    #[inline]
    pub fn reset_metrics(&self) {
        *lock(&self.metrics) = PoolMetrics::default();
        info!("Language-model metrics reset");
    }

    /// Send a tiny request to every provider whose circuit is not open.
    ///
    /// Probes bypass the breakers and metrics.
    #[inline]
    pub async fn probe_providers(&self) -> Vec<ProbeResult> {
        let request = CompletionRequest {
            system_instruction: "Reply briefly.".to_string(),
            prompt: HEALTH_CHECK_PROMPT.to_string(),
            max_tokens: 10,
            temperature: 0.0,
        };

        let probes = self.slots.iter().map(|slot| {
            let request = &request;
            async move {
                let provider = slot.provider.name().to_string();
                if lock(&slot.breaker).state() == CircuitState::Open {
                    return ProbeResult {
                        provider,
                        healthy: false,
                        latency_ms: None,
                        error: Some("circuit open".to_string()),
                    };
                }

                match slot.provider.complete(request).await {
                    Ok(completion) => ProbeResult {
                        provider,
                        healthy: true,
                        latency_ms: Some(completion.latency.as_millis()),
                        error: None,
                    },
                    Err(error) => ProbeResult {
                        provider,
                        healthy: false,
                        latency_ms: None,
                        error: Some(error.to_string()),
                    },
                }
            }
        });

        join_all(probes).await
    }
}
