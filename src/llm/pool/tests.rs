use super::*;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

const COOLDOWN: Duration = Duration::from_secs(300);

enum Step {
    Reply(&'static str),
    Fail(fn(&str) -> LlmError),
    Hang,
}

fn timeout(provider: &str) -> LlmError {
    LlmError::Timeout {
        provider: provider.to_string(),
    }
}

fn rate_limited(provider: &str) -> LlmError {
    LlmError::RateLimited {
        provider: provider.to_string(),
    }
}

fn bad_request(provider: &str) -> LlmError {
    LlmError::Provider {
        provider: provider.to_string(),
        message: "HTTP 400".to_string(),
    }
}

/// Plays back a script of outcomes, repeating the last step forever
struct ScriptedProvider {
    name: &'static str,
    script: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(name: &'static str, script: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            name,
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let mut script = lock(&self.script);
        if script.len() > 1 {
            script.pop_front().unwrap_or(Step::Hang)
        } else {
            match script.front() {
                Some(Step::Reply(text)) => Step::Reply(text),
                Some(Step::Fail(make)) => Step::Fail(*make),
                Some(Step::Hang) | None => Step::Hang,
            }
        }
    }
}

#[async_trait]
impl LanguageModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_step() {
            Step::Reply(text) => Ok(Completion {
                text: text.to_string(),
                provider: self.name.to_string(),
                model: "scripted".to_string(),
                tokens_used: 10,
                latency: Duration::from_millis(5),
            }),
            Step::Fail(make) => Err(make(self.name)),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(timeout(self.name))
            }
        }
    }
}

fn request() -> CompletionRequest {
    CompletionRequest {
        system_instruction: "system".to_string(),
        prompt: "prompt".to_string(),
        max_tokens: 100,
        temperature: 0.3,
    }
}

fn pool(providers: Vec<Arc<ScriptedProvider>>, failure_threshold: u32) -> LlmPool {
    LlmPool::new(
        providers
            .into_iter()
            .map(|p| p as Arc<dyn LanguageModelProvider>)
            .collect(),
        RetryPolicy::default(),
        failure_threshold,
        COOLDOWN,
    )
}

fn provider_health<'a>(snapshot: &'a HealthSnapshot, name: &str) -> &'a ProviderHealth {
    snapshot
        .providers
        .iter()
        .find(|p| p.name == name)
        .expect("provider should be in snapshot")
}

#[tokio::test(start_paused = true)]
async fn fails_over_when_primary_times_out() {
    let primary = ScriptedProvider::new("primary", vec![Step::Fail(timeout)]);
    let fallback = ScriptedProvider::new("fallback", vec![Step::Reply("answer [Source 1]")]);
    let pool = pool(vec![primary.clone(), fallback.clone()], 3);

    let completion = pool
        .generate(&request(), None)
        .await
        .expect("fallback should answer");

    assert_eq!(completion.provider, "fallback");
    assert_eq!(primary.calls(), 3);
    assert_eq!(fallback.calls(), 1);

    let snapshot = pool.health_snapshot();
    let primary_health = provider_health(&snapshot, "primary");
    assert_eq!(primary_health.consecutive_failures, 3);
    assert_eq!(primary_health.state, CircuitState::Open);
    assert_eq!(
        provider_health(&snapshot, "fallback").state,
        CircuitState::Closed
    );
    assert_eq!(snapshot.metrics.total_requests, 1);
    assert_eq!(snapshot.metrics.successful_requests, 1);
    assert_eq!(snapshot.metrics.total_attempts, 4);
    assert_eq!(snapshot.metrics.error_counts.get("timeout"), Some(&3));
    assert_eq!(snapshot.metrics.provider_usage.get("fallback"), Some(&1));
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_between_attempts() {
    let primary = ScriptedProvider::new("primary", vec![Step::Fail(rate_limited)]);
    let pool = pool(vec![primary.clone()], 10);

    let started = Instant::now();
    let result = pool.generate(&request(), None).await;

    assert!(matches!(result, Err(LlmError::Exhausted { .. })));
    assert_eq!(primary.calls(), 3);
    assert_eq!(started.elapsed(), Duration::from_secs(1 + 2));
}

#[tokio::test(start_paused = true)]
async fn hard_errors_fail_fast() {
    let primary = ScriptedProvider::new("primary", vec![Step::Fail(bad_request)]);
    let fallback = ScriptedProvider::new("fallback", vec![Step::Reply("ok")]);
    let pool = pool(vec![primary.clone(), fallback.clone()], 3);

    let started = Instant::now();
    let completion = pool
        .generate(&request(), None)
        .await
        .expect("fallback should answer");

    assert_eq!(completion.provider, "fallback");
    assert_eq!(primary.calls(), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(
        provider_health(&pool.health_snapshot(), "primary").consecutive_failures,
        1
    );
}

#[tokio::test(start_paused = true)]
async fn open_circuit_skips_provider_without_calling_it() {
    let primary = ScriptedProvider::new("primary", vec![Step::Fail(timeout)]);
    let fallback = ScriptedProvider::new("fallback", vec![Step::Reply("ok")]);
    let pool = pool(vec![primary.clone(), fallback.clone()], 3);

    pool.generate(&request(), None)
        .await
        .expect("fallback should answer");
    assert_eq!(primary.calls(), 3);

    pool.generate(&request(), None)
        .await
        .expect("fallback should answer");
    assert_eq!(primary.calls(), 3);
    assert_eq!(fallback.calls(), 2);
    assert_eq!(pool.health_snapshot().metrics.rejected_attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn half_open_probe_closes_circuit_on_success() {
    let primary = ScriptedProvider::new(
        "primary",
        vec![
            Step::Fail(timeout),
            Step::Fail(timeout),
            Step::Fail(timeout),
            Step::Reply("recovered"),
        ],
    );
    let pool = pool(vec![primary.clone()], 3);

    assert!(pool.generate(&request(), None).await.is_err());
    assert_eq!(
        provider_health(&pool.health_snapshot(), "primary").state,
        CircuitState::Open
    );

    tokio::time::advance(COOLDOWN).await;

    let completion = pool
        .generate(&request(), None)
        .await
        .expect("probe should succeed");
    assert_eq!(completion.text, "recovered");
    assert_eq!(primary.calls(), 4);

    let health = pool.health_snapshot();
    let primary_health = provider_health(&health, "primary");
    assert_eq!(primary_health.state, CircuitState::Closed);
    assert_eq!(primary_health.consecutive_failures, 0);
}

#[tokio::test(start_paused = true)]
async fn failed_half_open_attempt_reopens_without_backoff() {
    let primary = ScriptedProvider::new("primary", vec![Step::Fail(timeout)]);
    let pool = pool(vec![primary.clone()], 3);

    assert!(pool.generate(&request(), None).await.is_err());
    tokio::time::advance(COOLDOWN).await;

    let started = Instant::now();
    assert!(pool.generate(&request(), None).await.is_err());
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(primary.calls(), 4);
    assert_eq!(
        provider_health(&pool.health_snapshot(), "primary").state,
        CircuitState::Open
    );
}

#[tokio::test(start_paused = true)]
async fn circuit_opening_mid_retry_skips_backoff() {
    let primary = ScriptedProvider::new("primary", vec![Step::Fail(timeout)]);
    let fallback = ScriptedProvider::new("fallback", vec![Step::Reply("ok")]);
    let pool = pool(vec![primary.clone(), fallback.clone()], 2);

    let started = Instant::now();
    let completion = pool
        .generate(&request(), None)
        .await
        .expect("fallback should answer");

    assert_eq!(completion.provider, "fallback");
    assert_eq!(primary.calls(), 2);
    assert_eq!(started.elapsed(), Duration::from_secs(1));
    assert_eq!(pool.health_snapshot().metrics.rejected_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn deadline_bounds_attempts() {
    let primary = ScriptedProvider::new("primary", vec![Step::Hang]);
    let pool = pool(vec![primary.clone()], 3);

    let started = Instant::now();
    let result = pool
        .generate(&request(), Some(started + Duration::from_secs(2)))
        .await;

    assert!(matches!(result, Err(LlmError::Exhausted { .. })));
    assert_eq!(started.elapsed(), Duration::from_secs(2));
    assert_eq!(primary.calls(), 1);

    let snapshot = pool.health_snapshot();
    assert_eq!(snapshot.metrics.error_counts.get("timeout"), Some(&1));
    assert_eq!(snapshot.metrics.failed_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_attempt_counts_as_timeout() {
    let primary = ScriptedProvider::new("primary", vec![Step::Hang]);
    let pool = pool(vec![primary.clone()], 3);

    let outcome =
        tokio::time::timeout(Duration::from_secs(1), pool.generate(&request(), None)).await;
    assert!(outcome.is_err());

    let snapshot = pool.health_snapshot();
    assert_eq!(
        provider_health(&snapshot, "primary").consecutive_failures,
        1
    );
    assert_eq!(snapshot.metrics.error_counts.get("timeout"), Some(&1));
}

#[tokio::test]
async fn empty_pool_is_exhausted() {
    let pool = pool(Vec::new(), 3);

    let result = pool.generate(&request(), None).await;
    assert!(matches!(result, Err(LlmError::Exhausted { failures }) if failures.is_empty()));
    assert!(pool.provider_names().is_empty());
}

#[tokio::test]
async fn reset_metrics_clears_counters() {
    let primary = ScriptedProvider::new("primary", vec![Step::Reply("ok")]);
    let pool = pool(vec![primary], 3);

    pool.generate(&request(), None)
        .await
        .expect("should answer");
    assert_eq!(pool.health_snapshot().metrics.total_requests, 1);

    pool.reset_metrics();
    let metrics = pool.health_snapshot().metrics;
    assert_eq!(metrics.total_requests, 0);
    assert_eq!(metrics.total_tokens, 0);
}

#[tokio::test(start_paused = true)]
async fn probe_skips_open_circuits() {
    let broken = ScriptedProvider::new("broken", vec![Step::Fail(timeout)]);
    let healthy = ScriptedProvider::new("healthy", vec![Step::Reply("OK")]);
    let pool = pool(vec![broken.clone(), healthy.clone()], 3);

    pool.generate(&request(), None)
        .await
        .expect("healthy provider should answer");
    let broken_calls = broken.calls();

    let results = pool.probe_providers().await;

    assert_eq!(results.len(), 2);
    assert!(!results[0].healthy);
    assert_eq!(results[0].error.as_deref(), Some("circuit open"));
    assert!(results[1].healthy);
    assert_eq!(broken.calls(), broken_calls);
    assert_eq!(pool.health_snapshot().metrics.total_requests, 1);
}

#[test]
fn from_config_skips_providers_without_keys() {
    let config = LlmConfig {
        providers: vec![crate::config::ProviderConfig {
            name: "locked".to_string(),
            kind: crate::config::ProviderKind::OpenAi,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-3.5-turbo".to_string(),
            api_key_env: Some("GROUNDED_RAG_POOL_TEST_KEY_NEVER_SET".to_string()),
            timeout_secs: 30,
        }],
        ..LlmConfig::default()
    };

    let pool = LlmPool::from_config(&config);
    assert!(pool.provider_names().is_empty());
}
