
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use super::{Completion, LlmError};

/// Process-wide counters updated on every call and every attempt
#[derive(Debug, Default, Clone)]
pub struct PoolMetrics {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    total_attempts: u64,
    rejected_attempts: u64,
    total_tokens: u64,
    total_latency: Duration,
    provider_usage: BTreeMap<String, u64>,
    error_counts: BTreeMap<String, u64>,
}

/// Read-only copy of [`PoolMetrics`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_attempts: u64,
    pub rejected_attempts: u64,
    pub total_tokens: u64,
    pub average_latency_ms: f64,
    pub success_rate: f64,
    /// Successful completions per provider
    pub provider_usage: BTreeMap<String, u64>,
    /// Failed attempts per error kind
    pub error_counts: BTreeMap<String, u64>,
}

impl PoolMetrics {
    #[inline]
    pub fn record_request(&mut self) {
        self.total_requests += 1;
    }

    #[inline]
    pub fn record_success(&mut self, completion: &Completion) {
        self.total_attempts += 1;
        self.successful_requests += 1;
        self.total_tokens += u64::from(completion.tokens_used);
        self.total_latency += completion.latency;
        *self
            .provider_usage
            .entry(completion.provider.clone())
            .or_default() += 1;
    }

    #[inline]
    pub fn record_attempt_failure(&mut self, error: &LlmError) {
        self.total_attempts += 1;
        *self
            .error_counts
            .entry(error.kind().to_string())
            .or_default() += 1;
    }

    /// An attempt refused by an open circuit, no network call made
    #[inline]
    pub fn record_rejection(&mut self) {
        self.rejected_attempts += 1;
    }

    #[inline]
    pub fn record_exhausted(&mut self) {
        self.failed_requests += 1;
    }

    #[inline]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let average_latency_ms = if self.successful_requests == 0 {
            0.0
        } else {
            self.total_latency.as_secs_f64() * 1000.0 / self.successful_requests as f64
        };

        let finished = self.successful_requests + self.failed_requests;
        let success_rate = if finished == 0 {
            0.0
        } else {
            self.successful_requests as f64 / finished as f64
        };

        MetricsSnapshot {
            total_requests: self.total_requests,
            successful_requests: self.successful_requests,
            failed_requests: self.failed_requests,
            total_attempts: self.total_attempts,
            rejected_attempts: self.rejected_attempts,
            total_tokens: self.total_tokens,
            average_latency_ms,
            success_rate,
            provider_usage: self.provider_usage.clone(),
            error_counts: self.error_counts.clone(),
        }
    }
}
