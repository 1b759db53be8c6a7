//! Latency bookkeeping for the lowest-latency routing strategy.
//!
//! Samples live in the cache backend under one key per alias, so every router pointed
//! at the same backend sees the same measurements.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::DynCacheBackend;
use crate::config::RoutingConfig;

/// Recorded for a deployment that failed, pushing it out of the buffer until the
/// sample goes stale.
pub const FAILURE_PENALTY: Duration = Duration::from_secs(1000);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub(crate) struct LatencySample {
    /// Seconds per completion token, or plain seconds when the provider reports no usage.
    pub(crate) latency: f64,
    pub(crate) recorded_at_ms: u64,
}

type LatencyMap = HashMap<String, Vec<LatencySample>>;

/// 延迟记录器
#[derive(Clone)]
pub struct LatencyTracker {
    backend: DynCacheBackend,
    ttl: Duration,
    buffer: f64,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(backend: DynCacheBackend, config: &RoutingConfig) -> Self {
        Self {
            backend,
            ttl: config.ttl(),
            buffer: config.lowest_latency_buffer,
            max_samples: config.max_latency_samples,
        }
    }

    fn key(alias: &str) -> String {
        format!("llm_relay:latency:{alias}")
    }

    /// Records a successful call; latency is normalized by completion tokens when known.
    pub async fn record_success(
        &self,
        alias: &str,
        deployment: &str,
        elapsed: Duration,
        completion_tokens: Option<u64>,
    ) {
        let seconds = elapsed.as_secs_f64();
        let latency = match completion_tokens {
            Some(tokens) if tokens > 0 => seconds / tokens as f64,
            _ => seconds,
        };
        self.push(alias, deployment, latency).await;
    }

    pub async fn record_failure(&self, alias: &str, deployment: &str) {
        self.push(alias, deployment, FAILURE_PENALTY.as_secs_f64())
            .await;
    }

    /// Average fresh latency per deployment; deployments without fresh samples are absent.
    pub async fn averages(&self, alias: &str) -> HashMap<String, f64> {
        let now = now_ms();
        self.load(alias)
            .await
            .into_iter()
            .filter_map(|(deployment, samples)| {
                average_fresh(&samples, now, self.ttl).map(|avg| (deployment, avg))
            })
            .collect()
    }

    /// Orders candidate indices for one call.
    ///
    /// The first index is drawn at random among deployments within the latency buffer;
    /// the rest follow by ascending latency and serve as failover targets. Deployments
    /// without fresh samples count as zero latency.
    pub fn attempt_order<R: Rng + ?Sized>(
        &self,
        candidates: &[&str],
        averages: &HashMap<String, f64>,
        rng: &mut R,
    ) -> Vec<usize> {
        attempt_order(candidates, averages, self.buffer, rng)
    }

    async fn load(&self, alias: &str) -> LatencyMap {
        match self.backend.get(&Self::key(alias)).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|err| {
                warn!(alias, error = %err, "discarding unreadable latency record");
                LatencyMap::new()
            }),
            Ok(None) => LatencyMap::new(),
            Err(err) => {
                warn!(alias, error = %err, "failed to read latency record");
                LatencyMap::new()
            }
        }
    }

    async fn push(&self, alias: &str, deployment: &str, latency: f64) {
        let now = now_ms();
        let mut map = self.load(alias).await;
        let samples = map.entry(deployment.to_string()).or_default();
        samples.push(LatencySample {
            latency,
            recorded_at_ms: now,
        });
        if samples.len() > self.max_samples {
            let excess = samples.len() - self.max_samples;
            samples.drain(..excess);
        }
        debug!(alias, deployment, latency, "recorded deployment latency");

        let raw = match serde_json::to_string(&map) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(alias, error = %err, "failed to encode latency record");
                return;
            }
        };
        // 记录保留两个窗口 过期样本在读取时过滤
        if let Err(err) = self
            .backend
            .set(&Self::key(alias), raw, Some(self.ttl * 2))
            .await
        {
            warn!(alias, error = %err, "failed to store latency record");
        }
    }
}

pub(crate) fn average_fresh(samples: &[LatencySample], now_ms: u64, ttl: Duration) -> Option<f64> {
    let ttl_ms = ttl.as_millis() as u64;
    let fresh: Vec<f64> = samples
        .iter()
        .filter(|sample| now_ms.saturating_sub(sample.recorded_at_ms) <= ttl_ms)
        .map(|sample| sample.latency)
        .collect();
    if fresh.is_empty() {
        None
    } else {
        Some(fresh.iter().sum::<f64>() / fresh.len() as f64)
    }
}

pub(crate) fn attempt_order<R: Rng + ?Sized>(
    candidates: &[&str],
    averages: &HashMap<String, f64>,
    buffer: f64,
    rng: &mut R,
) -> Vec<usize> {
    if candidates.is_empty() {
        return Vec::new();
    }
    let latency_of = |idx: usize| averages.get(candidates[idx]).copied().unwrap_or(0.0);

    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|a, b| latency_of(*a).total_cmp(&latency_of(*b)));

    let lowest = latency_of(order[0]);
    let threshold = lowest * (1.0 + buffer);
    let eligible = order
        .iter()
        .take_while(|idx| latency_of(**idx) <= threshold)
        .count();

    let pick = rng.gen_range(0..eligible);
    let first = order.remove(pick);
    order.insert(0, first);
    order
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
