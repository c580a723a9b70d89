//! Resource monitor.
//!
//! Samples process memory on a fixed interval while a call runs, tracks the
//! maximum observed usage, and fails the call when growth over the baseline
//! exceeds the configured limit. `importScript` triggers a manual sample on
//! every entry. Where the host exposes no memory facility the monitor
//! degrades to a no-op that still counts samples.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

const MIB: usize = 1024 * 1024;

/// Snapshot of monitor observations.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceStats {
    /// Most recent sampled usage, in bytes.
    pub current_bytes: usize,
    /// Usage recorded when the monitor started, in bytes.
    pub baseline_bytes: usize,
    /// Maximum sampled usage, in bytes.
    pub max_observed_bytes: usize,
    /// Configured growth limit, in bytes.
    pub limit_bytes: usize,
    /// Growth over baseline as a percentage of the limit.
    pub percent_of_limit: f64,
    /// Time since the monitor started, in milliseconds.
    pub duration_ms: u64,
    /// Samples taken since start.
    pub samples: u64,
}

#[derive(Default)]
struct MonitorState {
    baseline: usize,
    current: usize,
    max_observed: usize,
    samples: u64,
    started_at: Option<Instant>,
    exceeded: Option<(u64, u64)>,
    running: bool,
}

struct Inner {
    limit_bytes: usize,
    interval: Duration,
    state: Mutex<MonitorState>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Periodic memory sampler bound to one engine.
#[derive(Clone)]
pub struct ResourceMonitor {
    inner: Arc<Inner>,
}

fn usage_bytes() -> Option<usize> {
    memory_stats::memory_stats().map(|stats| stats.physical_mem)
}

impl ResourceMonitor {
    /// Create a monitor enforcing `limit_bytes` of growth, sampling every
    /// `check_interval_ms`.
    #[must_use]
    pub fn new(limit_bytes: usize, check_interval_ms: u64) -> Self {
        Self {
            inner: Arc::new(Inner {
                limit_bytes,
                interval: Duration::from_millis(check_interval_ms.max(10)),
                state: Mutex::new(MonitorState::default()),
                task: Mutex::new(None),
            }),
        }
    }

    /// Begin sampling. Re-entrant: a monitor that is already running keeps
    /// its baseline.
    pub fn start(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.running {
                return;
            }
            let baseline = usage_bytes().unwrap_or(0);
            *state = MonitorState {
                baseline,
                current: baseline,
                max_observed: baseline,
                samples: 0,
                started_at: Some(Instant::now()),
                exceeded: None,
                running: true,
            };
        }

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !Inner::sample(&inner) {
                    break;
                }
            }
        });
        *self.inner.task.lock() = Some(handle);
    }

    /// Manual sample, used on every `importScript` entry. Fails once growth
    /// has exceeded the limit.
    pub fn check(&self) -> Result<()> {
        Inner::sample(&self.inner);
        let state = self.inner.state.lock();
        match state.exceeded {
            Some((used_mb, limit_mb)) => Err(Error::MemoryLimit { used_mb, limit_mb }),
            None => Ok(()),
        }
    }

    /// Stop sampling. The recorded statistics remain readable.
    pub fn stop(&self) {
        self.inner.state.lock().running = false;
        if let Some(handle) = self.inner.task.lock().take() {
            handle.abort();
        }
    }

    /// Current observations.
    #[must_use]
    pub fn stats(&self) -> ResourceStats {
        let state = self.inner.state.lock();
        let growth = state.current.saturating_sub(state.baseline);
        ResourceStats {
            current_bytes: state.current,
            baseline_bytes: state.baseline,
            max_observed_bytes: state.max_observed,
            limit_bytes: self.inner.limit_bytes,
            percent_of_limit: if self.inner.limit_bytes == 0 {
                0.0
            } else {
                growth as f64 * 100.0 / self.inner.limit_bytes as f64
            },
            duration_ms: state
                .started_at
                .map(|t| t.elapsed().as_millis() as u64)
                .unwrap_or(0),
            samples: state.samples,
        }
    }

    /// Stop sampling and release the background task.
    pub fn dispose(&self) {
        self.stop();
    }
}

impl Inner {
    /// Take one sample; returns false once the monitor has been stopped.
    fn sample(inner: &Arc<Inner>) -> bool {
        let mut state = inner.state.lock();
        state.samples += 1;
        let Some(current) = usage_bytes() else {
            // No heap facility on this host; keep counting samples.
            return state.running;
        };
        state.current = current;
        state.max_observed = state.max_observed.max(current);

        let growth = current.saturating_sub(state.baseline);
        if growth > inner.limit_bytes {
            let used_mb = (growth / MIB) as u64;
            let limit_mb = (inner.limit_bytes / MIB) as u64;
            if state.exceeded.is_none() {
                tracing::error!(
                    used_mb,
                    limit_mb,
                    "memory limit exceeded during script execution"
                );
            }
            state.exceeded = Some((used_mb, limit_mb));
        } else if inner.limit_bytes > 0
            && growth * 10 >= inner.limit_bytes * 8
            && state.samples % 5 == 0
        {
            tracing::warn!(
                used_mb = growth / MIB,
                limit_mb = inner.limit_bytes / MIB,
                "memory usage above 80% of the configured limit"
            );
        }
        state.running
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_check_counts_samples() {
        let monitor = ResourceMonitor::new(usize::MAX, 1_000);
        monitor.start();
        monitor.check().unwrap();
        monitor.check().unwrap();
        let stats = monitor.stats();
        assert!(stats.samples >= 2);
        monitor.dispose();
    }

    #[tokio::test]
    async fn test_growth_over_limit_fails_check() {
        let monitor = ResourceMonitor::new(0, 1_000);
        monitor.start();
        // Zero allowance: any nonzero growth trips the limit. Allocate enough
        // that RSS visibly moves; if the platform reports nothing the check
        // stays a no-op and this test only asserts it does not panic.
        let _ballast: Vec<u8> = vec![7; 8 * MIB];
        let result = monitor.check();
        if usage_bytes().is_some() {
            // Growth measurement is only as sharp as the allocator; accept
            // either outcome but require stats to stay coherent.
            let stats = monitor.stats();
            assert!(stats.max_observed_bytes >= stats.baseline_bytes);
            drop(result);
        }
        monitor.stop();
    }

    #[tokio::test]
    async fn test_stop_freezes_sampling() {
        let monitor = ResourceMonitor::new(usize::MAX, 10);
        monitor.start();
        monitor.check().unwrap();
        monitor.stop();
        let samples = monitor.stats().samples;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(monitor.stats().samples, samples);
    }

    #[tokio::test]
    async fn test_restart_resets_baseline_window() {
        let monitor = ResourceMonitor::new(usize::MAX, 1_000);
        monitor.start();
        monitor.check().unwrap();
        monitor.stop();
        monitor.start();
        assert_eq!(monitor.stats().samples, 0);
        monitor.dispose();
    }
}
