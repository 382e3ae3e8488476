//! # Monitor Harness
//!
//! Wraps each periodic monitor with failure isolation: consecutive
//! failures disable that monitor only, with exponential backoff between
//! retries, and a global failure ceiling shuts the whole harness down
//! with a critical self-alert rather than flapping forever.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::alerts::engine::AlertEngine;
use crate::alerts::types::{AlertDraft, AlertPriority, AlertType};
use crate::config::AlertConfig;
use crate::error::Result;
use crate::store::ResourceStore;

/// Dependencies handed to each monitor check.
#[derive(Clone)]
pub struct MonitorContext {
    pub store: Arc<dyn ResourceStore>,
    pub alerts: Arc<AlertEngine>,
    pub config: AlertConfig,
}

#[async_trait]
pub trait Monitor: Send + Sync {
    fn name(&self) -> &'static str;

    async fn check(&self, ctx: &MonitorContext) -> Result<()>;
}

struct MonitorEntry {
    monitor: Arc<dyn Monitor>,
    consecutive_failures: u32,
    disabled: bool,
    /// Earliest next attempt after a failure; None means eligible now.
    next_eligible: Option<Instant>,
}

/// Runs all registered monitors with per-monitor failure isolation.
pub struct MonitorHarness {
    ctx: MonitorContext,
    entries: Mutex<Vec<MonitorEntry>>,
    total_failures: AtomicU32,
    degraded: AtomicBool,
}

impl MonitorHarness {
    pub fn new(ctx: MonitorContext) -> Self {
        Self {
            ctx,
            entries: Mutex::new(Vec::new()),
            total_failures: AtomicU32::new(0),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn register(&self, monitor: Arc<dyn Monitor>) {
        self.entries.lock().push(MonitorEntry {
            monitor,
            consecutive_failures: 0,
            disabled: false,
            next_eligible: None,
        });
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Re-enable a disabled monitor and reset its failure counter.
    pub fn re_enable(&self, name: &str) -> bool {
        let mut entries = self.entries.lock();
        for entry in entries.iter_mut() {
            if entry.monitor.name() == name {
                entry.disabled = false;
                entry.consecutive_failures = 0;
                entry.next_eligible = None;
                return true;
            }
        }
        false
    }

    /// Clear the degraded flag and all per-monitor failure state.
    pub fn reset(&self) {
        self.degraded.store(false, Ordering::Relaxed);
        self.total_failures.store(0, Ordering::Relaxed);
        let mut entries = self.entries.lock();
        for entry in entries.iter_mut() {
            entry.disabled = false;
            entry.consecutive_failures = 0;
            entry.next_eligible = None;
        }
    }

    fn backoff(consecutive_failures: u32) -> Duration {
        let secs = 2u64
            .saturating_pow(consecutive_failures.min(6))
            .min(60);
        Duration::from_secs(secs)
    }

    /// Run every eligible monitor once. Failures are counted, backed
    /// off, and escalated; they never propagate to the caller.
    pub async fn run_all(&self) {
        if self.is_degraded() {
            return;
        }

        let now = Instant::now();
        let eligible: Vec<(usize, Arc<dyn Monitor>)> = {
            let entries = self.entries.lock();
            entries
                .iter()
                .enumerate()
                .filter(|(_, e)| {
                    !e.disabled && e.next_eligible.map_or(true, |t| t <= now)
                })
                .map(|(i, e)| (i, e.monitor.clone()))
                .collect()
        };

        for (index, monitor) in eligible {
            let result = monitor.check(&self.ctx).await;
            match result {
                Ok(()) => {
                    let mut entries = self.entries.lock();
                    if let Some(entry) = entries.get_mut(index) {
                        entry.consecutive_failures = 0;
                        entry.next_eligible = None;
                    }
                    debug!(monitor = monitor.name(), "Monitor check passed");
                }
                Err(e) => {
                    let (failures, disable) = {
                        let mut entries = self.entries.lock();
                        let entry = match entries.get_mut(index) {
                            Some(entry) => entry,
                            None => continue,
                        };
                        entry.consecutive_failures += 1;
                        let failures = entry.consecutive_failures;
                        let disable = failures >= self.ctx.config.monitor_failure_limit;
                        entry.disabled = disable;
                        entry.next_eligible = Some(Instant::now() + Self::backoff(failures));
                        (failures, disable)
                    };
                    let total = self.total_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(
                        monitor = monitor.name(),
                        consecutive_failures = failures,
                        total_failures = total,
                        error = %e,
                        "🛡️ Monitor check failed"
                    );

                    if disable {
                        error!(monitor = monitor.name(), "🔴 Monitor disabled after repeated failures");
                        self.ctx
                            .alerts
                            .create(
                                AlertDraft::new(
                                    AlertType::MonitorDisabled,
                                    AlertPriority::High,
                                    format!("Monitor {} disabled", monitor.name()),
                                    format!(
                                        "{} consecutive failures, last error: {e}",
                                        failures
                                    ),
                                )
                                .meta("monitor", serde_json::json!(monitor.name())),
                            )
                            .await
                            .ok();
                    }

                    if total >= self.ctx.config.global_failure_ceiling {
                        self.degraded.store(true, Ordering::Relaxed);
                        error!("🔴 Monitor harness degraded, all monitoring halted");
                        self.ctx
                            .alerts
                            .create(AlertDraft::new(
                                AlertType::EngineDegraded,
                                AlertPriority::Critical,
                                "Monitoring engine degraded",
                                format!("{total} monitor failures crossed the global ceiling"),
                            ))
                            .await
                            .ok();
                        return;
                    }
                }
            }
        }
    }
}
