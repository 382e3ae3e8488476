//! # Task Scheduler
//!
//! Interval-driven job loop for the periodic work: queue drains, monitor
//! sweeps, alert maintenance, predictive checks. Jobs run under a
//! runtime limit, back off exponentially on failure, and revert to their
//! plain interval once the retry budget is spent; a job is never
//! silently disabled by its own failures.

pub mod jobs;

pub use jobs::{default_jobs, JobDeps};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::alerts::{AlertDraft, AlertEngine, AlertPriority, AlertType};
use crate::config::SchedulerConfig;
use crate::constants::events;
use crate::constants::system::JOB_HISTORY_LIMIT;
use crate::error::{Result, WardflowError};
use crate::events::EventPublisher;

/// Execution order among jobs due on the same tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum JobPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        };
        write!(f, "{s}")
    }
}

pub type JobHandler = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

pub struct ScheduledJob {
    pub id: String,
    pub priority: JobPriority,
    pub interval: Duration,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub max_runtime: Duration,
    pub handler: JobHandler,
}

impl ScheduledJob {
    pub fn new(
        id: impl Into<String>,
        priority: JobPriority,
        interval: Duration,
        handler: JobHandler,
    ) -> Self {
        Self {
            id: id.into(),
            priority,
            interval,
            enabled: true,
            last_run: None,
            next_run: Utc::now(),
            retry_count: 0,
            max_retries: 3,
            max_runtime: Duration::from_secs(300),
            handler,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_max_runtime(mut self, max_runtime: Duration) -> Self {
        self.max_runtime = max_runtime;
        self
    }
}

/// One finished job execution.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcome: String,
}

#[derive(Debug, Clone)]
pub struct JobHealth {
    pub id: String,
    pub priority: JobPriority,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    pub retry_count: u32,
}

#[derive(Debug, Clone)]
pub struct SchedulerHealth {
    pub uptime_secs: i64,
    pub total_runs: u64,
    pub total_failures: u64,
    pub success_rate: f64,
    pub average_latency_ms: f64,
    pub jobs: Vec<JobHealth>,
}

/// Exponential retry delay: `min(cap, base * 2^(retry_count - 1))`.
pub fn backoff_delay(config: &SchedulerConfig, retry_count: u32) -> Duration {
    let exponent = retry_count.saturating_sub(1).min(32);
    let delay = config
        .backoff_base_secs
        .saturating_mul(2u64.saturating_pow(exponent))
        .min(config.backoff_cap_secs);
    Duration::from_secs(delay)
}

pub struct Scheduler {
    config: SchedulerConfig,
    alerts: Arc<AlertEngine>,
    publisher: Arc<EventPublisher>,
    jobs: Mutex<Vec<ScheduledJob>>,
    history: Mutex<VecDeque<JobRecord>>,
    started_at: DateTime<Utc>,
    total_runs: AtomicU64,
    total_failures: AtomicU64,
    total_latency_ms: AtomicU64,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        alerts: Arc<AlertEngine>,
        publisher: Arc<EventPublisher>,
    ) -> Self {
        Self {
            config,
            alerts,
            publisher,
            jobs: Mutex::new(Vec::new()),
            history: Mutex::new(VecDeque::new()),
            started_at: Utc::now(),
            total_runs: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
        }
    }

    pub fn add_job(&self, job: ScheduledJob) {
        let mut jobs = self.jobs.lock();
        jobs.retain(|j| j.id != job.id);
        debug!(job_id = %job.id, interval_secs = job.interval.as_secs(), "Job registered");
        jobs.push(job);
    }

    pub fn remove_job(&self, id: &str) -> bool {
        let mut jobs = self.jobs.lock();
        let before = jobs.len();
        jobs.retain(|j| j.id != id);
        jobs.len() != before
    }

    pub fn enable(&self, id: &str) -> bool {
        self.set_enabled(id, true)
    }

    pub fn disable(&self, id: &str) -> bool {
        self.set_enabled(id, false)
    }

    fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut jobs = self.jobs.lock();
        for job in jobs.iter_mut() {
            if job.id == id {
                job.enabled = enabled;
                return true;
            }
        }
        false
    }

    /// Run one job immediately, regardless of its schedule.
    pub async fn force_run(&self, id: &str) -> Result<()> {
        let (handler, max_runtime) = {
            let jobs = self.jobs.lock();
            let job = jobs
                .iter()
                .find(|j| j.id == id)
                .ok_or_else(|| WardflowError::Scheduler(format!("unknown job: {id}")))?;
            (job.handler.clone(), job.max_runtime)
        };
        let outcome = self.execute(id, handler, max_runtime).await;
        self.settle(id, Utc::now(), outcome).await;
        Ok(())
    }

    /// Run every enabled job whose `next_run` has passed, most urgent
    /// first. Per-job isolation: one failure never stops the tick.
    pub async fn tick(&self, now: DateTime<Utc>) {
        let mut due: Vec<(String, JobHandler, Duration, JobPriority)> = {
            let jobs = self.jobs.lock();
            jobs.iter()
                .filter(|j| j.enabled && j.next_run <= now)
                .map(|j| (j.id.clone(), j.handler.clone(), j.max_runtime, j.priority))
                .collect()
        };
        due.sort_by_key(|(_, _, _, priority)| *priority);

        for (id, handler, max_runtime, _) in due {
            let outcome = self.execute(&id, handler, max_runtime).await;
            self.settle(&id, now, outcome).await;
        }
    }

    async fn execute(
        &self,
        id: &str,
        handler: JobHandler,
        max_runtime: Duration,
    ) -> std::result::Result<u64, String> {
        let started = std::time::Instant::now();
        let result = match tokio::time::timeout(max_runtime, handler()).await {
            Ok(Ok(())) => Ok(started.elapsed().as_millis() as u64),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("exceeded runtime limit of {max_runtime:?}")),
        };
        self.total_runs.fetch_add(1, Ordering::Relaxed);
        {
            let mut history = self.history.lock();
            history.push_back(JobRecord {
                job_id: id.to_string(),
                started_at: Utc::now(),
                duration_ms: started.elapsed().as_millis() as u64,
                outcome: match &result {
                    Ok(_) => "success".to_string(),
                    Err(e) => format!("failed: {e}"),
                },
            });
            while history.len() > JOB_HISTORY_LIMIT {
                history.pop_front();
            }
        }
        result
    }

    async fn settle(&self, id: &str, now: DateTime<Utc>, outcome: std::result::Result<u64, String>) {
        match outcome {
            Ok(latency_ms) => {
                self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
                {
                    let mut jobs = self.jobs.lock();
                    if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
                        job.last_run = Some(now);
                        job.next_run = now + chrono::Duration::from_std(job.interval)
                            .unwrap_or_else(|_| chrono::Duration::seconds(60));
                        job.retry_count = 0;
                    }
                }
                debug!(job_id = id, latency_ms, "⏰ Job completed");
                self.publisher
                    .publish(events::JOB_COMPLETED, json!({"job_id": id, "latency_ms": latency_ms}))
                    .await
                    .ok();
            }
            Err(message) => {
                self.total_failures.fetch_add(1, Ordering::Relaxed);
                let exhausted = {
                    let mut jobs = self.jobs.lock();
                    match jobs.iter_mut().find(|j| j.id == id) {
                        Some(job) => {
                            job.retry_count += 1;
                            if job.retry_count > job.max_retries {
                                // Out of retries: back on the plain
                                // interval, never silently disabled.
                                job.retry_count = 0;
                                job.next_run = now
                                    + chrono::Duration::from_std(job.interval)
                                        .unwrap_or_else(|_| chrono::Duration::seconds(60));
                                true
                            } else {
                                let delay = backoff_delay(&self.config, job.retry_count);
                                job.next_run = now
                                    + chrono::Duration::from_std(delay)
                                        .unwrap_or_else(|_| chrono::Duration::seconds(60));
                                false
                            }
                        }
                        None => false,
                    }
                };
                warn!(job_id = id, error = %message, exhausted, "⏰ Job failed");
                self.publisher
                    .publish(events::JOB_FAILED, json!({"job_id": id, "error": message}))
                    .await
                    .ok();
                if exhausted {
                    error!(job_id = id, "🔴 Job exhausted its retry budget");
                    self.alerts
                        .create(
                            AlertDraft::new(
                                AlertType::EngineDegraded,
                                AlertPriority::High,
                                format!("Scheduled job {id} keeps failing"),
                                format!("Job {id} spent its retry budget, last error: {message}"),
                            )
                            .meta("job_id", json!(id)),
                        )
                        .await
                        .ok();
                }
            }
        }
    }

    pub fn health(&self) -> SchedulerHealth {
        let runs = self.total_runs.load(Ordering::Relaxed);
        let failures = self.total_failures.load(Ordering::Relaxed);
        let successes = runs.saturating_sub(failures);
        SchedulerHealth {
            uptime_secs: (Utc::now() - self.started_at).num_seconds(),
            total_runs: runs,
            total_failures: failures,
            success_rate: if runs == 0 {
                1.0
            } else {
                successes as f64 / runs as f64
            },
            average_latency_ms: if successes == 0 {
                0.0
            } else {
                self.total_latency_ms.load(Ordering::Relaxed) as f64 / successes as f64
            },
            jobs: self
                .jobs
                .lock()
                .iter()
                .map(|j| JobHealth {
                    id: j.id.clone(),
                    priority: j.priority,
                    enabled: j.enabled,
                    last_run: j.last_run,
                    next_run: j.next_run,
                    retry_count: j.retry_count,
                })
                .collect(),
        }
    }

    pub fn job_history(&self, limit: usize) -> Vec<JobRecord> {
        self.history.lock().iter().rev().take(limit).cloned().collect()
    }

    /// Scheduler loop: ticks until the shutdown signal flips.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(tick_secs = self.config.tick_secs, "⏰ Scheduler loop started");
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.tick_secs.max(1)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("⏰ Scheduler loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AlertConfig, ScoringConfig};
    use crate::store::memory::MemoryStore;
    use crate::store::ResourceStore;
    use crate::workflow::ActionRegistry;
    use futures::FutureExt;
    use std::sync::atomic::AtomicU32;

    fn scheduler(config: SchedulerConfig) -> Arc<Scheduler> {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let store: Arc<dyn ResourceStore> = Arc::new(MemoryStore::new());
        let publisher = Arc::new(EventPublisher::default());
        let alerts = Arc::new(AlertEngine::new(
            store,
            publisher.clone(),
            Arc::new(ActionRegistry::builtin()),
            AlertConfig::default(),
            ScoringConfig::default(),
            tx,
        ));
        Arc::new(Scheduler::new(config, alerts, publisher))
    }

    fn counting_job(id: &str, counter: Arc<AtomicU32>, fail: bool) -> ScheduledJob {
        ScheduledJob::new(
            id,
            JobPriority::Medium,
            Duration::from_secs(60),
            Arc::new(move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::Relaxed);
                    if fail {
                        Err(WardflowError::Scheduler("job error".to_string()))
                    } else {
                        Ok(())
                    }
                }
                .boxed()
            }),
        )
    }

    #[test]
    fn test_backoff_formula() {
        let config = SchedulerConfig::default();
        assert_eq!(backoff_delay(&config, 1), Duration::from_secs(30));
        assert_eq!(backoff_delay(&config, 2), Duration::from_secs(60));
        assert_eq!(backoff_delay(&config, 3), Duration::from_secs(120));
        assert_eq!(backoff_delay(&config, 4), Duration::from_secs(240));
        // Capped
        assert_eq!(backoff_delay(&config, 5), Duration::from_secs(300));
        assert_eq!(backoff_delay(&config, 40), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_due_job_runs_and_reschedules() {
        let sched = scheduler(SchedulerConfig::default());
        let counter = Arc::new(AtomicU32::new(0));
        sched.add_job(counting_job("tick_me", counter.clone(), false));

        let now = Utc::now();
        sched.tick(now).await;
        assert_eq!(counter.load(Ordering::Relaxed), 1);

        let health = sched.health();
        let job = &health.jobs[0];
        assert_eq!(job.last_run, Some(now));
        assert_eq!(job.next_run, now + chrono::Duration::seconds(60));
        assert_eq!(job.retry_count, 0);

        // Not due again yet
        sched.tick(now + chrono::Duration::seconds(5)).await;
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_failure_backs_off_then_reverts_to_interval() {
        let config = SchedulerConfig::default();
        let sched = scheduler(config.clone());
        let counter = Arc::new(AtomicU32::new(0));
        sched.add_job(counting_job("flaky", counter.clone(), true).with_max_retries(2));

        let mut now = Utc::now();
        // Failures 1 and 2: exponential backoff
        sched.tick(now).await;
        assert_eq!(
            sched.health().jobs[0].next_run,
            now + chrono::Duration::seconds(30)
        );
        now += chrono::Duration::seconds(30);
        sched.tick(now).await;
        assert_eq!(
            sched.health().jobs[0].next_run,
            now + chrono::Duration::seconds(60)
        );

        // Third failure exhausts max_retries=2: plain interval, counter reset
        now += chrono::Duration::seconds(60);
        sched.tick(now).await;
        let job = &sched.health().jobs[0];
        assert_eq!(job.next_run, now + chrono::Duration::seconds(60));
        assert_eq!(job.retry_count, 0);
        assert!(job.enabled, "job must never be silently disabled");
    }

    #[tokio::test]
    async fn test_one_failing_job_does_not_stop_tick() {
        let sched = scheduler(SchedulerConfig::default());
        let failing = Arc::new(AtomicU32::new(0));
        let healthy = Arc::new(AtomicU32::new(0));
        sched.add_job(counting_job("bad", failing.clone(), true));
        sched.add_job(counting_job("good", healthy.clone(), false));

        sched.tick(Utc::now()).await;
        assert_eq!(failing.load(Ordering::Relaxed), 1);
        assert_eq!(healthy.load(Ordering::Relaxed), 1);
        let health = sched.health();
        assert_eq!(health.total_runs, 2);
        assert_eq!(health.total_failures, 1);
        assert_eq!(health.success_rate, 0.5);
    }

    #[tokio::test]
    async fn test_runtime_limit_counts_as_failure() {
        let sched = scheduler(SchedulerConfig::default());
        sched.add_job(
            ScheduledJob::new(
                "sleepy",
                JobPriority::Low,
                Duration::from_secs(60),
                Arc::new(|| {
                    async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(())
                    }
                    .boxed()
                }),
            )
            .with_max_runtime(Duration::from_millis(20)),
        );

        sched.tick(Utc::now()).await;
        assert_eq!(sched.health().total_failures, 1);
        let history = sched.job_history(1);
        assert!(history[0].outcome.contains("runtime limit"));
    }

    #[tokio::test]
    async fn test_disable_and_force_run() {
        let sched = scheduler(SchedulerConfig::default());
        let counter = Arc::new(AtomicU32::new(0));
        sched.add_job(counting_job("toggle", counter.clone(), false));

        assert!(sched.disable("toggle"));
        sched.tick(Utc::now()).await;
        assert_eq!(counter.load(Ordering::Relaxed), 0);

        // Force run ignores the schedule
        sched.force_run("toggle").await.unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert!(sched.force_run("missing").await.is_err());

        assert!(sched.enable("toggle"));
        assert!(sched.remove_job("toggle"));
        assert!(!sched.remove_job("toggle"));
    }
}
