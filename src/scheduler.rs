use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::model::{Execution, Job, JobStatus, CONCURRENCY_FORBID, ONEWAY_SCHEDULE};
use crate::store::Store;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Dispatch callback invoked once per firing, after the per-job exclusion
/// and concurrency checks pass. Passed in at registration time as a
/// closure rather than storing an `Agent` reference on the `Job` value
/// itself, so the scheduler stays decoupled from dispatch/placement.
pub type DispatchFn = Arc<dyn Fn(Execution) -> BoxFuture + Send + Sync>;

/// Owns a cron engine; loads jobs, filters runnable ones, invokes firings.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<Store>,
    dispatch: DispatchFn,
    cron: Mutex<Option<JobScheduler>>,
    started: AtomicBool,
    job_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Scheduler {
    pub fn new(store: Arc<Store>, dispatch: DispatchFn) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                dispatch,
                cron: Mutex::new(None),
                started: AtomicBool::new(false),
                job_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    /// For each job, skips `disabled`/`is_done` ones. `@oneway` jobs fire
    /// immediately and are never registered with the cron engine.
    /// Everything else is registered, then the engine is started.
    pub async fn start(&self, jobs: Vec<Job>) -> Result<()> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;

        for job in jobs {
            if job.disabled || job.is_done {
                continue;
            }

            if job.is_oneway() {
                debug!(job = %job.name, "scheduler: firing @oneway job immediately");
                let this = self.clone();
                let job = job.clone();
                tokio::spawn(async move { this.run_job(job).await });
                continue;
            }

            debug!(job = %job.name, schedule = %job.schedule, "scheduler: adding job to cron");
            let this = self.clone();
            let job_for_closure = job.clone();
            let cron_job = build_cron_job(&job.schedule, move || {
                let this = this.clone();
                let job = job_for_closure.clone();
                Box::pin(async move { this.run_job(job).await }) as BoxFuture
            })?;
            scheduler
                .add(cron_job)
                .await
                .map_err(|e| Error::Backend(e.to_string()))?;
        }

        scheduler
            .start()
            .await
            .map_err(|e| Error::Backend(e.to_string()))?;

        *self.inner.cron.lock().await = Some(scheduler);
        self.inner.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Halts the engine and drops it, so a subsequent `start` begins clean.
    pub async fn stop(&self) -> Result<()> {
        if self.inner.started.swap(false, Ordering::SeqCst) {
            debug!("scheduler: stopping");
            let mut guard = self.inner.cron.lock().await;
            if let Some(mut scheduler) = guard.take() {
                if let Err(e) = scheduler.shutdown().await {
                    warn!(err = %e, "scheduler: error shutting down cron engine");
                }
            }
        }
        Ok(())
    }

    pub async fn restart(&self, jobs: Vec<Job>) -> Result<()> {
        self.stop().await?;
        self.start(jobs).await
    }

    /// `Job.Run`: take the per-job exclusive lock, check runnability, and
    /// dispatch. Two cron ticks of the same job serialize on this lock.
    async fn run_job(&self, job: Job) {
        let lock = self.job_lock(&job.name).await;
        let _guard = lock.lock().await;

        if job.disabled {
            return;
        }

        let status = self.job_status(&job.name).await;
        if status == JobStatus::Running && job.concurrency == CONCURRENCY_FORBID {
            debug!(job = %job.name, concurrency = %job.concurrency, "scheduler: skipping execution, already running");
            return;
        }

        let ex = Execution::new(&job);
        (self.inner.dispatch)(ex).await;
    }

    async fn job_lock(&self, job_name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.inner.job_locks.lock().await;
        locks
            .entry(job_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Derives status from the last execution cohort for this job: any
    /// outstanding member is `Running`; else `Success`/`Failed`/
    /// `PartialyFailed` based on the mix of outcomes. An empty cohort (job
    /// never fired) is vacuously `Success` — nothing blocks the firing.
    async fn job_status(&self, job_name: &str) -> JobStatus {
        let cohort = match self.inner.store.get_last_execution_group(job_name).await {
            Ok(c) => c,
            Err(e) => {
                error!(job = job_name, err = %e, "scheduler: failed to load execution cohort for status check");
                return JobStatus::Success;
            }
        };

        if cohort.iter().any(|ex| ex.is_outstanding()) {
            return JobStatus::Running;
        }

        let (mut success, mut failed) = (0u32, 0u32);
        for ex in &cohort {
            if ex.success {
                success += 1;
            } else {
                failed += 1;
            }
        }

        if failed == 0 {
            JobStatus::Success
        } else if success == 0 {
            JobStatus::Failed
        } else {
            JobStatus::PartialyFailed
        }
    }
}

fn build_cron_job(
    schedule: &str,
    run: impl Fn() -> BoxFuture + Send + Sync + 'static,
) -> Result<CronJob> {
    let schedule = schedule.trim();

    if let Some(duration_str) = schedule.strip_prefix("@every ") {
        let duration = parse_go_duration(duration_str)
            .ok_or_else(|| Error::Config(format!("invalid @every duration: {duration_str}")))?;
        return CronJob::new_repeated_async(duration, move |_uuid, _lock| run())
            .map_err(|e| Error::Config(e.to_string()));
    }

    let cron_expr = match schedule {
        "@yearly" | "@annually" => "0 0 0 1 1 * *".to_string(),
        "@monthly" => "0 0 0 1 * * *".to_string(),
        "@weekly" => "0 0 0 * * 0 *".to_string(),
        "@daily" | "@midnight" => "0 0 0 * * * *".to_string(),
        "@hourly" => "0 0 * * * * *".to_string(),
        other if other == ONEWAY_SCHEDULE => {
            return Err(Error::Config(
                "@oneway jobs must not be registered with the cron engine".to_string(),
            ))
        }
        other => other.to_string(),
    };

    CronJob::new_async(cron_expr.as_str(), move |_uuid, _lock| run())
        .map_err(|e| Error::Config(e.to_string()))
}

/// Parses a Go-style duration literal (`"1h30m10s"`, `"5s"`, …) as used by
/// `@every` schedules.
fn parse_go_duration(s: &str) -> Option<Duration> {
    let mut total = Duration::ZERO;
    let mut digits = String::new();
    let mut any = false;

    for ch in s.chars() {
        if ch.is_ascii_digit() || ch == '.' {
            digits.push(ch);
        } else {
            let value: f64 = digits.parse().ok()?;
            digits.clear();
            let unit = match ch {
                'h' => Duration::from_secs_f64(value * 3600.0),
                'm' => Duration::from_secs_f64(value * 60.0),
                's' => Duration::from_secs_f64(value),
                _ => return None,
            };
            total += unit;
            any = true;
        }
    }

    if !digits.is_empty() || !any {
        return None;
    }
    Some(total)
}
