//! In-process job scheduler
//!
//! One driver task per job waits for the trigger and spawns invocations.
//! Each job tracks its in-flight invocations; a firing that would exceed
//! `max_instances` is skipped and counted, never queued.

use super::trigger::{CronTrigger, Interval, Trigger};
use crate::error::SchedulerError;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

pub type JobId = String;

/// Job body; receives the context the scheduler was started with
pub type JobFn<C> = Arc<dyn Fn(C) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Box an async closure as a [`JobFn`]
pub fn job_fn<C, F, Fut>(f: F) -> JobFn<C>
where
    F: Fn(C) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |context| f(context).boxed())
}

/// Registration options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOptions {
    /// Generated when absent
    pub id: Option<JobId>,
    pub max_instances: usize,
    pub replace_existing: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            id: None,
            max_instances: 1,
            replace_existing: false,
        }
    }
}

impl JobOptions {
    pub fn id(id: impl Into<JobId>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn max_instances(mut self, max_instances: usize) -> Self {
        self.max_instances = max_instances.max(1);
        self
    }

    pub fn replace_existing(mut self) -> Self {
        self.replace_existing = true;
        self
    }
}

/// Snapshot of a job's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobStats {
    /// Invocations started
    pub runs: u64,
    /// Firings dropped because `max_instances` were already running
    pub skipped: u64,
    pub in_flight: usize,
}

#[derive(Debug)]
struct Sizing {
    capacity: usize,
    /// Permits still to be retired after `max_instances` shrank under load
    debt: usize,
}

/// Invocation slots of one job id. Outlives job replacement so the cap
/// covers invocations started by the replaced job.
struct JobSlots {
    semaphore: Arc<Semaphore>,
    sizing: Mutex<Sizing>,
}

impl JobSlots {
    fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            sizing: Mutex::new(Sizing { capacity, debt: 0 }),
        }
    }

    fn capacity(&self) -> usize {
        self.sizing.lock().capacity
    }

    fn resize(&self, capacity: usize) {
        let mut sizing = self.sizing.lock();
        let total = sizing.capacity + sizing.debt;
        if capacity >= total {
            self.semaphore.add_permits(capacity - total);
            sizing.debt = 0;
        } else {
            sizing.debt = total - capacity;
        }
        sizing.capacity = capacity;
        self.settle(&mut sizing);
    }

    fn settle(&self, sizing: &mut Sizing) {
        while sizing.debt > 0 {
            match self.semaphore.try_acquire() {
                Ok(permit) => {
                    permit.forget();
                    sizing.debt -= 1;
                }
                Err(_) => break,
            }
        }
    }

    /// A slot for one invocation, or `None` when the job is at capacity
    fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        let mut sizing = self.sizing.lock();
        self.settle(&mut sizing);
        Arc::clone(&self.semaphore).try_acquire_owned().ok()
    }

    fn in_flight(&self) -> usize {
        let sizing = self.sizing.lock();
        (sizing.capacity + sizing.debt).saturating_sub(self.semaphore.available_permits())
    }
}

struct JobCounters {
    runs: AtomicU64,
    skipped: AtomicU64,
    slots: JobSlots,
}

impl JobCounters {
    fn new(max_instances: usize) -> Self {
        Self {
            runs: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            slots: JobSlots::new(max_instances),
        }
    }

    fn snapshot(&self) -> JobStats {
        JobStats {
            runs: self.runs.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            in_flight: self.slots.in_flight(),
        }
    }
}

struct Job<C> {
    id: JobId,
    trigger: Trigger,
    handler: JobFn<C>,
    counters: Arc<JobCounters>,
    registered_at: Instant,
    /// Cancelled when the job is replaced
    retired: CancellationToken,
}

impl<C> Clone for Job<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            trigger: self.trigger.clone(),
            handler: Arc::clone(&self.handler),
            counters: Arc::clone(&self.counters),
            registered_at: self.registered_at,
            retired: self.retired.clone(),
        }
    }
}

struct Running<C> {
    cancel: CancellationToken,
    tracker: TaskTracker,
    context: C,
}

/// Interval and cron jobs for one agent runtime
pub struct Scheduler<C> {
    jobs: Vec<Job<C>>,
    running: Option<Running<C>>,
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self {
            jobs: Vec::new(),
            running: None,
        }
    }
}

impl<C: Clone + Send + Sync + 'static> Scheduler<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_interval(
        &mut self,
        interval: Interval,
        options: JobOptions,
        handler: JobFn<C>,
    ) -> Result<JobId, SchedulerError> {
        let period = interval.period()?;
        self.add(Trigger::Interval(period), options, handler)
    }

    pub fn add_cron(
        &mut self,
        cron: CronTrigger,
        options: JobOptions,
        handler: JobFn<C>,
    ) -> Result<JobId, SchedulerError> {
        let compiled = cron.compile()?;
        self.add(Trigger::Cron(Box::new(compiled)), options, handler)
    }

    fn add(&mut self, trigger: Trigger, options: JobOptions, handler: JobFn<C>) -> Result<JobId, SchedulerError> {
        let id = options
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        let max_instances = options.max_instances.max(1);
        let existing = self.jobs.iter().position(|j| j.id == id);
        let counters = match existing {
            Some(_) if !options.replace_existing => return Err(SchedulerError::DuplicateJob(id)),
            // invocations of the replaced job keep holding their slots
            Some(index) => {
                let counters = Arc::clone(&self.jobs[index].counters);
                counters.slots.resize(max_instances);
                counters
            }
            None => Arc::new(JobCounters::new(max_instances)),
        };
        let job = Job {
            id: id.clone(),
            trigger,
            handler,
            counters,
            registered_at: Instant::now(),
            retired: CancellationToken::new(),
        };

        match existing {
            Some(index) => {
                debug!(job = %id, "Replacing job");
                let old = std::mem::replace(&mut self.jobs[index], job);
                old.retired.cancel();
            }
            None => self.jobs.push(job),
        }
        if let Some(running) = &self.running {
            if let Some(job) = self.jobs.iter().find(|j| j.id == id) {
                spawn_driver(job.clone(), running);
            }
        }
        Ok(id)
    }

    pub fn job_ids(&self) -> Vec<JobId> {
        self.jobs.iter().map(|j| j.id.clone()).collect()
    }

    pub fn stats(&self, id: &str) -> Option<JobStats> {
        self.jobs
            .iter()
            .find(|j| j.id == id)
            .map(|j| j.counters.snapshot())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Start one driver per job, handing `context` to every invocation
    pub fn start(&mut self, context: C) {
        if self.running.is_some() {
            return;
        }
        let running = Running {
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            context,
        };
        for job in &self.jobs {
            spawn_driver(job.clone(), &running);
        }
        self.running = Some(running);
    }

    /// Stop triggering and wait up to `grace` for in-flight invocations
    pub async fn stop(&mut self, grace: Duration) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.cancel.cancel();
        running.tracker.close();
        if tokio::time::timeout(grace, running.tracker.wait()).await.is_err() {
            warn!(grace_ms = grace.as_millis() as u64, "Abandoning in-flight jobs");
        }
    }
}

fn spawn_driver<C: Clone + Send + Sync + 'static>(job: Job<C>, running: &Running<C>) {
    info!(job = %job.id, trigger = %job.trigger.describe(), "Scheduling job");
    let cancel = running.cancel.child_token();
    let retired = job.retired.clone();
    let tracker = running.tracker.clone();
    let context = running.context.clone();
    running.tracker.spawn(async move {
        match job.trigger.clone() {
            Trigger::Interval(period) => {
                let mut ticker = tokio::time::interval_at(job.registered_at + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = retired.cancelled() => break,
                        _ = ticker.tick() => fire(&job, &context, &tracker),
                    }
                }
            }
            Trigger::Cron(cron) => {
                let mut last = Utc::now();
                loop {
                    let Some(next) = cron.next_after(last) else {
                        info!(job = %job.id, "Cron trigger has no further fire times");
                        break;
                    };
                    let wait = (next - Utc::now()).to_std().unwrap_or_default();
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = retired.cancelled() => break,
                        _ = tokio::time::sleep(wait) => fire(&job, &context, &tracker),
                    }
                    last = next.max(Utc::now());
                }
            }
        }
        debug!(job = %job.id, "Job driver stopped");
    });
}

fn fire<C: Clone + Send + Sync + 'static>(job: &Job<C>, context: &C, tracker: &TaskTracker) {
    let Some(permit) = job.counters.slots.try_acquire() else {
        job.counters.skipped.fetch_add(1, Ordering::Relaxed);
        debug!(
            job = %job.id,
            max_instances = job.counters.slots.capacity(),
            "Skipped firing, job still running"
        );
        return;
    };
    job.counters.runs.fetch_add(1, Ordering::Relaxed);

    let invocation = (job.handler)(context.clone());
    let id = job.id.clone();
    tracker.spawn(async move {
        // released when the invocation ends, even on panic
        let _permit = permit;
        if let Err(e) = invocation.await {
            warn!(job = %id, error = %e, "Job failed");
        }
    });
}
