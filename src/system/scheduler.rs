//! Periodic task scheduler
//!
//! Runs named background jobs on fixed tokio intervals. Rescheduling a name
//! aborts the old job before the replacement starts.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Work executed on every tick of a job
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &'static str;

    /// One tick. Failures are the task's own business; the loop keeps going.
    async fn tick(&self);
}

struct Job {
    name: &'static str,
    every: Duration,
    handle: JoinHandle<()>,
}

#[derive(Default)]
pub struct Scheduler {
    jobs: Mutex<Vec<Job>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `task` every `every`, replacing a job with the same name.
    ///
    /// The first tick fires immediately. Ticks of one job never overlap: a
    /// tick that outlasts the interval swallows the missed ones.
    pub fn schedule(&self, task: Arc<dyn PeriodicTask>, every: Duration) {
        let name = task.name();
        let every = every.max(Duration::from_millis(1));

        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(index) = jobs.iter().position(|job| job.name == name) {
            let old = jobs.swap_remove(index);
            old.handle.abort();
            tracing::debug!("Cancelled {} (every {:?})", name, old.every);
        }

        let handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                task.tick().await;
            }
        });

        tracing::info!("Scheduled {} every {:?}", name, every);
        jobs.push(Job { name, every, handle });
    }

    /// Stop one job. Returns false when nothing was scheduled under `name`.
    pub fn cancel(&self, name: &str) -> bool {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        match jobs.iter().position(|job| job.name == name) {
            Some(index) => {
                jobs.swap_remove(index).handle.abort();
                tracing::debug!("Cancelled {}", name);
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        for job in jobs.drain(..) {
            job.handle.abort();
        }
    }

    pub fn interval_of(&self, name: &str) -> Option<Duration> {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|job| job.name == name)
            .map(|job| job.every)
    }

    /// Names of running jobs, sorted
    pub fn active_jobs(&self) -> Vec<&'static str> {
        let jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<_> = jobs
            .iter()
            .filter(|job| !job.handle.is_finished())
            .map(|job| job.name)
            .collect();
        names.sort_unstable();
        names
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
