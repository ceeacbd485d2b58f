//! Periodic tasks: maintenance ticks and scheduled workflow triggers.
//!
//! Each job runs in its own spawned loop. A tick runs the job to completion
//! before the next tick is taken, so a job never overlaps itself, and a slow
//! job only delays its own loop.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// A workflow triggered on a fixed period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Workflow id to trigger
    pub workflow: String,

    /// Period between triggers in milliseconds
    pub every_ms: u64,

    /// Text input handed to each execution
    #[serde(default)]
    pub input: String,
}

struct ScheduledJob {
    name: String,
    handle: JoinHandle<()>,
}

/// Owns the spawned periodic loops; dropping it stops them
#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `job` every `period`, first after one full period
    pub fn every<F, Fut>(&mut self, name: impl Into<String>, period: Duration, mut job: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let period = period.max(Duration::from_millis(1));
        let label = name.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                debug!(job = %label, "Scheduled tick");
                job().await;
            }
        });

        info!(job = %name, period_ms = period.as_millis() as u64, "Scheduled job started");
        self.jobs.push(ScheduledJob { name, handle });
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.jobs.iter().map(|j| j.name.clone()).collect()
    }

    /// Stop every job with this name
    pub fn cancel(&mut self, name: &str) -> bool {
        let before = self.jobs.len();
        self.jobs.retain(|job| {
            if job.name == name {
                job.handle.abort();
                false
            } else {
                true
            }
        });
        self.jobs.len() != before
    }

    /// Stop all jobs
    pub fn shutdown(&mut self) {
        for job in self.jobs.drain(..) {
            job.handle.abort();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_job_runs_every_period() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut scheduler = Scheduler::new();

        let counter = count.clone();
        scheduler.every("count", Duration::from_millis(100), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        scheduler.shutdown();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(scheduler.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_by_name() {
        let mut scheduler = Scheduler::new();
        scheduler.every("a", Duration::from_secs(1), || async {});
        scheduler.every("b", Duration::from_secs(1), || async {});

        assert!(scheduler.cancel("a"));
        assert!(!scheduler.cancel("a"));
        assert_eq!(scheduler.names(), vec!["b".to_string()]);
    }

    #[test]
    fn test_schedule_config_parsing() {
        let config: ScheduleConfig =
            serde_yaml::from_str("workflow: recalibration\nevery_ms: 60000\n").unwrap();
        assert_eq!(config.workflow, "recalibration");
        assert_eq!(config.input, "");
    }
}
