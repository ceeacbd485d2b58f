//! The engine handle.
//!
//! `Engine` is constructed once at startup and cloned into every caller.
//! It exposes the entry points (submit, trigger, webhook, recalibrate), the
//! read-only projections, and owns the periodic maintenance loops.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::cluster::{ClusterStatus, WorkerNode};
use crate::config::EngineConfig;
use crate::core::{
    ExecutionResult, Orchestrator, Scheduler, WorkflowDefinition, WorkflowStatus,
};
use crate::domain::{Content, TriggerKind, WorkflowExecution};
use crate::error::{HarmoniaError, HarmoniaResult};
use crate::firewall::FirewallStatus;
use crate::memory::MemoryStats;
use crate::workers::builtin_workers;

/// A running execution started by `trigger`
pub struct ExecutionHandle {
    pub execution_id: Uuid,
    pub workflow_id: String,
    pub trigger: TriggerKind,
    task: JoinHandle<Result<WorkflowExecution>>,
}

impl ExecutionHandle {
    /// Wait for the execution to reach a terminal state
    pub async fn wait(self) -> Result<WorkflowExecution> {
        self.task.await.context("Execution task did not finish")?
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// What a webhook delivery led to
pub enum WebhookOutcome {
    Triggered(ExecutionHandle),
    /// No workflow is registered for the path
    PassThrough { path: String },
}

/// Cloneable handle to one engine instance
#[derive(Clone)]
pub struct Engine {
    orchestrator: Arc<Orchestrator>,
    scheduler: Arc<Mutex<Scheduler>>,
}

impl Engine {
    /// An engine with no workers and no background loops
    pub fn new(config: EngineConfig) -> Self {
        Self {
            orchestrator: Arc::new(Orchestrator::new(&config)),
            scheduler: Arc::new(Mutex::new(Scheduler::new())),
        }
    }

    /// Validate config, register the built-in workers, start maintenance
    /// and configured schedules
    pub async fn bootstrap(config: EngineConfig) -> Result<Self> {
        config.validate().context("Invalid engine configuration")?;
        let schedules = config.orchestrator.schedules.clone();
        let engine = Self::new(config);

        for (worker, alignment) in builtin_workers() {
            engine.register_worker(worker, alignment).await?;
        }

        engine.start_maintenance().await;

        for schedule in schedules {
            engine
                .schedule(
                    &schedule.workflow,
                    Content::text(schedule.input),
                    Duration::from_millis(schedule.every_ms),
                )
                .await?;
        }

        info!("Engine ready");
        Ok(engine)
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub async fn register_worker(&self, worker: Arc<dyn WorkerNode>, alignment: f64) -> HarmoniaResult<()> {
        self.orchestrator.register_worker(worker, alignment).await
    }

    pub async fn define_workflow(&self, workflow: WorkflowDefinition) -> HarmoniaResult<()> {
        self.orchestrator.define_workflow(workflow).await
    }

    // ----- Entry points -----

    /// Run the default workflow synchronously
    pub async fn submit(&self, input: Content) -> Result<ExecutionResult> {
        self.orchestrator.submit(input).await
    }

    /// Start a workflow in the background and return immediately
    pub async fn trigger(
        &self,
        workflow_id: &str,
        input: Content,
        trigger: TriggerKind,
    ) -> HarmoniaResult<ExecutionHandle> {
        let execution_id = self.orchestrator.start(workflow_id, input, trigger).await?;

        let orchestrator = Arc::clone(&self.orchestrator);
        let task = tokio::spawn(async move { orchestrator.run(execution_id).await });

        info!(%execution_id, workflow = workflow_id, %trigger, "Execution triggered");
        Ok(ExecutionHandle {
            execution_id,
            workflow_id: workflow_id.to_string(),
            trigger,
            task,
        })
    }

    /// Deliver a webhook payload; unregistered paths pass through untouched
    pub async fn webhook(&self, path: &str, payload: Content) -> HarmoniaResult<WebhookOutcome> {
        match self.orchestrator.webhook_target(path).await {
            Some(workflow_id) => {
                let handle = self.trigger(&workflow_id, payload, TriggerKind::Webhook).await?;
                Ok(WebhookOutcome::Triggered(handle))
            }
            None => {
                info!(path, bytes = payload.len(), "No workflow registered for webhook, passing through");
                Ok(WebhookOutcome::PassThrough {
                    path: path.to_string(),
                })
            }
        }
    }

    pub async fn register_webhook(&self, path: &str, workflow_id: &str) -> HarmoniaResult<()> {
        self.orchestrator.register_webhook(path, workflow_id).await
    }

    /// Trigger a workflow every `every`
    pub async fn schedule(&self, workflow_id: &str, input: Content, every: Duration) -> HarmoniaResult<()> {
        if self.orchestrator.workflow(workflow_id).await.is_none() {
            return Err(HarmoniaError::UnknownWorkflow(workflow_id.to_string()));
        }

        let orchestrator = Arc::clone(&self.orchestrator);
        let workflow = workflow_id.to_string();
        self.scheduler
            .lock()
            .await
            .every(format!("schedule:{}", workflow_id), every, move || {
                let orchestrator = Arc::clone(&orchestrator);
                let workflow = workflow.clone();
                let input = input.clone();
                async move {
                    if let Err(e) = orchestrator
                        .execute(&workflow, input, TriggerKind::Scheduled)
                        .await
                    {
                        error!(workflow = %workflow, error = %e, "Scheduled execution failed");
                    }
                }
            });
        Ok(())
    }

    /// Run the built-in recovery workflow
    pub async fn recalibrate(&self) -> Result<WorkflowExecution> {
        self.orchestrator.recalibrate(TriggerKind::Manual).await
    }

    pub async fn abandon(&self, execution_id: Uuid, reason: &str) -> HarmoniaResult<()> {
        self.orchestrator.abandon(execution_id, reason).await
    }

    // ----- Maintenance -----

    /// Spawn the heartbeat, compaction, pruning, rebalancing and
    /// recalibration-policy loops
    pub async fn start_maintenance(&self) {
        let heartbeat = Duration::from_millis(self.orchestrator.cluster().lock().await.config().heartbeat_interval_ms);
        let period = Duration::from_millis(self.orchestrator.config().maintenance_interval_ms);
        let mut scheduler = self.scheduler.lock().await;

        let orchestrator = Arc::clone(&self.orchestrator);
        scheduler.every("heartbeat", heartbeat, move || {
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                orchestrator.probe_workers().await;
                let report = orchestrator.sweep_heartbeats().await;
                if !report.dead.is_empty() {
                    warn!(dead = ?report.dead, orphaned = report.orphaned.len(), "Nodes removed after missed heartbeats");
                }
            }
        });

        let orchestrator = Arc::clone(&self.orchestrator);
        scheduler.every("compress", period, move || {
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                orchestrator.compact_memory().await;
            }
        });

        let orchestrator = Arc::clone(&self.orchestrator);
        scheduler.every("prune", period, move || {
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                orchestrator.prune_memory().await;
            }
        });

        let orchestrator = Arc::clone(&self.orchestrator);
        scheduler.every("rebalance", period, move || {
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                orchestrator.rebalance_cluster().await;
            }
        });

        let orchestrator = Arc::clone(&self.orchestrator);
        scheduler.every("recalibration-policy", period, move || {
            let orchestrator = Arc::clone(&orchestrator);
            async move {
                if let Err(e) = orchestrator.recalibrate_if_needed().await {
                    error!(error = %e, "Policy recalibration failed");
                }
            }
        });
    }

    /// Names of the running background jobs
    pub async fn jobs(&self) -> Vec<String> {
        self.scheduler.lock().await.names()
    }

    /// Stop all background loops
    pub async fn shutdown(&self) {
        self.scheduler.lock().await.shutdown();
        info!("Engine stopped");
    }

    // ----- Observability -----

    pub async fn get_status(&self, workflow_id: &str) -> HarmoniaResult<WorkflowStatus> {
        self.orchestrator.get_status(workflow_id).await
    }

    pub async fn get_execution(&self, execution_id: Uuid) -> Option<WorkflowExecution> {
        self.orchestrator.get_execution(execution_id).await
    }

    pub async fn get_history(&self, limit: usize) -> Vec<WorkflowExecution> {
        self.orchestrator.get_history(limit).await
    }

    pub async fn list_workflows(&self) -> Vec<WorkflowDefinition> {
        self.orchestrator.list_workflows().await
    }

    pub async fn cluster_status(&self) -> ClusterStatus {
        self.orchestrator.cluster_status().await
    }

    pub async fn memory_stats(&self) -> MemoryStats {
        self.orchestrator.memory_stats().await
    }

    pub async fn firewall_status(&self) -> FirewallStatus {
        self.orchestrator.firewall_status().await
    }
}
