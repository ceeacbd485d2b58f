//! Main orchestrator for workflow execution.
//!
//! Owns the four components, each behind its own lock, and runs workflow
//! steps strictly in order against them. Every state change of an execution
//! is appended to the execution store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::cluster::{
    dispatch, request_consensus, ClusterCoordinator, ClusterStatus, Proposal, SweepReport, TaskMove,
    TaskRequest, WorkerNode,
};
use crate::config::EngineConfig;
use crate::domain::{
    Content, EventType, ExecutionEvent, ExecutionStatus, OutputKind, StepOutput, TriggerKind,
    WorkflowExecution,
};
use crate::error::{HarmoniaError, HarmoniaResult};
use crate::firewall::{Firewall, FirewallStatus, RuleAction, Verdict};
use crate::memory::{CompactionReport, MemoryStats, RetrieveOptions, TieredMemory};
use crate::signal::SignalLayer;

use super::execution_store::ExecutionStore;
use super::limits::{ExecutionLimits, ExecutionTracker, LimitViolation};
use super::scheduler::ScheduleConfig;
use super::workflow::{
    default_workflow, recalibration_workflow, InputSource, Step, StepAction, WorkflowDefinition,
    DEFAULT_WORKFLOW, RECALIBRATION_WORKFLOW,
};

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Execution records kept in memory (default: 256)
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Run the recalibration workflow and retry once when `submit` is rejected
    #[serde(default = "default_retry_after_recalibration")]
    pub retry_after_recalibration: bool,

    /// Default limits for workflows that set none
    #[serde(default)]
    pub limits: ExecutionLimits,

    /// Webhook path to workflow id
    #[serde(default)]
    pub webhooks: BTreeMap<String, String>,

    /// Period of compress/prune/rebalance/recalibration-policy ticks (default: 30s)
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_ms: u64,

    /// Periodic workflow triggers started with the engine
    #[serde(default)]
    pub schedules: Vec<ScheduleConfig>,
}

fn default_history_capacity() -> usize {
    256
}
fn default_retry_after_recalibration() -> bool {
    true
}
fn default_maintenance_interval() -> u64 {
    30_000
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            retry_after_recalibration: default_retry_after_recalibration(),
            limits: ExecutionLimits::default(),
            webhooks: BTreeMap::new(),
            maintenance_interval_ms: default_maintenance_interval(),
            schedules: Vec::new(),
        }
    }
}

/// What `submit` hands back to a caller
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Content>,
    pub rejected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Executions of the default workflow (2 after a recalibration retry)
    pub attempts: u32,
    /// The recalibration execution run between attempts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_execution_id: Option<Uuid>,
}

impl ExecutionResult {
    fn from_execution(execution: &WorkflowExecution, attempts: u32, recovery: Option<Uuid>) -> Self {
        Self {
            execution_id: execution.id,
            status: execution.status,
            result: execution.result.clone(),
            rejected: execution.rejected,
            error: execution.error.clone(),
            attempts,
            recovery_execution_id: recovery,
        }
    }
}

/// Read-only projection of one workflow and its executions
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStatus {
    pub workflow_id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub steps: usize,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub running: usize,
    pub last_execution: Option<DateTime<Utc>>,
    pub last_status: Option<ExecutionStatus>,
}

enum StepResult {
    Continue(StepOutput),
    Rejected(Verdict),
}

/// Main workflow orchestrator
pub struct Orchestrator {
    config: OrchestratorConfig,
    signal: Mutex<SignalLayer>,
    memory: Mutex<TieredMemory>,
    cluster: Mutex<ClusterCoordinator>,
    firewall: Mutex<Firewall>,
    store: Mutex<ExecutionStore>,
    workflows: RwLock<BTreeMap<String, WorkflowDefinition>>,
    webhooks: RwLock<BTreeMap<String, String>>,
}

impl Orchestrator {
    /// Build every component from configuration and register the built-in workflows
    pub fn new(config: &EngineConfig) -> Self {
        let mut workflows = BTreeMap::new();
        for workflow in [default_workflow(), recalibration_workflow()] {
            workflows.insert(workflow.id.clone(), workflow);
        }

        let webhooks = config
            .orchestrator
            .webhooks
            .iter()
            .map(|(path, workflow)| (normalize_path(path), workflow.clone()))
            .collect();

        Self {
            config: config.orchestrator.clone(),
            signal: Mutex::new(SignalLayer::new(config.signal.clone())),
            memory: Mutex::new(TieredMemory::new(config.memory.clone())),
            cluster: Mutex::new(ClusterCoordinator::new(config.cluster.clone())),
            firewall: Mutex::new(Firewall::new(config.firewall.clone())),
            store: Mutex::new(ExecutionStore::new(config.orchestrator.history_capacity)),
            workflows: RwLock::new(workflows),
            webhooks: RwLock::new(webhooks),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn signal(&self) -> &Mutex<SignalLayer> {
        &self.signal
    }

    pub fn memory(&self) -> &Mutex<TieredMemory> {
        &self.memory
    }

    pub fn cluster(&self) -> &Mutex<ClusterCoordinator> {
        &self.cluster
    }

    pub fn firewall(&self) -> &Mutex<Firewall> {
        &self.firewall
    }

    // ----- Workflows and webhooks -----

    /// Validate and register (or replace) a workflow
    pub async fn define_workflow(&self, workflow: WorkflowDefinition) -> HarmoniaResult<()> {
        workflow.validate()?;
        info!(workflow = %workflow.id, steps = workflow.steps.len(), "Workflow defined");
        self.workflows.write().await.insert(workflow.id.clone(), workflow);
        Ok(())
    }

    pub async fn workflow(&self, workflow_id: &str) -> Option<WorkflowDefinition> {
        self.workflows.read().await.get(workflow_id).cloned()
    }

    pub async fn list_workflows(&self) -> Vec<WorkflowDefinition> {
        self.workflows.read().await.values().cloned().collect()
    }

    /// Map a webhook path to a defined workflow
    pub async fn register_webhook(&self, path: &str, workflow_id: &str) -> HarmoniaResult<()> {
        if !self.workflows.read().await.contains_key(workflow_id) {
            return Err(HarmoniaError::UnknownWorkflow(workflow_id.to_string()));
        }
        self.webhooks
            .write()
            .await
            .insert(normalize_path(path), workflow_id.to_string());
        Ok(())
    }

    /// Workflow registered for a webhook path, if any
    pub async fn webhook_target(&self, path: &str) -> Option<String> {
        self.webhooks.read().await.get(&normalize_path(path)).cloned()
    }

    // ----- Cluster membership -----

    /// Add a worker to the cluster and register it as a broadcast peer
    pub async fn register_worker(&self, worker: Arc<dyn WorkerNode>, alignment: f64) -> HarmoniaResult<()> {
        let id = worker.name().to_string();
        self.cluster
            .lock()
            .await
            .add_node(id.clone(), worker, alignment, Utc::now())?;

        let mut signal = self.signal.lock().await;
        let frequency = signal.base_frequency();
        signal.register_peer(id, frequency, alignment);
        Ok(())
    }

    pub async fn remove_worker(&self, node_id: &str) -> HarmoniaResult<()> {
        self.cluster.lock().await.remove_node(node_id, Utc::now())?;
        self.signal.lock().await.remove_peer(node_id);
        Ok(())
    }

    pub async fn heartbeat(&self, node_id: &str, workload: Option<f64>) -> HarmoniaResult<()> {
        self.cluster.lock().await.heartbeat(node_id, Utc::now(), workload)?;
        self.signal.lock().await.set_reachable(node_id, true);
        Ok(())
    }

    // ----- Execution -----

    /// Create a pending execution record without running it
    pub async fn start(&self, workflow_id: &str, input: Content, trigger: TriggerKind) -> HarmoniaResult<Uuid> {
        let workflow = self
            .workflow(workflow_id)
            .await
            .ok_or_else(|| HarmoniaError::UnknownWorkflow(workflow_id.to_string()))?;

        let execution = WorkflowExecution::new(&workflow.id, &workflow.name, trigger, input);
        Ok(self.store.lock().await.create(execution))
    }

    /// Start and run a workflow to completion
    #[instrument(skip(self, input), fields(workflow = %workflow_id, trigger = %trigger))]
    pub async fn execute(
        &self,
        workflow_id: &str,
        input: Content,
        trigger: TriggerKind,
    ) -> Result<WorkflowExecution> {
        let execution_id = self.start(workflow_id, input, trigger).await?;
        self.run(execution_id).await
    }

    /// Run a pending execution's steps in order
    #[instrument(skip(self), fields(execution_id = %execution_id))]
    pub async fn run(&self, execution_id: Uuid) -> Result<WorkflowExecution> {
        let (workflow_id, trigger, input) = {
            let store = self.store.lock().await;
            let execution = store
                .get(&execution_id)
                .ok_or(HarmoniaError::ExecutionNotFound(execution_id))?;
            (execution.workflow_id.clone(), execution.trigger, execution.input.clone())
        };

        let workflow = self
            .workflow(&workflow_id)
            .await
            .ok_or_else(|| HarmoniaError::UnknownWorkflow(workflow_id.clone()))?;
        let limits = workflow
            .limits
            .clone()
            .unwrap_or_else(|| self.config.limits.clone());

        info!(workflow = %workflow.id, "Starting workflow execution");

        match self
            .drive(execution_id, &workflow, trigger, input, &limits)
            .await
        {
            Ok(()) => {}
            Err(HarmoniaError::ExecutionSealed(_)) => {
                info!("Execution was abandoned, stopping");
            }
            Err(e) => return Err(anyhow::Error::new(e).context("Execution store rejected an update")),
        }

        self.get_execution(execution_id)
            .await
            .ok_or_else(|| HarmoniaError::ExecutionNotFound(execution_id).into())
    }

    async fn drive(
        &self,
        execution_id: Uuid,
        workflow: &WorkflowDefinition,
        trigger: TriggerKind,
        input: Content,
        limits: &ExecutionLimits,
    ) -> HarmoniaResult<()> {
        self.append(ExecutionEvent::new(
            execution_id,
            None,
            EventType::ExecutionStarted,
            format!("Workflow '{}' started ({} trigger)", workflow.name, trigger),
        ))
        .await?;

        if let Err(violation) = limits.validate_input(&input) {
            return self.handle_limit_violation(execution_id, violation).await;
        }

        let mut tracker = ExecutionTracker::new();
        let mut outputs: HashMap<String, Content> = HashMap::new();
        let mut last = input.clone();

        for step in &workflow.steps {
            if self.store.lock().await.is_sealed(&execution_id) {
                return Err(HarmoniaError::ExecutionSealed(execution_id));
            }

            if let Err(violation) = limits.check(&tracker) {
                return self.handle_limit_violation(execution_id, violation).await;
            }

            let step_input = match resolve_input(&input, &outputs, step) {
                Ok(content) => content,
                Err(e) => return self.handle_step_failure(execution_id, step, e).await,
            };

            let timeout = step.timeout(limits);
            let step_start = Instant::now();
            let mut open_task = None;
            let result = match tokio::time::timeout(
                timeout,
                self.execute_step(step, &step_input, &mut open_task),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(HarmoniaError::StepTimeout {
                    step: step.id.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            };
            // A cancelled dispatch never reached complete_task
            if let Some(task_id) = open_task {
                self.cluster.lock().await.complete_task(&task_id);
                debug!(step = %step.id, task = %task_id, "Released task of cancelled step");
            }
            let duration_ms = step_start.elapsed().as_millis() as u64;

            match result {
                Ok(StepResult::Continue(output)) => {
                    if let Err(violation) = limits.validate_output(&output.content) {
                        return self.handle_limit_violation(execution_id, violation).await;
                    }
                    tracker.record_step(step_input.len() as u64, output.size_bytes);

                    self.append(
                        ExecutionEvent::new(
                            execution_id,
                            Some(step.id.clone()),
                            EventType::StepCompleted,
                            format!(
                                "Step '{}' ({}) completed in {}ms",
                                step.id,
                                step.action.name(),
                                duration_ms
                            ),
                        )
                        .with_duration(duration_ms),
                    )
                    .await?;

                    debug!(step = %step.id, duration_ms, "Step completed");
                    outputs.insert(step.id.clone(), output.content.clone());
                    last = output.content.clone();
                    self.store.lock().await.record_output(execution_id, output)?;
                }
                Ok(StepResult::Rejected(verdict)) => {
                    return self.handle_rejection(execution_id, step, verdict).await;
                }
                Err(e) => {
                    return self.handle_step_failure(execution_id, step, e).await;
                }
            }
        }

        self.complete_execution(execution_id, workflow, last).await
    }

    /// Call the one component operation a step names
    ///
    /// `open_task` holds the id of a cluster task while it is assigned, so the
    /// caller can release it if this future is dropped mid-dispatch.
    async fn execute_step(
        &self,
        step: &Step,
        input: &Content,
        open_task: &mut Option<Uuid>,
    ) -> HarmoniaResult<StepResult> {
        let output = match &step.action {
            StepAction::Harmonize => {
                let vector = self.signal.lock().await.harmonize(input);
                StepOutput::new(&step.id, OutputKind::Signal, input.clone()).with_detail(detail(&vector))
            }

            StepAction::Broadcast { targets } => {
                let mut signal = self.signal.lock().await;
                let vector = signal.harmonize(input);
                let report = signal.broadcast(&vector, targets);
                StepOutput::new(&step.id, OutputKind::Signal, input.clone())
                    .with_detail(json!({ "vector": vector, "report": report }))
            }

            StepAction::Tune { target_frequency } => {
                let frequency = self.signal.lock().await.tune(*target_frequency);
                StepOutput::new(&step.id, OutputKind::Report, input.clone())
                    .with_detail(json!({ "base_frequency": frequency }))
            }

            StepAction::ResetFrequency => {
                let frequency = self.signal.lock().await.reset_frequency();
                StepOutput::new(&step.id, OutputKind::Report, input.clone())
                    .with_detail(json!({ "base_frequency": frequency }))
            }

            StepAction::Remember {
                importance,
                priority,
            } => {
                let mut memory = self.memory.lock().await;
                let id = memory.store(input.clone(), *importance, *priority);
                let level = memory.fragment(&id).map(|f| f.level);
                StepOutput::new(&step.id, OutputKind::Memory, input.clone())
                    .with_detail(json!({ "fragment_id": id, "level": level }))
            }

            StepAction::Recall {
                max_results,
                min_importance,
            } => {
                let results = self.memory.lock().await.retrieve(
                    &input.as_text(),
                    RetrieveOptions {
                        max_results: *max_results,
                        min_importance: *min_importance,
                    },
                );
                let text = results
                    .iter()
                    .map(|r| r.fragment.content.as_text())
                    .collect::<Vec<_>>()
                    .join("\n\n");
                let matches: Vec<_> = results
                    .iter()
                    .map(|r| json!({ "id": r.fragment.id, "score": r.score, "linked": r.linked }))
                    .collect();
                StepOutput::new(&step.id, OutputKind::Memory, Content::text(text))
                    .with_detail(json!({ "matches": matches }))
            }

            StepAction::Compress => {
                let report = self.memory.lock().await.compress();
                StepOutput::new(&step.id, OutputKind::Report, input.clone()).with_detail(detail(&report))
            }

            StepAction::Prune => {
                let pruned = self.memory.lock().await.prune();
                StepOutput::new(&step.id, OutputKind::Report, input.clone())
                    .with_detail(json!({ "pruned": pruned }))
            }

            StepAction::Dispatch {
                capabilities,
                priority,
            } => {
                let task = TaskRequest::new(format!("step '{}'", step.id), capabilities.clone(), *priority);
                let (assignment, limit) = {
                    let mut cluster = self.cluster.lock().await;
                    let assignment = cluster.assign_task(&task, Utc::now())?;
                    (assignment, Duration::from_millis(cluster.config().dispatch_timeout_ms))
                };
                *open_task = Some(task.id);

                let outcome = dispatch(&self.cluster, &task, &assignment, input, limit).await;
                self.cluster.lock().await.complete_task(&task.id);
                *open_task = None;
                let outcome = outcome?;

                let nodes: Vec<&str> = outcome.outputs.iter().map(|(id, _)| id.as_str()).collect();
                StepOutput::new(&step.id, OutputKind::Dispatch, outcome.merged.clone()).with_detail(json!({
                    "task_id": outcome.task_id,
                    "nodes": nodes,
                    "excluded": outcome.excluded,
                }))
            }

            StepAction::Consensus { timeout_ms } => {
                let limit = match timeout_ms {
                    Some(ms) => Duration::from_millis(*ms),
                    None => Duration::from_millis(self.cluster.lock().await.config().dispatch_timeout_ms),
                };
                let proposal = Proposal::new(format!("step '{}'", step.id), input.clone());
                let outcome = request_consensus(&self.cluster, &proposal, limit).await;
                StepOutput::new(&step.id, OutputKind::Consensus, input.clone()).with_detail(detail(&outcome))
            }

            StepAction::Rebalance => {
                let moves = self.cluster.lock().await.rebalance(Utc::now());
                StepOutput::new(&step.id, OutputKind::Report, input.clone())
                    .with_detail(json!({ "moves": moves }))
            }

            StepAction::Validate => {
                let mut firewall = self.firewall.lock().await;
                let verdict = firewall.validate(input);
                let decision = verdict.decision;
                let content = match decision {
                    RuleAction::Block => return Ok(StepResult::Rejected(verdict)),
                    RuleAction::Purify => firewall.purify(input),
                    RuleAction::Elevate => firewall.elevate(input).content,
                    RuleAction::Allow => input.clone(),
                };
                StepOutput::new(&step.id, OutputKind::Validation, content).with_detail(detail(&verdict))
            }

            StepAction::Purify => {
                let content = self.firewall.lock().await.purify(input);
                StepOutput::new(&step.id, OutputKind::Validation, content)
            }

            StepAction::Elevate => {
                let elevation = self.firewall.lock().await.elevate(input);
                StepOutput::new(&step.id, OutputKind::Validation, elevation.content.clone()).with_detail(json!({
                    "quality_before": elevation.quality_before,
                    "quality_after": elevation.quality_after,
                }))
            }

            StepAction::Recalibrate => {
                let report = self.firewall.lock().await.recalibrate();
                StepOutput::new(&step.id, OutputKind::Report, input.clone()).with_detail(detail(&report))
            }
        };

        Ok(StepResult::Continue(output))
    }

    async fn append(&self, event: ExecutionEvent) -> HarmoniaResult<()> {
        self.store.lock().await.append(event)
    }

    /// Handle a limit violation by logging and sealing the execution
    async fn handle_limit_violation(&self, execution_id: Uuid, violation: LimitViolation) -> HarmoniaResult<()> {
        let error_msg = violation.to_string();
        error!(%error_msg, "Execution limit reached");

        self.append(
            ExecutionEvent::new(
                execution_id,
                None,
                EventType::LimitReached,
                format!("FAILED: limit reached: {}", error_msg),
            )
            .with_error(error_msg),
        )
        .await
    }

    async fn handle_step_failure(&self, execution_id: Uuid, step: &Step, error: HarmoniaError) -> HarmoniaResult<()> {
        let error_msg = error.to_string();
        error!(step = %step.id, %error_msg, "Step failed, execution failed");

        self.append(ExecutionEvent::failed(execution_id, Some(step.id.clone()), error_msg))
            .await
    }

    /// A block is a state transition, not an error
    async fn handle_rejection(&self, execution_id: Uuid, step: &Step, verdict: Verdict) -> HarmoniaResult<()> {
        let failure = HarmoniaError::ValidationFailure {
            reason: verdict.reason.clone(),
        };
        warn!(
            step = %step.id,
            verdict = %verdict.id,
            triggered = ?verdict.triggered,
            failed_closed = verdict.failed_closed,
            "Output rejected by firewall"
        );

        self.append(
            ExecutionEvent::new(
                execution_id,
                Some(step.id.clone()),
                EventType::ExecutionRejected,
                format!("REJECTED at step '{}': {}", step.id, verdict.reason),
            )
            .with_error(failure.to_string()),
        )
        .await
    }

    async fn complete_execution(
        &self,
        execution_id: Uuid,
        workflow: &WorkflowDefinition,
        result: Content,
    ) -> HarmoniaResult<()> {
        info!(workflow = %workflow.id, "Execution completed successfully");

        let event = ExecutionEvent::new(
            execution_id,
            None,
            EventType::ExecutionCompleted,
            format!("Workflow '{}' completed", workflow.name),
        );
        self.store.lock().await.complete(execution_id, result, event)
    }

    /// Run the default workflow; on rejection optionally recalibrate and retry once
    #[instrument(skip(self, input))]
    pub async fn submit(&self, input: Content) -> Result<ExecutionResult> {
        let execution = self
            .execute(DEFAULT_WORKFLOW, input.clone(), TriggerKind::Manual)
            .await?;

        if !(execution.rejected && self.config.retry_after_recalibration) {
            return Ok(ExecutionResult::from_execution(&execution, 1, None));
        }

        warn!(execution_id = %execution.id, "Output rejected, recalibrating before retry");
        let recovery = self.recalibrate(TriggerKind::Manual).await?;
        let retried = self
            .execute(DEFAULT_WORKFLOW, input, TriggerKind::Manual)
            .await?;

        Ok(ExecutionResult::from_execution(&retried, 2, Some(recovery.id)))
    }

    /// Run the built-in recovery workflow
    pub async fn recalibrate(&self, trigger: TriggerKind) -> Result<WorkflowExecution> {
        self.execute(RECALIBRATION_WORKFLOW, Content::text("recalibrate"), trigger)
            .await
            .context("Recalibration workflow failed")
    }

    /// Mark a running execution failed; its task stops before the next step
    pub async fn abandon(&self, execution_id: Uuid, reason: &str) -> HarmoniaResult<()> {
        warn!(%execution_id, reason, "Abandoning execution");
        self.append(ExecutionEvent::failed(
            execution_id,
            None,
            format!("abandoned: {}", reason),
        ))
        .await
    }

    // ----- Maintenance -----

    /// Ping every worker and record a heartbeat for each that answers
    pub async fn probe_workers(&self) -> usize {
        let (members, limit) = {
            let cluster = self.cluster.lock().await;
            (
                cluster.members(),
                Duration::from_millis(cluster.config().dispatch_timeout_ms),
            )
        };

        let mut probes = JoinSet::new();
        for (id, worker) in members {
            probes.spawn(async move {
                let alive = matches!(tokio::time::timeout(limit, worker.ping()).await, Ok(Ok(())));
                (id, alive)
            });
        }

        let mut alive = Vec::new();
        while let Some(joined) = probes.join_next().await {
            if let Ok((id, true)) = joined {
                alive.push(id);
            }
        }

        let now = Utc::now();
        {
            let mut cluster = self.cluster.lock().await;
            for id in &alive {
                if let Err(e) = cluster.heartbeat(id, now, None) {
                    debug!(node = %id, error = %e, "Node left before its heartbeat landed");
                }
            }
        }

        let mut signal = self.signal.lock().await;
        for id in &alive {
            signal.set_reachable(id, true);
        }
        alive.len()
    }

    pub async fn sweep_heartbeats(&self) -> SweepReport {
        let report = self.cluster.lock().await.sweep_heartbeats(Utc::now());
        if !report.dead.is_empty() || !report.degraded.is_empty() {
            let mut signal = self.signal.lock().await;
            for id in &report.degraded {
                signal.set_reachable(id, false);
            }
            for id in &report.dead {
                signal.remove_peer(id);
            }
        }
        report
    }

    pub async fn compact_memory(&self) -> CompactionReport {
        self.memory.lock().await.compress()
    }

    pub async fn prune_memory(&self) -> usize {
        self.memory.lock().await.prune()
    }

    /// Rebalance tasks and pull node alignments together
    pub async fn rebalance_cluster(&self) -> Vec<TaskMove> {
        let (moves, alignments) = {
            let mut cluster = self.cluster.lock().await;
            let moves = cluster.rebalance(Utc::now());
            let coherence = cluster.synchronize_alignment();
            debug!(coherence, "Alignment synchronized");
            let alignments: Vec<(String, f64)> =
                cluster.nodes().map(|n| (n.id.clone(), n.alignment)).collect();
            (moves, alignments)
        };

        let mut signal = self.signal.lock().await;
        for (id, alignment) in alignments {
            signal.set_alignment(&id, alignment);
        }
        moves
    }

    /// Run the recovery workflow when the firewall's block rate is dangerous
    pub async fn recalibrate_if_needed(&self) -> Result<Option<WorkflowExecution>> {
        if !self.firewall.lock().await.needs_recalibration() {
            return Ok(None);
        }
        warn!("Firewall block rate above danger threshold, recalibrating");
        self.recalibrate(TriggerKind::Scheduled).await.map(Some)
    }

    // ----- Observability -----

    pub async fn get_execution(&self, execution_id: Uuid) -> Option<WorkflowExecution> {
        self.store.lock().await.get(&execution_id).cloned()
    }

    /// Most recent executions across all workflows, newest first
    pub async fn get_history(&self, limit: usize) -> Vec<WorkflowExecution> {
        self.store.lock().await.history(limit)
    }

    pub async fn get_status(&self, workflow_id: &str) -> HarmoniaResult<WorkflowStatus> {
        let workflow = self
            .workflow(workflow_id)
            .await
            .ok_or_else(|| HarmoniaError::UnknownWorkflow(workflow_id.to_string()))?;

        let store = self.store.lock().await;
        let counts = store.counts(workflow_id);
        let last = store.for_workflow(workflow_id).first().copied();

        Ok(WorkflowStatus {
            workflow_id: workflow.id.clone(),
            name: workflow.name.clone(),
            description: workflow.description.clone(),
            category: workflow.category.clone(),
            steps: workflow.steps.len(),
            total: counts.total,
            completed: counts.completed,
            failed: counts.failed,
            running: counts.running,
            last_execution: last.map(|e| e.started_at),
            last_status: last.map(|e| e.status),
        })
    }

    pub async fn cluster_status(&self) -> ClusterStatus {
        self.cluster.lock().await.status()
    }

    pub async fn memory_stats(&self) -> MemoryStats {
        self.memory.lock().await.stats()
    }

    pub async fn firewall_status(&self) -> FirewallStatus {
        self.firewall.lock().await.status()
    }

    pub async fn base_frequency(&self) -> f64 {
        self.signal.lock().await.base_frequency()
    }
}

/// Resolve input for a step based on its InputSource
fn resolve_input(
    workflow_input: &Content,
    outputs: &HashMap<String, Content>,
    step: &Step,
) -> HarmoniaResult<Content> {
    match &step.input_from {
        InputSource::PipelineInput(_) => Ok(workflow_input.clone()),

        InputSource::PreviousStep { previous_step } => {
            outputs
                .get(previous_step)
                .cloned()
                .ok_or_else(|| HarmoniaError::InvalidWorkflow {
                    workflow: step.id.clone(),
                    reason: format!(
                        "step '{}' references missing output of step '{}'",
                        step.id, previous_step
                    ),
                })
        }
    }
}

fn detail<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_default()
}

fn normalize_path(path: &str) -> String {
    path.trim().trim_matches('/').to_lowercase()
}
