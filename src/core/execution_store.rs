//! Append-only, bounded execution store.
//!
//! Holds every execution record in memory. Events are only ever appended;
//! once a terminal event lands the record is sealed. When the store is full
//! the oldest finished execution is evicted. Running executions are never
//! evicted.

use std::collections::{HashMap, VecDeque};

use tracing::debug;
use uuid::Uuid;

use crate::domain::{Content, ExecutionEvent, ExecutionStatus, StepOutput, WorkflowExecution};
use crate::error::{HarmoniaError, HarmoniaResult};

/// Per-status execution counts for one workflow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub running: usize,
}

pub struct ExecutionStore {
    capacity: usize,
    executions: HashMap<Uuid, WorkflowExecution>,
    /// Insertion order, oldest first
    order: VecDeque<Uuid>,
}

impl ExecutionStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            executions: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    /// Insert a new execution record, evicting the oldest finished one if full
    pub fn create(&mut self, execution: WorkflowExecution) -> Uuid {
        while self.executions.len() >= self.capacity {
            if !self.evict_oldest_finished() {
                break;
            }
        }

        let id = execution.id;
        self.order.push_back(id);
        self.executions.insert(id, execution);
        id
    }

    fn evict_oldest_finished(&mut self) -> bool {
        let position = self.order.iter().position(|id| {
            self.executions
                .get(id)
                .map(|e| e.is_finished())
                .unwrap_or(true)
        });

        match position.and_then(|pos| self.order.remove(pos)) {
            Some(id) => {
                self.executions.remove(&id);
                debug!(execution_id = %id, "Evicted finished execution");
                true
            }
            None => false,
        }
    }

    /// Append an event to an execution's log
    pub fn append(&mut self, event: ExecutionEvent) -> HarmoniaResult<()> {
        let execution = self.open_mut(event.execution_id)?;
        execution.apply_event(&event);
        Ok(())
    }

    /// Record a completed step's output
    pub fn record_output(&mut self, execution_id: Uuid, output: StepOutput) -> HarmoniaResult<()> {
        let execution = self.open_mut(execution_id)?;
        execution.outputs.insert(output.step_id.clone(), output);
        Ok(())
    }

    /// Set the final result and append the completion event in one update
    pub fn complete(
        &mut self,
        execution_id: Uuid,
        result: Content,
        event: ExecutionEvent,
    ) -> HarmoniaResult<()> {
        let execution = self.open_mut(execution_id)?;
        execution.apply_event(&event);
        execution.result = Some(result);
        Ok(())
    }

    fn open_mut(&mut self, execution_id: Uuid) -> HarmoniaResult<&mut WorkflowExecution> {
        let execution = self
            .executions
            .get_mut(&execution_id)
            .ok_or(HarmoniaError::ExecutionNotFound(execution_id))?;

        if execution.is_finished() {
            return Err(HarmoniaError::ExecutionSealed(execution_id));
        }
        Ok(execution)
    }

    pub fn get(&self, execution_id: &Uuid) -> Option<&WorkflowExecution> {
        self.executions.get(execution_id)
    }

    pub fn is_sealed(&self, execution_id: &Uuid) -> bool {
        self.executions
            .get(execution_id)
            .map(|e| e.is_finished())
            .unwrap_or(false)
    }

    /// Replay an execution's events in order
    pub fn replay(&self, execution_id: &Uuid) -> HarmoniaResult<Vec<ExecutionEvent>> {
        self.executions
            .get(execution_id)
            .map(|e| e.events.clone())
            .ok_or(HarmoniaError::ExecutionNotFound(*execution_id))
    }

    /// Most recent executions, newest first
    pub fn history(&self, limit: usize) -> Vec<WorkflowExecution> {
        self.order
            .iter()
            .rev()
            .filter_map(|id| self.executions.get(id))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Executions of one workflow, newest first
    pub fn for_workflow(&self, workflow_id: &str) -> Vec<&WorkflowExecution> {
        self.order
            .iter()
            .rev()
            .filter_map(|id| self.executions.get(id))
            .filter(|e| e.workflow_id == workflow_id)
            .collect()
    }

    pub fn counts(&self, workflow_id: &str) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for execution in self.executions.values().filter(|e| e.workflow_id == workflow_id) {
            counts.total += 1;
            match execution.status {
                ExecutionStatus::Completed => counts.completed += 1,
                ExecutionStatus::Failed => counts.failed += 1,
                ExecutionStatus::Pending | ExecutionStatus::Running => counts.running += 1,
            }
        }
        counts
    }
}
