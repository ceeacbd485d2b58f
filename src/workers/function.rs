//! Closure-backed worker.
//!
//! Lets callers register ad-hoc behavior (including failures and slow
//! responses) without writing a new type.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::cluster::{NodeOutput, Proposal, TaskRequest, Vote, WorkerNode};
use crate::domain::Content;

type Handler = dyn Fn(&TaskRequest, &Content) -> Result<NodeOutput> + Send + Sync;

/// A worker whose execute step is a closure
pub struct FnWorker {
    name: String,
    capabilities: Vec<String>,
    handler: Arc<Handler>,
    vote: Vote,
    delay: Option<Duration>,
    reachable: bool,
}

impl FnWorker {
    pub fn new<F>(name: impl Into<String>, capabilities: &[&str], handler: F) -> Self
    where
        F: Fn(&TaskRequest, &Content) -> Result<NodeOutput> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            handler: Arc::new(handler),
            vote: Vote::Agree,
            delay: None,
            reachable: true,
        }
    }

    /// A worker that always errors with `reason`
    pub fn failing(name: impl Into<String>, capabilities: &[&str], reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::new(name, capabilities, move |_, _| Err(anyhow::anyhow!("{}", reason)))
    }

    /// A worker that answers with fixed text
    pub fn constant(name: impl Into<String>, capabilities: &[&str], text: impl Into<String>) -> Self {
        let text = text.into();
        Self::new(name, capabilities, move |_, _| {
            Ok(NodeOutput::new(Content::text(text.clone())))
        })
    }

    pub fn with_vote(mut self, vote: Vote) -> Self {
        self.vote = vote;
        self
    }

    /// Sleep before answering (execute and vote)
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every liveness probe
    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl WorkerNode for FnWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<String> {
        self.capabilities.clone()
    }

    async fn execute(&self, task: &TaskRequest, payload: &Content) -> Result<NodeOutput> {
        self.pause().await;
        (self.handler)(task, payload)
    }

    async fn vote(&self, _proposal: &Proposal) -> Vote {
        self.pause().await;
        self.vote
    }

    async fn ping(&self) -> Result<()> {
        if !self.reachable {
            anyhow::bail!("worker '{}' is unreachable", self.name);
        }
        Ok(())
    }
}
