//! Built-in worker nodes.
//!
//! Small deterministic workers the engine registers at start-up so that the
//! default workflow has a cluster to dispatch to.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

use crate::cluster::{NodeOutput, Proposal, TaskRequest, Vote, WorkerNode};
use crate::domain::Content;
use crate::firewall::rules::contains_phrase;

/// Returns its payload unchanged
pub struct EchoWorker {
    name: String,
}

impl EchoWorker {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for EchoWorker {
    fn default() -> Self {
        Self::new("echo")
    }
}

#[async_trait]
impl WorkerNode for EchoWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["echo".to_string(), "general".to_string()]
    }

    async fn execute(&self, _task: &TaskRequest, payload: &Content) -> Result<NodeOutput> {
        Ok(NodeOutput::new(payload.clone()).with_confidence(1.0))
    }
}

/// Truncates its payload to a fixed number of words
pub struct SummarizerWorker {
    name: String,
    max_words: usize,
}

impl SummarizerWorker {
    pub fn new(name: impl Into<String>, max_words: usize) -> Self {
        Self {
            name: name.into(),
            max_words: max_words.max(1),
        }
    }
}

impl Default for SummarizerWorker {
    fn default() -> Self {
        Self::new("summarizer", 24)
    }
}

#[async_trait]
impl WorkerNode for SummarizerWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["summarize".to_string(), "general".to_string()]
    }

    async fn execute(&self, _task: &TaskRequest, payload: &Content) -> Result<NodeOutput> {
        let words = payload.word_count();
        let confidence = if words <= self.max_words {
            1.0
        } else {
            self.max_words as f64 / words as f64
        };
        Ok(NodeOutput::new(payload.summarize(self.max_words)).with_confidence(confidence))
    }

    /// Rejects proposals too long to summarize faithfully
    async fn vote(&self, proposal: &Proposal) -> Vote {
        if proposal.content.word_count() > self.max_words * 20 {
            Vote::Disagree
        } else {
            Vote::Agree
        }
    }
}

/// Extracts the most frequent non-trivial terms
pub struct KeywordWorker {
    name: String,
    limit: usize,
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "i",
    "in", "is", "it", "its", "me", "my", "of", "on", "or", "so", "that", "the", "this", "to",
    "was", "we", "were", "will", "with", "you", "your",
];

impl KeywordWorker {
    pub fn new(name: impl Into<String>, limit: usize) -> Self {
        Self {
            name: name.into(),
            limit: limit.max(1),
        }
    }

    /// Terms ordered by frequency, then first appearance
    pub fn keywords(&self, content: &Content) -> Vec<String> {
        let tokens = content.tokens();
        let mut counts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();

        for (position, token) in tokens.iter().enumerate() {
            if token.len() < 3 || STOPWORDS.contains(&token.as_str()) {
                continue;
            }
            counts.entry(token.as_str()).or_insert((0, position)).0 += 1;
        }

        let mut ranked: Vec<(&str, (usize, usize))> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
        ranked
            .into_iter()
            .take(self.limit)
            .map(|(token, _)| token.to_string())
            .collect()
    }
}

impl Default for KeywordWorker {
    fn default() -> Self {
        Self::new("keywords", 5)
    }
}

#[async_trait]
impl WorkerNode for KeywordWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["analyze".to_string(), "keywords".to_string()]
    }

    async fn execute(&self, _task: &TaskRequest, payload: &Content) -> Result<NodeOutput> {
        let keywords = self.keywords(payload);
        if keywords.is_empty() {
            anyhow::bail!("no keywords found in payload");
        }
        Ok(NodeOutput::new(Content::text(format!("keywords: {}", keywords.join(", ")))))
    }

    async fn vote(&self, proposal: &Proposal) -> Vote {
        if self.keywords(&proposal.content).is_empty() {
            Vote::Abstain
        } else {
            Vote::Agree
        }
    }
}

/// Coarse intent of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Greeting,
    Question,
    Request,
    Gratitude,
    Statement,
}

impl Intent {
    pub fn classify(text: &str) -> Self {
        let trimmed = text.trim();
        let lower = trimmed.to_lowercase();

        if ["thank you", "thanks", "grateful"]
            .iter()
            .any(|p| contains_phrase(&lower, p))
        {
            return Intent::Gratitude;
        }
        if ["hello", "hi", "hey", "greetings", "good morning", "good evening"]
            .iter()
            .any(|p| lower.starts_with(p) && contains_phrase(&lower, p))
        {
            return Intent::Greeting;
        }
        if trimmed.ends_with('?')
            || ["what", "why", "how", "when", "where", "who", "which"]
                .iter()
                .any(|w| lower.split_whitespace().next() == Some(*w))
        {
            return Intent::Question;
        }
        if ["please", "can you", "could you", "help me", "i need"]
            .iter()
            .any(|p| contains_phrase(&lower, p))
        {
            return Intent::Request;
        }
        Intent::Statement
    }
}

/// Replies with an intent-classified template
pub struct ResponderWorker {
    name: String,
}

impl ResponderWorker {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn respond(&self, content: &Content) -> String {
        let topic = content.summarize(8).as_text();
        match Intent::classify(&content.as_text()) {
            Intent::Greeting => "Hello. I'm ready to assist you.".to_string(),
            Intent::Gratitude => "You're welcome. I'm glad that helped.".to_string(),
            Intent::Question => format!("That's an interesting question. Let me analyze it: {}", topic),
            Intent::Request => format!("I understand your request and I'm here to help with: {}", topic),
            Intent::Statement => format!("Based on my understanding, I can provide insights on: {}", topic),
        }
    }
}

impl Default for ResponderWorker {
    fn default() -> Self {
        Self::new("responder")
    }
}

#[async_trait]
impl WorkerNode for ResponderWorker {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Vec<String> {
        vec!["respond".to_string(), "general".to_string()]
    }

    async fn execute(&self, _task: &TaskRequest, payload: &Content) -> Result<NodeOutput> {
        Ok(NodeOutput::new(Content::text(self.respond(payload))).with_confidence(0.8))
    }
}
