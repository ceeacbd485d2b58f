//! Worker node implementations.
//!
//! Workers are selected at registration time and reached only through the
//! `WorkerNode` trait.

pub mod builtin;
pub mod function;

use std::sync::Arc;

use crate::cluster::WorkerNode;

pub use builtin::{EchoWorker, Intent, KeywordWorker, ResponderWorker, SummarizerWorker};
pub use function::FnWorker;

/// One of each built-in worker, with the alignment it joins the cluster at
pub fn builtin_workers() -> Vec<(Arc<dyn WorkerNode>, f64)> {
    vec![
        (Arc::new(EchoWorker::default()) as Arc<dyn WorkerNode>, 0.9),
        (Arc::new(SummarizerWorker::default()), 0.85),
        (Arc::new(KeywordWorker::default()), 0.8),
        (Arc::new(ResponderWorker::default()), 0.9),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_workers_have_unique_names() {
        let workers = builtin_workers();
        let mut names: Vec<&str> = workers.iter().map(|(w, _)| w.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 4);
    }
}
