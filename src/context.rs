//! [`TemplateContext`]: the read-only bundle the resolver and condition
//! evaluator navigate.

use serde_json::Value;
use std::sync::Arc;

use crate::storage::OptimizedJsonStorage;

/// The active ForEach iteration binding (§4.4), present only while a task is
/// running as one iteration of a fan-out.
#[derive(Debug, Clone)]
pub struct ForEachBinding {
    pub item_var: String,
    pub current_item: Value,
    pub index: usize,
}

/// Read-only bundle passed to the resolver and condition evaluator: workflow
/// input, a handle to prior task outputs, and an optional ForEach binding.
///
/// Cloning a `TemplateContext` is cheap (the output store is `Arc`-shared);
/// iteration contexts built by [`crate::foreach`] are fresh clones with a new
/// `for_each` binding, never mutations of the parent.
#[derive(Clone)]
pub struct TemplateContext {
    pub input: Value,
    pub task_outputs: Arc<dyn OptimizedJsonStorage>,
    pub for_each: Option<ForEachBinding>,
}

impl TemplateContext {
    #[must_use]
    pub fn new(input: Value, task_outputs: Arc<dyn OptimizedJsonStorage>) -> Self {
        Self {
            input,
            task_outputs,
            for_each: None,
        }
    }

    /// Build a fresh iteration context: same input and output store, with a
    /// new `for_each` binding. Never mutates `self`.
    #[must_use]
    pub fn with_for_each(&self, binding: ForEachBinding) -> Self {
        Self {
            input: self.input.clone(),
            task_outputs: Arc::clone(&self.task_outputs),
            for_each: Some(binding),
        }
    }
}
