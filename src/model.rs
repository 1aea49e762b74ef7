//! Workflow document data model: [`WorkflowResource`] and its [`TaskSpec`] entries.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A named, templated field value. Workflow authors write `"{{tasks.a.output.value}}"`
/// style strings here; the [`crate::resolver`] module is what understands them.
pub type Template = String;

/// A complete workflow document: a name plus an ordered list of tasks.
///
/// `tasks` is a plain [`Vec`], not a map keyed by task id: the wire format is
/// an ordered list of `TaskSpec` entries, each carrying its own `id`. That is
/// what lets [`crate::graph::build`] actually observe a repeated id instead of
/// having it silently collapsed away during deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResource {
    pub name: String,
    #[serde(rename = "tasks")]
    pub tasks: Vec<TaskSpec>,
}

/// A single task within a [`WorkflowResource`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Unique (within the workflow) task identifier.
    pub id: String,

    /// Explicit upstream dependencies, by task id.
    #[serde(default, rename = "dependsOn")]
    pub depends_on: Vec<String>,

    /// Field name -> template string, materialized just before the task runs.
    #[serde(default)]
    pub input: IndexMap<String, Template>,

    /// An optional boolean-mini-language gate; see [`crate::condition`].
    #[serde(default)]
    pub condition: Option<String>,

    /// An optional fan-out spec; see [`crate::foreach`].
    #[serde(default, rename = "forEach")]
    pub for_each: Option<ForEachSpec>,
}

impl TaskSpec {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            depends_on: Vec::new(),
            input: IndexMap::new(),
            condition: None,
            for_each: None,
        }
    }
}

/// Fan-out configuration for a task, resolved and executed by [`crate::foreach`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForEachSpec {
    /// A template resolving to a JSON array.
    pub items: Template,
    /// The name bound to the current item inside the iteration's [`crate::context::TemplateContext`].
    #[serde(rename = "itemVar")]
    pub item_var: String,
    /// Parallelism cap; `<= 0` means unbounded.
    #[serde(default, rename = "maxParallel")]
    pub max_parallel: i64,
}
