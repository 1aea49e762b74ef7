//! Execution Graph Builder (§4.1): turns a [`WorkflowResource`] into a
//! [`petgraph`] DAG, combining explicit `dependsOn` edges with implicit
//! edges discovered from `{{tasks.<id>.output...}}` references.

use indexmap::IndexMap;
use petgraph::graph::{DiGraph, NodeIndex};
use regex::Regex;
use snafu::prelude::*;
use std::collections::HashSet;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::model::WorkflowResource;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("task id '{task_id}' is defined more than once"))]
    DuplicateTaskId { task_id: String },

    #[snafu(display("circular dependency: {}", cycle.join(" -> ")))]
    CircularDependency { cycle: Vec<String> },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A non-fatal diagnostic surfaced alongside a successfully built graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedReference {
    pub task_id: String,
    pub referenced_task_id: String,
}

/// Per-task dependency diagnostics, kept for `validate` output.
#[derive(Debug, Clone, Default)]
pub struct TaskDiagnostics {
    pub explicit_dependencies: Vec<String>,
    pub implicit_dependencies: Vec<String>,
}

/// The built execution graph: a DAG over task ids plus diagnostics.
pub struct ExecutionGraph {
    pub graph: DiGraph<String, ()>,
    pub nodes: IndexMap<String, NodeIndex>,
    pub diagnostics: IndexMap<String, TaskDiagnostics>,
    pub unresolved_references: Vec<UnresolvedReference>,
}

impl ExecutionGraph {
    /// Tasks in topological (dependency-respecting) order.
    pub fn topological_order(&self) -> Vec<String> {
        petgraph::algo::toposort(&self.graph, None)
            .expect("acyclic by construction")
            .into_iter()
            .map(|idx| self.graph[idx].clone())
            .collect()
    }
}

fn implicit_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*tasks\.([A-Za-z0-9_-]+)\.output").expect("static regex is valid")
    })
}

/// Build an [`ExecutionGraph`] from `workflow`. Rejects duplicate task ids
/// and dependency cycles; dangling implicit references are reported as
/// diagnostics rather than build failures (§9 decision).
pub fn build(workflow: &WorkflowResource) -> Result<ExecutionGraph> {
    let mut graph = DiGraph::new();
    let mut nodes: IndexMap<String, NodeIndex> = IndexMap::new();
    let mut seen = HashSet::new();

    for task in &workflow.tasks {
        ensure!(
            seen.insert(task.id.clone()),
            DuplicateTaskIdSnafu {
                task_id: task.id.clone()
            }
        );
        let idx = graph.add_node(task.id.clone());
        nodes.insert(task.id.clone(), idx);
    }

    let mut diagnostics: IndexMap<String, TaskDiagnostics> = IndexMap::new();
    let mut unresolved_references = Vec::new();

    for task in &workflow.tasks {
        let task_id = &task.id;
        let mut task_diag = TaskDiagnostics::default();
        let from_idx = *nodes
            .get(task_id)
            .expect("every task id was inserted above");

        for dep in &task.depends_on {
            task_diag.explicit_dependencies.push(dep.clone());
            if let Some(&to_idx) = nodes.get(dep) {
                add_edge_once(&mut graph, to_idx, from_idx);
            } else {
                unresolved_references.push(UnresolvedReference {
                    task_id: task_id.clone(),
                    referenced_task_id: dep.clone(),
                });
            }
        }

        let mut implicit_seen = HashSet::new();
        for template in task.input.values() {
            for capture in implicit_ref_re().captures_iter(template) {
                let referenced = capture
                    .get(1)
                    .expect("capture group 1 always present")
                    .as_str()
                    .to_string();
                if referenced == *task_id || !implicit_seen.insert(referenced.clone()) {
                    continue;
                }
                task_diag.implicit_dependencies.push(referenced.clone());
                if let Some(&to_idx) = nodes.get(&referenced) {
                    add_edge_once(&mut graph, to_idx, from_idx);
                } else {
                    unresolved_references.push(UnresolvedReference {
                        task_id: task_id.clone(),
                        referenced_task_id: referenced,
                    });
                }
            }
        }
        if let Some(condition) = &task.condition {
            for capture in implicit_ref_re().captures_iter(condition) {
                let referenced = capture
                    .get(1)
                    .expect("capture group 1 always present")
                    .as_str()
                    .to_string();
                if referenced == *task_id || !implicit_seen.insert(referenced.clone()) {
                    continue;
                }
                task_diag.implicit_dependencies.push(referenced.clone());
                if let Some(&to_idx) = nodes.get(&referenced) {
                    add_edge_once(&mut graph, to_idx, from_idx);
                } else {
                    unresolved_references.push(UnresolvedReference {
                        task_id: task_id.clone(),
                        referenced_task_id: referenced,
                    });
                }
            }
        }

        diagnostics.insert(task_id.clone(), task_diag);
    }

    if let Some(cycle) = find_cycle(&graph, &nodes) {
        warn!(cycle = ?cycle, "rejecting workflow graph with a circular dependency");
        return CircularDependencySnafu { cycle }.fail();
    }

    for unresolved in &unresolved_references {
        warn!(
            task_id = %unresolved.task_id,
            referenced_task_id = %unresolved.referenced_task_id,
            "task references an undefined task"
        );
    }
    debug!(task_count = workflow.tasks.len(), "built execution graph");

    Ok(ExecutionGraph {
        graph,
        nodes,
        diagnostics,
        unresolved_references,
    })
}

fn add_edge_once(graph: &mut DiGraph<String, ()>, from: NodeIndex, to: NodeIndex) {
    if graph.find_edge(from, to).is_none() {
        graph.add_edge(from, to, ());
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    White,
    Gray,
    Black,
}

/// Iterative DFS cycle detection producing an ordered cycle path for
/// diagnostics, rather than petgraph's boolean-only `is_cyclic_directed`.
fn find_cycle(graph: &DiGraph<String, ()>, nodes: &IndexMap<String, NodeIndex>) -> Option<Vec<String>> {
    let mut marks = vec![Mark::White; graph.node_count()];
    let mut stack_path: Vec<NodeIndex> = Vec::new();

    for &start in nodes.values() {
        if marks[start.index()] != Mark::White {
            continue;
        }

        let mut call_stack: Vec<(NodeIndex, std::vec::IntoIter<NodeIndex>)> = vec![(
            start,
            graph.neighbors(start).collect::<Vec<_>>().into_iter(),
        )];
        marks[start.index()] = Mark::Gray;
        stack_path.push(start);

        while let Some((node, iter)) = call_stack.last_mut() {
            let node = *node;
            if let Some(next) = iter.next() {
                match marks[next.index()] {
                    Mark::White => {
                        marks[next.index()] = Mark::Gray;
                        stack_path.push(next);
                        call_stack.push((next, graph.neighbors(next).collect::<Vec<_>>().into_iter()));
                    }
                    Mark::Gray => {
                        let cycle_start = stack_path.iter().position(|&n| n == next).unwrap_or(0);
                        let mut cycle: Vec<String> = stack_path[cycle_start..]
                            .iter()
                            .map(|&n| graph[n].clone())
                            .collect();
                        cycle.push(graph[next].clone());
                        return Some(cycle);
                    }
                    Mark::Black => {}
                }
            } else {
                marks[node.index()] = Mark::Black;
                stack_path.pop();
                call_stack.pop();
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TaskSpec;
    use indexmap::IndexMap;

    fn task(id: &str, depends_on: &[&str], input: &[(&str, &str)]) -> TaskSpec {
        TaskSpec {
            id: id.to_string(),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            input: input
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            condition: None,
            for_each: None,
        }
    }

    fn workflow(tasks: Vec<TaskSpec>) -> WorkflowResource {
        WorkflowResource {
            name: "wf".to_string(),
            tasks,
        }
    }

    #[test]
    fn explicit_dependency_orders_before_dependent() {
        let wf = workflow(vec![
            task("a", &[], &[]),
            task("b", &["a"], &[]),
        ]);
        let g = build(&wf).unwrap();
        let order = g.topological_order();
        assert!(order.iter().position(|t| t == "a") < order.iter().position(|t| t == "b"));
    }

    #[test]
    fn implicit_dependency_from_input_template_is_discovered() {
        let wf = workflow(vec![
            task("a", &[], &[]),
            task("b", &[], &[("x", "{{tasks.a.output.value}}")]),
        ]);
        let g = build(&wf).unwrap();
        let order = g.topological_order();
        assert!(order.iter().position(|t| t == "a") < order.iter().position(|t| t == "b"));
        assert_eq!(g.diagnostics["b"].implicit_dependencies, vec!["a".to_string()]);
    }

    #[test]
    fn duplicate_task_id_in_the_task_list_is_rejected() {
        let wf = workflow(vec![task("a", &[], &[]), task("a", &[], &[])]);
        let err = build(&wf).unwrap_err();
        assert!(matches!(err, Error::DuplicateTaskId { task_id } if task_id == "a"));
    }

    #[test]
    fn cycle_is_detected_and_reported() {
        let wf = workflow(vec![
            task("a", &["b"], &[]),
            task("b", &["a"], &[]),
        ]);
        let err = build(&wf).unwrap_err();
        assert!(matches!(err, Error::CircularDependency { .. }));
    }

    #[test]
    fn dangling_implicit_reference_is_a_diagnostic_not_a_failure() {
        let wf = workflow(vec![task(
            "a",
            &[],
            &[("x", "{{tasks.missing.output}}")],
        )]);
        let g = build(&wf).unwrap();
        assert_eq!(g.unresolved_references.len(), 1);
        assert_eq!(g.unresolved_references[0].referenced_task_id, "missing");
    }

    #[test]
    fn condition_references_also_create_implicit_edges() {
        let wf = workflow(vec![
            task("a", &[], &[]),
            TaskSpec {
                id: "b".to_string(),
                depends_on: Vec::new(),
                input: IndexMap::new(),
                condition: Some("{{tasks.a.output.ready}} == true".to_string()),
                for_each: None,
            },
        ]);
        let g = build(&wf).unwrap();
        let order = g.topological_order();
        assert!(order.iter().position(|t| t == "a") < order.iter().position(|t| t == "b"));
    }
}
