//! ForEach Executor (§4.4): semaphore-bounded parallel fan-out over a
//! resolved item list.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use snafu::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::cancellation::CancellationToken;
use crate::context::{ForEachBinding, TemplateContext};
use crate::model::ForEachSpec;
use crate::retry::ErrorKind;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("forEach.items resolved to an empty or missing template"))]
    EmptyItemsTemplate,

    #[snafu(display("forEach.itemVar must not be empty"))]
    EmptyItemVar,

    #[snafu(display("forEach.items did not resolve to a JSON array: {text}"))]
    ItemsNotAnArray { text: String },

    #[snafu(display("failed to resolve forEach.items: {source}"))]
    Resolution { source: crate::resolver::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of running one task executor against one item.
#[derive(Debug, Clone)]
pub struct TaskExecutionResult {
    pub success: bool,
    pub output: Option<Value>,
    pub errors: Vec<String>,
    pub error_kind: Option<ErrorKind>,
}

impl TaskExecutionResult {
    #[must_use]
    pub fn ok(output: Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            errors: Vec::new(),
            error_kind: None,
        }
    }

    #[must_use]
    pub fn failed(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            success: false,
            output: None,
            errors: vec![message.into()],
            error_kind: Some(kind),
        }
    }
}

/// Executes a single iteration's body task. Implementations are the boundary
/// where real side-effecting work (an HTTP call, a subprocess, …) happens;
/// the ForEach Executor itself never inspects what the body does.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        context: &TemplateContext,
        item: &Value,
        index: usize,
    ) -> TaskExecutionResult;
}

/// Result of one fan-out iteration, kept for diagnostics even on success.
#[derive(Debug, Clone, Serialize)]
pub struct IterationResult {
    pub index: usize,
    pub success: bool,
    pub output: Option<Value>,
    pub errors: Vec<String>,
    #[serde(skip)]
    pub elapsed: Duration,
}

/// The aggregate result of a `forEach` fan-out.
#[derive(Debug, Clone)]
pub struct ForEachResult {
    pub success: bool,
    /// Successful iterations' outputs, in ascending item-index order (§8 S5).
    pub outputs: Vec<Value>,
    pub iterations: Vec<IterationResult>,
    pub failure_count: usize,
}

/// Run `spec` against `executor`, fanning out over the resolved item list.
///
/// `cancellation`, if given, is checked before launching each iteration (§5):
/// once raised, no further iterations are launched, but iterations already in
/// flight are awaited to completion rather than aborted.
pub async fn execute(
    spec: &ForEachSpec,
    context: &TemplateContext,
    executor: Arc<dyn TaskExecutor>,
    cancellation: Option<CancellationToken>,
) -> Result<ForEachResult> {
    ensure!(!spec.item_var.trim().is_empty(), EmptyItemVarSnafu);

    let resolved = crate::resolver::resolve(&spec.items, context)
        .await
        .context(ResolutionSnafu)?;
    ensure!(!resolved.trim().is_empty(), EmptyItemsTemplateSnafu);

    let items: Vec<Value> = match serde_json::from_str(&resolved) {
        Ok(Value::Array(values)) => values,
        _ => {
            return ItemsNotAnArraySnafu { text: resolved }.fail();
        }
    };

    if items.is_empty() {
        return Ok(ForEachResult {
            success: true,
            outputs: Vec::new(),
            iterations: Vec::new(),
            failure_count: 0,
        });
    }

    info!(
        item_count = items.len(),
        max_parallel = spec.max_parallel,
        "starting forEach fan-out"
    );

    let semaphore = if spec.max_parallel > 0 {
        Some(Arc::new(Semaphore::new(spec.max_parallel as usize)))
    } else {
        None
    };

    let mut handles: Vec<(usize, tokio::task::JoinHandle<IterationResult>)> =
        Vec::with_capacity(items.len());
    let mut cancelled_before_launch = 0usize;
    for (index, item) in items.into_iter().enumerate() {
        if cancellation.as_ref().is_some_and(CancellationToken::is_cancelled) {
            cancelled_before_launch += 1;
            continue;
        }
        let context = context.clone();
        let executor = Arc::clone(&executor);
        let semaphore = semaphore.clone();
        let item_var = spec.item_var.clone();

        handles.push((index, tokio::spawn(async move {
            let _permit = match &semaphore {
                Some(sem) => Some(
                    sem.clone()
                        .acquire_owned()
                        .await
                        .expect("semaphore is never closed"),
                ),
                None => None,
            };

            let iteration_context = context.with_for_each(ForEachBinding {
                item_var,
                current_item: item.clone(),
                index,
            });

            let start = Instant::now();
            let outcome = executor.execute(&iteration_context, &item, index).await;
            let elapsed = start.elapsed();

            IterationResult {
                index,
                success: outcome.success,
                output: outcome.output,
                errors: outcome.errors,
                elapsed,
            }
        })));
    }

    let mut iterations = Vec::with_capacity(handles.len());
    for (index, handle) in handles {
        match handle.await {
            Ok(result) => iterations.push(result),
            Err(join_error) => iterations.push(IterationResult {
                index,
                success: false,
                output: None,
                errors: vec![format!("iteration task panicked: {join_error}")],
                elapsed: Duration::ZERO,
            }),
        }
    }

    iterations.sort_by_key(|r| r.index);

    if cancelled_before_launch > 0 {
        warn!(cancelled_before_launch, "forEach fan-out cancelled before all iterations launched");
    }

    let failure_count = iterations.iter().filter(|r| !r.success).count();
    if failure_count > 0 {
        warn!(failure_count, total = iterations.len(), "forEach fan-out completed with failures");
    }
    let outputs = iterations
        .iter()
        .filter(|r| r.success)
        .filter_map(|r| r.output.clone())
        .collect();

    Ok(ForEachResult {
        success: failure_count == 0,
        outputs,
        iterations,
        failure_count,
    })
}
