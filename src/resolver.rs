//! Template Resolver (§4.2): substitutes `{{expression}}` placeholders in a
//! template string against a [`TemplateContext`], with zero-copy passthrough
//! for whole-output substitution.

use regex::Regex;
use serde_json::Value;
use snafu::prelude::*;
use std::sync::OnceLock;
use tracing::debug;

use crate::context::TemplateContext;
use crate::path;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("unknown root '{root}' in expression '{expression}'"))]
    UnknownRoot { expression: String, root: String },

    #[snafu(display("malformed expression '{expression}'"))]
    MalformedExpression { expression: String },

    #[snafu(display("expression '{expression}' references unknown task '{task_id}'"))]
    UnknownTask { expression: String, task_id: String },

    #[snafu(display("expression '{expression}' references a ForEach binding outside a ForEach iteration"))]
    NoForEachBinding { expression: String },

    #[snafu(display("expression '{expression}': {source}"))]
    Path { expression: String, source: path::Error },

    #[snafu(display("task '{task_id}' output is not valid JSON: {source}"))]
    MalformedOutput {
        task_id: String,
        source: serde_json::Error,
    },

    #[snafu(display("task '{task_id}' output is not valid UTF-8"))]
    NonUtf8Output { task_id: String },

    #[snafu(display("output store error: {source}"))]
    Storage { source: crate::storage::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{(.*?)\}\}").expect("static regex is valid"))
}

/// Resolve every `{{expression}}` occurrence in `template` against `context`,
/// returning the substituted string.
pub async fn resolve(template: &str, context: &TemplateContext) -> Result<String> {
    let re = placeholder_re();

    // Collect matches first since resolution is async and `Regex::replace_all`
    // has no async-aware variant.
    let mut result = String::with_capacity(template.len());
    let mut last_end = 0;
    for capture in re.captures_iter(template) {
        let whole = capture.get(0).expect("capture 0 always present");
        let expr = capture.get(1).expect("capture group 1 always present").as_str().trim();

        result.push_str(&template[last_end..whole.start()]);
        result.push_str(&resolve_expression(expr, context).await?);
        last_end = whole.end();
    }
    result.push_str(&template[last_end..]);
    Ok(result)
}

/// Resolve a single expression (the content between `{{` and `}}`) to its
/// substitution text.
async fn resolve_expression(expr: &str, context: &TemplateContext) -> Result<String> {
    debug!(expression = expr, "resolving template expression");
    let segments: Vec<&str> = expr.split('.').collect();
    let root = *segments.first().ok_or_else(|| {
        MalformedExpressionSnafu {
            expression: expr.to_string(),
        }
        .build()
    })?;

    let first_segment = path::parse_root_only(root).context(PathSnafu {
        expression: expr.to_string(),
    })?;

    match first_segment.key.as_deref() {
        Some("input") => {
            let rest = segments[1..].join(".");
            let value = navigate_value(&context.input, expr, &rest)?;
            Ok(format_value(&value))
        }
        Some("tasks") => resolve_task_expression(expr, &segments, context).await,
        Some("forEach") => resolve_for_each_expression(expr, &segments, context),
        Some(other) => UnknownRootSnafu {
            expression: expr.to_string(),
            root: other.to_string(),
        }
        .fail(),
        None => MalformedExpressionSnafu {
            expression: expr.to_string(),
        }
        .fail(),
    }
}

async fn resolve_task_expression(
    expr: &str,
    segments: &[&str],
    context: &TemplateContext,
) -> Result<String> {
    let task_id = *segments.get(1).ok_or_else(|| {
        MalformedExpressionSnafu {
            expression: expr.to_string(),
        }
        .build()
    })?;

    let output_segment = *segments.get(2).ok_or_else(|| {
        MalformedExpressionSnafu {
            expression: expr.to_string(),
        }
        .build()
    })?;

    let parsed_output_segment = path::parse_root_only(output_segment).context(PathSnafu {
        expression: expr.to_string(),
    })?;
    if parsed_output_segment.key.as_deref() != Some("output") {
        return MalformedExpressionSnafu {
            expression: expr.to_string(),
        }
        .fail();
    }

    let rest_path = segments[3..].join(".");
    let has_root_index = parsed_output_segment.index.is_some();

    // Whole-output passthrough: no array index on `output`, no further path.
    if !has_root_index && rest_path.is_empty() {
        let raw = context
            .task_outputs
            .get_raw_json(task_id)
            .await
            .ok_or_else(|| {
                UnknownTaskSnafu {
                    expression: expr.to_string(),
                    task_id: task_id.to_string(),
                }
                .build()
            })?;
        return String::from_utf8(raw).map_err(|_| {
            NonUtf8OutputSnafu {
                task_id: task_id.to_string(),
            }
            .build()
        });
    }

    // Deeper navigation: build the full path, including a leading root index
    // if `output[n]` was used, then defer to the output store's navigation.
    let raw = context
        .task_outputs
        .get_raw_json(task_id)
        .await
        .ok_or_else(|| {
            UnknownTaskSnafu {
                expression: expr.to_string(),
                task_id: task_id.to_string(),
            }
            .build()
        })?;
    let root_value: Value = serde_json::from_slice(&raw).context(MalformedOutputSnafu {
        task_id: task_id.to_string(),
    })?;

    let mut segs = Vec::new();
    if let Some(index) = parsed_output_segment.index {
        segs.push(path::Segment {
            key: None,
            index: Some(index),
        });
    }
    if !rest_path.is_empty() {
        segs.extend(path::parse(&rest_path).context(PathSnafu {
            expression: expr.to_string(),
        })?);
    }

    let leaf = path::navigate(&root_value, &rest_path, &segs).context(PathSnafu {
        expression: expr.to_string(),
    })?;
    Ok(format_value(leaf))
}

fn resolve_for_each_expression(
    expr: &str,
    segments: &[&str],
    context: &TemplateContext,
) -> Result<String> {
    let binding = context.for_each.as_ref().ok_or_else(|| {
        NoForEachBindingSnafu {
            expression: expr.to_string(),
        }
        .build()
    })?;

    let field = *segments.get(1).ok_or_else(|| {
        MalformedExpressionSnafu {
            expression: expr.to_string(),
        }
        .build()
    })?;

    let parsed_field = path::parse_root_only(field).context(PathSnafu {
        expression: expr.to_string(),
    })?;

    match parsed_field.key.as_deref() {
        Some("itemVar") => Ok(binding.item_var.clone()),
        Some("index") => Ok(binding.index.to_string()),
        Some("currentItem") => {
            let rest = segments[2..].join(".");
            let value = navigate_current_item(&binding.current_item, expr, field, &rest)?;
            Ok(format_value(&value))
        }
        _ => MalformedExpressionSnafu {
            expression: expr.to_string(),
        }
        .fail(),
    }
}

fn navigate_current_item<'a>(
    current_item: &'a Value,
    expr: &str,
    field_segment: &str,
    rest_path: &str,
) -> Result<Value> {
    let parsed_field = path::parse_root_only(field_segment).context(PathSnafu {
        expression: expr.to_string(),
    })?;
    let mut segs = Vec::new();
    if let Some(index) = parsed_field.index {
        segs.push(path::Segment {
            key: None,
            index: Some(index),
        });
    }
    if !rest_path.is_empty() {
        segs.extend(path::parse(rest_path).context(PathSnafu {
            expression: expr.to_string(),
        })?);
    }
    path::navigate(current_item, rest_path, &segs)
        .map(Clone::clone)
        .context(PathSnafu {
            expression: expr.to_string(),
        })
}

fn navigate_value(root: &Value, expr: &str, rest_path: &str) -> Result<Value> {
    let segs = path::parse(rest_path).context(PathSnafu {
        expression: expr.to_string(),
    })?;
    path::navigate(root, rest_path, &segs)
        .map(Clone::clone)
        .context(PathSnafu {
            expression: expr.to_string(),
        })
}

/// Statically check that every `{{expression}}` placeholder in `template` has
/// a well-formed root and shape, without resolving against any data. Used by
/// the `validate` command, which has no task outputs to navigate.
pub fn validate_syntax(template: &str) -> Result<()> {
    for capture in placeholder_re().captures_iter(template) {
        let expr = capture
            .get(1)
            .expect("capture group 1 always present")
            .as_str()
            .trim();
        let segments: Vec<&str> = expr.split('.').collect();
        let root = *segments.first().ok_or_else(|| {
            MalformedExpressionSnafu {
                expression: expr.to_string(),
            }
            .build()
        })?;
        let first_segment = path::parse_root_only(root).context(PathSnafu {
            expression: expr.to_string(),
        })?;

        match first_segment.key.as_deref() {
            Some("input") => {}
            Some("tasks") => {
                segments.get(1).ok_or_else(|| {
                    MalformedExpressionSnafu {
                        expression: expr.to_string(),
                    }
                    .build()
                })?;
                let output_segment = *segments.get(2).ok_or_else(|| {
                    MalformedExpressionSnafu {
                        expression: expr.to_string(),
                    }
                    .build()
                })?;
                let parsed = path::parse_root_only(output_segment).context(PathSnafu {
                    expression: expr.to_string(),
                })?;
                if parsed.key.as_deref() != Some("output") {
                    return MalformedExpressionSnafu {
                        expression: expr.to_string(),
                    }
                    .fail();
                }
            }
            Some("forEach") => {
                let field = *segments.get(1).ok_or_else(|| {
                    MalformedExpressionSnafu {
                        expression: expr.to_string(),
                    }
                    .build()
                })?;
                path::parse_root_only(field).context(PathSnafu {
                    expression: expr.to_string(),
                })?;
            }
            Some(other) => {
                return UnknownRootSnafu {
                    expression: expr.to_string(),
                    root: other.to_string(),
                }
                .fail();
            }
            None => {
                return MalformedExpressionSnafu {
                    expression: expr.to_string(),
                }
                .fail();
            }
        }
    }
    Ok(())
}

/// Convert a resolved leaf value to its substitution text per §4.2.
fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        Value::Object(_) | Value::Array(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryOutputStore;
    use serde_json::json;
    use std::sync::Arc;

    async fn ctx_with(input: Value) -> (TemplateContext, InMemoryOutputStore) {
        let store = InMemoryOutputStore::new();
        let ctx = TemplateContext::new(input, Arc::new(store.clone()));
        (ctx, store)
    }

    #[tokio::test]
    async fn resolves_input_path() {
        let (ctx, _store) = ctx_with(json!({"name": "ada"})).await;
        let out = resolve("hello {{input.name}}", &ctx).await.unwrap();
        assert_eq!(out, "hello ada");
    }

    #[tokio::test]
    async fn passthrough_is_byte_identical() {
        let (ctx, store) = ctx_with(json!({})).await;
        let raw = br#"{"k":1,"arr":[1,2]}"#.to_vec();
        store.put("X", raw.clone()).await.unwrap();
        let out = resolve("{{tasks.X.output}}", &ctx).await.unwrap();
        assert_eq!(out.as_bytes(), raw.as_slice());
    }

    #[tokio::test]
    async fn deep_path_navigates_parsed_output() {
        let (ctx, store) = ctx_with(json!({})).await;
        store
            .put_value("X", &json!({"k": 1, "arr": [1, 2]}))
            .await
            .unwrap();
        let out = resolve("{{tasks.X.output.arr[1]}}", &ctx).await.unwrap();
        assert_eq!(out, "2");
    }

    #[tokio::test]
    async fn root_array_index_on_output() {
        let (ctx, store) = ctx_with(json!({})).await;
        store.put_value("X", &json!([10, 20, 30])).await.unwrap();
        let out = resolve("{{tasks.X.output[1]}}", &ctx).await.unwrap();
        assert_eq!(out, "20");
    }

    #[tokio::test]
    async fn missing_path_segment_fails() {
        let (ctx, store) = ctx_with(json!({})).await;
        store.put_value("X", &json!({"k": 1})).await.unwrap();
        let err = resolve("{{tasks.X.output.missing}}", &ctx).await.unwrap_err();
        assert!(matches!(err, Error::Path { .. }));
    }

    #[tokio::test]
    async fn unknown_root_fails() {
        let (ctx, _store) = ctx_with(json!({})).await;
        let err = resolve("{{bogus.path}}", &ctx).await.unwrap_err();
        assert!(matches!(err, Error::UnknownRoot { .. }));
    }

    #[tokio::test]
    async fn for_each_binding_resolves() {
        let (ctx, _store) = ctx_with(json!({})).await;
        let ctx = ctx.with_for_each(crate::context::ForEachBinding {
            item_var: "item".to_string(),
            current_item: json!({"value": 42}),
            index: 3,
        });
        assert_eq!(
            resolve("{{forEach.currentItem.value}}", &ctx).await.unwrap(),
            "42"
        );
        assert_eq!(resolve("{{forEach.index}}", &ctx).await.unwrap(), "3");
        assert_eq!(resolve("{{forEach.itemVar}}", &ctx).await.unwrap(), "item");
    }

    #[tokio::test]
    async fn null_renders_empty_string() {
        let (ctx, _store) = ctx_with(json!({"v": null})).await;
        let out = resolve("[{{input.v}}]", &ctx).await.unwrap();
        assert_eq!(out, "[]");
    }

    #[tokio::test]
    async fn object_renders_canonical_json() {
        let (ctx, _store) = ctx_with(json!({"v": {"b": 1, "a": 2}})).await;
        let out = resolve("{{input.v}}", &ctx).await.unwrap();
        assert_eq!(out, json!({"b": 1, "a": 2}).to_string());
    }

    #[test]
    fn validate_syntax_accepts_well_formed_templates() {
        assert!(validate_syntax("hello {{input.name}}, {{tasks.a.output.value}}").is_ok());
        assert!(validate_syntax("{{forEach.currentItem.id}}").is_ok());
        assert!(validate_syntax("no placeholders here").is_ok());
    }

    #[test]
    fn validate_syntax_rejects_unknown_root() {
        assert!(validate_syntax("{{bogus.path}}").is_err());
    }

    #[test]
    fn validate_syntax_rejects_task_expression_missing_output() {
        assert!(validate_syntax("{{tasks.a.value}}").is_err());
    }
}
