//! Condition Evaluator (§4.3): a small Boolean mini-language — comparisons,
//! `&&`, `||`, `!`, parentheses — layered on top of the [`crate::resolver`].
//!
//! The source evaluator splits Boolean expressions with regexes, which
//! mis-tokenizes operators embedded in quoted string literals. This module
//! instead tokenizes quote- and paren-aware before splitting (§9 decision),
//! matching the documented precedence and associativity exactly.

use tracing::warn;

use crate::context::TemplateContext;

/// Result of evaluating a task's `condition`. Never an `Err` to the caller —
/// any parse or resolution failure becomes `Failure` (§4.3 Failure mode).
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The gate passed; the resolved (template-substituted) expression text
    /// is attached for logging.
    Execute { resolved_expression: Option<String> },
    /// The gate failed; the task should be skipped.
    Skip { resolved_expression: Option<String> },
    /// The expression could not be resolved or parsed.
    Failure { message: String },
}

const EPSILON: f64 = 1e-4;

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
}

/// Evaluate an optional condition expression. `None` or a blank expression
/// always executes (§4.3 step 1).
pub async fn evaluate(expression: Option<&str>, context: &TemplateContext) -> Outcome {
    let Some(expr) = expression else {
        return Outcome::Execute {
            resolved_expression: None,
        };
    };

    if expr.trim().is_empty() {
        return Outcome::Execute {
            resolved_expression: None,
        };
    }

    let resolved = match crate::resolver::resolve(expr, context).await {
        Ok(text) => text,
        Err(e) => {
            return Outcome::Failure {
                message: format!("template resolution failed: {e}"),
            };
        }
    };

    match parse_or(&resolved) {
        Ok(true) => Outcome::Execute {
            resolved_expression: Some(resolved),
        },
        Ok(false) => Outcome::Skip {
            resolved_expression: Some(resolved),
        },
        Err(message) => {
            warn!(expression = expr, error = %message, "condition failed to evaluate");
            Outcome::Failure { message }
        }
    }
}

/// Statically check that `expression` is grammatically well-formed, without
/// resolving any `{{...}}` placeholders first. Used by the `validate`
/// command: unresolved placeholders parse as opaque string operands, so this
/// catches malformed operator/parenthesis structure without needing data.
///
/// An expression consisting of a single bare placeholder (e.g.
/// `"{{tasks.a.output.flag}}"`) is accepted unconditionally: its
/// boolean-ness can only be known once the template resolves at runtime.
pub fn validate_syntax(expression: &str) -> std::result::Result<(), String> {
    let trimmed = expression.trim();
    if trimmed.starts_with("{{")
        && trimmed.ends_with("}}")
        && !trimmed[2..trimmed.len() - 2].contains("}}")
    {
        return Ok(());
    }
    parse_or(expression).map(|_| ())
}

fn parse_or(s: &str) -> Result<bool, String> {
    let parts = split_top_level_all(s, "||");
    if parts.len() > 1 {
        for part in &parts {
            if parse_and(part)? {
                return Ok(true);
            }
        }
        Ok(false)
    } else {
        parse_and(s)
    }
}

fn parse_and(s: &str) -> Result<bool, String> {
    let parts = split_top_level_all(s, "&&");
    if parts.len() > 1 {
        for part in &parts {
            if !parse_not(part)? {
                return Ok(false);
            }
        }
        Ok(true)
    } else {
        parse_not(s)
    }
}

fn parse_not(s: &str) -> Result<bool, String> {
    let trimmed = s.trim();
    if let Some(rest) = trimmed.strip_prefix('!') {
        let rest = rest.trim();
        if !is_fully_wrapped_in_parens(rest) {
            return Err(format!("expected '!(...)', found '!{rest}'"));
        }
        let inner = &rest[1..rest.len() - 1];
        return Ok(!parse_or(inner)?);
    }
    parse_comparison(trimmed)
}

const COMPARISON_OPS: &[&str] = &["==", "!=", ">=", "<=", ">", "<"];

fn parse_comparison(s: &str) -> Result<bool, String> {
    if let Some((start, end, op)) = top_level_find(s, COMPARISON_OPS) {
        let left = &s[..start];
        let right = &s[end..];
        return eval_comparison(left, right, op);
    }
    parse_group(s)
}

fn parse_group(s: &str) -> Result<bool, String> {
    let trimmed = s.trim();
    if is_fully_wrapped_in_parens(trimmed) {
        return parse_or(&trimmed[1..trimmed.len() - 1]);
    }
    parse_literal(trimmed)
}

fn parse_literal(s: &str) -> Result<bool, String> {
    match s.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(format!("expected boolean literal, found '{other}'")),
    }
}

fn eval_comparison(left: &str, right: &str, op: &str) -> Result<bool, String> {
    let l = parse_operand(left);
    let r = parse_operand(right);

    match op {
        "==" => Ok(literal_eq(&l, &r)),
        "!=" => Ok(!literal_eq(&l, &r)),
        ">" | "<" | ">=" | "<=" => {
            let lf = to_f64(&l)?;
            let rf = to_f64(&r)?;
            Ok(match op {
                ">" => lf > rf,
                "<" => lf < rf,
                ">=" => lf >= rf,
                "<=" => lf <= rf,
                _ => unreachable!("matched above"),
            })
        }
        _ => unreachable!("COMPARISON_OPS is exhaustive"),
    }
}

fn parse_operand(s: &str) -> Literal {
    let t = s.trim();
    if t == "null" {
        return Literal::Null;
    }
    if t == "true" {
        return Literal::Bool(true);
    }
    if t == "false" {
        return Literal::Bool(false);
    }
    if t.len() >= 2
        && ((t.starts_with('\'') && t.ends_with('\'')) || (t.starts_with('"') && t.ends_with('"')))
    {
        return Literal::Str(t[1..t.len() - 1].to_string());
    }
    if let Ok(n) = t.parse::<f64>() {
        return Literal::Number(n);
    }
    Literal::Str(t.to_string())
}

fn literal_eq(a: &Literal, b: &Literal) -> bool {
    match (a, b) {
        (Literal::Null, Literal::Null) => true,
        (Literal::Null, _) | (_, Literal::Null) => false,
        (Literal::Number(x), Literal::Number(y)) => (x - y).abs() < EPSILON,
        (Literal::Bool(x), Literal::Bool(y)) => x == y,
        _ => literal_display(a) == literal_display(b),
    }
}

fn literal_display(l: &Literal) -> String {
    match l {
        Literal::Null => String::new(),
        Literal::Bool(b) => b.to_string(),
        Literal::Number(n) => n.to_string(),
        Literal::Str(s) => s.clone(),
    }
}

fn to_f64(l: &Literal) -> Result<f64, String> {
    match l {
        Literal::Number(n) => Ok(*n),
        Literal::Str(s) => s
            .parse::<f64>()
            .map_err(|_| format!("cannot compare non-numeric value '{s}'")),
        Literal::Null => Err("cannot compare null with <, <=, >, >=".to_string()),
        Literal::Bool(_) => Err("cannot compare a boolean with <, <=, >, >=".to_string()),
    }
}

/// True iff `s` is wrapped in a single matching pair of parentheses spanning
/// the whole string (quote-aware, so `"(a)"` inside a literal doesn't count).
fn is_fully_wrapped_in_parens(s: &str) -> bool {
    if !s.starts_with('(') || !s.ends_with(')') || s.len() < 2 {
        return false;
    }
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let chars: Vec<char> = s.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 && i != chars.len() - 1 {
                    return false;
                }
            }
            _ => {}
        }
    }
    depth == 0
}

/// Find the left-most top-level (outside quotes, outside parens) occurrence
/// of any operator in `ops`, checked in the given order at each position so
/// two-character operators take priority over their single-character prefix.
fn top_level_find<'a>(s: &str, ops: &[&'a str]) -> Option<(usize, usize, &'a str)> {
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    for (idx, c) in s.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' => depth += 1,
            ')' => depth -= 1,
            _ => {}
        }
        if depth == 0 && quote.is_none() {
            for op in ops {
                if s[idx..].starts_with(op) {
                    return Some((idx, idx + op.len(), op));
                }
            }
        }
    }
    None
}

/// Split `s` on every top-level occurrence of `op`. Returns `[s]` unchanged
/// if `op` never appears at the top level.
fn split_top_level_all<'a>(s: &'a str, op: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut start = 0usize;
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut idx = 0usize;
    while idx < s.len() {
        let c = match s[idx..].chars().next() {
            Some(c) => c,
            None => break,
        };
        let char_len = c.len_utf8();
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            idx += char_len;
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                idx += char_len;
            }
            '(' => {
                depth += 1;
                idx += char_len;
            }
            ')' => {
                depth -= 1;
                idx += char_len;
            }
            _ => {
                if depth == 0 && s[idx..].starts_with(op) {
                    parts.push(&s[start..idx]);
                    idx += op.len();
                    start = idx;
                } else {
                    idx += char_len;
                }
            }
        }
    }
    parts.push(&s[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryOutputStore;
    use serde_json::json;
    use std::sync::Arc;

    fn ctx() -> TemplateContext {
        TemplateContext::new(json!({}), Arc::new(InMemoryOutputStore::new()))
    }

    #[tokio::test]
    async fn empty_expression_executes() {
        assert_eq!(
            evaluate(None, &ctx()).await,
            Outcome::Execute {
                resolved_expression: None
            }
        );
        assert_eq!(
            evaluate(Some("   "), &ctx()).await,
            Outcome::Execute {
                resolved_expression: None
            }
        );
    }

    #[tokio::test]
    async fn or_binds_weaker_than_and() {
        // S4: true || false && false => execute
        let outcome = evaluate(Some("true || false && false"), &ctx()).await;
        assert!(matches!(outcome, Outcome::Execute { .. }));
    }

    #[tokio::test]
    async fn and_short_circuits_to_skip() {
        let outcome = evaluate(Some("true && false"), &ctx()).await;
        assert!(matches!(outcome, Outcome::Skip { .. }));
    }

    #[tokio::test]
    async fn negated_group() {
        let outcome = evaluate(Some("!(false)"), &ctx()).await;
        assert!(matches!(outcome, Outcome::Execute { .. }));
    }

    #[tokio::test]
    async fn numeric_equality_uses_epsilon() {
        assert!(matches!(
            evaluate(Some("1.00001 == 1.0000"), &ctx()).await,
            Outcome::Execute { .. }
        ));
        assert!(matches!(
            evaluate(Some("1.001 == 1.0"), &ctx()).await,
            Outcome::Skip { .. }
        ));
    }

    #[tokio::test]
    async fn string_literal_with_operator_inside_is_not_mis_split() {
        // A literal string containing '&&' must not fool the && splitter.
        let outcome = evaluate(Some("'a && b' == 'a && b'"), &ctx()).await;
        assert!(matches!(outcome, Outcome::Execute { .. }));
    }

    #[tokio::test]
    async fn null_only_equals_null() {
        assert!(matches!(
            evaluate(Some("null == null"), &ctx()).await,
            Outcome::Execute { .. }
        ));
        assert!(matches!(
            evaluate(Some("null == 'x'"), &ctx()).await,
            Outcome::Skip { .. }
        ));
    }

    #[tokio::test]
    async fn ordering_comparison() {
        assert!(matches!(
            evaluate(Some("2 > 1"), &ctx()).await,
            Outcome::Execute { .. }
        ));
        assert!(matches!(
            evaluate(Some("null > 1"), &ctx()).await,
            Outcome::Failure { .. }
        ));
    }

    #[tokio::test]
    async fn malformed_expression_is_failure_not_panic() {
        let outcome = evaluate(Some("&& true"), &ctx()).await;
        assert!(matches!(outcome, Outcome::Failure { .. }));
    }

    #[test]
    fn validate_syntax_accepts_bare_placeholder() {
        assert!(validate_syntax("{{tasks.a.output.flag}}").is_ok());
    }

    #[test]
    fn validate_syntax_accepts_comparison_against_placeholder() {
        assert!(validate_syntax("{{tasks.a.output.ready}} == true").is_ok());
    }

    #[test]
    fn validate_syntax_rejects_malformed_operator_structure() {
        assert!(validate_syntax("&& true").is_err());
    }
}
