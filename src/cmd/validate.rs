use clap::Parser;
use console::style;
use snafu::prelude::*;
use std::path::{Path, PathBuf};

use crate::config::ValidateConfig;
use crate::model::WorkflowResource;
use crate::{condition, graph, resolver};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Invalid workflow file: {message}"))]
    InvalidWorkflowFile { message: String },

    #[snafu(display("Path error: {message}"))]
    Path { message: String },

    #[snafu(display("I/O error: {source}"))]
    Io { source: std::io::Error },

    #[snafu(display("document is neither valid YAML nor valid JSON: {message}"))]
    Parse { message: String },

    #[snafu(display("Validation failed with {count} error(s)"))]
    ValidationFailed { count: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Error::Io { source }
    }
}

#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Workflow document(s) to validate. Can be a single file, multiple
    /// files, or a directory.
    #[arg(required = true, value_name = "WORKFLOW")]
    pub workflows: Vec<PathBuf>,

    /// Show verbose output including all expressions checked.
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

#[derive(Debug)]
struct ValidationIssue {
    severity: IssueSeverity,
    location: String,
    message: String,
}

#[derive(Debug, PartialEq)]
enum IssueSeverity {
    Error,
    Warning,
}

pub async fn handle_validate(args: ValidateArgs, config: ValidateConfig) -> Result<()> {
    let verbose = args.verbose || config.verbose;
    let workflow_files = discover_workflow_files(&args.workflows)?;

    if workflow_files.is_empty() {
        return Err(Error::InvalidWorkflowFile {
            message: "No workflow files found".to_string(),
        });
    }

    let mut total_errors = 0;
    let mut total_warnings = 0;
    let mut all_valid = true;

    for workflow_path in &workflow_files {
        println!(
            "\n{} {}",
            style("Validating:").bold().cyan(),
            workflow_path.display()
        );

        match validate_workflow(workflow_path, verbose) {
            Ok((errors, warnings)) => {
                total_errors += errors;
                total_warnings += warnings;

                if errors > 0 {
                    all_valid = false;
                    println!(
                        "  {} {} error(s), {} warning(s)",
                        style("\u{2717}").red().bold(),
                        errors,
                        warnings
                    );
                } else if warnings > 0 {
                    println!(
                        "  {} {} warning(s)",
                        style("\u{26a0}").yellow().bold(),
                        warnings
                    );
                } else {
                    println!("  {} Valid", style("\u{2713}").green().bold());
                }
            }
            Err(e) => {
                all_valid = false;
                total_errors += 1;
                println!("  {} {}", style("\u{2717}").red().bold(), e);
            }
        }
    }

    println!("\n{}", style("=".repeat(60)).dim());
    println!(
        "{} {} workflow(s) validated",
        style("Summary:").bold(),
        workflow_files.len()
    );
    println!(
        "  {} error(s), {} warning(s)",
        if total_errors > 0 {
            style(total_errors.to_string()).red().bold()
        } else {
            style(total_errors.to_string()).green()
        },
        if total_warnings > 0 {
            style(total_warnings.to_string()).yellow()
        } else {
            style(total_warnings.to_string()).dim()
        }
    );

    if !all_valid {
        return Err(Error::ValidationFailed {
            count: total_errors,
        });
    }

    Ok(())
}

fn validate_workflow(workflow_path: &Path, verbose: bool) -> Result<(usize, usize)> {
    let mut issues: Vec<ValidationIssue> = Vec::new();

    let raw = std::fs::read_to_string(workflow_path)?;
    let workflow = parse_workflow_document(&raw)?;

    if verbose {
        println!("  {} Validating graph structure...", style("\u{2192}").dim());
    }
    match graph::build(&workflow) {
        Ok(built) => {
            if verbose {
                println!(
                    "    {} Graph has {} node(s)",
                    style("\u{2713}").green(),
                    built.graph.node_count()
                );
            }
            for unresolved in &built.unresolved_references {
                issues.push(ValidationIssue {
                    severity: IssueSeverity::Warning,
                    location: unresolved.task_id.clone(),
                    message: format!(
                        "references undefined task '{}'",
                        unresolved.referenced_task_id
                    ),
                });
            }
        }
        Err(e) => {
            issues.push(ValidationIssue {
                severity: IssueSeverity::Error,
                location: "graph".to_string(),
                message: format!("Graph structure error: {e}"),
            });
        }
    }

    if verbose {
        println!("  {} Validating expressions...", style("\u{2192}").dim());
    }
    let checked = validate_expressions(&workflow, &mut issues);
    if verbose && checked > 0 {
        println!("    Found {checked} expression(s) to validate");
    }

    let errors: Vec<_> = issues
        .iter()
        .filter(|i| i.severity == IssueSeverity::Error)
        .collect();
    let warnings: Vec<_> = issues
        .iter()
        .filter(|i| i.severity == IssueSeverity::Warning)
        .collect();

    for issue in &errors {
        println!(
            "  {} [{}] {}",
            style("ERROR").red().bold(),
            style(&issue.location).yellow(),
            issue.message
        );
    }
    for issue in &warnings {
        println!(
            "  {} [{}] {}",
            style("WARN").yellow().bold(),
            style(&issue.location).yellow(),
            issue.message
        );
    }

    Ok((errors.len(), warnings.len()))
}

fn parse_workflow_document(raw: &str) -> Result<WorkflowResource> {
    if let Ok(workflow) = serde_json::from_str::<WorkflowResource>(raw) {
        return Ok(workflow);
    }
    serde_yaml::from_str(raw).map_err(|e| Error::Parse {
        message: e.to_string(),
    })
}

/// Statically checks every task's templates and condition, reporting each
/// malformed one as an error issue. Returns the total number checked.
fn validate_expressions(workflow: &WorkflowResource, issues: &mut Vec<ValidationIssue>) -> usize {
    let mut checked = 0;

    for task in &workflow.tasks {
        let task_id = &task.id;
        for (field, template) in &task.input {
            checked += 1;
            if let Err(e) = resolver::validate_syntax(template) {
                issues.push(ValidationIssue {
                    severity: IssueSeverity::Error,
                    location: format!("{task_id}.input.{field}"),
                    message: format!("malformed template: {e}"),
                });
            }
        }

        if let Some(expr) = &task.condition {
            checked += 1;
            if let Err(e) = condition::validate_syntax(expr) {
                issues.push(ValidationIssue {
                    severity: IssueSeverity::Error,
                    location: format!("{task_id}.condition"),
                    message: format!("malformed condition: {e}"),
                });
            }
        }

        if let Some(for_each) = &task.for_each {
            checked += 1;
            if let Err(e) = resolver::validate_syntax(&for_each.items) {
                issues.push(ValidationIssue {
                    severity: IssueSeverity::Error,
                    location: format!("{task_id}.forEach.items"),
                    message: format!("malformed template: {e}"),
                });
            }
            if for_each.item_var.trim().is_empty() {
                issues.push(ValidationIssue {
                    severity: IssueSeverity::Error,
                    location: format!("{task_id}.forEach.itemVar"),
                    message: "itemVar must not be empty".to_string(),
                });
            }
        }
    }

    checked
}

fn discover_workflow_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut workflow_files = Vec::new();

    for path in paths {
        if !path.exists() {
            return Err(Error::Path {
                message: format!("Path does not exist: {}", path.display()),
            });
        }

        if path.is_file() {
            if is_workflow_file(path) {
                workflow_files.push(path.clone());
            } else {
                return Err(Error::InvalidWorkflowFile {
                    message: format!(
                        "File does not have a .yaml, .yml, or .json extension: {}",
                        path.display()
                    ),
                });
            }
        } else if path.is_dir() {
            for entry in std::fs::read_dir(path)? {
                let entry = entry?;
                let entry_path = entry.path();
                if entry_path.is_file() && is_workflow_file(&entry_path) {
                    workflow_files.push(entry_path);
                }
            }
        }
    }

    Ok(workflow_files)
}

fn is_workflow_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext == "yaml" || ext == "yml" || ext == "json")
        .unwrap_or(false)
}
