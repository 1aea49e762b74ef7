//! # Corvus - Workflow Execution Core
//!
//! Corvus is the execution core of a declarative workflow engine: given a
//! [`model::WorkflowResource`] document, it builds a dependency graph,
//! resolves `{{...}}` templates against prior task outputs, gates tasks on
//! Boolean conditions, fans a task out over an item list, and wraps external
//! calls with a circuit breaker and retry policy.
//!
//! ## Core Modules
//!
//! - [`cancellation`] - a `tokio::sync::watch`-backed cooperative cancellation handle
//! - [`graph`] - builds the task dependency DAG from explicit and implicit references
//! - [`resolver`] - substitutes `{{expression}}` templates against task outputs and input
//! - [`condition`] - evaluates a task's Boolean `condition` gate
//! - [`foreach`] - bounded-parallel fan-out over a resolved item list
//! - [`circuit`] - per-service circuit breaker state machine
//! - [`retry`] - exponential backoff retry policy
//! - [`hmac_validator`] - constant-time HMAC-SHA256 signature validation
//! - [`timeout`] - `<number><unit>` timeout string parsing
//! - [`storage`] - byte-identical task output storage
//! - [`context`] - the read-only bundle the resolver and condition evaluator navigate
//! - [`path`] - dot/bracket path parsing and JSON navigation
//! - [`model`] - the workflow document data model
//! - [`config`] - layered engine configuration
//!
//! ## Command-Line Interface
//!
//! ```bash
//! corvus validate workflow.yaml
//! ```
//!
//! ## Configuration
//!
//! Corvus can be configured via:
//! - Configuration file (`corvus.yaml`)
//! - Environment variables (prefix: `CORVUS__`)
//!
//! See [`config::EngineConfig`] for available options.

pub mod cancellation;
pub mod circuit;
pub mod cmd;
pub mod condition;
pub mod config;
pub mod context;
pub mod foreach;
pub mod graph;
pub mod hmac_validator;
pub mod model;
pub mod path;
pub mod resolver;
pub mod retry;
pub mod storage;
pub mod timeout;
