//! # scriptflow
//!
//! A script execution engine that plans, validates, caches and runs
//! user-authored ECMAScript modules under controlled resource constraints,
//! with an injectable capability surface (a "context") instead of ambient
//! globals.
//!
//! A script is a module exporting exactly two bindings: a typed IO schema
//! and an async default entry function:
//!
//! ```text
//! export const io = {
//!     inputs:  { message: { type: "string", default: "Hello" } },
//!     outputs: { result:  { type: "string" } }
//! };
//!
//! export default async function run(inputs, context) {
//!     context.logger.info("running");
//!     return { result: inputs.message };
//! }
//! ```
//!
//! Scripts may dynamically import other scripts through the
//! `context.importScript(...)` primitive; identifiers are resolved through a
//! pluggable [`ScriptRegistry`](registry::ScriptRegistry).
//!
//! ## Quick start
//!
//! ```no_run
//! use scriptflow::{execute, EngineConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = r#"
//! export const io = {
//!     inputs:  { number: { type: "int", default: 1 } },
//!     outputs: { result: { type: "int" } }
//! };
//! export default async function run(inputs, context) {
//!     return { result: inputs.number * 2 };
//! }
//! "#;
//!     let result = execute(source, json!({ "number": 21 }), EngineConfig::default()).await?;
//!     assert_eq!(result, json!({ "result": 42 }));
//!     Ok(())
//! }
//! ```
//!
//! ## Safety model
//!
//! Validation is advisory: the engine checks script shape, brace/quote
//! balance and dangerous surface patterns, and enforces timeouts, import
//! counts, recursion depth and memory growth, but it is not a sandbox and
//! offers no capability confinement.

#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod facade;
pub mod hash;
mod host;
pub mod introspect;
pub mod limits;
pub mod monitor;
pub mod params;
pub mod registry;
pub mod tracker;
pub mod validator;

pub use cache::{CacheEntry, CacheOrigin, CacheStats, ScriptCache};
pub use config::{
    CachePolicy, CachePolicyUpdate, EngineConfig, ExecutionLimits, LimitsUpdate, MonitorConfig,
};
pub use engine::{ScriptEngine, ScriptSource};
pub use error::{Error, ErrorClass, Result};
pub use facade::{
    benchmark, create_hot_reloadable, create_reusable, execute, execute_batch,
    execute_with_validation, validate, BatchItem, BatchResult, BenchmarkReport,
    HotReloadableScript, ReusableScript, ValidationOutcome,
};
pub use hash::ContentHash;
pub use introspect::LoadedScript;
pub use monitor::{ResourceMonitor, ResourceStats};
pub use params::{IoSchema, ParameterDef, ParameterKind};
pub use registry::{
    CachedScriptRegistry, CompositeScriptRegistry, Environment, EnvironmentScriptRegistry,
    FileScriptRegistry, HostedScriptRegistry, HttpScriptRegistry, InMemoryScriptRegistry,
    ScriptRegistry,
};
pub use tracker::ImportTracker;
pub use validator::{ScriptValidator, ValidationReport};
