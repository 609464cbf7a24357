//! Tool surface: the five operations exposed to external callers.
//!
//! Thin argument-validation shims over the store and orchestrator. Transport
//! concerns stay out of this module; any front end that can pass a tool name
//! and a JSON argument object can drive the catalog through `call`.
//!
//! Error posture at this layer: a missing record on `get_function_details`
//! is a plain "not found" payload, not an error; everything else propagates
//! through the shared taxonomy.

use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::CatalogError;
use crate::orchestrator::{HybridOrchestrator, SaveRequest, SmartGetOutcome};
use crate::record::{FunctionStatus, ListFilter, TestCase};
use crate::store::CatalogStore;

pub const TOOL_SAVE: &str = "save_function";
pub const TOOL_SEARCH: &str = "search_functions";
pub const TOOL_LIST: &str = "list_functions";
pub const TOOL_GET: &str = "get_function_details";
pub const TOOL_SMART_GET: &str = "smart_search_and_get";

pub struct ToolContext {
    pub store: Arc<CatalogStore>,
    pub orchestrator: HybridOrchestrator,
}

/// Machine-readable description of one tool, for transports that advertise
/// their capabilities.
#[derive(Debug, serde::Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

pub fn specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: TOOL_SAVE,
            description: "Save a function to the local catalog and request remote verification. \
                          Succeeds even when the verification service is down.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Unique function name" },
                    "code": { "type": "string", "description": "Full source code" },
                    "description": { "type": "string" },
                    "tags": { "type": "array", "items": { "type": "string" } },
                    "dependencies": { "type": "array", "items": { "type": "string" } },
                    "test_cases": { "type": "array", "items": { "type": "object" } },
                    "status": {
                        "type": "string",
                        "enum": ["pending", "verified", "rejected", "archived"]
                    }
                },
                "required": ["name", "code"]
            }),
        },
        ToolSpec {
            name: TOOL_SEARCH,
            description: "Search the local catalog by substring over name and description.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "limit": { "type": "integer", "minimum": 1 }
                },
                "required": ["query"]
            }),
        },
        ToolSpec {
            name: TOOL_LIST,
            description: "List catalog functions with optional text, tag, and archive filters.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "tag": { "type": "string" },
                    "limit": { "type": "integer", "minimum": 1 },
                    "include_archived": { "type": "boolean" }
                }
            }),
        },
        ToolSpec {
            name: TOOL_GET,
            description: "Fetch the full record for one function by exact name.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string" }
                },
                "required": ["name"]
            }),
        },
        ToolSpec {
            name: TOOL_SMART_GET,
            description: "Find the best local function for a task, let the hub pick among \
                          candidates, and inject its code into the target project.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Task description" },
                    "target_dir": {
                        "type": "string",
                        "description": "Project directory receiving the code (default '.')"
                    }
                },
                "required": ["query"]
            }),
        },
    ]
}

#[derive(Debug, Deserialize)]
struct SaveArgs {
    name: String,
    code: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default)]
    dependencies: Option<Vec<String>>,
    #[serde(default)]
    test_cases: Option<Vec<TestCase>>,
    #[serde(default)]
    status: Option<FunctionStatus>,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ListArgs {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    tag: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    include_archived: bool,
}

#[derive(Debug, Deserialize)]
struct GetArgs {
    name: String,
}

#[derive(Debug, Deserialize)]
struct SmartGetArgs {
    query: String,
    #[serde(default)]
    target_dir: Option<String>,
}

/// Dispatch one tool invocation.
pub fn call(ctx: &ToolContext, tool: &str, args: Value) -> Result<Value, CatalogError> {
    match tool {
        TOOL_SAVE => save_function(ctx, parse_args(TOOL_SAVE, args)?),
        TOOL_SEARCH => search_functions(ctx, parse_args(TOOL_SEARCH, args)?),
        TOOL_LIST => list_functions(ctx, parse_args(TOOL_LIST, args)?),
        TOOL_GET => get_function_details(ctx, parse_args(TOOL_GET, args)?),
        TOOL_SMART_GET => smart_search_and_get(ctx, parse_args(TOOL_SMART_GET, args)?),
        other => Err(CatalogError::validation(
            "call_tool",
            format!("unknown tool '{other}'"),
        )),
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(
    tool: &'static str,
    args: Value,
) -> Result<T, CatalogError> {
    serde_json::from_value(args).map_err(|err| CatalogError::validation(tool, err.to_string()))
}

fn save_function(ctx: &ToolContext, args: SaveArgs) -> Result<Value, CatalogError> {
    let outcome = ctx.orchestrator.save(SaveRequest {
        name: args.name,
        code: args.code,
        description: args.description,
        tags: args.tags,
        dependencies: args.dependencies,
        test_cases: args.test_cases,
        status: args.status,
    })?;
    let message = match outcome.warning {
        Some(warning) => format!(
            "SUCCESS: '{}' saved locally. WARNING: {warning}",
            outcome.record.name
        ),
        None => format!(
            "SUCCESS: '{}' saved and enriched (status: {}).",
            outcome.record.name, outcome.record.status
        ),
    };
    Ok(json!({ "message": message, "status": outcome.record.status }))
}

fn search_functions(ctx: &ToolContext, args: SearchArgs) -> Result<Value, CatalogError> {
    let summaries = ctx.store.list(&ListFilter {
        text_query: Some(args.query),
        tag: None,
        include_archived: false,
        limit: args.limit,
    })?;
    serde_json::to_value(summaries).map_err(|err| CatalogError::store_io(TOOL_SEARCH, err))
}

fn list_functions(ctx: &ToolContext, args: ListArgs) -> Result<Value, CatalogError> {
    let summaries = ctx.store.list(&ListFilter {
        text_query: args.query,
        tag: args.tag,
        include_archived: args.include_archived,
        limit: args.limit,
    })?;
    serde_json::to_value(summaries).map_err(|err| CatalogError::store_io(TOOL_LIST, err))
}

fn get_function_details(ctx: &ToolContext, args: GetArgs) -> Result<Value, CatalogError> {
    match ctx.store.get_by_name(&args.name) {
        Ok(record) => {
            // Handing out the code counts as a use.
            let record = ctx.store.record_usage(&record.name)?;
            serde_json::to_value(record).map_err(|err| CatalogError::store_io(TOOL_GET, err))
        }
        Err(CatalogError::NotFound { .. }) => Ok(json!({
            "error": format!("Function '{}' not found", args.name)
        })),
        Err(err) => Err(err),
    }
}

fn smart_search_and_get(ctx: &ToolContext, args: SmartGetArgs) -> Result<Value, CatalogError> {
    let target_dir = PathBuf::from(args.target_dir.unwrap_or_else(|| ".".to_string()));
    match ctx
        .orchestrator
        .smart_search_and_get(&args.query, &target_dir)?
    {
        SmartGetOutcome::NoMatch => Ok(json!({
            "message": format!("No local candidates found for query '{}'.", args.query)
        })),
        SmartGetOutcome::Injected { name, status, path } => Ok(json!({
            "message": format!(
                "SUCCESS: '{name}' (status: {status}) injected at {}.",
                path.display()
            ),
            "name": name,
            "status": status,
            "path": path,
        })),
    }
}
