mod cli;
mod config;
mod enrich;
mod error;
mod lifecycle;
mod materialize;
mod orchestrator;
mod record;
mod store;
mod tools;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::{json, Value};
use std::fs;
use std::sync::Arc;

use crate::config::{ConfigOverrides, EdgeConfig};
use crate::enrich::{EnrichmentClient, HubClient, LmCommand, TwoPhaseClient};
use crate::orchestrator::HybridOrchestrator;
use crate::record::TestCase;
use crate::store::CatalogStore;
use crate::tools::ToolContext;

fn main() {
    init_tracing();
    if let Err(err) = run() {
        tracing::error!(error = %err, "command failed");
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<()> {
    let args = cli::RootArgs::parse();

    if matches!(args.command, cli::Command::Tools) {
        println!("{}", serde_json::to_string_pretty(&tools::specs())?);
        return Ok(());
    }

    let config = EdgeConfig::load(ConfigOverrides {
        data_dir: args.data_dir,
        hub_url: args.hub_url,
    })?;
    let ctx = build_context(&config)?;

    let (tool, tool_args) = match args.command {
        cli::Command::Save(save) => (tools::TOOL_SAVE, save_args_to_json(save)?),
        cli::Command::Search(search) => (
            tools::TOOL_SEARCH,
            json!({ "query": search.query, "limit": search.limit }),
        ),
        cli::Command::List(list) => (
            tools::TOOL_LIST,
            json!({
                "query": list.query,
                "tag": list.tag,
                "limit": list.limit,
                "include_archived": list.include_archived,
            }),
        ),
        cli::Command::Get(get) => (tools::TOOL_GET, json!({ "name": get.name })),
        cli::Command::SmartGet(smart) => {
            let target_dir = smart
                .target_dir
                .to_str()
                .context("target dir must be valid UTF-8")?
                .to_string();
            (
                tools::TOOL_SMART_GET,
                json!({ "query": smart.query, "target_dir": target_dir }),
            )
        }
        cli::Command::Tools => unreachable!("handled above"),
    };

    let result = tools::call(&ctx, tool, tool_args)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn build_context(config: &EdgeConfig) -> Result<ToolContext> {
    let store = Arc::new(CatalogStore::open(&config.data_dir, config.reactivation)?);
    let hub = HubClient::new(&config.hub_url, config.remote_timeout);
    let client: Box<dyn EnrichmentClient> = match &config.lm_command {
        Some(command) => {
            let generator = LmCommand::parse(command)?;
            Box::new(TwoPhaseClient::new(hub, generator))
        }
        None => Box::new(hub),
    };
    let orchestrator = HybridOrchestrator::new(
        Arc::clone(&store),
        client,
        config.retry,
        config.materialize_ext.clone(),
    );
    Ok(ToolContext {
        store,
        orchestrator,
    })
}

fn save_args_to_json(args: cli::SaveArgs) -> Result<Value> {
    let code = match (args.code, args.code_file) {
        (Some(code), None) => code,
        (None, Some(path)) => fs::read_to_string(&path)
            .with_context(|| format!("read code file {}", path.display()))?,
        (None, None) => bail!("one of --code or --code-file is required"),
        (Some(_), Some(_)) => unreachable!("flags are mutually exclusive"),
    };

    let mut body = json!({ "name": args.name, "code": code });
    let fields = body.as_object_mut().expect("object literal");
    if let Some(description) = args.description {
        fields.insert("description".to_string(), json!(description));
    }
    if !args.tags.is_empty() {
        fields.insert("tags".to_string(), json!(args.tags));
    }
    if !args.dependencies.is_empty() {
        fields.insert("dependencies".to_string(), json!(args.dependencies));
    }
    if let Some(path) = args.test_cases_file {
        let bytes = fs::read(&path)
            .with_context(|| format!("read test cases file {}", path.display()))?;
        let cases: Vec<TestCase> = serde_json::from_slice(&bytes)
            .with_context(|| format!("parse test cases file {}", path.display()))?;
        fields.insert("test_cases".to_string(), serde_json::to_value(cases)?);
    }
    if let Some(status) = args.status {
        fields.insert("status".to_string(), serde_json::to_value(status)?);
    }
    Ok(body)
}
