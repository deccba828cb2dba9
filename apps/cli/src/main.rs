//! Backend dispatch CLI
//!
//! Inspects the configured backend targets and runs single operations through
//! the dispatch facade.

mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{json, Value as JsonValue};

use mds_backends::{
    AuthContext, Backends, Config, DispatchReport, HandlerResolver, Instance,
    InvocationStatus, MethodOptions, Operation, PluginTable, Registry,
};

#[derive(Parser, Debug)]
#[command(name = "mds-dispatch", version, about = "Inspect and exercise backend targets")]
struct Cli {
    /// Configuration file (defaults to mds.* in the working directory)
    #[arg(short, long, global = true, env = "MDS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List configured models, their targets and whether each resolves
    Targets,
    /// Run one operation through every target registered for a model
    Dispatch {
        /// create | read | update | delete
        operation: Operation,
        /// Model name (e.g. Encounter)
        model: String,
        #[arg(long)]
        uuid: Option<String>,
        /// Instance fields as a JSON object
        #[arg(long)]
        data: Option<String>,
        /// Authorization header value forwarded to handlers
        #[arg(long, env = "MDS_AUTHORIZATION", hide_env_values = true)]
        auth: Option<String>,
    },
    /// Validate configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::load_from(cli.config.as_deref()).context("Failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;

    let _logging_guard =
        logging::init_logging(&config.logging).context("Failed to initialize logging")?;

    match cli.command {
        Command::Check => check(&config),
        Command::Targets => targets(&config),
        Command::Dispatch {
            operation,
            model,
            uuid,
            data,
            auth,
        } => dispatch(&config, operation, model, uuid, data, auth).await,
    }
}

fn build_registry(config: &Config) -> anyhow::Result<Registry> {
    let mut registry = Registry::new();
    registry
        .autoconfigure(None, &config.backends)
        .context("Failed to configure backend registry")?;
    Ok(registry)
}

fn check(config: &Config) -> anyhow::Result<()> {
    let models = config.backends.targets.len();
    let targets: usize = config.backends.targets.values().map(Vec::len).sum();
    println!(
        "Configuration OK: {} model(s), {} target(s), target mode {}",
        models, targets, config.backends.target
    );
    Ok(())
}

fn targets(config: &Config) -> anyhow::Result<()> {
    let registry = build_registry(config)?;
    let resolver = HandlerResolver::new(Arc::new(PluginTable::builtin(&config.backends.remote)));
    let init = &config.backends.init_options;

    let mut models = serde_json::Map::new();
    for model in registry.models() {
        let entries: Vec<JsonValue> = registry
            .list(model)
            .iter()
            .enumerate()
            .map(|(position, descriptor)| match resolver.resolve(descriptor, init) {
                Ok(handler) => json!({
                    "target": descriptor.label(),
                    "primary": position == 0,
                    "status": "resolved",
                    "handler": handler.name(),
                }),
                Err(e) => json!({
                    "target": descriptor.label(),
                    "primary": position == 0,
                    "status": "unresolved",
                    "handler": "noop",
                    "error": e.to_string(),
                }),
            })
            .collect();
        models.insert(model.to_string(), JsonValue::Array(entries));
    }

    print_json(&json!({
        "target": config.backends.target.to_string(),
        "failure_policy": config.backends.failure_policy,
        "models": models,
    }))
}

async fn dispatch(
    config: &Config,
    operation: Operation,
    model: String,
    uuid: Option<String>,
    data: Option<String>,
    auth: Option<String>,
) -> anyhow::Result<()> {
    let fields = match data {
        Some(data) => serde_json::from_str(&data).context("--data must be a JSON object")?,
        None => json!({}),
    };
    let mut instance = Instance::from_json(model, fields)?.with_supplied_uuid(uuid);
    let auth = auth
        .as_deref()
        .map(AuthContext::parse)
        .transpose()
        .context("Invalid --auth value")?;

    let backends = Backends::from_config(
        &config.backends,
        Arc::new(build_registry(config)?),
        Arc::new(PluginTable::builtin(&config.backends.remote)),
    );

    tracing::info!(%operation, model = %instance.model, "Dispatching");
    let options = MethodOptions::new();
    let report = match operation {
        Operation::Create => {
            backends
                .create_with_report(&mut instance, auth.as_ref(), &options)
                .await?
        }
        _ => {
            backends
                .execute(operation, &instance, auth.as_ref(), &options)
                .await?
        }
    };

    print_json(&report_json(&instance, &report))
}

fn report_json(instance: &Instance, report: &DispatchReport) -> JsonValue {
    let handlers: Vec<JsonValue> = report
        .reports
        .iter()
        .map(|r| {
            let mut entry = json!({
                "target": r.target,
                "handler": r.handler,
                "method": r.key,
                "primary": r.primary,
                "canonical": r.canonical,
                "status": r.status.label(),
            });
            if let InvocationStatus::Failed(e) = &r.status {
                entry["error"] = json!(e.to_string());
            }
            entry
        })
        .collect();

    json!({
        "operation": report.operation,
        "model": report.model,
        "instance": instance.to_json(),
        "canonical": report.canonical.as_ref().map(Instance::to_json),
        "canonical_source": report.canonical_source(),
        "handlers": handlers,
        "diagnostics": report
            .diagnostics
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>(),
    })
}

fn print_json(value: &JsonValue) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
