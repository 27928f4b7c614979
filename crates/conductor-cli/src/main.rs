//! Conductor CLI.
//!
//! `conductor run` executes one task through the reasoning loop;
//! `conductor serve` keeps the runtime and health endpoint up until ctrl-c;
//! `conductor catalog` and `conductor check-config` inspect the live tool
//! catalog and the alias configuration.

mod llm;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use conductor_critic::LlmClient;
use conductor_net::{HttpMcpClient, HttpSchemaSource, ProbeTarget, Prober, ProberConfig};
use conductor_registry::{AliasMapper, SchemaSource, TaskSpec, TaskType};
use conductor_runtime::{Runtime, RuntimeConfig, serve_health};

use crate::llm::OpenAiCompatClient;

/// Default tool-host base URL for schema fetches.
const DEFAULT_TOOL_HOST: &str = "http://localhost:8100";

/// Default endpoints for the well-known tool fleet.
const DEFAULT_ENDPOINTS: &[(&str, &str)] = &[
    ("mcp-deepsearch", "http://localhost:8101"),
    ("microsandbox", "http://localhost:8102"),
    ("browser_use", "http://localhost:8103"),
    ("mcp-search-tool", "http://localhost:8104"),
];

#[derive(Parser)]
#[command(name = "conductor", about = "Adaptive MCP tool-dispatch runtime", version)]
struct Cli {
    /// Tool-host base URL for schema fetches.
    #[arg(long, default_value = DEFAULT_TOOL_HOST)]
    tool_host: String,

    /// Tool-host WebSocket update endpoint (enables the live listener).
    #[arg(long)]
    update_stream: Option<String>,

    /// Alias/mapping configuration file.
    #[arg(long, default_value = "config/tool_mappings.toml")]
    mappings: PathBuf,

    /// Tool endpoint override, repeatable: `tool_id=http://host:port`.
    #[arg(long = "endpoint", value_parser = parse_endpoint)]
    endpoints: Vec<(String, String)>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute one task through the reasoning loop.
    Run {
        /// Task description.
        description: String,

        /// Task type: research, search, execute, analyze, install, or any
        /// custom tag.
        #[arg(long, default_value = "research")]
        task_type: String,
    },

    /// Run the runtime with its health endpoint until ctrl-c.
    Serve {
        /// Health endpoint bind address.
        #[arg(long, default_value = "127.0.0.1:8070")]
        addr: String,
    },

    /// Print the rendered LLM tool catalog.
    Catalog,

    /// Load and summarize the alias configuration.
    CheckConfig,
}

fn parse_endpoint(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(tool, url)| (tool.to_owned(), url.to_owned()))
        .ok_or_else(|| format!("expected tool_id=url, got `{raw}`"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::CheckConfig => {
            return check_config(&cli.mappings);
        }
        _ => {}
    }

    // Assemble the composition root.
    let mcp = Arc::new(HttpMcpClient::with_endpoints(endpoint_table(&cli.endpoints)));
    let source: Arc<dyn SchemaSource> = Arc::new(HttpSchemaSource::new(&cli.tool_host));
    let llm: Option<Arc<dyn LlmClient>> = OpenAiCompatClient::from_env()
        .map(|client| Arc::new(client) as Arc<dyn LlmClient>);
    if llm.is_none() {
        tracing::warn!(
            "no {} set; reasoning and LLM-backed repair are disabled",
            llm::ENV_BASE_URL
        );
    }

    let config = RuntimeConfig {
        alias_config_path: cli.mappings.clone(),
        update_stream_url: cli.update_stream.clone(),
        ..RuntimeConfig::default()
    };
    let runtime = Runtime::new(config, source, Arc::clone(&mcp) as _, llm)?;
    runtime.init().await?;

    match cli.command {
        Commands::Run {
            description,
            task_type,
        } => {
            runtime.spawn_background(None, Some(Arc::clone(&mcp)));

            // Unknown task types are carried through verbatim, not collapsed.
            let task = TaskSpec::new(TaskType::from(task_type.as_str()), description);
            let trajectory = runtime.run_task(&task).await?;

            println!("task:      {}", trajectory.task.description);
            println!("steps:     {}", trajectory.steps.len());
            println!("completed: {}", trajectory.completed);
            if let Some(answer) = &trajectory.final_answer {
                println!("\n{answer}");
            } else {
                println!("\n(no final answer within the step budget)");
            }

            runtime.shutdown().await?;
        }

        Commands::Serve { addr } => {
            let prober = Arc::new(Prober::new(
                Arc::clone(runtime.ledger()),
                ProberConfig::default(),
            ));
            for (tool_id, url) in endpoint_table(&cli.endpoints) {
                if let Some(addr) = url.strip_prefix("http://") {
                    prober.watch(
                        tool_id,
                        ProbeTarget {
                            addr: addr.to_owned(),
                            health_url: Some(format!("{url}/health")),
                        },
                    );
                }
            }

            runtime.spawn_background(Some(prober), Some(Arc::clone(&mcp)));

            let server = {
                let runtime = Arc::clone(&runtime);
                let addr = addr.clone();
                tokio::spawn(async move { serve_health(runtime, &addr).await })
            };

            tokio::signal::ctrl_c()
                .await
                .context("waiting for ctrl-c")?;
            tracing::info!("ctrl-c received");

            runtime.shutdown().await?;
            server.abort();
        }

        Commands::Catalog => {
            println!("{}", runtime.registry().snapshot().generate_llm_catalog());
        }

        Commands::CheckConfig => unreachable!("handled above"),
    }

    Ok(())
}

fn endpoint_table(overrides: &[(String, String)]) -> HashMap<String, String> {
    let mut table: HashMap<String, String> = DEFAULT_ENDPOINTS
        .iter()
        .map(|(tool, url)| ((*tool).to_owned(), (*url).to_owned()))
        .collect();
    for (tool, url) in overrides {
        table.insert(tool.clone(), url.clone());
    }
    table
}

fn check_config(path: &PathBuf) -> anyhow::Result<()> {
    let mapper = AliasMapper::load(path)
        .with_context(|| format!("loading {}", path.display()))?;

    // Exercise the tables with the well-known drift cases.
    println!("alias config: {}", path.display());
    for (alias, expected) in [
        ("deepsearch", "mcp-deepsearch"),
        ("sandbox", "microsandbox"),
        ("browser", "browser_use"),
    ] {
        let canonical = mapper.canonical_tool_id(alias);
        let mark = if canonical == expected { "ok" } else { "custom" };
        println!("  {alias} -> {canonical} [{mark}]");
    }

    Ok(())
}
