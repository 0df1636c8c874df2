use std::sync::Arc;

use ops_automation::engine::AutomationEngine;
use ops_automation::executor::{ActionSpec, TaskExecutor};
use ops_automation::queue::Priority;
use ops_automation::store::{JsonFileStore, Store};
use ops_automation::workflow::WorkflowStep;
use ops_automation::{EngineConfig, HandlerRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = EngineConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    let data_dir = std::env::var("ENGINE_DATA_DIR").unwrap_or_else(|_| "./data".to_string());
    let store: Arc<dyn Store> = Arc::new(JsonFileStore::open(&data_dir).await.unwrap_or_else(
        |e| {
            eprintln!("Error: Failed to open store at {data_dir}: {e}");
            std::process::exit(1);
        },
    ));

    eprintln!("⚙️  ops-automation v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Workers: {}", config.num_workers);
    eprintln!("   Store: {data_dir}");
    eprintln!("   Ctrl-C to shut down.\n");

    let handlers = Arc::new(HandlerRegistry::new());
    handlers
        .register_fn("health_check", |_args| async {
            Ok(serde_json::json!({ "healthy": true }))
        })
        .await;
    handlers
        .register_fn("echo", |args| async move {
            Ok(serde_json::Value::Object(args.kwargs))
        })
        .await;

    let executor =
        TaskExecutor::new(Arc::clone(&handlers)).with_max_output(config.max_command_output);
    let engine = AutomationEngine::new(config, executor, Some(store));
    engine.start().await?;

    // A few demo submissions so a fresh run has something to show.
    engine
        .submit_job(
            ActionSpec::local_command("uname -a"),
            "system-info",
            Priority::Normal,
            None,
        )
        .await?;
    engine
        .schedule_task("periodic-health", ActionSpec::function("health_check"), "hourly")
        .await?;

    if engine.list_workflows().await.is_empty() {
        let workflow = engine
            .define_workflow(
                "disk-report",
                "Collect disk usage and summarize",
                vec![
                    WorkflowStep::new("usage", ActionSpec::local_command("df -h")),
                    WorkflowStep::new("largest", ActionSpec::local_command("du -sh /tmp")),
                ],
            )
            .await?;
        engine
            .execute_workflow(workflow.id, serde_json::Map::new())
            .await?;
    }

    tokio::signal::ctrl_c().await?;
    eprintln!("\nShutting down...");
    engine.stop().await;
    Ok(())
}
