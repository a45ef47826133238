use std::sync::Arc;

use task_runner::config::{ServerConfig, TaskConfig};
use task_runner::load::SystemLoadProbe;
use task_runner::store::open_store;
use task_runner::tasks::{HandlerRegistry, Pipeline, task_routes};

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

    let server_config = ServerConfig::from_env();
    let task_config = TaskConfig::from_env();
    let addr = server_config.bind_addr()?;

    eprintln!("⚙️  Task Runner v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://{}/tasks", addr);
    eprintln!(
        "   Thresholds: cpu > {:.0}%, free memory < {:.0}%",
        task_config.thresholds.max_cpu_percent,
        task_config.thresholds.min_free_memory_ratio * 100.0,
    );
    eprintln!("   Dispatch: {:?}", task_config.dispatch);
    match &server_config.db_path {
        Some(path) => eprintln!("   Database: {}", path.display()),
        None => eprintln!("   Database: in-memory"),
    }

    // ── Pipeline ─────────────────────────────────────────────────────────
    let store = open_store(&server_config).await?;
    let pipeline = Pipeline::build(
        store,
        Arc::new(SystemLoadProbe::new()),
        HandlerRegistry::with_builtins(),
        &task_config,
    );
    let recovered = pipeline.service.recover_pending().await?;
    if recovered > 0 {
        eprintln!("   Recovered {} pending task(s) from the store", recovered);
    }
    let processor = Arc::clone(&pipeline.processor).spawn();

    // ── HTTP ─────────────────────────────────────────────────────────────
    let app = task_routes(Arc::clone(&pipeline.service));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Task server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    let report = processor.shutdown().await;
    if report.pending.is_empty() {
        tracing::info!("All queued tasks were processed");
    } else {
        eprintln!(
            "   {} task(s) left pending; they remain PENDING in the store",
            report.pending.len()
        );
    }

    Ok(())
}
