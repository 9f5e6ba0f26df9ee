//! The `prizm` binary: wire the runtime context, mount the HTTP/WS
//! surface, and serve.

mod api;
mod state;
mod ws;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use prizm_domain::config::Config;
use prizm_events::EventBus;
use prizm_locks::ResourceLockManager;
use prizm_memory::{
    InMemoryDedupLog, InMemoryVectorIndex, MemoryWriter, NoopMemoryExtractor, NoopMemoryReader,
};
use prizm_providers::ProviderRegistry;
use prizm_runtime::{AgentRuntime, RuntimeContext};
use prizm_store::{CheckpointStore, ScopeStore, WorkspaceStore};
use prizm_terminal::{ExecWorkerPool, TerminalManager};

use crate::state::AppState;

#[derive(Parser, Debug)]
#[command(name = "prizm", about = "Local-first agent workspace server")]
struct Cli {
    /// Path to prizm.toml.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind host override.
    #[arg(long)]
    host: Option<String>,

    /// Bind port override.
    #[arg(long)]
    port: Option<u16>,

    /// Data directory override.
    #[arg(long)]
    data_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(data_dir) = cli.data_dir {
        config.server.data_dir = data_dir;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.server.log_level)),
        )
        .init();

    let config = Arc::new(config);
    std::fs::create_dir_all(&config.server.data_dir)?;

    // ── Runtime context ─────────────────────────────────────────────
    let bus = Arc::new(EventBus::new());
    let data_dir = config.server.data_dir.clone();
    let scopes_root = data_dir.join("scopes");

    let providers = Arc::new(ProviderRegistry::new());
    // Concrete LLM providers are registered by the embedding deployment;
    // an empty registry serves workspace and terminal traffic only.
    if providers.is_empty() {
        tracing::warn!("no LLM providers registered; chat turns will fail until one is added");
    }

    let memory = Arc::new(MemoryWriter::new(
        Arc::new(InMemoryVectorIndex::new()),
        None,
        Arc::new(InMemoryDedupLog::new()),
        config.memory.dedup_distance_threshold,
    ));

    let ctx = RuntimeContext {
        config: config.clone(),
        bus: bus.clone(),
        scopes: Arc::new(ScopeStore::new(&scopes_root)),
        workspace: Arc::new(WorkspaceStore::new(&scopes_root)),
        checkpoints: Arc::new(CheckpointStore::new(&scopes_root)),
        locks: Arc::new(ResourceLockManager::new(bus.clone())),
        memory,
        memory_reader: Arc::new(NoopMemoryReader),
        memory_extractor: Arc::new(NoopMemoryExtractor),
        providers,
        terminals: Arc::new(TerminalManager::new(config.terminal.clone(), &data_dir)),
        exec_pool: Arc::new(ExecWorkerPool::new(config.terminal.clone())),
    };

    let runtime = AgentRuntime::new(ctx);
    runtime.wire_subscribers();
    runtime.ctx.terminals.spawn_reaper();
    spawn_lock_reaper(&runtime);
    spawn_exec_reaper(&runtime);
    spawn_run_pruner(&runtime);

    // ── API key ─────────────────────────────────────────────────────
    let api_key_hash = if config.server.auth_disabled {
        None
    } else {
        match std::env::var(&config.server.api_key_env) {
            Ok(key) if !key.is_empty() => {
                use sha2::{Digest, Sha256};
                Some(Arc::new(Sha256::digest(key.as_bytes()).to_vec()))
            }
            _ => {
                tracing::warn!(
                    env = %config.server.api_key_env,
                    "auth enabled but no API key set; all requests will be rejected"
                );
                Some(Arc::new(Vec::new()))
            }
        }
    };

    let (ws_tx, _) = tokio::sync::broadcast::channel(256);
    let app_state = AppState {
        config: config.clone(),
        runtime: runtime.clone(),
        api_key_hash,
        ws_tx: ws_tx.clone(),
    };
    ws::broadcast::register_bridge(&runtime.ctx.bus, ws_tx);

    let router = api::router(app_state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "prizm listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    runtime.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown requested");
}

fn spawn_lock_reaper(runtime: &Arc<AgentRuntime>) {
    let runtime = runtime.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            ticker.tick().await;
            runtime.ctx.locks.sweep_expired().await;
        }
    });
}

fn spawn_exec_reaper(runtime: &Arc<AgentRuntime>) {
    let runtime = runtime.clone();
    let interval =
        std::time::Duration::from_millis(runtime.ctx.config.terminal.reap_interval_ms);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            runtime.ctx.exec_pool.reap_idle();
        }
    });
}

fn spawn_run_pruner(runtime: &Arc<AgentRuntime>) {
    let runtime = runtime.clone();
    let retention = runtime.ctx.config.workflow.run_retention_ms;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            ticker.tick().await;
            let pruned = runtime.workflows.prune_runs(retention);
            if pruned > 0 {
                tracing::debug!(pruned, "pruned workflow runs");
            }
        }
    });
}
