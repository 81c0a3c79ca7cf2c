use anyhow::Context;
use axum::http::Method;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use rd_domain::config::Config;
use rd_gateway::api;
use rd_gateway::cli::Cli;
use rd_gateway::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = cli.load_config().context("loading config")?;
    run_server(config).await
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,rd_gateway=debug")),
        )
        .init();
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    tracing::info!("reduck starting");

    // ── Config validation ────────────────────────────────────────────
    for issue in config.validate() {
        tracing::warn!("config: {issue}");
    }

    // ── Agent binary check ───────────────────────────────────────────
    check_agent_binary(&config)?;

    // ── State ────────────────────────────────────────────────────────
    tracing::info!(
        sessions_dir = %config.sessions_dir().display(),
        project_cwd = %config.project_cwd.display(),
        "conversation store ready"
    );
    let open_browser = config.server.open_browser;
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(config);

    // ── Router ───────────────────────────────────────────────────────
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);
    let app = api::router()
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(tower::limit::ConcurrencyLimitLayer::new(64))
        .with_state(state);

    // ── Bind ─────────────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "reduck listening");

    if open_browser {
        let url = format!("http://{addr}/");
        if let Err(e) = webbrowser::open(&url) {
            tracing::warn!(url = %url, error = %e, "could not open browser");
        }
    }

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

/// The agent CLI must be reachable before we accept any converse.
fn check_agent_binary(config: &Config) -> anyhow::Result<()> {
    let binary = &config.agent.binary;
    let found = if binary.components().count() > 1 {
        binary.is_file()
    } else {
        which::which(binary).is_ok()
    };
    if !found {
        anyhow::bail!(
            "agent CLI '{}' not found on PATH — install it or pass --agent-bin",
            binary.display()
        );
    }
    tracing::info!(binary = %binary.display(), "agent CLI found");
    Ok(())
}
