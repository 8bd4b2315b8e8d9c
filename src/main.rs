// =============================================================================
// Polaris Signal Agent — Main Entry Point
// =============================================================================
//
// The agent boots disabled for safety. Operators must explicitly enable it
// through the control plane (`POST /enable`).
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app;
mod config;
mod crisis;
mod engines;
mod error;
mod gatherers;
mod persistence;
mod planner;
mod providers;
mod research;
mod scheduler;
mod sol_price;
mod state;
mod types;
mod util;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app::AppContext;
use crate::config::AgentConfig;
use crate::gatherers::tickers::TickerValidator;
use crate::persistence::StateStore;
use crate::providers::brokerage::AlpacaClient;
use crate::providers::chart_data::GeckoChartClient;
use crate::providers::dex_screener::DexScreenerClient;
use crate::providers::llm::OpenAiCompatClient;
use crate::providers::macro_data::YahooMacroClient;
use crate::providers::notifier::TracingAlertSink;
use crate::providers::social::SocialClient;
use crate::providers::Providers;

const CONFIG_PATH: &str = "agent_config.json";
const STATE_PATH: &str = "agent_state.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & logging ─────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Polaris Signal Agent — Starting Up               ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    // ── 2. Durable state + config ────────────────────────────────────────
    let store = StateStore::new(STATE_PATH);
    let mut state = store.load_or_default()?;

    // An operator-edited config file takes precedence over the snapshot's
    // embedded copy.
    match AgentConfig::load(CONFIG_PATH) {
        Ok(file_config) => state.config = file_config,
        Err(e) => {
            warn!(error = %e, "no usable config file — keeping snapshot config");
        }
    }

    // SAFETY: always boot disabled.
    state.enabled = false;

    info!(
        dex_enabled = state.config.dex.dex_enabled,
        crypto_enabled = state.config.crypto.crypto_enabled,
        options_enabled = state.config.options.options_enabled,
        crisis_mode = state.config.crisis.crisis_mode_enabled,
        "configuration loaded — agent starts DISABLED"
    );

    // ── 3. Providers ─────────────────────────────────────────────────────
    let alpaca_key = std::env::var("ALPACA_API_KEY").unwrap_or_default();
    let alpaca_secret = std::env::var("ALPACA_API_SECRET").unwrap_or_default();
    let alpaca = Arc::new(AlpacaClient::paper(alpaca_key, alpaca_secret));

    let llm_key = std::env::var("LLM_API_KEY").unwrap_or_default();
    let llm = Arc::new(OpenAiCompatClient::from_provider(
        &state.config.llm.llm_provider,
        llm_key,
    ));

    let providers = Providers {
        brokerage: alpaca.clone(),
        market_data: alpaca.clone(),
        options: alpaca,
        dex: Arc::new(DexScreenerClient::public()),
        chart: Arc::new(GeckoChartClient::public()),
        llm,
        macro_data: Arc::new(YahooMacroClient::public()),
        social: Arc::new(SocialClient::public()),
        alerts: Arc::new(TracingAlertSink),
    };

    // ── 4. Shared context ────────────────────────────────────────────────
    let ctx = Arc::new(AppContext::new(
        state,
        store,
        providers,
        TickerValidator::public(),
        CONFIG_PATH,
    ));

    // ── 5. Control plane ─────────────────────────────────────────────────
    let bind_addr =
        std::env::var("POLARIS_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let api_ctx = ctx.clone();
    let bind_addr_clone = bind_addr.clone();
    tokio::spawn(async move {
        let app = api::rest::router(api_ctx);
        let listener = tokio::net::TcpListener::bind(&bind_addr_clone)
            .await
            .expect("failed to bind control plane");
        info!(addr = %bind_addr_clone, "control plane listening");
        axum::serve(listener, app)
            .await
            .expect("control plane failed");
    });

    // ── 6. Scheduler ─────────────────────────────────────────────────────
    let sched_ctx = ctx.clone();
    tokio::spawn(async move {
        scheduler::run_scheduler(sched_ctx).await;
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    let state = ctx.state.lock().await;
    ctx.persist(&state);
    if let Err(e) = state.config.save(CONFIG_PATH) {
        error!(error = %e, "failed to save config on shutdown");
    }

    info!("Polaris Signal Agent shut down complete.");
    Ok(())
}
