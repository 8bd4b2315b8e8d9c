// =============================================================================
// REST control plane — Axum 0.7
// =============================================================================
//
// `GET /health` is public; everything else requires the admin bearer token,
// and `/kill` requires the stronger kill token. Every handler locks the same
// state mutex the scheduler ticks under, so control writes and ticks never
// interleave, and every write persists before the response goes out.
//
// Response envelope: `{ok: true, data}` or `{ok: false, error}`.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::{AuthBearer, KillBearer};
use crate::app::AppContext;
use crate::engines::dex::{metrics, ScanView};
use crate::providers::with_deadline;
use crate::sol_price::SolPriceCache;
use crate::types::{AlertEvent, CrisisLevel};

// =============================================================================
// Router construction
// =============================================================================

/// Build the control-plane router with CORS middleware and shared state.
pub fn router(ctx: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/status", get(status))
        .route("/config", post(patch_config))
        .route("/enable", post(enable))
        .route("/disable", post(disable))
        .route("/dex/reset", post(dex_reset))
        .route("/dex/clear-cooldowns", post(dex_clear_cooldowns))
        .route("/dex/clear-breaker", post(dex_clear_breaker))
        .route("/crisis/toggle", post(crisis_toggle))
        .route("/crisis/check", post(crisis_check))
        // ── Kill switch (stronger token) ────────────────────────────
        .route("/kill", post(kill))
        // ── Middleware & State ──────────────────────────────────────
        .layer(cors)
        .with_state(ctx)
}

fn ok(data: serde_json::Value) -> axum::response::Response {
    axum::Json(json!({ "ok": true, "data": data })).into_response()
}

fn err(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        axum::Json(json!({ "ok": false, "error": message.into() })),
    )
        .into_response()
}

// =============================================================================
// Health (public)
// =============================================================================

async fn health(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    let enabled = ctx.state.lock().await.enabled;
    ok(json!({
        "status": "ok",
        "enabled": enabled,
        "state_version": ctx.current_version(),
        "uptime_secs": ctx.uptime_secs(),
        "server_time": chrono::Utc::now().timestamp_millis(),
    }))
}

// =============================================================================
// Status
// =============================================================================

async fn status(_auth: AuthBearer, State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    // Provider reads happen before taking the state lock so a slow brokerage
    // cannot stall a concurrent tick longer than necessary.
    let account = with_deadline("brokerage", ctx.providers.brokerage.get_account())
        .await
        .ok();
    let positions = with_deadline("brokerage", ctx.providers.brokerage.get_positions())
        .await
        .unwrap_or_default();
    let clock = with_deadline("brokerage", ctx.providers.brokerage.get_clock())
        .await
        .ok();

    let state = ctx.state.lock().await;
    let now = chrono::Utc::now();
    let sol_usd = SolPriceCache::global().price();

    // Value open DEX positions at the latest scanned prices.
    let view = ScanView::from_signals(&state.dex.signals);
    let dex_positions: Vec<serde_json::Value> = state
        .dex
        .positions
        .values()
        .map(|p| {
            let price = view.price(&p.token_address).unwrap_or(p.entry_price);
            let pl_pct = if p.entry_price > 0.0 {
                (price - p.entry_price) / p.entry_price * 100.0
            } else {
                0.0
            };
            json!({
                "position": p,
                "current_price": price,
                "value_sol": p.token_amount * price / sol_usd,
                "pl_pct": pl_pct,
            })
        })
        .collect();

    let signals: Vec<_> = state.signal_cache.iter().take(100).collect();
    let logs: Vec<_> = state.logs.iter().rev().take(100).collect();

    ok(json!({
        "enabled": state.enabled,
        "account": account,
        "positions": positions,
        "clock": clock,
        "config": &state.config,
        "signals": signals,
        "logs": logs,
        "cost": &state.cost,
        "signal_research": &state.signal_research,
        "position_research": &state.position_research,
        "staleness": &state.staleness,
        "twitter_confirmations": &state.twitter_confirmations,
        "position_entries": &state.position_entries,
        "premarket_plan": &state.premarket_plan,
        "dex": {
            "paper_balance_sol": state.dex.paper_balance_sol,
            "realized_pnl_sol": state.dex.realized_pnl_sol,
            "positions": dex_positions,
            "signals": state.dex.signals.iter().take(50).collect::<Vec<_>>(),
            "trade_history": &state.dex.trade_history,
            "portfolio_history": &state.dex.portfolio_history,
            "cooldowns": &state.dex.stop_loss_cooldowns,
            "circuit_breaker_until": state.dex.circuit_breaker_until,
            "drawdown_paused": state.dex.drawdown_paused,
            "metrics": metrics::compute(&state.dex, now),
        },
        "crisis": &state.crisis,
        "sol_usd": sol_usd,
        "state_version": ctx.current_version(),
        "uptime_secs": ctx.uptime_secs(),
    }))
}

// =============================================================================
// Config
// =============================================================================

async fn patch_config(
    _auth: AuthBearer,
    State(ctx): State<Arc<AppContext>>,
    Json(patch): Json<serde_json::Value>,
) -> impl IntoResponse {
    let mut state = ctx.state.lock().await;

    let merged = match state.config.merged_with(&patch) {
        Ok(merged) => merged,
        Err(e) => return err(StatusCode::BAD_REQUEST, format!("invalid config patch: {e}")),
    };

    let llm_changed = merged.llm.llm_provider != state.config.llm.llm_provider;
    state.config = merged;
    state.log_event("info", "config_updated", format!("patched keys: {}",
        patch.as_object().map(|o| o.keys().cloned().collect::<Vec<_>>().join(", ")).unwrap_or_default()));

    if llm_changed {
        // Provider handles are immutable; a selector change takes effect on
        // restart. Surface that clearly instead of silently ignoring it.
        warn!("llm_provider changed — restart required for the new provider to take effect");
        state.log_event(
            "warn",
            "llm_provider_changed",
            "restart required for the new LLM provider selection",
        );
    }

    if let Err(e) = state.config.save(&ctx.config_path) {
        warn!(error = %e, "config save failed");
    }
    ctx.persist(&state);
    ctx.increment_version();

    ok(serde_json::to_value(&state.config).unwrap_or_default())
}

// =============================================================================
// Enable / disable
// =============================================================================

async fn enable(_auth: AuthBearer, State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    let mut state = ctx.state.lock().await;
    state.enabled = true;
    state.log_event("info", "agent_enabled", "agent enabled via API");
    ctx.persist(&state);
    ctx.increment_version();
    info!("agent ENABLED via API");
    ok(json!({ "enabled": true }))
}

async fn disable(_auth: AuthBearer, State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    let mut state = ctx.state.lock().await;
    state.enabled = false;
    state.log_event("info", "agent_disabled", "agent disabled via API — positions untouched");
    ctx.persist(&state);
    ctx.increment_version();
    info!("agent DISABLED via API");
    ok(json!({ "enabled": false }))
}

// =============================================================================
// DEX overrides
// =============================================================================

async fn dex_reset(_auth: AuthBearer, State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    let mut state = ctx.state.lock().await;
    state.reset_dex_book();
    state.log_event("warn", "dex_reset", "DEX paper book reset to starting balance");
    ctx.persist(&state);
    ctx.increment_version();
    ok(json!({ "paper_balance_sol": state.dex.paper_balance_sol }))
}

async fn dex_clear_cooldowns(
    _auth: AuthBearer,
    State(ctx): State<Arc<AppContext>>,
) -> impl IntoResponse {
    let mut state = ctx.state.lock().await;
    let cleared = state.dex.stop_loss_cooldowns.len();
    state.dex.stop_loss_cooldowns.clear();
    state.log_event("info", "cooldowns_cleared", format!("{cleared} cooldowns cleared"));
    ctx.persist(&state);
    ctx.increment_version();
    ok(json!({ "cleared": cleared }))
}

async fn dex_clear_breaker(
    _auth: AuthBearer,
    State(ctx): State<Arc<AppContext>>,
) -> impl IntoResponse {
    let mut state = ctx.state.lock().await;
    state.dex.circuit_breaker_until = None;
    state.dex.circuit_breaker_since = None;
    state.dex.recent_stop_losses.clear();
    state.log_event("info", "circuit_breaker_cleared", "circuit breaker cleared via API");
    ctx.persist(&state);
    ctx.increment_version();
    ok(json!({ "circuit_breaker_until": null }))
}

// =============================================================================
// Crisis overrides
// =============================================================================

#[derive(Deserialize)]
struct CrisisToggleRequest {
    #[serde(rename = "override")]
    override_on: bool,
    #[serde(default)]
    level: Option<u8>,
}

async fn crisis_toggle(
    _auth: AuthBearer,
    State(ctx): State<Arc<AppContext>>,
    Json(req): Json<CrisisToggleRequest>,
) -> impl IntoResponse {
    let mut state = ctx.state.lock().await;
    state.crisis.manual_override = req.override_on;

    if let Some(level) = req.level {
        if !req.override_on {
            return err(
                StatusCode::BAD_REQUEST,
                "level can only be set while override is on",
            );
        }
        match CrisisLevel::try_from(level) {
            Ok(parsed) => {
                state.crisis.level = parsed;
            }
            Err(e) => return err(StatusCode::BAD_REQUEST, e),
        }
    }

    let crisis_level = state.crisis.level;
    state.log_event(
        "warn",
        "crisis_override",
        format!(
            "manual override {} (level {})",
            if req.override_on { "ON" } else { "OFF" },
            crisis_level
        ),
    );
    ctx.persist(&state);
    ctx.increment_version();
    ok(json!({
        "manual_override": state.crisis.manual_override,
        "level": state.crisis.level,
    }))
}

async fn crisis_check(_auth: AuthBearer, State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    let mut state = ctx.state.lock().await;
    let now = chrono::Utc::now();
    let level = crate::crisis::run_crisis_check(
        &mut state,
        ctx.providers.macro_data.as_ref(),
        ctx.providers.alerts.as_ref(),
        now,
    )
    .await;
    ctx.persist(&state);
    ctx.increment_version();
    ok(json!({
        "level": level,
        "triggered": &state.crisis.triggered,
        "indicators": &state.crisis.indicators,
    }))
}

// =============================================================================
// Kill switch
// =============================================================================

async fn kill(_auth: KillBearer, State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    let mut state = ctx.state.lock().await;
    state.kill();
    ctx.providers.alerts.send(AlertEvent::KillSwitch);
    ctx.persist(&state);
    ctx.increment_version();
    warn!("kill switch activated via API");
    ok(json!({ "enabled": false, "killed": true }))
}
