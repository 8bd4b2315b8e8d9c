// =============================================================================
// Scheduler — the 30-second tick sequencing every phase
// =============================================================================
//
// One tick is an atomic sequence under the state lock: crisis before all
// trading, gather before research, exits inside each engine before entries,
// persist at the end. A phase that fails is logged and skipped; errors never
// cross tick boundaries. A soft time budget stops launching new phases when
// the tick runs long (per-call deadlines bound each provider call inside a
// phase).
// =============================================================================

use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::app::AppContext;
use crate::crisis;
use crate::engines::{crypto as crypto_engine, dex as dex_engine, options, stock};
use crate::gatherers::run_gatherers;
use crate::planner;
use crate::providers::{with_deadline, MarketClock};
use crate::research;
use crate::sol_price::SolPriceCache;
use crate::state::{AgentState, SocialObservation, TwitterConfirmation};
use crate::types::CrisisLevel;

/// Soft budget for one tick. New phases are not started past this.
const TICK_SOFT_BUDGET: StdDuration = StdDuration::from_secs(25);
/// Signals researched per research phase.
const RESEARCH_BATCH: usize = 5;
/// Minimum spacing between DEX scans.
const DEX_SCAN_INTERVAL_SECS: i64 = 30;

/// Spawn-and-forget scheduler loop. Runs until the process exits.
pub async fn run_scheduler(ctx: Arc<AppContext>) {
    info!("scheduler started");
    loop {
        let tick_ms = {
            let state = ctx.state.lock().await;
            state.config.sched.tick_interval_ms.max(1_000)
        };
        tokio::time::sleep(StdDuration::from_millis(tick_ms)).await;
        run_tick(&ctx).await;
    }
}

/// Execute one tick. Public so the control plane can force a tick-shaped
/// re-evaluation (crisis check endpoint) under the same exclusion.
pub async fn run_tick(ctx: &AppContext) {
    let started = Instant::now();
    let now = Utc::now();
    let mut state = ctx.state.lock().await;

    if !state.enabled {
        return;
    }
    debug!("tick start");

    // --- 2. Market clock (cheap, cached upstream) ---------------------------
    let clock = match with_deadline("brokerage", ctx.providers.brokerage.get_clock()).await {
        Ok(clock) => clock,
        Err(e) => {
            warn!(error = %e, "clock fetch failed — assuming market closed this tick");
            state.log_event("warn", "phase_failed", format!("clock: {e}"));
            MarketClock {
                is_open: false,
                next_open: None,
                next_close: None,
            }
        }
    };

    // --- 3. Crisis phase ----------------------------------------------------
    let mut crisis_level = state.crisis.level;
    if state.config.crisis.crisis_mode_enabled {
        let due = state
            .last_crisis_check
            .map(|at| {
                now - at
                    >= Duration::milliseconds(state.config.sched.crisis_check_interval_ms as i64)
            })
            .unwrap_or(true);
        if due {
            crisis_level = crisis::run_crisis_check(
                &mut state,
                ctx.providers.macro_data.as_ref(),
                ctx.providers.alerts.as_ref(),
                now,
            )
            .await;

            if crisis_level == CrisisLevel::Emergency && !state.crisis.manual_override {
                execute_level3_liquidation(ctx, &mut state, now).await;
                ctx.persist(&state);
                ctx.increment_version();
                return;
            }
            if crisis_level == CrisisLevel::Defensive {
                execute_level2_sweep(ctx, &mut state, now).await;
            }
        }
    }

    // --- account snapshot used by every trading phase -----------------------
    let account = with_deadline("brokerage", ctx.providers.brokerage.get_account())
        .await
        .ok();
    let positions = with_deadline("brokerage", ctx.providers.brokerage.get_positions())
        .await
        .unwrap_or_default();
    let cash = account.as_ref().map(|a| a.cash).unwrap_or(0.0);
    let equity = account.as_ref().map(|a| a.equity).unwrap_or(0.0);

    // --- 4. Gatherers -------------------------------------------------------
    let gather_due = state
        .last_gather_run
        .map(|at| {
            now - at >= Duration::milliseconds(state.config.sched.data_poll_interval_ms as i64)
        })
        .unwrap_or(true);
    if gather_due && started.elapsed() < TICK_SOFT_BUDGET {
        let outcome = run_gatherers(
            &ctx.providers,
            &ctx.validator,
            &state.config.clone(),
            &state.signal_cache.clone(),
            now,
        )
        .await;
        for source in &outcome.degraded_sources {
            state.log_event("warn", "source_degraded", source.clone());
        }
        for signal in &outcome.signals {
            state.record_social(
                &signal.symbol,
                SocialObservation {
                    timestamp: signal.timestamp,
                    volume: signal.volume,
                    weighted_sentiment: signal.weighted_sentiment,
                },
            );
        }
        state.replace_signal_cache(outcome.signals, now);
        state.last_gather_run = Some(now);
        debug!(cache = state.signal_cache.len(), "gatherers phase complete");
    }

    // --- 5. Signal research -------------------------------------------------
    let research_due = state
        .last_research_run
        .map(|at| {
            now - at >= Duration::milliseconds(state.config.sched.research_interval_ms as i64)
        })
        .unwrap_or(true);
    if research_due && started.elapsed() < TICK_SOFT_BUDGET {
        research::research_top_signals(&mut state, ctx.providers.llm.as_ref(), RESEARCH_BATCH, now)
            .await;
        state.last_research_run = Some(now);
    }

    // --- 6. Pre-market plan -------------------------------------------------
    if planner::in_build_window(now)
        && state.premarket_plan.is_none()
        && started.elapsed() < TICK_SOFT_BUDGET
    {
        planner::build_plan(&mut state, &ctx.providers, cash, equity, &positions, now).await;
    }

    // --- 7. Crypto engine ---------------------------------------------------
    if state.config.crypto.crypto_enabled && started.elapsed() < TICK_SOFT_BUDGET {
        crypto_engine::run(&mut state, &ctx.providers, cash, &positions, crisis_level, now).await;
    }

    // --- 8. DEX engine ------------------------------------------------------
    if state.config.dex.dex_enabled && started.elapsed() < TICK_SOFT_BUDGET {
        refresh_sol_price(ctx).await;
        let sol_usd = SolPriceCache::global().price();

        let scan_due = state
            .last_dex_scan
            .map(|at| now - at >= Duration::seconds(DEX_SCAN_INTERVAL_SECS))
            .unwrap_or(true);
        if scan_due {
            let signals = dex_engine::scanner::scan(
                ctx.providers.dex.as_ref(),
                &state.config.dex.clone(),
                now,
            )
            .await;
            if !signals.is_empty() || state.dex.signals.is_empty() {
                state.dex.signals = signals;
            }
            state.last_dex_scan = Some(now);
        }

        dex_engine::run_engine(&mut state, &ctx.providers, sol_usd, now).await;
    }

    // --- 9. Market-hours work ----------------------------------------------
    if clock.is_open && started.elapsed() < TICK_SOFT_BUDGET {
        // a. Execute the pre-market plan at the bell.
        if planner::in_execute_window(now) && state.premarket_plan.is_some() {
            planner::execute_plan(&mut state, &ctx.providers, cash, &positions, crisis_level, now)
                .await;
        }

        // b. The analyst loop: exits, batch analyst, entries.
        let analyst_due = state
            .last_analyst_run
            .map(|at| {
                now - at >= Duration::milliseconds(state.config.sched.analyst_interval_ms as i64)
            })
            .unwrap_or(true);
        if analyst_due {
            stock::run_exits(
                &mut state,
                ctx.providers.brokerage.as_ref(),
                ctx.providers.alerts.as_ref(),
                &positions,
                crisis_level,
                now,
            )
            .await;

            // Reconcile entry records against the brokerage mirror: a symbol
            // closed out-of-band loses its entry within one analyst cycle.
            // Fresh entries get a grace window so a pending fill is not
            // mistaken for a closed position.
            let grace =
                Duration::milliseconds(state.config.sched.analyst_interval_ms as i64);
            state.position_entries.retain(|symbol, entry| {
                positions.iter().any(|p| &p.symbol == symbol)
                    || now - entry.entry_time < grace
            });

            let report = research::analyze_signals(
                &mut state,
                ctx.providers.llm.as_ref(),
                cash,
                equity,
                &positions,
                now,
            )
            .await;

            stock::run_entries(
                &mut state,
                &ctx.providers,
                cash,
                equity,
                &positions,
                report.as_ref(),
                crisis_level,
                now,
            )
            .await;
            state.last_analyst_run = Some(now);
        }

        // c. Re-research held positions on a five-minute cadence.
        let position_research_due = state
            .last_position_research
            .map(|at| {
                now - at
                    >= Duration::milliseconds(
                        state.config.sched.position_research_interval_ms as i64,
                    )
            })
            .unwrap_or(true);
        if position_research_due {
            refresh_position_research(ctx, &mut state, &positions, now).await;
            state.last_position_research = Some(now);
        }

        // d. Options exits.
        if state.config.options.options_enabled {
            options::run_exits(
                &mut state,
                ctx.providers.brokerage.as_ref(),
                ctx.providers.alerts.as_ref(),
                &positions,
                now,
            )
            .await;
        }

        // e. Breaking-news confirmations for held symbols.
        if state.config.llm.twitter_confirmation_enabled {
            refresh_twitter_confirmations(ctx, &mut state, &positions, now).await;
        }
    }

    if started.elapsed() >= TICK_SOFT_BUDGET {
        state.log_event(
            "warn",
            "tick_over_budget",
            format!("tick ran {:.1}s — later phases skipped", started.elapsed().as_secs_f64()),
        );
    }

    // --- 10. Persist --------------------------------------------------------
    ctx.persist(&state);
    ctx.increment_version();
    debug!(elapsed_ms = started.elapsed().as_millis() as u64, "tick complete");
}

// ---------------------------------------------------------------------------
// Crisis actions
// ---------------------------------------------------------------------------

/// Level 3: close every stock position and every DEX position, then skip the
/// rest of the tick.
async fn execute_level3_liquidation(ctx: &AppContext, state: &mut AgentState, now: DateTime<Utc>) {
    warn!("CRISIS LEVEL 3 — liquidating all positions");
    state.log_event(
        "error",
        "crisis_liquidation",
        "level 3 reached — liquidating stock and DEX books",
    );

    let positions = with_deadline("brokerage", ctx.providers.brokerage.get_positions())
        .await
        .unwrap_or_default();
    for position in &positions {
        match with_deadline(
            "brokerage",
            ctx.providers.brokerage.close_position(&position.symbol),
        )
        .await
        {
            Ok(()) => {
                state.log_event(
                    "warn",
                    "position_closed",
                    format!("{}: CRISIS_LEVEL_3_LIQUIDATION", position.symbol),
                );
                state.position_entries.remove(&position.symbol);
                state.crisis.closed_during_crisis.push(position.symbol.clone());
            }
            Err(e) => {
                warn!(symbol = %position.symbol, error = %e, "crisis liquidation close failed");
            }
        }
    }

    let view = dex_engine::ScanView::from_signals(&state.dex.signals.clone());
    let closed = dex_engine::liquidate_all(state, ctx.providers.alerts.as_ref(), &view, now);
    info!(dex_closed = closed, stocks_closed = positions.len(), "crisis liquidation complete");
}

/// Level 2: close stock positions whose P&L sits below the configured
/// minimum profit to hold.
async fn execute_level2_sweep(ctx: &AppContext, state: &mut AgentState, _now: DateTime<Utc>) {
    let min_profit = state.config.crisis.crisis_level2_min_profit_to_hold;
    let positions = with_deadline("brokerage", ctx.providers.brokerage.get_positions())
        .await
        .unwrap_or_default();

    for position in &positions {
        if position.pl_pct() >= min_profit {
            continue;
        }
        match with_deadline(
            "brokerage",
            ctx.providers.brokerage.close_position(&position.symbol),
        )
        .await
        {
            Ok(()) => {
                state.log_event(
                    "warn",
                    "position_closed",
                    format!(
                        "{}: crisis level 2 sweep ({:+.2}% < {min_profit:+.2}%)",
                        position.symbol,
                        position.pl_pct()
                    ),
                );
                state.position_entries.remove(&position.symbol);
                state.crisis.closed_during_crisis.push(position.symbol.clone());
            }
            Err(e) => {
                warn!(symbol = %position.symbol, error = %e, "crisis sweep close failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Refresh the process-wide SOL/USD cache when stale.
async fn refresh_sol_price(ctx: &AppContext) {
    if !SolPriceCache::global().needs_refresh() {
        return;
    }
    match with_deadline(
        "market_data",
        ctx.providers.market_data.get_crypto_snapshot("SOL/USD"),
    )
    .await
    {
        Ok(snapshot) => SolPriceCache::global().update(snapshot.latest_price),
        Err(e) => debug!(error = %e, "SOL/USD refresh failed — keeping cached value"),
    }
}

/// Re-research held symbols into the position-research map.
async fn refresh_position_research(
    ctx: &AppContext,
    state: &mut AgentState,
    positions: &[crate::types::Position],
    now: DateTime<Utc>,
) {
    for position in positions {
        let fresh = state
            .position_research
            .get(&position.symbol)
            .map(|r| {
                now - r.timestamp
                    < Duration::milliseconds(state.config.sched.position_research_interval_ms as i64)
            })
            .unwrap_or(false);
        if fresh {
            continue;
        }

        let Some(signal) = state
            .signal_cache
            .iter()
            .find(|s| s.symbol == position.symbol)
            .cloned()
        else {
            continue;
        };

        if let Some(research) = research::research_signal(
            state,
            ctx.providers.llm.as_ref(),
            &signal,
            Some(position.current_price),
            research::SIGNAL_RESEARCH_TTL_SECS,
            now,
        )
        .await
        {
            state.position_research.insert(position.symbol.clone(), research);
        }
    }
}

/// Pull breaking headlines for held symbols and classify them into
/// confirmations, respecting the daily read budget.
async fn refresh_twitter_confirmations(
    ctx: &AppContext,
    state: &mut AgentState,
    positions: &[crate::types::Position],
    now: DateTime<Utc>,
) {
    for position in positions {
        if state.twitter_confirmations.contains_key(&position.symbol) {
            continue;
        }
        if !state.try_consume_twitter_read(now) {
            debug!("twitter read budget exhausted for today");
            break;
        }

        let headlines = match with_deadline(
            "social",
            ctx.providers.social.breaking_headlines(&position.symbol),
        )
        .await
        {
            Ok(headlines) => headlines,
            Err(e) => {
                debug!(symbol = %position.symbol, error = %e, "headline fetch failed");
                continue;
            }
        };
        let Some(headline) = headlines.first() else {
            continue;
        };

        let sentiment = crate::util::lexicon_sentiment(headline);
        state.twitter_confirmations.insert(
            position.symbol.clone(),
            TwitterConfirmation {
                confirms: sentiment >= 0.0,
                headline: headline.clone(),
                timestamp: now,
            },
        );
    }
}
