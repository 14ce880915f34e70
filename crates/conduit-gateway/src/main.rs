use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post};
use axum::Router;
use rusqlite::Connection;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

use conduit_activity::{ActivityTracker, BatchingParams};
use conduit_core::config::{ConduitConfig, ModelProfile};
use conduit_core::clock::Clock;
use conduit_core::persona::Persona;
use conduit_core::types::UserId;
use conduit_delivery::DeliveryWorker;
use conduit_entities::EntityCache;
use conduit_llm::{AnthropicProvider, LlmProvider, OpenAiProvider, ProviderRouter, ProviderSlot, QuotaTracker};
use conduit_memory::MemoryStore;
use conduit_quarantine::QuarantineManager;
use conduit_recovery::{RecoveryAgent, RecoveryParams};
use conduit_review::ReviewQueue;
use conduit_safety::SafetyAnalyzer;
use conduit_supervisor::{Supervisor, Worker};
use conduit_telegram::adapter::TelegramTransport;
use conduit_transport::Transport;
use conduit_wal::WalQueue;

mod auth;
mod error;
mod http;
mod middleware;
mod ratelimit;
mod state;

use ratelimit::RateLimiter;
use state::AppState;

/// No config key names a daily LLM spend ceiling; this is a deployment
/// constant until the review API grows a way to tune it live.
const DAILY_LLM_BUDGET_USD: f64 = 50.0;

fn build_provider(profile: &ModelProfile, api_key: &str) -> anyhow::Result<Box<dyn LlmProvider>> {
    match profile.provider.as_str() {
        "anthropic" => Ok(Box::new(AnthropicProvider::new(api_key.to_string(), None))),
        "openai" => Ok(Box::new(OpenAiProvider::new(api_key.to_string(), None))),
        other => Err(anyhow!("unknown llm provider {other:?} in profile")),
    }
}

/// Builds a router over the active profile followed by its configured
/// fallbacks, picking `stage1` or `stage2` out of each named bundle.
fn build_router(
    config: &ConduitConfig,
    api_key: &str,
    pick: impl Fn(&conduit_core::config::ProfileBundle) -> &ModelProfile,
) -> anyhow::Result<(Arc<dyn LlmProvider>, ModelProfile)> {
    let names = std::iter::once(config.llm.profile.clone()).chain(config.llm.fallback_profiles.iter().cloned());

    let mut slots = Vec::new();
    let mut primary_profile = None;
    for name in names {
        let bundle = config
            .llm
            .profiles
            .get(&name)
            .ok_or_else(|| anyhow!("llm profile {name:?} not found"))?;
        let model_profile = pick(bundle).clone();
        if primary_profile.is_none() {
            primary_profile = Some(model_profile.clone());
        }
        let provider = build_provider(&model_profile, api_key)?;
        slots.push(ProviderSlot::new(provider, config.supervisor.stage1_retries));
    }

    let router: Arc<dyn LlmProvider> = Arc::new(ProviderRouter::new(slots));
    Ok((router, primary_profile.expect("at least one profile name")))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conduit_gateway=info,tower_http=info".into()),
        )
        .init();

    let config_path = std::env::var("CONDUIT_CONFIG").ok();
    let config = ConduitConfig::load(config_path.as_deref()).context("loading configuration")?;

    let persona = Persona::load(Path::new(&config.persona.persona_path)).context("loading persona")?;
    let clock = Clock::new(&config.persona.timezone).context("building clock")?;

    // TransportConfig is shaped for the MTProto credentials this deployment
    // never uses; `api_hash` carries the bot token the Bot API actually needs.
    let telegram = Arc::new(TelegramTransport::new(&config.transport.api_hash));
    let transport: Arc<dyn Transport> = telegram.clone();

    let (stage1_router, stage1_profile) =
        build_router(&config, &config.llm.stage1_key, |b| &b.stage1)?;
    let (stage2_router, stage2_profile) =
        build_router(&config, &config.llm.stage2_key, |b| &b.stage2)?;
    let quota = Arc::new(QuotaTracker::new(DAILY_LLM_BUDGET_USD));

    let safety = Arc::new(SafetyAnalyzer::new().context("compiling safety patterns")?);

    let entities = Arc::new(EntityCache::new());

    let memory = Arc::new(
        MemoryStore::new(
            Connection::open(format!("{}.memory", config.store.store_url)).context("opening memory db")?,
            config.memory.max_history,
            config.memory.recent_n,
            config.memory.memory_ttl_days,
            config.memory.profile_ttl_days,
            config.memory.anti_repeat_window,
        )
        .context("initializing memory store")?,
    );

    let quarantine = QuarantineManager::new(
        Connection::open(format!("{}.quarantine", config.store.store_url)).context("opening quarantine db")?,
        Duration::from_secs(config.quarantine.status_cache_ttl_secs),
        Duration::from_secs((config.quarantine.quarantine_ttl_days * 24 * 3600) as u64),
    )
    .context("initializing quarantine manager")?;

    let users_db_path = format!("{}.users", config.store.store_url);
    let users_conn = Connection::open(&users_db_path).context("opening users db")?;
    conduit_users::db::init_db(&users_conn).context("initializing users schema")?;
    let supervisor_users_conn = Connection::open(&users_db_path).context("opening users db for supervisor")?;

    let review = Arc::new(
        ReviewQueue::new(Connection::open(&config.store.store_url).context("opening review db")?)
            .context("initializing review queue")?,
    );

    let wal = Arc::new(
        WalQueue::new(
            Connection::open(format!("{}.wal", config.store.store_url)).context("opening wal db")?,
            conduit_wal::DEFAULT_LEASE.as_millis() as u64,
            config.supervisor.stage1_retries + 1,
        )
        .context("initializing wal")?,
    );

    let activity = ActivityTracker::new(
        Connection::open(format!("{}.activity", config.store.store_url)).context("opening activity db")?,
        wal.clone(),
        BatchingParams {
            window_initial: Duration::from_millis(config.batching.window_initial_ms),
            window_typing_ext: Duration::from_millis(config.batching.window_typing_ext_ms),
            min_batch: config.batching.min_batch,
            max_batch: config.batching.max_batch,
            max_wait: Duration::from_millis(config.batching.max_wait_ms),
        },
    )
    .context("initializing activity tracker")?;
    activity.set_quarantine_gate(quarantine.clone());
    if let Err(e) = activity.recover_on_startup() {
        warn!("activity tracker startup recovery failed: {e}");
    }

    let cursor_conn =
        Connection::open(format!("{}.cursors", config.store.store_url)).context("opening cursor db")?;
    conduit_recovery::db::init_db(&cursor_conn).context("initializing cursor schema")?;

    let warm_users: Vec<UserId> = conduit_recovery::db::list_cursors(&cursor_conn)
        .unwrap_or_default()
        .into_iter()
        .map(|row| UserId(row.chat_id.0))
        .collect();
    entities.warmup(transport.as_ref(), &warm_users).await;

    let supervisor = Arc::new(Supervisor::new(
        memory.clone(),
        safety,
        quarantine.clone(),
        review.clone(),
        supervisor_users_conn,
        stage1_router,
        stage1_profile,
        stage2_router,
        stage2_profile,
        quota,
        &persona.constitution,
        &persona.traits,
        clock,
        config.supervisor.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut worker_handles = Vec::new();
    for i in 0..config.concurrency.n_supervisor {
        let worker = Worker::new(supervisor.clone(), wal.clone(), format!("supervisor-{i}"));
        let rx = shutdown_rx.clone();
        worker_handles.push(tokio::spawn(worker.run(rx)));
    }

    let delivery = DeliveryWorker::new(
        transport.clone(),
        entities.clone(),
        memory.clone(),
        review.clone(),
        Connection::open(format!("{}.cursors", config.store.store_url)).context("opening delivery cursor db")?,
        config.concurrency.n_deliver,
    )
    .context("initializing delivery worker")?;
    worker_handles.push(tokio::spawn(delivery.clone().run(shutdown_rx.clone())));

    let recovery_params = RecoveryParams {
        sweep_interval: Duration::from_secs(config.recovery.recovery_interval_secs),
        active_window: Duration::from_secs((config.recovery.recovery_max_age_h * 3600) as u64),
        max_per_user: config.recovery.recovery_max_per_user,
        max_concurrent_users: config.recovery.max_concurrent_users,
        transport_rate_limit: config.recovery.telegram_rate_limit,
        consecutive_error_threshold: config.recovery.consecutive_error_threshold,
    };
    let recovery = RecoveryAgent::new(
        Connection::open(format!("{}.cursors", config.store.store_url)).context("opening recovery db")?,
        transport.clone(),
        activity.clone(),
        quarantine.clone(),
        recovery_params,
    )
    .context("initializing recovery agent")?;
    worker_handles.push(tokio::spawn(recovery.run(shutdown_rx.clone())));

    let (inbound_tx, mut inbound_rx) = tokio::sync::mpsc::channel(256);
    worker_handles.push(tokio::spawn(telegram.run(inbound_tx)));
    {
        let activity = activity.clone();
        worker_handles.push(tokio::spawn(async move {
            while let Some(msg) = inbound_rx.recv().await {
                if let Err(e) = activity.on_inbound(msg) {
                    warn!("on_inbound failed: {e}");
                }
            }
        }));
    }

    let app_state = Arc::new(AppState {
        config: config.clone(),
        review,
        quarantine,
        activity,
        memory,
        users_conn: AsyncMutex::new(users_conn),
        cursor_conn: AsyncMutex::new(cursor_conn),
        entities,
        transport,
        limiter: Arc::new(RateLimiter::new(config.review_api.clone())),
    });

    let pending_routes = Router::new()
        .route("/reviews/pending", get(http::reviews::pending))
        .route("/reviews/:id", get(http::reviews::get))
        .route("/quarantine", get(http::quarantine::list))
        .layer(from_fn_with_state(app_state.clone(), middleware::guard_pending));

    let mutating_routes = Router::new()
        .route("/reviews/:id/reviewing", post(http::reviews::start_reviewing))
        .route("/reviews/:id/approve", post(http::reviews::approve))
        .route("/reviews/:id/reject", post(http::reviews::reject))
        .route("/reviews/:id/cancel", post(http::reviews::cancel))
        .route("/users/:user_id/status", get(http::users::get_status).post(http::users::post_status))
        .route("/users/:user_id/nickname", post(http::users::post_nickname))
        .route("/users/:user_id", delete(http::users::delete_user))
        .layer(from_fn_with_state(app_state.clone(), middleware::guard_mutating));

    let quarantine_routes = Router::new()
        .route("/users/:user_id/quarantine", post(http::users::post_quarantine))
        .route("/quarantine/:id/release", post(http::quarantine::release))
        .layer(from_fn_with_state(app_state.clone(), middleware::guard_quarantine));

    let router = Router::new()
        .route("/health", get(http::health::health))
        .merge(pending_routes)
        .merge(mutating_routes)
        .merge(quarantine_routes)
        .layer(TimeoutLayer::new(Duration::from_secs(config.review_api.request_deadline_secs)))
        .with_state(app_state);

    let addr: std::net::SocketAddr = config.review_api.bind.parse().context("parsing review_api.bind")?;
    info!("conduit gateway listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
    });

    serve.await?;
    for handle in worker_handles {
        handle.abort();
    }

    Ok(())
}
