//! Bridge runtime: channels, the inbound queue, and the HTTP listener (single port).

use crate::channels::{ChannelHandle, ChannelRegistry, InboundMessage, TelegramChannel, TelegramUpdate};
use crate::config::{self, Config};
use crate::exec::AgentExecutor;
use crate::gateway::dispatch::{Dispatcher, Outcome};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

/// How long shutdown waits for channel loops before aborting them.
const CHANNEL_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared state for the gateway (config, channels, dispatcher).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    /// Telegram user whose messages are self-originated.
    pub telegram_owner: Option<i64>,
    /// Sender for inbound channel messages (long-poll loop and webhook POSTs). Processor task receives.
    pub inbound_tx: mpsc::Sender<InboundMessage>,
    pub channel_registry: Arc<ChannelRegistry>,
    /// In-process channel connector tasks; awaited during graceful shutdown.
    pub channel_tasks: Arc<RwLock<Vec<JoinHandle<()>>>>,
    pub dispatcher: Arc<Dispatcher>,
    pub started_at: DateTime<Utc>,
}

impl GatewayState {
    pub fn new(
        config: Config,
        dispatcher: Arc<Dispatcher>,
        inbound_tx: mpsc::Sender<InboundMessage>,
    ) -> Self {
        Self {
            telegram_owner: config::resolve_telegram_owner(&config),
            config: Arc::new(config),
            inbound_tx,
            channel_registry: Arc::new(ChannelRegistry::new()),
            channel_tasks: Arc::new(RwLock::new(Vec::new())),
            dispatcher,
            started_at: Utc::now(),
        }
    }
}

/// HTTP routes: `GET /` health and `POST /telegram/webhook`.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/", get(health_http))
        .route("/telegram/webhook", post(telegram_webhook))
        .with_state(state)
}

/// Consume the inbound queue, handling one message at a time until every sender is gone.
pub fn spawn_inbound_processor(
    state: GatewayState,
    mut inbound_rx: mpsc::Receiver<InboundMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = inbound_rx.recv().await {
            process_inbound_message(&state, msg).await;
        }
        log::debug!("inbound queue closed");
    })
}

/// Route one inbound message to the dispatcher with its originating channel as the reply sink.
async fn process_inbound_message(state: &GatewayState, msg: InboundMessage) {
    log::debug!(
        "inbound: channel {} conversation {} from_me {}",
        msg.channel_id,
        msg.conversation_id,
        msg.from_me
    );
    let Some(handle) = state.channel_registry.get(&msg.channel_id).await else {
        log::warn!("inbound: no channel registered for {}", msg.channel_id);
        return;
    };
    match state.dispatcher.handle(&msg, handle.as_ref()).await {
        Outcome::Ignored | Outcome::Usage | Outcome::Completed { .. } => {}
        Outcome::Failed(e) => log::debug!("inbound: task failed: {}", e),
        Outcome::Undelivered { error, .. } => {
            log::error!("inbound: task succeeded but the reply was cut short: {}", error)
        }
    }
}

/// Run the bridge; binds to config.gateway.bind:config.gateway.port.
/// Starts the Telegram connector when a bot token is configured. Blocks until shutdown (e.g. Ctrl+C).
pub async fn run_gateway(config: Config) -> Result<()> {
    let bind = config.gateway.bind.trim().to_string();
    if !config::is_loopback_bind(&bind) && config.channels.telegram.webhook_secret.is_none() {
        log::warn!(
            "gateway bound to {} without channels.telegram.webhookSecret; anyone reaching the port can post updates",
            bind
        );
    }

    let executor = AgentExecutor::from_config(&config);
    let workspace = executor.workspace().to_path_buf();
    if !workspace.is_dir() {
        log::warn!("workspace {} does not exist; tasks will fail to start", workspace.display());
    }
    let dispatcher = Arc::new(Dispatcher::from_config(&config, Arc::new(executor)));
    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundMessage>(64);
    let state = GatewayState::new(config.clone(), dispatcher, inbound_tx.clone());
    let processor = spawn_inbound_processor(state.clone(), inbound_rx);

    let telegram_token = config::resolve_telegram_token(&config);
    let webhook_url = config.channels.telegram.webhook_url.clone();
    let telegram_webhook_for_shutdown: Option<Arc<TelegramChannel>> = match telegram_token {
        Some(token) => {
            if state.telegram_owner.is_none() {
                log::warn!("channels.telegram.ownerId is not set; every message will be ignored");
            }
            let telegram = Arc::new(TelegramChannel::new(Some(token), state.telegram_owner));
            if let Some(ref url) = webhook_url {
                let secret = config.channels.telegram.webhook_secret.as_deref();
                if let Err(e) = telegram.set_webhook(url, secret).await {
                    log::warn!("telegram set_webhook failed: {}", e);
                } else {
                    log::info!("telegram channel registered (webhook mode): {}", url);
                }
                state
                    .channel_registry
                    .register(telegram.id().to_string(), telegram.clone())
                    .await;
                Some(telegram)
            } else {
                let handle = telegram.clone().start_inbound(inbound_tx);
                state.channel_tasks.write().await.push(handle);
                state
                    .channel_registry
                    .register(telegram.id().to_string(), telegram)
                    .await;
                log::info!("telegram channel registered and getUpdates loop started");
                None
            }
        }
        None => {
            log::warn!("no telegram bot token configured (TELEGRAM_BOT_TOKEN); no channel is connected");
            None
        }
    };

    let channel_registry = state.channel_registry.clone();
    let channel_tasks = state.channel_tasks.clone();
    let app = router(state);

    let bind_addr = format!("{}:{}", bind, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);
    log::info!("workspace: {}", workspace.display());
    log::info!(
        "send \"{}<task>\" from the owner account to run a task",
        config.agent.command_prefix
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(
            channel_registry,
            channel_tasks,
            telegram_webhook_for_shutdown,
        ))
        .await
        .context("gateway server exited")?;
    // Dropping the processor kills an in-flight agent (kill_on_drop).
    processor.abort();
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Stops channel connectors, removes the Telegram webhook if used, then awaits in-process channel tasks.
async fn shutdown_signal(
    channel_registry: Arc<ChannelRegistry>,
    channel_tasks: Arc<RwLock<Vec<JoinHandle<()>>>>,
    telegram_webhook: Option<Arc<TelegramChannel>>,
) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, stopping channels");

    channel_registry.stop_all().await;

    if let Some(t) = telegram_webhook {
        if let Err(e) = t.delete_webhook().await {
            log::debug!("telegram delete_webhook on shutdown: {}", e);
        }
    }

    let handles = {
        let mut g = channel_tasks.write().await;
        std::mem::take(&mut *g)
    };
    for mut h in handles {
        if tokio::time::timeout(CHANNEL_DRAIN_TIMEOUT, &mut h).await.is_err() {
            log::debug!("channel task still running after {:?}, aborting", CHANNEL_DRAIN_TIMEOUT);
            h.abort();
        }
    }
    log::info!("channel tasks finished");
}

/// POST /telegram/webhook — receives Telegram update JSON; verifies optional secret, pushes InboundMessage.
async fn telegram_webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(ref expected) = state.config.channels.telegram.webhook_secret {
        let provided = headers
            .get("X-Telegram-Bot-Api-Secret-Token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != expected.as_str() {
            return StatusCode::FORBIDDEN;
        }
    }
    let update: TelegramUpdate = match serde_json::from_slice(&body) {
        Ok(u) => u,
        Err(_) => return StatusCode::BAD_REQUEST,
    };
    let Some(inbound) = update.into_inbound(state.telegram_owner) else {
        return StatusCode::OK;
    };
    if state.inbound_tx.send(inbound).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

/// GET / returns a simple health JSON (for liveness checks).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.gateway.port,
        "busy": state.dispatcher.is_busy(),
        "conversationActive": state.dispatcher.conversation().is_active(),
        "startedAt": state.started_at.to_rfc3339(),
    }))
}
