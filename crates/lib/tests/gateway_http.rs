//! Integration test: serve the gateway router on a free port, then drive it over HTTP.
//! Does not require Telegram or the agent CLI: a recording channel and an echo runner stand in.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskbridge::channels::{ChannelHandle, InboundMessage};
use taskbridge::config::Config;
use taskbridge::exec::{AgentRunner, ExecError};
use taskbridge::gateway::{self, Dispatcher, GatewayState, ACK_TEXT};
use tokio::sync::mpsc;

const OWNER: i64 = 4242;
const SECRET: &str = "s3cret";

struct EchoRunner;

#[async_trait]
impl AgentRunner for EchoRunner {
    async fn run(&self, task: &str, continue_session: bool) -> Result<String, ExecError> {
        Ok(format!("echo: {} (continue: {})", task, continue_session))
    }
}

#[derive(Default)]
struct RecordingChannel {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingChannel {
    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("lock").clone()
    }
}

#[async_trait]
impl ChannelHandle for RecordingChannel {
    fn id(&self) -> &str {
        "telegram"
    }

    fn stop(&self) {}

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), String> {
        self.sent
            .lock()
            .expect("lock")
            .push((conversation_id.to_string(), text.to_string()));
        Ok(())
    }
}

struct Harness {
    base: String,
    channel: Arc<RecordingChannel>,
    client: reqwest::Client,
}

async fn start() -> Harness {
    let mut config = Config::default();
    config.channels.telegram.owner_id = Some(OWNER);
    config.channels.telegram.webhook_secret = Some(SECRET.to_string());

    let dispatcher = Arc::new(Dispatcher::from_config(&config, Arc::new(EchoRunner)));
    let (tx, rx) = mpsc::channel::<InboundMessage>(8);
    let mut state = GatewayState::new(config, dispatcher, tx);
    // keep the test independent of a TELEGRAM_OWNER_ID in the environment
    state.telegram_owner = Some(OWNER);

    let channel = Arc::new(RecordingChannel::default());
    state
        .channel_registry
        .register("telegram".to_string(), channel.clone())
        .await;
    gateway::spawn_inbound_processor(state.clone(), rx);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind free port");
    let addr = listener.local_addr().expect("local_addr");
    let app = gateway::router(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    Harness {
        base: format!("http://{}", addr),
        channel,
        client: reqwest::Client::new(),
    }
}

impl Harness {
    async fn post_update(&self, secret: Option<&str>, body: String) -> reqwest::StatusCode {
        let mut req = self
            .client
            .post(format!("{}/telegram/webhook", self.base))
            .header("content-type", "application/json")
            .body(body);
        if let Some(s) = secret {
            req = req.header("X-Telegram-Bot-Api-Secret-Token", s);
        }
        req.send().await.expect("post webhook").status()
    }

    async fn health(&self) -> serde_json::Value {
        self.client
            .get(format!("{}/", self.base))
            .send()
            .await
            .expect("get health")
            .json()
            .await
            .expect("parse JSON")
    }

    async fn wait_for_messages(&self, n: usize) -> Vec<(String, String)> {
        for _ in 0..100 {
            let sent = self.channel.sent();
            if sent.len() >= n {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!(
            "expected {} messages within 5s, got {:?}",
            n,
            self.channel.sent()
        );
    }
}

fn update(from: i64, text: &str) -> String {
    serde_json::json!({
        "update_id": 1,
        "message": { "chat": { "id": 99 }, "from": { "id": from }, "text": text }
    })
    .to_string()
}

#[tokio::test]
async fn health_reports_idle_bridge() {
    let h = start().await;
    let json = h.health().await;
    assert_eq!(json.get("runtime").and_then(|v| v.as_str()), Some("running"));
    assert_eq!(json.get("busy").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        json.get("conversationActive").and_then(|v| v.as_bool()),
        Some(false)
    );
    assert!(json.get("startedAt").and_then(|v| v.as_str()).is_some());
}

#[tokio::test]
async fn webhook_rejects_bad_secret_and_bad_json() {
    let h = start().await;
    assert_eq!(
        h.post_update(None, update(OWNER, "/claude hi")).await,
        reqwest::StatusCode::FORBIDDEN
    );
    assert_eq!(
        h.post_update(Some("wrong"), update(OWNER, "/claude hi")).await,
        reqwest::StatusCode::FORBIDDEN
    );
    assert_eq!(
        h.post_update(Some(SECRET), "{ nope".to_string()).await,
        reqwest::StatusCode::BAD_REQUEST
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.channel.sent().is_empty());
}

#[tokio::test]
async fn owner_command_runs_and_reply_reaches_the_chat() {
    let h = start().await;

    // someone else's command is ignored
    assert_eq!(
        h.post_update(Some(SECRET), update(7, "/claude rm -rf /")).await,
        reqwest::StatusCode::OK
    );
    assert_eq!(
        h.post_update(Some(SECRET), update(OWNER, "/claude hello")).await,
        reqwest::StatusCode::OK
    );

    let sent = h.wait_for_messages(2).await;
    assert_eq!(sent[0], ("99".to_string(), ACK_TEXT.to_string()));
    assert_eq!(sent[1].0, "99");
    assert!(sent[1]
        .1
        .starts_with("echo: hello (continue: false)\n\n⏱️ Completed in "));

    let json = h.health().await;
    assert_eq!(
        json.get("conversationActive").and_then(|v| v.as_bool()),
        Some(true)
    );

    h.post_update(Some(SECRET), update(OWNER, "/claude again")).await;
    let sent = h.wait_for_messages(4).await;
    assert!(sent[3].1.starts_with("echo: again (continue: true)"));
}

#[tokio::test]
async fn empty_command_gets_usage_hint() {
    let h = start().await;
    h.post_update(Some(SECRET), update(OWNER, "/claude    ")).await;
    let sent = h.wait_for_messages(1).await;
    assert_eq!(
        sent[0].1,
        "⚠️ Please provide a task. Usage: /claude <task>"
    );
}
