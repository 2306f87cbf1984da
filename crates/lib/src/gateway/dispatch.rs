//! Turn accepted chat commands into agent runs and send the results back.
//!
//! Only one command runs at a time: the dispatcher holds a single slot across execution and
//! delivery, so a second command waits instead of racing the first on the conversation state
//! and the shared workspace.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::channels::{ChannelHandle, InboundMessage};
use crate::config::Config;
use crate::conversation::ConversationState;
use crate::delivery::{self, DeliveryError, DeliveryPolicy};
use crate::exec::{AgentRunner, ExecError};
use crate::gateway::command::{parse_command, Rejection};

pub const ACK_TEXT: &str = "🤖 Processing your request...";

/// How one inbound message was handled.
#[derive(Debug)]
pub enum Outcome {
    /// Not a command; nothing was sent.
    Ignored,
    /// Prefix without a task; a usage hint was sent.
    Usage,
    /// The agent succeeded and the whole reply was delivered.
    Completed { elapsed: Duration },
    /// The agent failed; an error reply was sent.
    Failed(ExecError),
    /// The agent succeeded but part of the reply could not be delivered.
    Undelivered {
        elapsed: Duration,
        error: DeliveryError,
    },
}

pub struct Dispatcher {
    runner: Arc<dyn AgentRunner>,
    conversation: ConversationState,
    prefix: String,
    policy: DeliveryPolicy,
    slot: Mutex<()>,
}

impl Dispatcher {
    pub fn new(runner: Arc<dyn AgentRunner>, prefix: impl Into<String>, policy: DeliveryPolicy) -> Self {
        Self {
            runner,
            conversation: ConversationState::new(),
            prefix: prefix.into(),
            policy,
            slot: Mutex::new(()),
        }
    }

    pub fn from_config(config: &Config, runner: Arc<dyn AgentRunner>) -> Self {
        Self::new(
            runner,
            config.agent.command_prefix.clone(),
            DeliveryPolicy::from(&config.delivery),
        )
    }

    pub fn conversation(&self) -> &ConversationState {
        &self.conversation
    }

    /// True while a command is executing or delivering.
    pub fn is_busy(&self) -> bool {
        self.slot.try_lock().is_err()
    }

    pub fn usage_text(&self) -> String {
        format!("⚠️ Please provide a task. Usage: {}<task>", self.prefix)
    }

    /// Handle one inbound message, replying through `channel`.
    pub async fn handle(&self, msg: &InboundMessage, channel: &dyn ChannelHandle) -> Outcome {
        let command = match parse_command(msg, &self.prefix) {
            Ok(c) => c,
            Err(Rejection::NotCommand) => {
                log::debug!(
                    "skipping message in {} (from_me: {})",
                    msg.conversation_id,
                    msg.from_me
                );
                return Outcome::Ignored;
            }
            Err(Rejection::EmptyTask) => {
                self.reply(channel, msg, &self.usage_text()).await;
                return Outcome::Usage;
            }
        };

        let _slot = self.slot.lock().await;
        let task = command.resolve(&self.conversation);
        let task_id = uuid::Uuid::new_v4().simple().to_string();
        let task_id = &task_id[..8];
        log::info!(
            "task {}: received (continue: {}): {}",
            task_id,
            task.continue_session,
            task.text
        );
        self.reply(channel, msg, ACK_TEXT).await;

        let started = Instant::now();
        match self.runner.run(&task.text, task.continue_session).await {
            Ok(output) => {
                self.conversation.mark_active();
                let elapsed = started.elapsed();
                log::info!("task {}: completed in {:.1}s", task_id, elapsed.as_secs_f64());
                let reply = format!("{}{}", output, completion_footer(elapsed));
                match delivery::deliver(channel, &msg.conversation_id, &reply, &self.policy).await {
                    Ok(()) => Outcome::Completed { elapsed },
                    Err(error) => {
                        log::warn!("task {}: reply undelivered: {}", task_id, error);
                        Outcome::Undelivered { elapsed, error }
                    }
                }
            }
            Err(e) => {
                log::warn!("task {}: failed: {}", task_id, e);
                self.reply(channel, msg, &format!("❌ Error: {}", e)).await;
                Outcome::Failed(e)
            }
        }
    }

    /// Single best-effort send; failures are logged only.
    async fn reply(&self, channel: &dyn ChannelHandle, msg: &InboundMessage, text: &str) {
        if let Err(e) = channel.send_message(&msg.conversation_id, text).await {
            log::warn!("reply to {} failed: {}", msg.conversation_id, e);
        }
    }
}

/// Appended to every successful reply.
pub fn completion_footer(elapsed: Duration) -> String {
    format!("\n\n⏱️ Completed in {:.1}s", elapsed.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Returns scripted results after a simulated run time and records every call.
    struct ScriptedRunner {
        results: StdMutex<VecDeque<Result<String, ExecError>>>,
        calls: StdMutex<Vec<(String, bool)>>,
        run_time: Duration,
    }

    impl ScriptedRunner {
        fn new(results: Vec<Result<String, ExecError>>) -> Arc<Self> {
            Arc::new(Self {
                results: StdMutex::new(results.into()),
                calls: StdMutex::new(Vec::new()),
                run_time: Duration::from_millis(2500),
            })
        }

        fn calls(&self) -> Vec<(String, bool)> {
            self.calls.lock().expect("lock").clone()
        }
    }

    #[async_trait]
    impl AgentRunner for ScriptedRunner {
        async fn run(&self, task: &str, continue_session: bool) -> Result<String, ExecError> {
            self.calls
                .lock()
                .expect("lock")
                .push((task.to_string(), continue_session));
            tokio::time::sleep(self.run_time).await;
            self.results
                .lock()
                .expect("lock")
                .pop_front()
                .unwrap_or_else(|| Ok("ok".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingChannel {
        sent: StdMutex<Vec<(String, String)>>,
    }

    impl RecordingChannel {
        fn texts(&self) -> Vec<String> {
            self.sent
                .lock()
                .expect("lock")
                .iter()
                .map(|(_, t)| t.clone())
                .collect()
        }
    }

    #[async_trait]
    impl ChannelHandle for RecordingChannel {
        fn id(&self) -> &str {
            "test"
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

    fn msg(text: &str, from_me: bool) -> InboundMessage {
        InboundMessage {
            channel_id: "test".into(),
            conversation_id: "chat-1".into(),
            text: text.into(),
            from_me,
        }
    }

    fn dispatcher(runner: Arc<ScriptedRunner>) -> Dispatcher {
        Dispatcher::new(runner, "/claude ", DeliveryPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn foreign_and_plain_messages_are_ignored() {
        let runner = ScriptedRunner::new(vec![]);
        let d = dispatcher(runner.clone());
        let ch = RecordingChannel::default();
        assert!(matches!(d.handle(&msg("/claude do X", false), &ch).await, Outcome::Ignored));
        assert!(matches!(d.handle(&msg("just chatting", true), &ch).await, Outcome::Ignored));
        assert!(ch.texts().is_empty());
        assert!(runner.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_task_gets_usage_hint() {
        let runner = ScriptedRunner::new(vec![]);
        let d = dispatcher(runner.clone());
        let ch = RecordingChannel::default();
        assert!(matches!(d.handle(&msg("/claude   ", true), &ch).await, Outcome::Usage));
        assert_eq!(
            ch.texts(),
            vec!["⚠️ Please provide a task. Usage: /claude <task>".to_string()]
        );
        assert!(runner.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn success_acks_replies_with_footer_and_activates_conversation() {
        let runner = ScriptedRunner::new(vec![Ok("refactored".into())]);
        let d = dispatcher(runner.clone());
        let ch = RecordingChannel::default();
        assert!(!d.conversation().is_active());

        let outcome = d.handle(&msg("/claude do X", true), &ch).await;
        assert!(matches!(outcome, Outcome::Completed { .. }));
        assert_eq!(runner.calls(), vec![("do X".to_string(), false)]);
        assert_eq!(
            ch.texts(),
            vec![
                ACK_TEXT.to_string(),
                "refactored\n\n⏱️ Completed in 2.5s".to_string()
            ]
        );
        assert!(d.conversation().is_active());

        d.handle(&msg("/claude next", true), &ch).await;
        assert_eq!(runner.calls()[1], ("next".to_string(), true));
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_override_runs_without_continuation_then_stays_active() {
        let runner = ScriptedRunner::new(vec![]);
        let d = dispatcher(runner.clone());
        let ch = RecordingChannel::default();
        d.conversation().mark_active();
        d.handle(&msg("/claude --new start over", true), &ch).await;
        d.handle(&msg("/claude keep going", true), &ch).await;
        assert_eq!(
            runner.calls(),
            vec![
                ("start over".to_string(), false),
                ("keep going".to_string(), true)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failure_replies_directly_and_leaves_state() {
        let runner = ScriptedRunner::new(vec![Err(ExecError::ExecutionFailed("bad arg".into()))]);
        let d = dispatcher(runner.clone());
        let ch = RecordingChannel::default();
        let outcome = d.handle(&msg("/claude do X", true), &ch).await;
        assert!(matches!(outcome, Outcome::Failed(ExecError::ExecutionFailed(_))));
        assert_eq!(
            ch.texts(),
            vec![ACK_TEXT.to_string(), "❌ Error: bad arg".to_string()]
        );
        assert!(!d.conversation().is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_reported_without_delivery() {
        let runner = ScriptedRunner::new(vec![Err(ExecError::Timeout(Duration::from_secs(1200)))]);
        let d = dispatcher(runner);
        let ch = RecordingChannel::default();
        d.handle(&msg("/claude slow", true), &ch).await;
        assert_eq!(
            ch.texts(),
            vec![
                ACK_TEXT.to_string(),
                "❌ Error: Task timed out after 20 minutes".to_string()
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn long_output_is_split_into_parts() {
        let runner = ScriptedRunner::new(vec![Ok("w".repeat(9000))]);
        let d = dispatcher(runner);
        let ch = RecordingChannel::default();
        d.handle(&msg("/claude big", true), &ch).await;
        let texts = ch.texts();
        assert_eq!(texts.len(), 4);
        assert!(texts[1].starts_with("📄 Part 1/3\n\n"));
        assert!(texts[3].starts_with("📄 Part 3/3\n\n"));
        assert!(texts[3].ends_with("⏱️ Completed in 2.5s"));
        assert!(texts.iter().all(|t| t.encode_utf16().count() <= 4096));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_commands_run_one_at_a_time() {
        let runner = ScriptedRunner::new(vec![]);
        let d = Arc::new(dispatcher(runner.clone()));
        let ch = Arc::new(RecordingChannel::default());

        let first = {
            let (d, ch) = (d.clone(), ch.clone());
            tokio::spawn(async move { d.handle(&msg("/claude one", true), ch.as_ref()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(d.is_busy());
        let second = d.handle(&msg("/claude two", true), ch.as_ref()).await;
        assert!(matches!(second, Outcome::Completed { .. }));
        assert!(matches!(first.await.expect("join"), Outcome::Completed { .. }));
        // the second saw the first's success
        assert_eq!(
            runner.calls(),
            vec![("one".to_string(), false), ("two".to_string(), true)]
        );
        assert!(!d.is_busy());
    }
}
