//! Inbound message from a channel: delivered to the gateway for command handling.

/// A chat message as seen by the bridge. Produced by a channel connector, read-only afterwards.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel_id: String,
    /// Where replies go (e.g. Telegram chat id).
    pub conversation_id: String,
    pub text: String,
    /// Sent by the channel's own identity. The only authorization the gateway checks.
    pub from_me: bool,
}
