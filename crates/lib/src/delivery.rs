//! Chunked reply delivery with per-segment retry and pacing.
//!
//! Segments go out strictly in order: every delay is awaited in line, so a later segment is
//! never attempted before the earlier one succeeded. Exhausting the attempts for one segment
//! abandons the rest.

use std::time::Duration;

use crate::channels::ChannelHandle;
use crate::chunk::{self, Segment};
use crate::config::DeliveryConfig;

/// Room left for the `📄 Part i/n` header when a reply has to be split.
pub const HEADER_RESERVE: usize = 32;

/// Limits and timings for one delivery.
#[derive(Debug, Clone)]
pub struct DeliveryPolicy {
    /// Longest message the channel accepts, in UTF-16 code units.
    pub max_len: usize,
    /// Send attempts per segment (at least one is always made).
    pub attempts: u32,
    /// Wait after failed attempt k is `backoff * k`.
    pub backoff: Duration,
    /// Wait between consecutive segments of a multi-part reply.
    pub pacing: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self::from(&DeliveryConfig::default())
    }
}

impl From<&DeliveryConfig> for DeliveryPolicy {
    fn from(c: &DeliveryConfig) -> Self {
        Self {
            max_len: c.max_message_length,
            attempts: c.attempts,
            backoff: Duration::from_millis(c.backoff_ms),
            pacing: Duration::from_millis(c.pacing_ms),
        }
    }
}

impl DeliveryPolicy {
    /// Split `text` into the segments this policy would send.
    pub fn segments(&self, text: &str) -> Vec<Segment> {
        chunk::segments(text, self.max_len, HEADER_RESERVE)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("part {index}/{total} not delivered after {attempts} attempt(s): {reason}")]
pub struct DeliveryError {
    pub index: usize,
    pub total: usize,
    pub attempts: u32,
    /// Error from the last attempt.
    pub reason: String,
}

/// Send `text` to `conversation_id`, split into segments when it exceeds the policy limit.
pub async fn deliver(
    channel: &dyn ChannelHandle,
    conversation_id: &str,
    text: &str,
    policy: &DeliveryPolicy,
) -> Result<(), DeliveryError> {
    let segments = policy.segments(text);
    let total = segments.len();
    if total > 1 {
        log::debug!("delivering reply in {} parts", total);
    }
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(policy.pacing).await;
        }
        send_with_retry(channel, conversation_id, segment, policy).await?;
    }
    Ok(())
}

async fn send_with_retry(
    channel: &dyn ChannelHandle,
    conversation_id: &str,
    segment: &Segment,
    policy: &DeliveryPolicy,
) -> Result<(), DeliveryError> {
    let text = segment.render();
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match channel.send_message(conversation_id, &text).await {
            Ok(()) => return Ok(()),
            Err(reason) => {
                log::warn!(
                    "send of part {}/{} failed (attempt {}/{}): {}",
                    segment.index,
                    segment.total,
                    attempt,
                    attempts,
                    reason
                );
                if attempt >= attempts {
                    return Err(DeliveryError {
                        index: segment.index,
                        total: segment.total,
                        attempts,
                        reason,
                    });
                }
                tokio::time::sleep(policy.backoff * attempt).await;
                attempt += 1;
            }
        }
    }
}
