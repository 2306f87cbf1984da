//! Gateway: message filtering, command dispatch, and the HTTP side (health, Telegram webhook).
//!
//! Inbound messages from every channel go through one queue and are handled one at a time.

mod command;
mod dispatch;
mod server;

pub use command::{parse_command, Command, Rejection, Task, FRESH_TOKENS};
pub use dispatch::{completion_footer, Dispatcher, Outcome, ACK_TEXT};
pub use server::{router, run_gateway, spawn_inbound_processor, GatewayState};
