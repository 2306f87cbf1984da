//! Taskbridge core library — chat channels, agent execution, chunked delivery, and the
//! gateway that ties them together. Used by the `taskbridge` CLI.

pub mod channels;
pub mod chunk;
pub mod config;
pub mod conversation;
pub mod delivery;
pub mod exec;
pub mod gateway;
pub mod init;
