//! Telebridge - an HTTP control plane over long-lived messaging sessions.

pub mod api;
pub mod build_info;
pub mod client;
pub mod config;
pub mod handlers;
pub mod server;
pub mod session;
