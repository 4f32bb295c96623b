//! HTTP helpers for dispatched calls: endpoint resolution, transport and response classification.

pub mod classify;
pub mod client;
pub mod endpoint;
