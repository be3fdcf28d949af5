//! Forwarding to the upstream LLM provider

pub mod client;
pub mod models;

pub use client::{parse_sse_events, HttpUpstream, UpstreamClient, UpstreamConfig, UpstreamError};
pub use models::{ChatMessage, UpstreamRequest, UpstreamResponse};
