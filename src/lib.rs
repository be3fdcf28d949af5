//! MemoryOps proxy
//!
//! An OpenAI-compatible chat completion proxy that enforces per-identity
//! request and token quotas and condenses stored conversation history
//! before forwarding it upstream.

pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod memory;
pub mod metrics;
pub mod quota;
pub mod upstream;

pub use error::{Error, Result};
