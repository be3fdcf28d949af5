//! HTTP surface of the proxy

pub mod handlers;
pub mod routes;

pub use handlers::{
    AppState, SESSION_HEADER, TOKENS_AFTER_HEADER, TOKENS_BEFORE_HEADER, TOKENS_SAVED_HEADER,
};
pub use routes::build_router;
