//! Voice mediator server
//!
//! Provides the WebSocket transport adapter and the HTTP surface
//! (health, metrics, post-call scoring, static UI).

pub mod http;
pub mod metrics;
pub mod state;
pub mod websocket;

pub use http::create_router;
pub use metrics::init_metrics;
pub use state::AppState;
