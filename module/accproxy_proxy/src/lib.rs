//! HTTP surface and wiring for the accproxy reverse proxy: every provider route drives the
//! same pipeline (`pipeline.rs`) through `handlers.rs`, against upstream targets built in
//! `provider.rs` and, for streamed responses, relayed through the stream pump (`stream.rs`).
//! `state.rs` holds the process-wide handles injected into every request; `error.rs` maps the
//! shared `Error` enum onto the wire response shape from §7.

pub mod error;
pub mod handlers;
pub mod pipeline;
pub mod provider;
pub mod state;
pub mod stream;

pub use state::{ AppState, UpstreamBaseUrls, UpstreamKeys };

use axum::routing::{ get, post };
use axum::Router;
use tower_http::trace::TraceLayer;

/// Builds the full router: provider passthroughs, liveness, and readiness, wrapped in a
/// request tracing layer at the edge.
pub fn build_router( state: AppState ) -> Router
{
  Router::new()
    .route( "/v1/messages", post( handlers::anthropic_messages ) )
    .route( "/v1/chat/completions", post( handlers::openai_chat_completions ) )
    .route( "/v1/google/*rest", post( handlers::google_passthrough ) )
    .route( "/health", get( handlers::health ) )
    .route( "/health/ready", get( handlers::health_ready ) )
    .layer( TraceLayer::new_for_http() )
    .with_state( state )
}
