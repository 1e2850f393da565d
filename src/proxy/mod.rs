// Proxy module - HTTP server bridging the Responses API to the Codex backend
//
// Clients talk to the bridge as if it were a stateful Responses endpoint.
// Each request is rewritten for the stateless backend (model, reasoning,
// filtered history, compaction), forwarded, and the SSE answer converted
// back for the client.
//
// Layout:
// - transformation: request pipeline (pure, no IO)
// - sessions: in-process conversation memory
// - sse / response: upstream stream scanning and conversion
// - handlers / server / state: the axum host

pub mod error;
mod handlers;
pub mod helpers;
pub mod response;
mod server;
pub mod sessions;
pub mod sse;
pub mod state;
pub mod transformation;

pub use server::start_proxy;
