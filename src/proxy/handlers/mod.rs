//! Request handlers for the proxy
//!
//! `responses` bridges the Responses API to the backend; `health` reports
//! liveness and the number of remembered conversations.

mod health;
mod responses;

pub use health::{health_handler, not_found_handler};
pub use responses::responses_handler;
