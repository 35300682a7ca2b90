//! HTTP control surface
//!
//! JSON endpoints for the song catalogue and the active playback session,
//! plus an SSE stream of engine events.

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{create_router, AppContext};
