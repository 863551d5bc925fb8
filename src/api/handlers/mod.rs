//! API request handlers.

/// Liveness endpoint.
pub mod health;
/// Session creation, status, timeline and submission handlers.
pub mod research;
/// Server-sent event timeline stream.
pub mod stream;
