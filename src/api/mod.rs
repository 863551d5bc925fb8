//! HTTP API Handlers and Routes
//!
//! # Module Structure
//!
//! - [`api::handlers`](crate::api::handlers) - Request handlers for each endpoint
//! - [`api::routes`](crate::api::routes) - Route definitions and router configuration
//!
//! # API Endpoints
//!
//! - `GET /health` - Liveness and executor load
//! - `POST /api/research` - Reserve session ids
//! - `GET /api/research/{id}` - Session status
//! - `GET /api/research/{id}/messages` - Full timeline
//! - `POST /api/research/{id}/messages` - Submit a message and start a run
//! - `GET /api/research/{id}/stream` - Live timeline as server-sent events
//! - `GET /api/openapi.json` - OpenAPI document
//!
//! # Identity
//!
//! Research endpoints take the caller from the `X-User-Id` header. Sessions
//! owned by other users answer `404`.

/// Request extractors.
pub mod extract;
/// Request and response handlers for all API endpoints.
pub mod handlers;
/// Router configuration and route definitions.
pub mod routes;
