//! Server-push delivery of run timelines to live viewers.

pub mod hub;

pub use hub::{StreamFrame, StreamingHub};
