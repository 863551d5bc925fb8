//! Durable record store.
//!
//! Sessions, chat messages and workflow events live in libsql: a local file
//! for single-node deployments, `:memory:` for tests, or a remote Turso
//! database.

pub mod traits;
pub mod turso;

pub use traits::{DatabaseProvider, RecordStore, SessionMetadata, SessionProgress};
pub use turso::TursoClient;
