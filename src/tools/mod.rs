//! Tools offered to the research decision loops
//!
//! - [`registry`](crate::tools::registry) - static tool table keyed by stage,
//!   with typed argument decoding
//! - [`search`](crate::tools::search) - web search providers (Tavily, DuckDuckGo)

/// Tool table and argument decoding.
pub mod registry;
/// Web search providers.
pub mod search;

pub use registry::{Stage, ToolError, ToolInvocation, ToolRegistry};
pub use search::{SearchHit, SearchProvider, SearchRequest};
