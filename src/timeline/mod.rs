//! Run timelines: numbering, caching and publishing.
//!
//! - [`SequenceAllocator`] numbers every persisted item of a run
//! - [`TimelineCache`] mirrors persisted items in a sorted TTL store
//! - [`EventPublisher`] is the append path used by the workflow

pub mod cache;
pub mod publisher;
pub mod sequence;
pub mod store;

pub use cache::TimelineCache;
pub use publisher::{EventPublisher, NewEvent};
pub use sequence::SequenceAllocator;
pub use store::{AddMode, MemoryTimelineStore, TimelineStore, TimelineStoreStats};
