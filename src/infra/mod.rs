//! Infrastructure adapters: staging queues and identifier sources.

pub mod queue;
pub mod source;

pub use queue::{IdentifierQueue, QueueError, RingQueue, SpilloverQueue};
pub use source::{InMemorySource, LineFileSource};
