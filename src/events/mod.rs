// Event store: append-only log of workflow lifecycle events

pub mod store;
pub mod types;

pub use store::{EventStore, EventStoreError, DEFAULT_EVENT_LOG_PATH};
pub use types::{
    EventData, EventFamily, EventLog, EventMetadata, EventType, WorkflowEvent, EVENT_LOG_VERSION,
};
