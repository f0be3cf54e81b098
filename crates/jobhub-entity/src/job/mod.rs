//! Job entity: model, state machine, and typed payloads.

pub mod model;
pub mod payload;
pub mod state;

pub use model::{Job, JobStateCounts, JobUpdate, NewJob};
pub use payload::JobPayload;
pub use state::{JobPriority, JobState};
