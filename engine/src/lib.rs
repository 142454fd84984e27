pub mod credential;
pub mod error;
pub mod image_model;
pub mod job;
pub mod poller;
pub mod session;

#[cfg(test)]
mod test_support;

pub use credential::Credential;
pub use error::{Error, Result};
pub use image_model::{PredictionService, ReplicateClient};
pub use job::{JobDescriptor, JobResult, JobStatus};
pub use poller::{Backoff, PollConfig, PollOutcome};
pub use session::{EventKind, Session, SessionEvent};
