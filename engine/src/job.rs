use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::{Error, ProtocolError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    fn rank(self) -> u8 {
        match self {
            Self::Starting => 0,
            Self::Processing => 1,
            Self::Succeeded | Self::Failed | Self::Canceled => 2,
        }
    }

    /// Statuses only move forward. Staying put is fine, switching between
    /// terminal statuses is not.
    pub fn can_advance_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            self == next
        } else {
            next.rank() >= self.rank()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobUrls {
    pub get: String,
    pub cancel: String,
}

/// A prediction as reported by the service. Unknown fields of the response
/// are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: String,
    pub urls: JobUrls,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A succeeded job together with its (non-empty) outputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    pub descriptor: JobDescriptor,
    pub outputs: NonEmpty<String>,
}

impl JobResult {
    pub fn image_url(&self) -> &str {
        self.outputs.first()
    }
}

impl JobDescriptor {
    /// Builds the next state of this job from a freshly polled descriptor.
    /// Identity and URLs stay as they were, status, output and error are
    /// replaced.
    pub fn advance(&self, polled: JobDescriptor) -> Result<JobDescriptor, ProtocolError> {
        if polled.id != self.id {
            return Err(ProtocolError::IdMismatch {
                expected: self.id.clone(),
                actual: polled.id,
            });
        }

        if !self.status.can_advance_to(polled.status) {
            return Err(ProtocolError::StatusRegressed {
                id: self.id.clone(),
                from: self.status,
                to: polled.status,
            });
        }

        Ok(JobDescriptor {
            id: self.id.clone(),
            urls: self.urls.clone(),
            status: polled.status,
            output: polled.output,
            error: polled.error,
        })
    }

    /// `None` while the job is still running.
    pub fn terminal_result(&self) -> Option<Result<JobResult>> {
        match self.status {
            JobStatus::Starting | JobStatus::Processing => None,
            JobStatus::Succeeded => Some(
                self.output
                    .clone()
                    .and_then(NonEmpty::from_vec)
                    .map(|outputs| JobResult {
                        descriptor: self.clone(),
                        outputs,
                    })
                    .ok_or_else(|| {
                        ProtocolError::MissingOutput {
                            id: self.id.clone(),
                        }
                        .into()
                    }),
            ),
            JobStatus::Failed | JobStatus::Canceled => {
                Some(Err(Error::generation_failed(self.error.as_deref())))
            }
        }
    }
}
