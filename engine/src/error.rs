use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::job::JobStatus;

pub const BILLING_URL: &str = "https://replicate.com/account/billing";

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can end a generation job. Every variant is terminal for
/// the job it belongs to, the user has to submit again.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport failure or a non-2xx answer from the proxy
    #[error("{message}")]
    Request {
        status: Option<StatusCode>,
        message: String,
    },

    /// HTTP 402, the account has no billing set up
    #[error("{message}")]
    BillingRequired { message: String },

    /// The service reported the prediction as failed or canceled
    #[error("{message}")]
    GenerationFailed { message: String },

    #[error(transparent)]
    InvalidInput(#[from] InvalidInput),

    #[error("Unexpected response from the prediction service: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Stopped polling: {0}")]
    PollLimit(#[from] PollLimit),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidInput {
    #[error("Please enter a prompt")]
    EmptyPrompt,

    #[error("Please enter your Replicate API key")]
    EmptyCredential,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("prediction {id} succeeded without any output")]
    MissingOutput { id: String },

    #[error("status of prediction {id} went back from {from} to {to}")]
    StatusRegressed {
        id: String,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("expected prediction {expected}, got {actual}")]
    IdMismatch { expected: String, actual: String },

    #[error("couldn't decode response body: {0}")]
    Decode(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PollLimit {
    #[error("no terminal status after {0} status checks")]
    MaxAttempts(u32),

    #[error("no terminal status after {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<String>,
}

impl Error {
    pub(crate) fn billing_required() -> Self {
        Self::BillingRequired {
            message: format!(
                "Billing setup required for Replicate API. Please visit {BILLING_URL} to set up billing."
            ),
        }
    }

    /// Maps a non-2xx response onto the error taxonomy. The `detail` field of
    /// a JSON body wins over `fallback`.
    pub(crate) fn from_response(status: StatusCode, body: &str, fallback: &str) -> Self {
        if status == StatusCode::PAYMENT_REQUIRED {
            return Self::billing_required();
        }

        let message = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.detail)
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| fallback.to_string());

        Self::Request {
            status: Some(status),
            message,
        }
    }

    pub(crate) fn generation_failed(message: Option<&str>) -> Self {
        Self::GenerationFailed {
            message: message
                .filter(|m| !m.trim().is_empty())
                .unwrap_or("Failed to generate image")
                .to_string(),
        }
    }

    /// Whether retrying the same status check could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request { status, .. } => status.is_none_or(|s| s.is_server_error()),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Request {
            status: e.status(),
            message: e.to_string(),
        }
    }
}
