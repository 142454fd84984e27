use std::fmt;

use log::{error, info};

use engine::{EventKind, JobStatus};

/// A one-line message for the user, the terminal's stand-in for a toast
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Progress(String),
    Success(String),
    Error(String),
}

impl Notice {
    pub fn from_event(kind: &EventKind) -> Self {
        match kind {
            EventKind::Submitted(d) => Self::Progress(format!("Submitted prediction {}", d.id)),
            EventKind::Updated(d) => Self::Progress(match d.status {
                JobStatus::Starting => "Waiting for the model to start...".to_string(),
                _ => format!("Prediction {} is {}", d.id, d.status),
            }),
            EventKind::Succeeded(_) => Self::Success("Image generated successfully!".into()),
            EventKind::Failed(e) => Self::Error(e.to_string()),
        }
    }

    pub fn error(e: impl fmt::Display) -> Self {
        Self::Error(e.to_string())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn show(&self) {
        match self {
            Self::Progress(msg) => info!("{msg}"),
            Self::Success(msg) => info!("{msg}"),
            Self::Error(msg) => error!("{msg}"),
        }
        if self.is_error() {
            eprintln!("{self}");
        } else {
            println!("{self}");
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Progress(msg) => write!(f, "  {msg}"),
            Self::Success(msg) => write!(f, "✓ {msg}"),
            Self::Error(msg) => write!(f, "✗ {msg}"),
        }
    }
}
