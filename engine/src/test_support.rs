use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use reqwest::StatusCode;

use crate::{
    credential::Credential,
    error::Error,
    image_model::{PredictionService, ServiceFuture},
    job::{JobDescriptor, JobStatus, JobUrls},
};

/// A scripted answer. `Err` stands for a non-2xx response with that status.
pub type Step = Result<JobDescriptor, StatusCode>;

pub fn job(id: &str, status: JobStatus) -> JobDescriptor {
    JobDescriptor {
        id: id.into(),
        urls: JobUrls {
            get: status_url(id),
            cancel: format!("{}/cancel", status_url(id)),
        },
        status,
        output: None,
        error: None,
    }
}

pub fn succeeded(id: &str, outputs: &[&str]) -> JobDescriptor {
    JobDescriptor {
        output: Some(outputs.iter().map(|o| o.to_string()).collect()),
        ..job(id, JobStatus::Succeeded)
    }
}

fn status_url(id: &str) -> String {
    format!("https://api.replicate.com/v1/predictions/{id}")
}

/// Plays back canned responses. The last status step of a job repeats
/// forever.
pub struct ScriptedService {
    credential: Credential,
    submissions: Mutex<VecDeque<Step>>,
    statuses: Mutex<HashMap<String, VecDeque<Step>>>,
    prompts: Mutex<Vec<String>>,
    cancels: Mutex<Vec<String>>,
    status_checks: AtomicUsize,
}

impl Default for ScriptedService {
    fn default() -> Self {
        Self {
            credential: Credential::new("r8_test"),
            submissions: Default::default(),
            statuses: Default::default(),
            prompts: Default::default(),
            cancels: Default::default(),
            status_checks: AtomicUsize::new(0),
        }
    }
}

impl ScriptedService {
    pub fn unavailable() -> StatusCode {
        StatusCode::SERVICE_UNAVAILABLE
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = credential;
        self
    }

    pub fn with_submission(self, step: Step) -> Self {
        self.submissions.lock().unwrap().push_back(step);
        self
    }

    pub fn with_statuses(self, id: &str, steps: Vec<Step>) -> Self {
        self.statuses
            .lock()
            .unwrap()
            .insert(status_url(id), steps.into());
        self
    }

    pub fn status_checks(&self) -> usize {
        self.status_checks.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn cancels(&self) -> Vec<String> {
        self.cancels.lock().unwrap().clone()
    }

    fn play(step: Step) -> crate::Result<JobDescriptor> {
        step.map_err(|status| Error::from_response(status, "", "scripted failure"))
    }
}

impl PredictionService for ScriptedService {
    fn submit<'a>(&'a self, prompt: &'a str) -> ServiceFuture<'a, JobDescriptor> {
        Box::pin(async move {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let step = self
                .submissions
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(StatusCode::NOT_FOUND));
            Self::play(step)
        })
    }

    fn check_status<'a>(&'a self, status_url: &'a str) -> ServiceFuture<'a, JobDescriptor> {
        Box::pin(async move {
            self.status_checks.fetch_add(1, Ordering::SeqCst);
            let mut statuses = self.statuses.lock().unwrap();
            let step = match statuses.get_mut(status_url) {
                Some(steps) if steps.len() > 1 => steps.pop_front().unwrap(),
                Some(steps) => steps.front().cloned().unwrap_or(Err(StatusCode::NOT_FOUND)),
                None => Err(StatusCode::NOT_FOUND),
            };
            Self::play(step)
        })
    }

    fn cancel<'a>(&'a self, cancel_url: &'a str) -> ServiceFuture<'a, JobDescriptor> {
        Box::pin(async move {
            self.cancels.lock().unwrap().push(cancel_url.to_string());
            let id = cancel_url
                .trim_end_matches("/cancel")
                .rsplit('/')
                .next()
                .unwrap_or_default();
            Ok(job(id, JobStatus::Canceled))
        })
    }

    fn credential(&self) -> &Credential {
        &self.credential
    }
}
