use std::{future::Future, pin::Pin};

use crate::{credential::Credential, error::Result, job::JobDescriptor};

pub mod replicate;
pub use replicate::ReplicateClient;

pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A hosted image model that runs generations as asynchronous predictions.
///
/// None of the methods retry. Whatever goes wrong is handed back to the
/// caller right away.
pub trait PredictionService: Send + Sync {
    /// Starts a prediction for `prompt`. The caller is expected to have
    /// rejected blank prompts and credentials already.
    fn submit<'a>(&'a self, prompt: &'a str) -> ServiceFuture<'a, JobDescriptor>;

    /// Fetches the current state of the prediction behind `status_url`
    fn check_status<'a>(&'a self, status_url: &'a str) -> ServiceFuture<'a, JobDescriptor>;

    /// Asks the service to stop working on a prediction
    fn cancel<'a>(&'a self, cancel_url: &'a str) -> ServiceFuture<'a, JobDescriptor>;

    fn credential(&self) -> &Credential;
}
