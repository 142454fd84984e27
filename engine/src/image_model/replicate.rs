use reqwest::Client;

use crate::{
    credential::Credential,
    error::Result,
    image_model::{PredictionService, ServiceFuture},
    job::JobDescriptor,
};

pub mod replicate_api;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Talks to Replicate through a pass-through proxy that exposes the API
/// under `/api/replicate`.
#[derive(Clone)]
pub struct ReplicateClient {
    client: Client,
    base_url: String,
    credential: Credential,
}

impl ReplicateClient {
    pub fn new(base_url: impl Into<String>, credential: Credential) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            credential,
        }
    }

    pub async fn download(&self, image_url: &str) -> Result<Vec<u8>> {
        replicate_api::download(image_url, &self.client).await
    }
}

impl PredictionService for ReplicateClient {
    fn submit<'a>(&'a self, prompt: &'a str) -> ServiceFuture<'a, JobDescriptor> {
        Box::pin(replicate_api::submit(
            prompt,
            &self.credential,
            &self.base_url,
            &self.client,
        ))
    }

    fn check_status<'a>(&'a self, status_url: &'a str) -> ServiceFuture<'a, JobDescriptor> {
        Box::pin(replicate_api::check_status(
            status_url,
            &self.credential,
            &self.base_url,
            &self.client,
        ))
    }

    fn cancel<'a>(&'a self, cancel_url: &'a str) -> ServiceFuture<'a, JobDescriptor> {
        Box::pin(replicate_api::cancel(
            cancel_url,
            &self.credential,
            &self.base_url,
            &self.client,
        ))
    }

    fn credential(&self) -> &Credential {
        &self.credential
    }
}
