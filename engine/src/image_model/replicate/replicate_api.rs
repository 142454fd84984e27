use log::debug;
use reqwest::{
    Client, Response,
    header::{AUTHORIZATION, CONTENT_TYPE},
};
use serde::Serialize;

use crate::{
    credential::Credential,
    error::{Error, ProtocolError, Result},
    job::JobDescriptor,
};

pub const MODEL_VERSION: &str = "39ed52f2a78e934b3ba6e2a89f5b1c712de7dfea535525255b1aa35c5565e08b";
pub const NEGATIVE_PROMPT: &str = "ugly, blurry, low quality, distorted";
pub const NUM_OUTPUTS: u32 = 1;
pub const GUIDANCE_SCALE: f64 = 7.5;
pub const NUM_INFERENCE_STEPS: u32 = 50;

/// Origin of the absolute URLs Replicate hands out
pub const UPSTREAM_PREFIX: &str = "https://api.replicate.com/v1";
/// Where the proxy mounts the Replicate API
pub const PROXY_PREFIX: &str = "/api/replicate";
pub const PREDICTIONS_PATH: &str = "/api/replicate/predictions";

#[derive(Debug, Serialize)]
pub struct PredictionRequest<'a> {
    pub version: &'a str,
    pub input: GenerationInput<'a>,
}

#[derive(Debug, Serialize)]
pub struct GenerationInput<'a> {
    pub prompt: &'a str,
    pub negative_prompt: &'a str,
    pub num_outputs: u32,
    pub guidance_scale: f64,
    pub num_inference_steps: u32,
}

impl<'a> PredictionRequest<'a> {
    pub fn new(prompt: &'a str) -> Self {
        Self {
            version: MODEL_VERSION,
            input: GenerationInput {
                prompt,
                negative_prompt: NEGATIVE_PROMPT,
                num_outputs: NUM_OUTPUTS,
                guidance_scale: GUIDANCE_SCALE,
                num_inference_steps: NUM_INFERENCE_STEPS,
            },
        }
    }
}

/// Rewrites a URL handed out by Replicate so it goes through the proxy at
/// `base_url`. Everything after the upstream prefix is kept as is. Relative
/// URLs are resolved against `base_url`, anything else is left alone.
pub fn proxy_url(url: &str, base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if let Some(suffix) = url.strip_prefix(UPSTREAM_PREFIX) {
        format!("{base}{PROXY_PREFIX}{suffix}")
    } else if url.starts_with('/') {
        format!("{base}{url}")
    } else {
        url.to_string()
    }
}

/// Starts a prediction and returns the descriptor the service answered with
pub async fn submit(
    prompt: &str,
    credential: &Credential,
    base_url: &str,
    client: &Client,
) -> Result<JobDescriptor> {
    let url = format!("{}{PREDICTIONS_PATH}", base_url.trim_end_matches('/'));
    debug!("Submitting prediction to {url}");

    let resp = client
        .post(&url)
        .header(AUTHORIZATION, credential.header_value())
        .json(&PredictionRequest::new(prompt))
        .send()
        .await?;

    read_descriptor(resp, "Failed to generate image").await
}

/// Fetches the current state of a prediction
pub async fn check_status(
    status_url: &str,
    credential: &Credential,
    base_url: &str,
    client: &Client,
) -> Result<JobDescriptor> {
    let url = proxy_url(status_url, base_url);
    debug!("Checking generation status at {url}");

    let resp = client
        .get(&url)
        .header(AUTHORIZATION, credential.header_value())
        .header(CONTENT_TYPE, "application/json")
        .send()
        .await?;

    read_descriptor(resp, "Failed to check generation status").await
}

pub async fn cancel(
    cancel_url: &str,
    credential: &Credential,
    base_url: &str,
    client: &Client,
) -> Result<JobDescriptor> {
    let url = proxy_url(cancel_url, base_url);
    debug!("Canceling prediction at {url}");

    let resp = client
        .post(&url)
        .header(AUTHORIZATION, credential.header_value())
        .header(CONTENT_TYPE, "application/json")
        .send()
        .await?;

    read_descriptor(resp, "Failed to cancel generation").await
}

/// Downloads a generated image. Output URLs are public, no credential is
/// sent along.
pub async fn download(url: &str, client: &Client) -> Result<Vec<u8>> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(Error::from_response(status, &body, "Failed to download image"));
    }
    Ok(resp.bytes().await?.to_vec())
}

async fn read_descriptor(resp: Response, fallback: &str) -> Result<JobDescriptor> {
    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        debug!("Prediction request failed: {status} - {body}");
        return Err(Error::from_response(status, &body, fallback));
    }

    let descriptor: JobDescriptor = serde_json::from_str(&body)
        .map_err(|e| ProtocolError::Decode(format!("{e}:\n{body}")))?;
    debug!("Prediction response:\n{descriptor:#?}");
    Ok(descriptor)
}
