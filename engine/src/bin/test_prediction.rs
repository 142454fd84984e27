use clap::Parser;
use color_eyre::{Result, eyre::bail};
use engine::{
    Credential, PollConfig, PollOutcome, PredictionService, ReplicateClient,
    poller::poll_until_terminal,
};
use tokio_util::sync::CancellationToken;

/// Runs a single prediction against a proxy and prints what happens
#[derive(clap::Parser)]
struct Arg {
    key: String,
    prompt: String,
    #[arg(long, default_value = engine::image_model::replicate::DEFAULT_BASE_URL)]
    base_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();
    color_eyre::install()?;
    let Arg {
        key,
        prompt,
        base_url,
    } = Arg::parse();
    let client = ReplicateClient::new(base_url, Credential::new(key));

    let descriptor = client.submit(&prompt).await?;
    println!("Submitted: {descriptor:#?}");

    let outcome = poll_until_terminal(
        &client,
        descriptor,
        &PollConfig::default(),
        &CancellationToken::new(),
        |d| println!("{}: {}", d.id, d.status),
    )
    .await?;

    match outcome {
        PollOutcome::Succeeded(result) => println!("Image: {}", result.image_url()),
        PollOutcome::Cancelled => bail!("Polling was cancelled"),
    }
    Ok(())
}
