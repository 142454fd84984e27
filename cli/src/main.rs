use std::process::ExitCode;

use clap::Parser;
use color_eyre::Result;
use pixel_prompt::cli::Cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    pretty_env_logger::init();
    color_eyre::install()?;
    pixel_prompt::run(Cli::parse()).await
}
