use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use color_eyre::{
    Result,
    eyre::{bail, eyre},
};
use log::debug;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncBufReadExt, BufReader};

use engine::{
    EventKind, JobDescriptor, PollConfig, ReplicateClient, Session,
    image_model::replicate::DEFAULT_BASE_URL,
};

use crate::{
    cli::{Cli, Command, Generate},
    config::Config,
    notice::Notice,
};

pub mod cli;
pub mod config;
pub mod notice;

pub const CONFIG_FILE_NAME: &str = "pixel_prompt.ron";

pub fn load_ron_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let src = fs::read_to_string(path)?;
    Ok(ron::from_str(&src)?)
}

pub fn save_ron_file<T: Serialize>(path: &Path, x: &T) -> Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    Ok(fs::write(path, ron::to_string(x)?)?)
}

pub fn config_path() -> Result<PathBuf> {
    Ok(dirs::config_local_dir()
        .ok_or(eyre!("Couldn't get config dir"))?
        .join(CONFIG_FILE_NAME))
}

pub fn load_config(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        Ok(None)
    } else {
        load_ron_file(path).map(Some)
    }
}

pub fn save_config(path: &Path, cfg: &Config) -> Result<()> {
    save_ron_file(path, cfg)
}

pub async fn run(cli: Cli) -> Result<ExitCode> {
    let path = config_path()?;
    let mut config = load_config(&path)?.unwrap_or_default();

    // a key given on the command line replaces the saved one
    if let Some(key) = &cli.api_key {
        if *key != config.replicate_api_key {
            config.replicate_api_key = key.clone();
            save_config(&path, &config)?;
            debug!("Saved API key to {}", path.display());
        }
    }

    let poll_config = cli.poll_config();
    let base_url = cli
        .base_url
        .clone()
        .or_else(|| config.base_url.clone())
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

    match cli.command {
        Command::SetKey { key } => {
            config.replicate_api_key = key;
            save_config(&path, &config)?;
            println!("Saved API key to {}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::ShowKey => {
            match config.masked_key() {
                Some(key) => println!("{key}"),
                None => println!("No API key saved"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Generate(args) => {
            if config.credential().is_blank() {
                print_welcome();
            }
            let client = ReplicateClient::new(base_url, config.credential());
            generate(client, poll_config, args).await
        }
        Command::Interactive => {
            if config.credential().is_blank() {
                print_welcome();
            }
            let client = ReplicateClient::new(base_url, config.credential());
            interactive(client, poll_config).await
        }
    }
}

fn print_welcome() {
    println!(indoc::indoc! {"
        No Replicate API key is configured. Create one at
        https://replicate.com/account/api-tokens and pass it with --api-key
        or save it with `pixel_prompt set-key <KEY>`.
    "});
}

async fn generate(client: ReplicateClient, poll_config: PollConfig, args: Generate) -> Result<ExitCode> {
    let (mut session, mut events) = Session::new(Arc::new(client.clone()), poll_config);

    if let Err(e) = session.generate(&args.prompt) {
        Notice::error(e).show();
        return Ok(ExitCode::FAILURE);
    }

    while let Some(ev) = events.recv().await {
        Notice::from_event(&ev.kind).show();
        match ev.kind {
            EventKind::Succeeded(result) => {
                println!("{}", result.image_url());
                if let Some(output) = &args.output {
                    let bytes = client.download(result.image_url()).await?;
                    tokio::fs::write(output, &bytes).await?;
                    println!("Saved image, {} bytes, to {}", bytes.len(), output.display());
                }
                return Ok(ExitCode::SUCCESS);
            }
            EventKind::Failed(_) => return Ok(ExitCode::FAILURE),
            EventKind::Submitted(_) | EventKind::Updated(_) => {}
        }
    }

    bail!("Generation ended without a result")
}

async fn interactive(client: ReplicateClient, poll_config: PollConfig) -> Result<ExitCode> {
    println!(indoc::indoc! {"
        Enter a prompt and press enter. A new prompt replaces the running one.
        `:cancel` stops the running generation, `:quit` or EOF exits.
    "});

    let (mut session, mut events) = Session::new(Arc::new(client), poll_config);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut current = None;
    let mut running: Option<JobDescriptor> = None;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    ":quit" | ":q" => break,
                    ":cancel" => {
                        session.cancel();
                        if let Some(d) = running.take() {
                            match session.cancel_remote(&d).await {
                                Ok(d) => Notice::Progress(format!("Canceled prediction {}", d.id)).show(),
                                Err(e) => Notice::error(e).show(),
                            }
                        }
                    }
                    _ => match session.generate(&line) {
                        Ok(generation) => {
                            current = Some(generation);
                            running = None;
                        }
                        Err(e) => Notice::error(e).show(),
                    },
                }
            }
            Some(ev) = events.recv() => {
                if current != Some(ev.generation) {
                    continue;
                }
                Notice::from_event(&ev.kind).show();
                match &ev.kind {
                    EventKind::Submitted(d) | EventKind::Updated(d) => running = Some(d.clone()),
                    EventKind::Succeeded(result) => {
                        println!("{}", result.image_url());
                        running = None;
                    }
                    EventKind::Failed(_) => running = None,
                }
            }
        }
    }

    session.cancel();
    Ok(ExitCode::SUCCESS)
}
