use std::{path::PathBuf, time::Duration};

use engine::{Backoff, PollConfig};

#[derive(Debug, clap::Parser)]
#[command(version, about = "Turn a text prompt into an image with Replicate")]
pub struct Cli {
    /// Replicate API token. It is saved and reused by later runs.
    #[arg(short = 'k', long, global = true)]
    pub api_key: Option<String>,

    /// Origin of the proxy that forwards /api/replicate to Replicate
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Pause between two status checks
    #[arg(
        long,
        global = true,
        default_value_t = 1000,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub poll_interval_ms: u64,

    /// Multiply the pause by this factor after every status check
    #[arg(long, global = true, value_parser = parse_backoff)]
    pub backoff: Option<f64>,

    /// Upper bound for the pause when backing off
    #[arg(long, global = true, default_value_t = 30, requires = "backoff")]
    pub max_interval_secs: u64,

    /// Give up after this many status checks
    #[arg(long, global = true)]
    pub max_attempts: Option<u32>,

    /// Give up after polling for this long
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    /// Retry failed status checks this many times in a row
    #[arg(long, global = true, default_value_t = 0)]
    pub status_retries: u32,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Generate one image and wait for it
    Generate(Generate),
    /// Read prompts from stdin, every line replaces the running generation
    Interactive,
    /// Save the API token for later runs
    SetKey { key: String },
    /// Show which API token is saved
    ShowKey,
}

#[derive(Debug, clap::Args)]
pub struct Generate {
    pub prompt: String,

    /// Also download the image to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

impl Cli {
    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.max_attempts,
            timeout: self.timeout_secs.map(Duration::from_secs),
            backoff: self.backoff.map(|multiplier| Backoff {
                multiplier,
                max_interval: Duration::from_secs(self.max_interval_secs),
            }),
            status_check_retries: self.status_retries,
        }
    }
}

fn parse_backoff(s: &str) -> Result<f64, String> {
    let multiplier: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if multiplier.is_finite() && multiplier >= 1.0 {
        Ok(multiplier)
    } else {
        Err("must be a number of at least 1".into())
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn defaults_keep_polling_unbounded() {
        let cli = Cli::parse_from(["pixel_prompt", "generate", "a red fox"]);
        let config = cli.poll_config();
        assert_eq!(config.interval, Duration::from_secs(1));
        assert_eq!(config.max_attempts, None);
        assert_eq!(config.timeout, None);
        assert_eq!(config.status_check_retries, 0);
        assert!(config.backoff.is_none());
        assert!(matches!(
            cli.command,
            Command::Generate(Generate { ref prompt, output: None }) if prompt == "a red fox"
        ));
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "pixel_prompt",
            "generate",
            "a red fox",
            "-o",
            "fox.png",
            "--max-attempts",
            "30",
            "--timeout-secs",
            "60",
            "--status-retries",
            "2",
            "-k",
            "r8_abc",
        ]);
        let config = cli.poll_config();
        assert_eq!(config.max_attempts, Some(30));
        assert_eq!(config.timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.status_check_retries, 2);
        assert_eq!(cli.api_key.as_deref(), Some("r8_abc"));
    }

    #[test]
    fn backoff_flags() {
        let cli = Cli::parse_from([
            "pixel_prompt",
            "interactive",
            "--backoff",
            "1.5",
            "--max-interval-secs",
            "10",
        ]);
        let backoff = cli.poll_config().backoff.unwrap();
        assert_eq!(backoff.multiplier, 1.5);
        assert_eq!(backoff.max_interval, Duration::from_secs(10));

        let cli = Cli::parse_from(["pixel_prompt", "interactive", "--backoff", "2"]);
        let backoff = cli.poll_config().backoff.unwrap();
        assert_eq!(backoff.max_interval, Duration::from_secs(30));
    }

    #[test]
    fn rejects_intervals_that_never_pause() {
        for args in [
            ["--poll-interval-ms", "0"],
            ["--backoff", "0.5"],
            ["--backoff", "abc"],
        ] {
            let res = Cli::try_parse_from(
                ["pixel_prompt", "generate", "a red fox"].into_iter().chain(args),
            );
            assert!(res.is_err(), "{args:?} was accepted");
        }
    }
}
