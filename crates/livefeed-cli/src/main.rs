//! livefeed command-line harness
//!
//! Drives the feed session manager against the in-memory transport, either
//! through a scripted walkthrough or a randomized churn simulation.

mod formatter;
mod scenario;
mod simulate;

use std::time::Duration;

use clap::{Parser, Subcommand};
use formatter::OutputFormat;
use livefeed_client::config::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_GRACE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_BASE_DELAY,
    DEFAULT_STALE_SETTLE_DELAY,
};
use livefeed_client::ManagerConfig;

/// livefeed session manager harness
#[derive(Parser, Debug)]
#[command(name = "livefeed")]
#[command(version, about = "Exercise the livefeed session manager", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Output format
    #[arg(long, default_value = "table", value_enum, global = true)]
    pub format: OutputFormat,

    /// Grace delay before an unused feed is closed, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_GRACE_DELAY.as_millis() as u64, global = true)]
    pub grace_ms: u64,

    /// Backoff before the second connect attempt, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_RETRY_BASE_DELAY.as_millis() as u64, global = true)]
    pub retry_base_ms: u64,

    /// Connect attempts per feed.
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS, global = true)]
    pub max_attempts: u32,

    /// Bound on a single connect attempt, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT.as_millis() as u64, global = true)]
    pub connect_timeout_ms: u64,

    /// Pause after closing an orphaned subscription, in milliseconds.
    #[arg(long, default_value_t = DEFAULT_STALE_SETTLE_DELAY.as_millis() as u64, global = true)]
    pub settle_ms: u64,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Walk through two consumers sharing one filtered feed.
    Scenario,

    /// Run randomized subscribe/unsubscribe churn with injected failures.
    Simulate(simulate::SimulateArgs),
}

impl Args {
    /// Convert command-line arguments to manager configuration.
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig::new()
            .with_grace_delay(Duration::from_millis(self.grace_ms))
            .with_retry_base_delay(Duration::from_millis(self.retry_base_ms))
            .with_max_attempts(self.max_attempts)
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_stale_settle_delay(Duration::from_millis(self.settle_ms))
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("livefeed=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.manager_config();
    let formatter = formatter::create_formatter(args.format);

    match args.command {
        Command::Scenario => {
            let steps = scenario::run(config).await?;
            println!("{}", formatter.format_steps(&steps));
        }
        Command::Simulate(options) => {
            let report = simulate::run(config, options).await?;
            println!("{}", formatter.format_report(&report));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_into_config() {
        let args = Args::parse_from([
            "livefeed",
            "--grace-ms",
            "250",
            "--max-attempts",
            "5",
            "simulate",
            "--rounds",
            "3",
        ]);

        let config = args.manager_config();
        assert_eq!(config.grace_delay, Duration::from_millis(250));
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.retry_base_delay, DEFAULT_RETRY_BASE_DELAY);
        assert!(matches!(args.command, Command::Simulate(ref s) if s.rounds == 3));
    }

    #[test]
    fn test_defaults_match_library() {
        let args = Args::parse_from(["livefeed", "scenario"]);
        assert_eq!(args.manager_config(), ManagerConfig::default());
        assert_eq!(args.format, OutputFormat::Table);
    }
}
