pub mod client;
pub mod commands;
pub mod dispatch;

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "crawl-orchestrator")]
#[command(version, about = "Browser-driven extraction workflows")]
#[command(
    long_about = "Runs extraction, login and multi-page crawl workflows on a shared Chrome instance"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<commands::Command>,

    #[arg(long, global = true, help = "Output in JSON format")]
    pub json: bool,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Run Chrome in headless mode")]
    pub headless: Option<bool>,

    #[arg(long, global = true, help = "Path to Chrome executable")]
    pub chrome_path: Option<PathBuf>,

    #[arg(long, global = true, help = "Per-step timeout in milliseconds")]
    pub timeout: Option<u64>,

    #[arg(long, global = true, help = "Extraction service endpoint")]
    pub extractor_url: Option<String>,
}

impl Cli {
    pub fn with_env_context(mut self) -> Self {
        if self.headless.is_none() {
            self.headless = std::env::var("CRAWL_HEADLESS")
                .ok()
                .map(|v| v != "0" && v.to_lowercase() != "false");
        }

        self
    }
}

pub async fn run() -> crate::Result<()> {
    let cli = Cli::parse().with_env_context();

    let config = if let Some(config_path) = &cli.config {
        crate::config::Config::from_file(config_path)?
    } else {
        crate::config::Config::load()?
    };

    let overrides = crate::config::ConfigOverrides {
        headless: cli.headless,
        chrome_path: cli.chrome_path.clone(),
        step_timeout_ms: cli.timeout,
        extractor_endpoint: cli.extractor_url.clone(),
        json: Some(cli.json),
    };

    let config = config.load_with_overrides(overrides);
    config.validate()?;

    dispatch::dispatch(cli, config).await
}
