use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use toulouse_agenda_lib::config::{AppConfig, CONFIG_ENV};

#[derive(Parser, Debug)]
#[command(name = "toulouse-agenda")]
#[command(about = "Aggregates Toulouse event feeds behind a small JSON API", long_about = None)]
struct Args {
    /// Path to the JSON config file
    #[arg(short, long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Listen address, overrides `bind_addr` from the config
    #[arg(short, long, env = "TOULOUSE_AGENDA_BIND")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "toulouse_agenda=info,toulouse_agenda_lib=info,tower_http=info",
                )
            }),
        )
        .init();

    let args = Args::parse();
    let mut config = AppConfig::load(args.config)?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }

    toulouse_agenda_lib::run(config).await
}
