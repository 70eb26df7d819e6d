mod commands;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use commands::{Cli, Commands};
use rove::config::Config;
use rove::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load env
    let _ = dotenv::dotenv();
    let cli = Cli::parse();

    let settings = cli.config.clone().unwrap_or_else(Config::settings_path);
    let config = Config::load(&settings)?;

    let level = if cli.verbose { "debug" } else { config.logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,rove={}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    debug!(path = %settings.display(), "settings loaded");

    if let Commands::Config = cli.command {
        return commands::show_config(&config);
    }

    let state = AppState::init(config, &Config::state_dir()).await?;
    commands::dispatch(cli.command, &state).await
}
