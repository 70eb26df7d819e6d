use anyhow::{Context, Result};

use rove::config::Config;

/// Print the settings in effect, with secrets masked.
pub fn show(config: &Config) -> Result<()> {
    let mut shown = config.clone();
    if !shown.ai.api_key.is_empty() {
        shown.ai.api_key = "********".to_string();
    }
    let rendered = toml::to_string_pretty(&shown).context("Failed to render settings")?;
    println!("# {}", Config::settings_path().display());
    println!("{}", rendered);
    Ok(())
}
