use anyhow::Result;

use rove::state::AppState;

/// Configured sources, marking the ones that have credentials.
pub fn sources(state: &AppState) -> Result<()> {
    let default = &state.config.sources.default_ticket_source;
    println!("Sources:\n");
    for (name, settings) in state.config.sources.iter() {
        let registered = state.registry.get(name).is_some();
        let mark = if registered { "✓" } else { "✗" };
        let default_marker = if name == default.as_str() { " (default)" } else { "" };
        println!(
            "  {} {:<8} {:>4}/min{}",
            mark, name, settings.rate_limit, default_marker
        );
    }
    println!("\nMissing credentials go in ROVE_<SOURCE>_TOKEN (a .env file works).");
    Ok(())
}
