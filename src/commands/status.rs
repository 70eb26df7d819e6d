use anyhow::{bail, Result};

use rove::state::AppState;
use rove::types::normalize_id;

pub async fn status(state: &AppState) -> Result<()> {
    let tracked = state.store.list_tracked().await?;
    if tracked.is_empty() {
        println!("No tracked items yet. Use `rove build <ID>` to add one.");
        return Ok(());
    }

    println!("{:<12} {:<8} {:<17} Document", "Item", "Source", "Last updated");
    println!("{}", "-".repeat(72));
    for item in &tracked {
        println!(
            "{:<12} {:<8} {:<17} {}",
            item.id,
            item.primary_source,
            item.last_updated.format("%Y-%m-%d %H:%M"),
            item.filename
        );
        for (source, cursor) in state.store.cursors(&item.id).await? {
            println!("    {:<8} fetched through {}", source, cursor.format("%Y-%m-%d %H:%M:%S"));
        }
    }

    let history = state.scheduler.history();
    if !history.is_empty() {
        println!("\nRecent tasks:");
        for task in history.iter().take(20) {
            super::print_task(task);
        }
    }
    Ok(())
}

pub async fn find(state: &AppState, id: &str) -> Result<()> {
    let id = normalize_id(id);
    let Some(tracked) = state.store.tracked(&id).await? else {
        bail!("No context document for {}", id);
    };
    println!("{}", state.config.output.dir.join(&tracked.filename).display());
    Ok(())
}

pub async fn search(state: &AppState, query: &str) -> Result<()> {
    let hits: Vec<_> = state
        .store
        .list_tracked()
        .await?
        .into_iter()
        .filter(|t| t.matches(query))
        .collect();
    if hits.is_empty() {
        bail!("No context documents match '{}'", query);
    }
    for tracked in hits {
        println!("{}", state.config.output.dir.join(&tracked.filename).display());
    }
    Ok(())
}
