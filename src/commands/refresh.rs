use anyhow::Result;

use rove::state::AppState;

pub async fn refresh(state: &AppState, id: Option<String>) -> Result<()> {
    let Some(id) = id else {
        let tick = state.scheduler.tick().await?;
        for task in &tick.completed {
            super::print_task(task);
        }
        for id in &tick.skipped_stale {
            println!("{} skipped: not updated within the staleness threshold (refresh it by id)", id);
        }
        for id in &tick.skipped_busy {
            println!("{} skipped: a run is already in progress", id);
        }
        if tick.completed.is_empty() && tick.skipped_stale.is_empty() && tick.skipped_busy.is_empty() {
            println!("No tracked items. Use `rove build <ID>` to start one.");
        }
        return Ok(());
    };

    let task = state.scheduler.refresh(&id).await?;
    super::print_task(&task);
    Ok(())
}
