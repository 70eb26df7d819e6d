use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use rove::state::AppState;
use rove::types::normalize_id;

#[derive(Args)]
pub struct ForgetArgs {
    pub id: String,

    /// Also delete the generated document
    #[arg(long)]
    pub delete_document: bool,
}

/// Drop a tracked item with its cursors and retained items.
pub async fn forget(state: &AppState, args: ForgetArgs) -> Result<()> {
    let id = normalize_id(&args.id);
    let Some(tracked) = state.store.tracked(&id).await? else {
        println!("{} is not tracked.", id);
        return Ok(());
    };
    state.store.forget(&id).await?;
    info!(item = %id, "tracked item forgotten");

    if args.delete_document {
        let path = state.config.output.dir.join(&tracked.filename);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to delete {}", path.display()))?;
        }
        println!("Forgot {} and deleted {}", id, path.display());
    } else {
        println!("Forgot {} (document kept: {})", id, tracked.filename);
    }
    Ok(())
}
