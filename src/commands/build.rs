use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Args;
use tracing::info;

use rove::config::parse_duration;
use rove::pipeline::RunRequest;
use rove::schedule::task::TaskState;
use rove::state::AppState;

#[derive(Args)]
pub struct BuildArgs {
    /// Work item id, e.g. T-123 or #847
    pub id: String,

    /// Source the id belongs to (default: sources.default_ticket_source)
    #[arg(short, long)]
    pub source: Option<String>,

    /// Only include items after this date (YYYY-MM-DD, RFC 3339 or e.g. 7d)
    #[arg(long)]
    pub since: Option<String>,

    /// Only include items up to this date
    #[arg(long)]
    pub until: Option<String>,
}

pub async fn build(state: &AppState, args: BuildArgs) -> Result<()> {
    let now = Utc::now();
    let mut request = RunRequest::new(&args.id);
    request.primary_source = args.source;
    request.since = args.since.as_deref().map(|d| parse_date(d, now)).transpose()?;
    request.until = args.until.as_deref().map(|d| parse_date(d, now)).transpose()?;
    if let (Some(since), Some(until)) = (request.since, request.until) {
        if since >= until {
            bail!("--since must be before --until");
        }
    }

    let source = request
        .primary_source
        .clone()
        .unwrap_or_else(|| state.config.sources.default_ticket_source.clone());
    info!(item = %request.id, source = %source, "build started");
    println!("Building context for {} from {}...", request.id, source);

    let task = state.scheduler.trigger(request).await?;
    super::print_task(&task);
    if task.state == TaskState::Failed {
        bail!("build failed for {}", task.item);
    }
    Ok(())
}

/// `YYYY-MM-DD` (midnight UTC), RFC 3339, or a duration back from `now`.
fn parse_date(raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let ago = parse_duration(raw).with_context(|| format!("Unrecognized date '{}'", raw))?;
    let ago = chrono::Duration::from_std(ago).context("Duration out of range")?;
    Ok(now - ago)
}
