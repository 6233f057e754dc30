//! Subcommand implementations.

use serde_json::Value;
use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{debug, warn};
use tracker_config_and_utils::{Config, Paths};
use tracker_outbox::{FlushOutcome, Payload, Tracker};

type CommandResult<T> = Result<T, Box<dyn Error>>;

/// Event name used when neither the flag nor the payload names one.
const FALLBACK_EVENT_NAME: &str = "event";

/// Pause before asking again while a timer-driven flush is uploading.
const BUSY_RETRY_DELAY: Duration = Duration::from_millis(50);

/// How a drain loop ended.
#[derive(Debug, Default, PartialEq, Eq)]
struct DrainReport {
    delivered: usize,
    last: Option<FlushOutcome>,
}

pub async fn send(
    config: &Config,
    paths: &Paths,
    file: Option<PathBuf>,
    event: Option<String>,
) -> CommandResult<()> {
    let tracker = start(config, paths).await?;

    let (queued, skipped) = match file {
        Some(path) => {
            let file = tokio::fs::File::open(&path).await?;
            queue_lines(&tracker, BufReader::new(file), event.as_deref()).await?
        }
        None => queue_lines(&tracker, BufReader::new(tokio::io::stdin()), event.as_deref()).await?,
    };

    let report = drain(&tracker).await;
    let pending = tracker.pending_count().await.unwrap_or(0);
    tracker.shutdown().await;

    println!("Queued:    {}", queued);
    if skipped > 0 {
        println!("Skipped:   {}", skipped);
    }
    println!("Delivered: {}", report.delivered);
    println!("Pending:   {}", pending);
    print_outcome(report.last);
    Ok(())
}

pub async fn flush(config: &Config, paths: &Paths) -> CommandResult<()> {
    let tracker = start(config, paths).await?;

    let report = drain(&tracker).await;
    let pending = tracker.pending_count().await.unwrap_or(0);
    tracker.shutdown().await;

    println!("Delivered: {}", report.delivered);
    println!("Pending:   {}", pending);
    print_outcome(report.last);
    Ok(())
}

pub async fn status(config: &Config, paths: &Paths) -> CommandResult<()> {
    let tracker = start(config, paths).await?;
    let settings = tracker.delivery_settings();
    let pending = tracker.pending_count().await;

    println!("Database:  {}", paths.database_file().display());
    println!("Persisted: {}", if tracker.is_persistent() { "yes" } else { "no" });
    match pending {
        Ok(count) => println!("Pending:   {}", count),
        Err(e) => println!("Pending:   unknown ({})", e),
    }
    match &settings.endpoint_url {
        Some(url) => println!("Endpoint:  {}", url),
        None => println!("Endpoint:  not configured"),
    }
    println!("Delay:     {} ms", settings.batching_delay.as_millis());
    println!("Table:     {}", config.table_name);
    for account in tracker.duplicate_accounts() {
        println!(
            "Duplicate: account {} / application {}",
            account.account_id, account.application_id
        );
    }

    tracker.shutdown().await;
    Ok(())
}

async fn start(config: &Config, paths: &Paths) -> CommandResult<Tracker> {
    paths.ensure_dirs()?;
    Ok(Tracker::from_config(config, paths).await?)
}

/// Track every payload line. Returns `(queued, skipped)`.
async fn queue_lines<R>(
    tracker: &Tracker,
    reader: R,
    event: Option<&str>,
) -> CommandResult<(usize, usize)>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut queued = 0;
    let mut skipped = 0;
    let mut line_number = 0;

    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        match parse_line(&line, event) {
            Ok(Some((name, payload))) => {
                if tracker.track(&name, &payload) {
                    queued += 1;
                } else {
                    skipped += 1;
                }
            }
            Ok(None) => {}
            Err(reason) => {
                warn!(line = line_number, reason = %reason, "Skipping input line");
                skipped += 1;
            }
        }
    }

    Ok((queued, skipped))
}

/// One input line as `(event name, payload)`. Blank lines yield `None`.
fn parse_line(line: &str, event: Option<&str>) -> Result<Option<(String, Payload)>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let payload = match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(map)) => map,
        Ok(_) => return Err("payload is not a JSON object".to_string()),
        Err(e) => return Err(e.to_string()),
    };

    let name = event
        .map(str::to_string)
        .or_else(|| payload.get("event").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| FALLBACK_EVENT_NAME.to_string());

    Ok(Some((name, payload)))
}

/// Flush until the queue is empty or a flush cannot make progress.
async fn drain(tracker: &Tracker) -> DrainReport {
    let mut report = DrainReport::default();
    loop {
        let outcome = tracker.flush_now().await;
        debug!(?outcome, "Flush finished");
        report.last = Some(outcome);
        match outcome {
            FlushOutcome::Delivered { sent, remaining } => {
                report.delivered += sent;
                if !remaining {
                    break;
                }
            }
            FlushOutcome::Busy => tokio::time::sleep(BUSY_RETRY_DELAY).await,
            _ => break,
        }
    }
    report
}

fn print_outcome(outcome: Option<FlushOutcome>) {
    match outcome {
        Some(FlushOutcome::Failed { retained }) => {
            println!("Delivery failed; {} events kept for the next run", retained)
        }
        Some(FlushOutcome::NoEndpoint) => {
            println!("No endpoint configured; set endpoint_url or pass --endpoint")
        }
        Some(FlushOutcome::StoreUnavailable) => println!("Event store unavailable"),
        Some(FlushOutcome::StoreFailed) => {
            println!("Event store could not be read; events kept for the next run")
        }
        _ => {}
    }
}
