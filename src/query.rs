//! Read-side access to stored trait events.

use std::io::Write;

use anyhow::Context;
use nest_sync_event_store::SqliteEventStore;

/// Write rows with `event_time` in `[from, to]` to `out`, one JSON object per line.
///
/// Returns the number of rows written.
pub async fn write_events<W: Write>(
    store: &SqliteEventStore,
    from: Option<&str>,
    to: Option<&str>,
    mut out: W,
) -> anyhow::Result<usize> {
    let events = store
        .events_between(from, to)
        .await
        .context("Failed to query trait events")?;

    for event in &events {
        serde_json::to_writer(&mut out, event)?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(events.len())
}
