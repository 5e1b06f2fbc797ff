//! Record management commands.
//!
//! List, add, and remove captured `{input, output}` pairs. Used by the
//! `mailcue records` CLI subcommands; the HTTP surface exposes the same
//! operations through the store directly.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::models::NewRecord;
use crate::store::RecordStore;

/// Character cap for one-line previews in `records list` output.
const PREVIEW_CHARS: usize = 60;

async fn ready_store(config: &Config) -> Result<RecordStore> {
    let store = RecordStore::new(config);
    if !store
        .wait_until_ready(config.watcher.store_ready_timeout_ms)
        .await
    {
        bail!(
            "store not ready after {}ms (run `mailcue init` first?)",
            config.watcher.store_ready_timeout_ms
        );
    }
    Ok(store)
}

/// `mailcue records list` — print every record, most recent first.
pub async fn list_records(config: &Config) -> Result<()> {
    let store = ready_store(config).await?;

    let mut records = store.fetch_all(config.retrieval.fetch_attempts).await?;
    records.reverse();

    if records.is_empty() {
        println!("No records in collection '{}'.", store.collection());
        store.close().await;
        return Ok(());
    }

    for record in &records {
        println!("{}", record.id);
        if let Some(ts) = &record.timestamp {
            println!("  at:  {}", ts);
        }
        println!("  in:  {}", preview(&record.input));
        println!("  out: {}", preview(&record.output));
    }
    println!();
    println!("{} record(s)", records.len());

    store.close().await;
    Ok(())
}

/// `mailcue records add` — store a hand-written example pair.
pub async fn add_record(config: &Config, input: &str, output: &str) -> Result<()> {
    if input.trim().is_empty() {
        bail!("input must not be empty");
    }
    if output.trim().is_empty() {
        bail!("output must not be empty");
    }

    let store = ready_store(config).await?;
    let id = store
        .append(NewRecord::pair(input.trim(), output.trim()))
        .await?;
    println!("Added record {}", id);
    println!("ok");

    store.close().await;
    Ok(())
}

/// `mailcue records rm` — delete a record by id.
pub async fn remove_record(config: &Config, id: &str) -> Result<()> {
    let store = ready_store(config).await?;

    let deleted = store.delete(id).await?;
    store.close().await;

    if !deleted {
        bail!("no record with id {}", id);
    }
    println!("Removed record {}", id);
    println!("ok");
    Ok(())
}

/// First line of `text`, capped for terminal display.
fn preview(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or("");
    let capped: String = first_line.chars().take(PREVIEW_CHARS).collect();
    if capped.len() < text.len() {
        format!("{}…", capped)
    } else {
        capped
    }
}
