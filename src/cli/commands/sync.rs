//! Sync and list command implementations.

use std::path::PathBuf;

use colored::Colorize;
use serde::Serialize;

use crate::cli::commands::{open_engine, open_store, print_json};
use crate::error::Result;
use crate::model::Record;
use crate::storage::MergeStats;
use crate::sync::{ListOptions, SyncMode};

/// Output for sync.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SyncOutput<'a> {
    form_id: &'a str,
    mode: SyncMode,
    stats: MergeStats,
    entries: usize,
    remote_watermark: Option<i64>,
}

/// Output for list.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListOutput<'a> {
    form_id: &'a str,
    entries: &'a [Record],
    count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    synced: Option<SyncMode>,
    background_refresh: bool,
}

/// Execute `sync`.
pub async fn execute_sync(
    form: &str,
    full: bool,
    db_path: Option<&PathBuf>,
    source: Option<&PathBuf>,
    json: bool,
) -> Result<()> {
    let engine = open_engine(db_path, source)?;
    let outcome = engine
        .list_entries(
            form,
            ListOptions {
                force_full_sync: full,
                ..ListOptions::default()
            },
        )
        .await?;

    if json {
        return print_json(&SyncOutput {
            form_id: form,
            mode: outcome.mode,
            stats: outcome.stats,
            entries: outcome.records.len(),
            remote_watermark: outcome.remote_watermark,
        });
    }

    let mode = match outcome.mode {
        SyncMode::Full => "full",
        SyncMode::Delta => "delta",
        SyncMode::Unchanged => "unchanged",
    };
    let stats = outcome.stats;
    println!(
        "{} {} ({mode}): {} {} {} {}",
        "Synced".green().bold(),
        form.bold(),
        format!("+{}", stats.created).green(),
        format!("~{}", stats.updated).yellow(),
        format!("-{}", stats.deleted).red(),
        format!("{} skipped", stats.skipped).dimmed(),
    );
    println!("{} entries cached", outcome.records.len());
    Ok(())
}

/// Execute `list`.
///
/// Without `--refresh` or `--force` this never touches the source.
pub async fn execute_list(
    form: &str,
    refresh: bool,
    force: bool,
    db_path: Option<&PathBuf>,
    source: Option<&PathBuf>,
    json: bool,
) -> Result<()> {
    let (records, synced, background) = if refresh || force {
        let engine = open_engine(db_path, source)?;
        let view = engine.entries(form, force).await?;
        engine.flush_pending().await;
        (view.records, view.synced, view.background)
    } else {
        let store = open_store(db_path)?;
        (store.read_all(form).await?.records, None, false)
    };

    if json {
        return print_json(&ListOutput {
            form_id: form,
            entries: &records,
            count: records.len(),
            synced,
            background_refresh: background,
        });
    }

    if records.is_empty() {
        println!("No entries cached for {}", form.bold());
        return Ok(());
    }

    println!("{} ({} entries)", form.cyan().bold(), records.len());
    for record in &records {
        let data = serde_json::to_string(&record.data)?;
        println!(
            "  {} {} {}",
            record.entry_id.bold(),
            record.modified_at.dimmed(),
            data
        );
    }
    Ok(())
}
