//! Status command implementation.

use std::path::PathBuf;

use colored::Colorize;
use serde::Serialize;

use crate::cli::commands::{open_store, print_json};
use crate::config::SyncSettings;
use crate::error::{Error, Result};
use crate::model::FormMeta;
use crate::storage::{RecordStore, SqliteBackend};
use crate::sync::{Freshness, evaluate};
use crate::time::{EpochMs, format_epoch_ms};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FormSummary {
    form_id: String,
    entries: usize,
    last_synced_at: Option<EpochMs>,
    last_remote_read_watermark: Option<EpochMs>,
    last_local_mutation_at: Option<EpochMs>,
    pending_local: bool,
    freshness: Freshness,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FormDetail {
    #[serde(flatten)]
    summary: FormSummary,
    header_shape: Vec<String>,
    schema_hash: Option<String>,
    indexed_entries: usize,
}

#[derive(Serialize)]
struct StatusOutput {
    forms: Vec<FormSummary>,
}

/// Execute `status`.
pub async fn execute(form: Option<&str>, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let settings = SyncSettings::load()?;
    let store = open_store(db_path)?;

    match form {
        Some(form_id) => show_form(&store, &settings, form_id, json).await,
        None => show_all(&store, &settings, json).await,
    }
}

async fn show_all(
    store: &RecordStore<SqliteBackend>,
    settings: &SyncSettings,
    json: bool,
) -> Result<()> {
    let mut forms = Vec::new();
    for form_id in store.forms().await? {
        forms.push(summarize(store, settings, &form_id).await?.0);
    }

    if json {
        return print_json(&StatusOutput { forms });
    }

    if forms.is_empty() {
        println!("{}", "No forms cached.".dimmed());
        return Ok(());
    }

    println!("{}", "Cached forms".bold());
    for summary in &forms {
        println!(
            "  {} {} entries, synced {} {}",
            summary.form_id.cyan().bold(),
            summary.entries,
            describe_sync(summary.last_synced_at),
            freshness_label(&summary.freshness),
        );
    }
    Ok(())
}

async fn show_form(
    store: &RecordStore<SqliteBackend>,
    settings: &SyncSettings,
    form_id: &str,
    json: bool,
) -> Result<()> {
    let (summary, meta) = summarize(store, settings, form_id).await?;
    let Some(meta) = meta else {
        if summary.entries == 0 {
            return Err(Error::FormNotFound {
                form_id: form_id.to_string(),
            });
        }
        // Rows without metadata: written by an older cache or partially cleared.
        if json {
            return print_json(&summary);
        }
        println!("{} {} entries, never synced", form_id.cyan().bold(), summary.entries);
        return Ok(());
    };

    let detail = FormDetail {
        summary,
        header_shape: meta.header_shape,
        schema_hash: meta.schema_hash,
        indexed_entries: meta.entry_index.len(),
    };

    if json {
        return print_json(&detail);
    }

    let s = &detail.summary;
    println!("{}", form_id.cyan().bold());
    println!("  {} {}", "Entries:".bold(), s.entries);
    println!("  {} {}", "Indexed:".bold(), detail.indexed_entries);
    println!(
        "  {} {} {}",
        "Last sync:".bold(),
        describe_sync(s.last_synced_at),
        freshness_label(&s.freshness)
    );
    if let Some(watermark) = s.last_remote_read_watermark {
        println!("  {} {}", "Watermark:".bold(), format_epoch_ms(watermark));
    }
    if let Some(mutated) = s.last_local_mutation_at {
        let note = if s.pending_local {
            " (pending)".yellow().to_string()
        } else {
            String::new()
        };
        println!("  {} {}{note}", "Local edit:".bold(), format_epoch_ms(mutated));
    }
    if !detail.header_shape.is_empty() {
        println!("  {} {}", "Columns:".bold(), detail.header_shape.join(", "));
    }
    if let Some(hash) = &detail.schema_hash {
        println!("  {} {}", "Schema:".bold(), hash.dimmed());
    }
    Ok(())
}

async fn summarize(
    store: &RecordStore<SqliteBackend>,
    settings: &SyncSettings,
    form_id: &str,
) -> Result<(FormSummary, Option<FormMeta>)> {
    let snapshot = store.read_all(form_id).await?;
    let meta = snapshot.meta;
    let last_synced_at = meta.as_ref().and_then(|m| m.last_synced_at);
    let has_data = !snapshot.records.is_empty() || last_synced_at.is_some();
    let freshness = evaluate(
        last_synced_at,
        has_data,
        false,
        settings.list_thresholds(),
        store.now_ms(),
    );

    let summary = FormSummary {
        form_id: form_id.to_string(),
        entries: snapshot.records.len(),
        last_synced_at,
        last_remote_read_watermark: meta.as_ref().and_then(|m| m.last_remote_read_watermark),
        last_local_mutation_at: meta.as_ref().and_then(|m| m.last_local_mutation_at),
        pending_local: meta.as_ref().is_some_and(|m| m.last_local_mutation_at.is_some()),
        freshness,
    };
    Ok((summary, meta))
}

fn describe_sync(last_synced_at: Option<EpochMs>) -> String {
    last_synced_at.map_or_else(|| "never".to_string(), format_epoch_ms)
}

fn freshness_label(freshness: &Freshness) -> colored::ColoredString {
    if freshness.is_fresh {
        "fresh".green()
    } else if freshness.should_background {
        "aging".yellow()
    } else {
        "stale".red()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::FreshnessThresholds;

    #[test]
    fn test_freshness_label() {
        let limits = FreshnessThresholds::new(1_000, 100);
        let label = |now| freshness_label(&evaluate(Some(0), true, false, limits, now));
        assert_eq!(&*label(10), "fresh");
        assert_eq!(&*label(500), "aging");
        assert_eq!(&*label(5_000), "stale");
    }

    #[test]
    fn test_describe_sync_never() {
        assert_eq!(describe_sync(None), "never");
    }
}
