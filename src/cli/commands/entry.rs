//! Single-entry command implementations.

use std::collections::BTreeMap;
use std::path::PathBuf;

use colored::Colorize;
use serde::Serialize;
use serde_json::Value;

use crate::cli::PutArgs;
use crate::cli::commands::{open_engine, open_store, print_json};
use crate::config::default_actor;
use crate::error::{Error, Result};
use crate::model::Record;
use crate::sync::GetOptions;

/// Output for delete.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteOutput<'a> {
    form_id: &'a str,
    entry_id: &'a str,
    deleted: bool,
}

/// Execute `get`.
pub async fn execute_get(
    form: &str,
    entry: &str,
    force: bool,
    row: Option<u32>,
    db_path: Option<&PathBuf>,
    source: Option<&PathBuf>,
    json: bool,
) -> Result<()> {
    let engine = open_engine(db_path, source)?;
    let found = engine
        .get_entry(
            form,
            entry,
            GetOptions {
                force_sync: force,
                row_index_hint: row,
            },
        )
        .await?;
    engine.flush_pending().await;

    let record = found.ok_or_else(|| Error::EntryNotFound {
        form_id: form.to_string(),
        entry_id: entry.to_string(),
    })?;

    if json {
        return print_json(&record);
    }
    print_record(&record);
    Ok(())
}

/// Execute `put`.
pub async fn execute_put(
    args: &PutArgs,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let patch = parse_fields(&args.data)?;
    let actor = actor.map(ToString::to_string).or_else(default_actor);

    let store = open_store(db_path)?;
    let record = store
        .save_local(&args.form, args.entry.as_deref(), patch, actor.as_deref())
        .await?;

    if json {
        return print_json(&record);
    }
    println!(
        "{} {} in {}",
        "Saved".green().bold(),
        record.entry_id.bold(),
        args.form
    );
    Ok(())
}

/// Execute `delete`.
pub async fn execute_delete(
    form: &str,
    entry: &str,
    db_path: Option<&PathBuf>,
    json: bool,
) -> Result<()> {
    let store = open_store(db_path)?;
    if !store.point_delete(form, entry).await? {
        return Err(Error::EntryNotFound {
            form_id: form.to_string(),
            entry_id: entry.to_string(),
        });
    }

    if json {
        return print_json(&DeleteOutput {
            form_id: form,
            entry_id: entry,
            deleted: true,
        });
    }
    println!("{} {} from {}", "Deleted".red().bold(), entry.bold(), form);
    Ok(())
}

/// Parse `--data` into a field map.
fn parse_fields(raw: &str) -> Result<BTreeMap<String, Value>> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(fields)) => Ok(fields.into_iter().collect()),
        Ok(_) => Err(Error::InvalidArgument(
            "--data must be a JSON object".to_string(),
        )),
        Err(e) => Err(Error::InvalidArgument(format!("--data is not valid JSON: {e}"))),
    }
}

fn print_record(record: &Record) {
    println!("{} {}", record.entry_id.cyan().bold(), record.form_id.dimmed());
    for (field, value) in &record.data {
        let shown = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        println!("  {}: {shown}", field.bold());
    }
    if !record.created_at.is_empty() {
        println!("  {} {}", "created".dimmed(), record.created_at);
    }
    if !record.modified_at.is_empty() {
        println!("  {} {}", "modified".dimmed(), record.modified_at);
    }
    if let Some(by) = &record.modified_by {
        println!("  {} {by}", "by".dimmed());
    }
    if let Some(row) = record.row_index {
        println!("  {} {row}", "row".dimmed());
    }
}
