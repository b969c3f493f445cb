//! List command - show cached entries

use crate::cache::{format_bytes, CacheManager, Entry};
use crate::cli::args::{ListArgs, OutputFormat};
use crate::error::LarderResult;
use crate::ui::{self, UiContext};
use chrono::Utc;
use console::style;
use serde::Serialize;

/// Execute the list command
pub fn execute(args: ListArgs, manager: &CacheManager) -> LarderResult<()> {
    let entries = manager.entries()?;

    if entries.is_empty() {
        match args.format {
            OutputFormat::Json => println!("[]"),
            OutputFormat::Plain => {}
            OutputFormat::Table => {
                let ctx = UiContext::detect();
                ui::step_info(&ctx, "No cached entries");
            }
        }
        return Ok(());
    }

    match args.format {
        OutputFormat::Table => print_table(&entries),
        OutputFormat::Json => print_json(&entries)?,
        OutputFormat::Plain => print_plain(&entries),
    }

    Ok(())
}

fn print_table(entries: &[Entry]) {
    let now = Utc::now();

    println!(
        "{:<14} {:<40} {:>10} {:<8} {:<17} {:<10}",
        style("FINGERPRINT").bold(),
        style("KEY").bold(),
        style("SIZE").bold(),
        style("KIND").bold(),
        style("CREATED").bold(),
        style("EXPIRES").bold()
    );
    println!("{}", "-".repeat(104));

    for entry in entries {
        let created = entry.created_at.format("%Y-%m-%d %H:%M").to_string();
        let expires = match entry.ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok()) {
            None => style("never".to_string()).dim(),
            Some(ttl) if entry.created_at + ttl < now => style("expired".to_string()).yellow(),
            Some(ttl) => style((entry.created_at + ttl).format("%Y-%m-%d %H:%M").to_string()),
        };

        println!(
            "{:<14} {:<40} {:>10} {:<8} {:<17} {:<10}",
            entry.fingerprint.short(),
            truncate(&entry.label, 40),
            format_bytes(entry.size_bytes),
            entry.content_kind,
            created,
            expires
        );
    }

    println!();
    println!("{} entr{}", entries.len(), if entries.len() == 1 { "y" } else { "ies" });
}

fn print_json(entries: &[Entry]) -> LarderResult<()> {
    #[derive(Serialize)]
    struct EntryJson<'a> {
        fingerprint: &'a str,
        label: &'a str,
        artifact: String,
        created_at: String,
        ttl_secs: Option<u64>,
        version_tag: Option<&'a str>,
        size_bytes: u64,
        content_kind: String,
    }

    let json_entries: Vec<EntryJson> = entries
        .iter()
        .map(|e| EntryJson {
            fingerprint: e.fingerprint.as_str(),
            label: &e.label,
            artifact: e.artifact_location.display().to_string(),
            created_at: e.created_at.to_rfc3339(),
            ttl_secs: e.ttl.map(|ttl| ttl.as_secs()),
            version_tag: e.version_tag.as_deref(),
            size_bytes: e.size_bytes,
            content_kind: e.content_kind.to_string(),
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&json_entries)?);
    Ok(())
}

fn print_plain(entries: &[Entry]) {
    for entry in entries {
        println!("{}\t{}", entry.fingerprint, entry.label);
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max - 3).collect();
    out.push_str("...");
    out
}
