//! Stats command - summarize the cache

use crate::cache::{format_bytes, CacheManager};
use crate::error::LarderResult;
use crate::ui::{self, UiContext};

/// Execute the stats command
pub fn execute(manager: &CacheManager) -> LarderResult<()> {
    let ctx = UiContext::detect();
    let stats = manager.stats()?;
    let settings = manager.settings();

    ui::section(&ctx, "Cache");
    ui::key_value(&ctx, "root", &manager.root().display().to_string());
    ui::key_value(&ctx, "entries", &stats.entries.to_string());
    ui::key_value(&ctx, "total size", &format_bytes(stats.total_bytes));

    let free = manager
        .store()
        .free_space()
        .map(format_bytes)
        .unwrap_or_else(|_| "unknown".to_string());
    ui::key_value(&ctx, "free space", &free);

    let ttl = settings
        .default_ttl
        .map(|ttl| format!("{}s", ttl.as_secs()))
        .unwrap_or_else(|| "none".to_string());
    ui::key_value(&ctx, "default ttl", &ttl);
    Ok(())
}
