//! Prune command - evict entries by age or total size

use crate::cache::{format_bytes, CacheManager, PruneReport, PruneRule};
use crate::cli::args::PruneArgs;
use crate::config::Config;
use crate::error::LarderResult;
use crate::ui::{self, UiContext};
use chrono::Utc;
use console::style;
use std::time::Duration;

const SECS_PER_DAY: u64 = 86_400;
const BYTES_PER_MB: u64 = 1024 * 1024;

/// Execute the prune command
pub async fn execute(args: PruneArgs, config: &Config, manager: &CacheManager) -> LarderResult<()> {
    let ctx = UiContext::detect();
    let rules = rules(&args, config);

    if rules.is_empty() {
        ui::step_warn_hint(
            &ctx,
            "No limits configured",
            "Pass --max-age-days / --max-total-mb or set cache.max_age_days / cache.max_total_mb",
        );
        return Ok(());
    }

    if args.dry_run {
        return preview(&ctx, &rules, manager).await;
    }

    let mut total = PruneReport::default();
    for rule in &rules {
        let report = manager.prune(rule).await?;
        total.removed += report.removed;
        total.bytes_reclaimed += report.bytes_reclaimed;
        total.skipped_locked += report.skipped_locked;
    }

    if total.removed == 0 {
        ui::step_info(&ctx, "Nothing to prune");
    } else {
        ui::step_ok(
            &ctx,
            &format!(
                "Removed {} entr{}, reclaimed {}",
                total.removed,
                if total.removed == 1 { "y" } else { "ies" },
                format_bytes(total.bytes_reclaimed)
            ),
        );
    }
    if total.skipped_locked > 0 {
        ui::step_warn(
            &ctx,
            &format!("Skipped {} entr(ies) in use", total.skipped_locked),
        );
    }
    Ok(())
}

/// Rules from flags, falling back to configured limits (0 = disabled)
fn rules(args: &PruneArgs, config: &Config) -> Vec<PruneRule> {
    let mut rules = Vec::new();

    let max_age_days = args.max_age_days.unwrap_or(config.cache.max_age_days);
    if max_age_days > 0 {
        rules.push(PruneRule::MaxAge(Duration::from_secs(
            max_age_days.saturating_mul(SECS_PER_DAY),
        )));
    }

    // Size last, so age-based removals count towards the budget
    let max_total_mb = args.max_total_mb.unwrap_or(config.cache.max_total_mb);
    if max_total_mb > 0 {
        rules.push(PruneRule::MaxTotalBytes(
            max_total_mb.saturating_mul(BYTES_PER_MB),
        ));
    }
    rules
}

async fn preview(ctx: &UiContext, rules: &[PruneRule], manager: &CacheManager) -> LarderResult<()> {
    let now = Utc::now();
    let mut seen = std::collections::HashSet::new();
    let mut bytes = 0;

    for rule in rules {
        for (fp, metadata) in manager.prune_candidates(rule).await? {
            if !seen.insert(fp) {
                continue;
            }
            bytes += metadata.size_bytes;
            println!(
                "  {} {} ({}, {} days old)",
                style("•").red(),
                metadata.label,
                format_bytes(metadata.size_bytes),
                metadata.age(now).num_days()
            );
        }
    }

    if seen.is_empty() {
        ui::step_info(ctx, "Nothing to prune");
    } else {
        ui::remark(
            ctx,
            &format!(
                "Dry run - {} entr(ies), {} would be removed",
                seen.len(),
                format_bytes(bytes)
            ),
        );
    }
    Ok(())
}
