//! Clean command - remove leftovers of interrupted writes

use crate::cache::CacheManager;
use crate::error::LarderResult;
use crate::ui::{self, UiContext};

/// Execute the clean command
pub async fn execute(manager: &CacheManager) -> LarderResult<()> {
    let ctx = UiContext::detect();
    let report = manager.clean().await?;

    if report.removed == 0 {
        ui::step_info(&ctx, "No orphaned files found");
    } else {
        ui::step_ok(&ctx, &format!("Removed {} orphaned file(s)", report.removed));
    }
    if report.skipped_locked > 0 {
        ui::step_warn_hint(
            &ctx,
            &format!("Skipped {} file(s) of entries in use", report.skipped_locked),
            "Run again once other processes finish",
        );
    }
    Ok(())
}
