//! Invalidate command - remove the entry for a key

use crate::cache::{describe, CacheManager};
use crate::cli::args::KeyArgs;
use crate::error::LarderResult;
use crate::ui::{self, UiContext};

/// Execute the invalidate command
pub async fn execute(args: KeyArgs, manager: &CacheManager) -> LarderResult<()> {
    let ctx = UiContext::detect();
    let key = args.to_key();

    if manager.invalidate(&key).await? {
        ui::step_ok(&ctx, &format!("Removed {}", describe(&key)));
    } else {
        ui::step_info(&ctx, &format!("No entry for {}", describe(&key)));
    }
    Ok(())
}
