//! Import command - store a local file as an artifact

use crate::cache::{CacheManager, Constraints, Outcome};
use crate::cli::args::ImportArgs;
use crate::error::{LarderError, LarderResult};
use crate::ui::{self, UiContext};
use std::time::Duration;
use tokio::fs;

/// Execute the import command
pub async fn execute(args: ImportArgs, manager: &CacheManager) -> LarderResult<()> {
    let ctx = UiContext::detect();
    let key = args.key.to_key();

    let mut constraints = Constraints::new();
    if let Some(tag) = args.version_tag {
        constraints = constraints.version(tag);
    }
    if let Some(secs) = args.ttl {
        constraints = constraints.ttl(Duration::from_secs(secs));
    }
    if args.force {
        constraints = constraints.valid_if(|_| false);
    }

    let file = args.file;
    let artifact = manager
        .get_or_fetch(&key, &constraints, |_| async move {
            fs::read(&file)
                .await
                .map_err(|e| LarderError::io(format!("reading {}", file.display()), e))
        })
        .await?;

    let detail = format!(
        "{}, {}",
        artifact.fingerprint.short(),
        crate::cache::format_bytes(artifact.metadata.size_bytes)
    );
    match artifact.outcome {
        Outcome::Hit => ui::step_ok_detail(&ctx, &format!("Already cached: {}", artifact.metadata.label), &detail),
        Outcome::Fetched => ui::step_ok_detail(&ctx, &format!("Stored {}", artifact.metadata.label), &detail),
        Outcome::Refreshed => ui::step_ok_detail(&ctx, &format!("Replaced {}", artifact.metadata.label), &detail),
    }

    Ok(())
}
