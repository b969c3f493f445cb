//! Cat command - write a cached artifact to stdout

use crate::cache::{CacheManager, Constraints};
use crate::cli::args::CatArgs;
use crate::error::{LarderError, LarderResult};
use tokio::io::{self, AsyncWriteExt};

/// Execute the cat command
pub async fn execute(args: CatArgs, manager: &CacheManager) -> LarderResult<()> {
    let key = args.key.to_key();
    let constraints = match args.version_tag {
        Some(tag) => Constraints::new().version(tag),
        None => Constraints::new(),
    };

    let artifact = manager.peek(&key, &constraints).await?;

    let mut stdout = io::stdout();
    stdout
        .write_all(&artifact.bytes)
        .await
        .map_err(|e| LarderError::io("writing artifact to stdout", e))?;
    stdout
        .flush()
        .await
        .map_err(|e| LarderError::io("writing artifact to stdout", e))?;
    Ok(())
}
