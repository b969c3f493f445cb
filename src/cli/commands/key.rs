//! Key command - show how a key is fingerprinted

use crate::cache::{describe, fingerprint};
use crate::cli::args::KeyArgs;
use crate::error::LarderResult;

/// Execute the key command
pub fn execute(args: KeyArgs) -> LarderResult<()> {
    let key = args.to_key();
    let fp = fingerprint(&key)?;

    println!("{}  {}", fp, describe(&key));
    Ok(())
}
