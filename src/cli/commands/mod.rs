//! CLI command implementations

pub mod cat;
pub mod clean;
pub mod config;
pub mod import;
pub mod invalidate;
pub mod key;
pub mod list;
pub mod prune;
pub mod stats;

pub use cat::execute as cat;
pub use clean::execute as clean;
pub use config::execute as config;
pub use import::execute as import;
pub use invalidate::execute as invalidate;
pub use key::execute as key;
pub use list::execute as list;
pub use prune::execute as prune;
pub use stats::execute as stats;

use crate::cache::CacheKey;
use crate::cli::args::KeyArgs;

impl KeyArgs {
    /// Cache key with every parameter as a string value
    pub fn to_key(&self) -> CacheKey {
        self.params
            .iter()
            .fold(CacheKey::new(&self.name), |key, (name, value)| {
                key.param(name, value)
            })
    }
}
