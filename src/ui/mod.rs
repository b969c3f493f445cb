//! Console output helpers for the CLI
//!
//! Styled status lines when attached to a terminal, plain bracketed
//! prefixes otherwise (CI logs, pipes, tests).

mod context;
mod output;

pub use context::UiContext;
pub use output::{key_value, remark, section, step_info, step_ok, step_ok_detail, step_warn, step_warn_hint};
