//! Terminal detection for CLI output

use std::io::IsTerminal;

/// CI systems that set their own marker variable
const CI_VARS: [&str; 6] = [
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "BUILDKITE",
    "JENKINS_URL",
    "TF_BUILD",
];

/// Determines how status lines are rendered
#[derive(Debug, Clone, Copy)]
pub struct UiContext {
    styled: bool,
}

impl UiContext {
    /// Detect the current environment
    pub fn detect() -> Self {
        let styled = std::io::stdout().is_terminal()
            && !CI_VARS.iter().any(|var| std::env::var_os(var).is_some());
        Self { styled }
    }

    /// Plain output regardless of the terminal
    pub fn plain() -> Self {
        Self { styled: false }
    }

    /// Whether to use colors and symbols
    pub fn is_styled(&self) -> bool {
        self.styled
    }
}
