//! Shared styling utilities for terminal output.

use console::Style;

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// `Error: ...` in red, for stderr.
pub fn error(msg: &str) -> String {
    let style = Style::new().for_stderr().red();
    format!("{} {}", style.apply_to("Error:"), msg)
}

/// `Warning: ...` in yellow, for stderr.
pub fn warning(msg: &str) -> String {
    let style = Style::new().for_stderr().yellow();
    format!("{} {}", style.apply_to("Warning:"), msg)
}

/// Create a dim-styled string.
pub fn dim(msg: &str) -> String {
    let style = Style::new().dim();
    style.apply_to(msg).to_string()
}
