//! Semantic color palette for terminal output.

use owo_colors::{OwoColorize, Style};

pub fn success_style() -> Style {
    Style::new().green().bold()
}

pub fn error_style() -> Style {
    Style::new().red().bold()
}

pub fn warning_style() -> Style {
    Style::new().yellow()
}

pub fn muted_style() -> Style {
    Style::new().dimmed()
}

/// Trait extension to apply semantic styles.
pub trait SemanticStyle: Sized {
    /// Apply success styling (green bold).
    fn success(&self) -> String;
    /// Apply error styling (red bold).
    fn error(&self) -> String;
    /// Apply warning styling (yellow).
    fn warning(&self) -> String;
    /// Apply muted styling (dimmed).
    fn muted(&self) -> String;
}

impl<T: std::fmt::Display> SemanticStyle for T {
    fn success(&self) -> String {
        styled(self, success_style())
    }

    fn error(&self) -> String {
        styled(self, error_style())
    }

    fn warning(&self) -> String {
        styled(self, warning_style())
    }

    fn muted(&self) -> String {
        styled(self, muted_style())
    }
}

fn styled<T: std::fmt::Display>(value: &T, style: Style) -> String {
    if super::no_color() {
        value.to_string()
    } else {
        value.style(style).to_string()
    }
}
