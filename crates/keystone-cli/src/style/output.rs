//! Output helper functions for consistent styled messages.

use super::colors::SemanticStyle;

/// Prints a success message with a checkmark.
pub fn print_success(msg: &str) {
    println!("{} {}", "✓".success(), msg);
}

/// Prints an error message with an X mark.
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".error(), msg);
}

/// Prints a warning message with a warning symbol.
pub fn print_warn(msg: &str) {
    println!("{} {}", "⚠".warning(), msg);
}

/// Prints a labeled key-value pair with proper indentation.
pub fn print_labeled(key: &str, value: &str) {
    println!("  {}: {}", key.muted(), value);
}

/// Prints a verdict line: PERMIT in green or DENY in red.
pub fn print_verdict(permit: bool) {
    if permit {
        println!("{}", "PERMIT".success());
    } else {
        println!("{}", "DENY".error());
    }
}
