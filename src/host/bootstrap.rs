//! Embedded programs reachable through reserved `--` module names.

/// Program run when no module is given
pub const DEFAULT_MODULE: &str = "--default";

/// Interactive console program
pub const CONSOLE_MODULE: &str = "--console";

const DEFAULT_SOURCE: &str = include_str!("bootstrap/default.js");
const CONSOLE_SOURCE: &str = include_str!("bootstrap/console.js");

/// Whether `name` uses the reserved `--` prefix
pub fn is_reserved(name: &str) -> bool {
    name.starts_with("--")
}

/// Source of an embedded program
pub fn source(name: &str) -> Option<&'static str> {
    match name {
        DEFAULT_MODULE => Some(DEFAULT_SOURCE),
        CONSOLE_MODULE => Some(CONSOLE_SOURCE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_names() {
        assert!(source(DEFAULT_MODULE).is_some());
        assert!(source(CONSOLE_MODULE).is_some());
        assert!(is_reserved("--nope"));
        assert!(source("--nope").is_none());
        assert!(!is_reserved("./main.js"));
    }
}
