//! External program discovery

/// Check if a command exists on `$PATH`
pub fn command_exists(name: &str) -> bool {
    which::which(name).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_shell() {
        assert!(command_exists("sh"));
    }

    #[test]
    fn test_missing_program() {
        assert!(!command_exists("qpass-definitely-not-installed"));
    }

    #[test]
    fn test_explicit_path() {
        assert!(command_exists("/bin/sh"));
        assert!(!command_exists("/nonexistent/sh"));
    }
}
