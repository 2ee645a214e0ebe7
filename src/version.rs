//! Build identification exposed to embedding applications.

use webrtckit_core::version::version_number;

/// Human-readable build string.
pub const VERSION_STRING: &str = env!("CARGO_PKG_VERSION");

/// Floating-point build identifier (`major.minor`).
pub const VERSION_NUMBER: f64 = version_number(
    env!("CARGO_PKG_VERSION_MAJOR"),
    env!("CARGO_PKG_VERSION_MINOR"),
    env!("CARGO_PKG_VERSION_PATCH"),
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_constants_are_populated() {
        assert!(!VERSION_STRING.is_empty());
        assert!(VERSION_NUMBER > 0.0);
        assert!(VERSION_STRING.starts_with(env!("CARGO_PKG_VERSION_MAJOR")));
    }
}
