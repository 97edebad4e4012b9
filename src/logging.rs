//! Tracing subscriber bootstrap.

use tracing_subscriber::EnvFilter;

/// Install a formatted subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` (e.g. `"paddock=info"`).
///
/// Returns `false` when a global subscriber was already installed, which
/// makes it safe to call from tests and from embedding applications.
pub fn init_logging(default_directive: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_harmless() {
        let _ = init_logging("paddock=debug");
        assert!(!init_logging("paddock=debug"));
    }
}
