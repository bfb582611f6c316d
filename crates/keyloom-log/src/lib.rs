// ABOUTME: Shared logging setup for keyloom binaries
// ABOUTME: Two functions: init() for normal runs, init_verbose() for step-level detail

use tracing_subscriber::EnvFilter;

/// Crates whose debug output `init_verbose` turns on.
const KEYLOOM_CRATES: &[&str] = &["keyloom_ssh", "keyloom_cli", "keyloom"];

/// Standard logging to stderr. Default: INFO level, RUST_LOG override.
pub fn init() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
}

/// Logging to stderr with rendered scripts visible. Default: DEBUG for
/// keyloom crates, INFO for everything else, RUST_LOG override.
pub fn init_verbose() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(verbose_filter())
        .init();
}

fn verbose_filter() -> EnvFilter {
    KEYLOOM_CRATES
        .iter()
        .filter_map(|name| format!("{name}=debug").parse().ok())
        .fold(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
            |filter, directive| filter.add_directive(directive),
        )
}

#[cfg(test)]
mod tests {
    #[test]
    fn exports_init() {
        let _ = super::init as fn();
    }

    #[test]
    fn exports_init_verbose() {
        let _ = super::init_verbose as fn();
    }

    #[test]
    fn verbose_filter_enables_debug_for_core() {
        let rendered = super::verbose_filter().to_string();
        assert!(rendered.contains("keyloom_ssh=debug"), "filter was {rendered}");
    }
}
