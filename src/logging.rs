//! Tracing bootstrap for the `parley` binary.
//!
//! Logs go to stderr so command output on stdout stays machine-readable.
//! The level defaults to `warn` and is overridden with `RUST_LOG`, e.g.
//! `RUST_LOG=parley=debug,parley_core=debug`.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `verbose` raises the default to `info`.
pub fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::INFO
    } else {
        LevelFilter::WARN
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}
