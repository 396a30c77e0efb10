//! Development-time tracing for debugging the builder.
//!
//! Tracing goes to stderr and is never persisted. The product artifacts are
//! the sandbox, the code memory log and the session transcripts under
//! `.builder/sessions/`, all written regardless of `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter for a `-v` count when `RUST_LOG` is unset.
pub fn default_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "builder=info,warn",
        _ => "builder=debug,info",
    }
}

/// Install the stderr subscriber.
///
/// `RUST_LOG` wins over `verbose`:
/// ```bash
/// RUST_LOG=builder::driver=debug builder run "a todo list app"
/// ```
pub fn init(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
