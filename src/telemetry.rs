//! Tracing setup for binaries and tests embedding the crate.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install a global subscriber filtered by `RUST_LOG`. Returns `false` if a global subscriber was already set, which
/// makes repeated calls harmless.
pub fn init_tracing() -> bool {
    let filter = tracing_subscriber::EnvFilter::from_default_env();

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}
