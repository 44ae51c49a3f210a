//! Process-wide logger setup.
//!
//! Code logs through the `log` facade; records are bridged into a
//! `tracing-subscriber` fmt layer. `HOLDFAST_LOG` wins over `RUST_LOG`, and both
//! fall back to the level the binary passes in. Calling `init` more than once is
//! harmless.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_ENV: &str = "HOLDFAST_LOG";

pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}
