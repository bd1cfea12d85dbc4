//! # Forge Test Utils
//!
//! Shared helpers for the test suites of the other crates: an in-memory
//! simulator that speaks the full script surface over the [`Transport`]
//! trait, deterministic fault injection, and tracing setup.
//!
//! [`Transport`]: forge_protocol::Transport

mod sim;

pub use sim::{SimControls, SimTransport};

use std::sync::Once;

static INIT: Once = Once::new();

/// Install a tracing subscriber for tests. Honors `RUST_LOG`; repeated
/// calls are no-ops so every test can call it unconditionally.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    });
}
