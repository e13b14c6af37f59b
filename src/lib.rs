pub mod capture;
pub mod config;
pub mod context;
pub mod error;
pub mod handlers;
pub mod host;
pub mod logs;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod settings;
pub mod signals;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing/logging
///
/// `RUST_LOG` wins over `default_level`. Output always goes to the real
/// process stderr, never through the output interceptor, so the pipeline's own
/// diagnostics can't re-enter it.
///
/// Note: This function can only be called once.
pub fn init_tracing(default_level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);

    if format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
