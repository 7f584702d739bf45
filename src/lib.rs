#[macro_use]
extern crate tracing;

pub mod error;
pub mod router;

use color_eyre::Result;
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
    Layer,
};

pub fn init_errors() -> Result<()> {
    color_eyre::install()
}

/// Logs to stderr. `RUST_LOG` takes precedence over `log_level`.
pub fn init_logging(log_level: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log_level)?,
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_filter(filter))
        .with(tracing_error::ErrorLayer::default())
        .try_init()?;
    Ok(())
}
