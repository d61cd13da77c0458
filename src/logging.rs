//! Log output for the binaries.
//!
//! The library only emits `log` records. [`init_logging`] installs a
//! `tracing_subscriber` formatter that also captures those records, filtered
//! by `RUST_LOG` (default `info`; `RUST_LOG=nhdrrnet=debug` shows every
//! stage shape of a forward pass).

use std::io::IsTerminal;
use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{self, NhdrrNetError};

static INITIALISED: OnceLock<()> = OnceLock::new();

/// Configures the global subscriber. Fails when called a second time.
pub fn init_logging() -> error::Result<()> {
    INITIALISED
        .set(())
        .map_err(|_| NhdrrNetError::LoggingInitialised)?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr);

    Registry::default()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|err| NhdrrNetError::Logging(err.to_string()))
}
