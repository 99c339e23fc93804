pub mod auth;
pub mod background;
pub mod browser;
pub mod cli;
pub mod clipboard;
pub mod credentials;
pub mod directory;
pub mod domain;
pub mod error;
pub mod fill;
pub mod host;
pub mod login;
pub mod settings;

pub mod version;

pub use error::{Error, Result};

/// Install the stderr log subscriber. `log` records are bridged into it.
///
/// The level comes from `RUST_LOG` (default `info`); `verbose` forces `debug`.
pub fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init();
}
