use crate::{PlatctxError, Result};

/// Install the process logger, writing to stderr.
///
/// `RUST_LOG` wins over `level` when set. Fails if a logger is already
/// installed.
pub fn init(level: &str) -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", level))
        .format_timestamp_millis()
        .try_init()
        .map_err(|e| PlatctxError::Config(format!("Failed to initialize logger: {}", e)))
}
