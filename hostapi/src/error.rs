//! Host-side configuration errors.

/// Error raised while interpreting host-side configuration values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An execution mode string did not name a known strategy.
    #[error("unknown execution mode '{0}' (expected 'bridge' or 'command')")]
    UnknownMode(String),

    /// An environment variable name was empty or contained '='.
    #[error("invalid environment variable name: {0:?}")]
    InvalidEnvName(String),
}
