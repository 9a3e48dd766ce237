use thiserror::Error;

/// Failures that end a session. Packet-level trouble (corruption, loss,
/// reordering) never shows up here; the protocols recover from it.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("gave up after {tries} timeouts without completing the transfer")]
    RetryBudgetExhausted { tries: u32 },
    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] rdt_lab_abstract::ConfigError),
}
