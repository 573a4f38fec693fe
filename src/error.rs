use thiserror::Error;

/// Errors surfaced by the streaming ingestion core.
///
/// The stream is assumed to come from a well-formed dump producer, so every
/// variant is terminal for the stream being processed: there is no recovery
/// or skip-and-continue mode.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The input violated the expected lexical or statement grammar.
    #[error("format error at byte {offset}: {message}")]
    Format { offset: u64, message: String },

    /// An internal invariant was violated (state-stack underflow,
    /// reprocessing without progress). Indicates a bug, not bad input.
    #[error("internal invariant violated: {message}")]
    Protocol { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ExtractError {
    pub fn format(offset: u64, message: impl Into<String>) -> Self {
        ExtractError::Format {
            offset,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        ExtractError::Protocol {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
