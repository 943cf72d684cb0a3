use thiserror::Error;

/// Failure taxonomy shared by the service layer and the HTTP surface.
///
/// Transport failures inside a request are normally converted into fallback values
/// before they reach a caller; they surface as this type only where no fallback exists.
#[derive(Debug, Error)]
pub enum ThreadSenseError {
    /// Required credential or configuration is absent or unusable
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Caller input rejected before any external call was made
    #[error("{0}")]
    Validation(String),

    /// Non-success reply from an external capability
    #[error("{service} returned {status}: {body}")]
    Transport {
        service: &'static str,
        status: u16,
        body: String,
    },

    /// A persisted record could not be decoded
    #[error("malformed record '{key}': {reason}")]
    MalformedRecord { key: String, reason: String },
}

impl ThreadSenseError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
