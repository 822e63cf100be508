use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ForwardError {
    /// The selected pipe is draining or its writer has stopped accepting
    /// work. Another pipe may still take the request.
    #[error("pipe writer not ready")]
    WriteNotReady,

    #[error("request timed out waiting for upstream response")]
    RequestTimeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no pipe available")]
    NoPipeAvailable,

    #[error("failed to write response to client: {0}")]
    SinkWrite(String),

    #[error("malformed DNS message: {0}")]
    MalformedMessage(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ForwardError {
    /// Retryable errors may be reissued on another pipe by the driver;
    /// everything else is terminal for the request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::WriteNotReady)
    }
}
