//! Error types for the SAP server

/// Server lifecycle and transport errors
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Socket or thread setup failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The session worker is gone
    #[error("SAP session has already ended")]
    SessionClosed,

    /// A modem endpoint string could not be parsed
    #[error("Invalid modem endpoint {0:?}, expected unix:PATH or tcp:HOST:PORT")]
    InvalidEndpoint(String),

    /// A session thread panicked
    #[error("Thread {0} panicked")]
    ThreadPanicked(&'static str),
}

/// Result type for server operations
pub type Result<T> = std::result::Result<T, ServerError>;
