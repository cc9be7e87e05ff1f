use thiserror::Error;

#[derive(Error, Debug)]
pub enum SandboxError {
    // Matched by the supervisor's startup classifier
    #[error("bind failed: Address already in use; toString() = {address}")]
    AddressInUse { address: String },

    #[error("bind failed for {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Config(String),

    #[error("invalid JSON binding: {0}")]
    Json(#[from] serde_json::Error),

    #[error("control fd {fd} is not open")]
    ControlFd { fd: i32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serve(#[from] hearth_proxy::ServeError),
}

pub type Result<T> = std::result::Result<T, SandboxError>;
