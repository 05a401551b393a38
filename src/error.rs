/// Errors produced by the tracking, codec, transport and dispatch layers.
#[derive(Debug, thiserror::Error)]
pub enum VrStateError {
    #[error("VR runtime init failed: {0}")]
    RuntimeInit(String),

    #[error("Property {key} unavailable for slot {slot}: {message}")]
    Property {
        slot: u32,
        key: &'static str,
        message: String,
    },

    #[error("Failed to bind {address}: {source}")]
    TransportBind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect to {address}: {source}")]
    TransportConnect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid transport address: {0}")]
    InvalidAddress(String),

    #[error("Transport closed")]
    TransportClosed,

    #[error("Truncated input: needed {needed} bytes, {remaining} remaining")]
    TruncatedInput { needed: usize, remaining: usize },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Dispatcher closed")]
    DispatcherClosed,

    #[error("Dispatcher queue full")]
    DispatcherFull,

    #[error("Timeout waiting for data")]
    Timeout,

    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VrStateError {
    /// True for errors that only signal an orderly shutdown.
    pub fn is_closed(&self) -> bool {
        matches!(self, VrStateError::TransportClosed | VrStateError::DispatcherClosed)
    }
}
