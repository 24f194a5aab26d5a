#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DeliveryError {
    #[error("Failed to serialize payload: {0}")]
    SerializeFailed(#[from] serde_json::Error),

    #[error("Invalid signing secret: {msg}")]
    InvalidSecret { msg: String },

    #[error("Callback transport failed: {0}")]
    TransportFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Callback returned status {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl From<wreq::Error> for DeliveryError {
    fn from(e: wreq::Error) -> Self {
        DeliveryError::TransportFailed(Box::new(e))
    }
}
