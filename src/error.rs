#[derive(Debug, thiserror::Error)]
pub enum CartError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("no nonce held: initialize the cart session before mutating it")]
    MissingNonce,

    #[error("cart response did not include a nonce header; mutations are unavailable")]
    MissingNonceInResponse,

    #[error("store API error ({status}): {message}")]
    Http { status: u16, message: String },

    #[error("cart token rejected ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CartError {
    /// HTTP status carried by the error, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } | Self::Unauthorized { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the server rejected the cart token that was sent.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}
