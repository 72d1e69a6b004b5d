use thiserror::Error;

pub type Result<T> = core::result::Result<T, ServerError>;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("unable to complete index operation: {0}")]
    Other(#[from] anyhow::Error),

    #[error("failed to process request due to a server error: {0}")]
    ServerError(#[from] hyper::Error),

    #[error("failed serialize / deserialize value: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("invalid request given: {0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("method not allowed")]
    MethodNotAllowed,
}

impl ServerError {
    /// The HTTP status this error is reported with.
    pub fn status(&self) -> u16 {
        match self {
            Self::BadRequest(_) | Self::SerializationError(_) => 400,
            Self::NotFound(_) => 404,
            Self::MethodNotAllowed => 405,
            _ => 500,
        }
    }
}
