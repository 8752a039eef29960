use thiserror::Error;

use super::retry::is_retryable_status;

#[derive(Error, Debug)]
pub enum HnClientErr {
    #[error("unexpected HTTP status while fetching {resource}: {status}")]
    UnexpectedStatus { resource: String, status: u16 },
    #[error("invalid upstream url {0}")]
    InvalidUrl(String),
    #[error("request cancelled")]
    Cancelled,
    #[error(transparent)]
    JsonParseError(#[from] serde_json::Error),
    #[error(transparent)]
    RequestError(#[from] reqwest::Error),
}

impl HnClientErr {
    /// Whether another attempt of the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            HnClientErr::UnexpectedStatus { status, .. } => is_retryable_status(*status),
            HnClientErr::RequestError(err) => match err.status() {
                Some(status) => is_retryable_status(status.as_u16()),
                None => err.is_timeout() || err.is_connect(),
            },
            HnClientErr::InvalidUrl(_)
            | HnClientErr::Cancelled
            | HnClientErr::JsonParseError(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            HnClientErr::UnexpectedStatus { status, .. } => Some(*status),
            HnClientErr::RequestError(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }
}
