use reqwest::Error as HttpError;
use serde_bencoded::DeError as BencodeDeError;

pub type Result<T, E = TrackerError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("{0}")]
    BencodeDe(BencodeDeError),

    #[error("{0}")]
    Http(HttpError),
}

impl From<BencodeDeError> for TrackerError {
    fn from(value: BencodeDeError) -> Self {
        Self::BencodeDe(value)
    }
}

impl From<HttpError> for TrackerError {
    fn from(value: HttpError) -> Self {
        Self::Http(value)
    }
}
