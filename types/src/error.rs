use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseUpstreamError {
    #[error("upstream descriptor {0:?} is missing the `token:url` separator")]
    MissingSeparator(String),
    #[error("upstream descriptor {0:?} has an invalid url: {1}")]
    InvalidUrl(String, url::ParseError),
}
