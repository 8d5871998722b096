//! Error taxonomy for the harvester.
//!
//! Each kind is handled at the lowest boundary that can make a local decision:
//! - [`FetchError`] is retried by [`crate::retry::Retrying`]; only
//!   [`FetchError::Exhausted`] ends a channel's run.
//! - [`ExtractionAnomaly`] skips one candidate and never the whole fragment.
//! - [`WriteError`] is logged and the batch is kept for the next flush.
//! - [`ConfigError`] is fatal, but only before any channel starts.

use thiserror::Error;

/// A failure to obtain a fragment from the feed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("non-success status {code} from {url}")]
    Status { code: u16, url: String },

    #[error("browser session error: {0}")]
    Browser(String),

    #[error("gave up after {attempts} attempts: {source}")]
    Exhausted {
        attempts: u32,
        #[source]
        source: Box<FetchError>,
    },
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Transport(err.to_string())
    }
}

impl From<url::ParseError> for FetchError {
    fn from(err: url::ParseError) -> Self {
        FetchError::Transport(format!("invalid url: {err}"))
    }
}

/// A single malformed candidate inside an otherwise usable fragment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionAnomaly {
    #[error("candidate {index}: date anchor has no datetime")]
    MissingDatetime { index: usize },

    #[error("candidate {index}: native id {raw:?} is not numeric")]
    InvalidNativeId { index: usize, raw: String },
}

/// A checkpoint sink could not persist a batch.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("existing destination is unreadable: {0}")]
    Corrupt(String),
}

/// Invalid run-level configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("no channels given on the command line or in the config file")]
    NoChannels,

    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}
