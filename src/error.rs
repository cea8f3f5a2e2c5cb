use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("SLACK_TOKEN environment variable not set")]
    MissingToken,

    #[error("invalid cookies in {path}: {reason}")]
    InvalidCookies { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid date format: {0}")]
    InvalidDate(String),

    #[error("invalid message timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Slack API error: {0}")]
    SlackApi(String),

    #[error("Slack rate limit error: retry after {}", fmt_retry_after(.retry_after))]
    SlackRateLimit { retry_after: Option<Duration> },

    #[error("transient error: {0}")]
    Transient(String),

    #[error("{operation}: gave up after {attempts} attempts")]
    RetryExhausted { operation: String, attempts: u32 },

    #[error("{operation}: {source}")]
    Call {
        operation: String,
        #[source]
        source: Box<AppError>,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("unknown entity: channel {channel_id} has no name and is not a direct message")]
    UnknownEntity { channel_id: String },

    #[error("failed exporting {channel:?} ({channel_id}): {source}")]
    Channel {
        channel_id: String,
        channel: String,
        #[source]
        source: Box<AppError>,
    },

    #[error("failed downloading {file}: {source}")]
    Download {
        file: String,
        #[source]
        source: Box<AppError>,
    },

    #[error("failed to read file at {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to write file at {path}: {source}")]
    WriteFile {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("unable to create directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("JSON serialization error: {0}")]
    JsonSerialize(String),

    #[error("JSON parse error: {0}")]
    JsonParse(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),
}

fn fmt_retry_after(retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(d) => format!("{}s", d.as_secs()),
        None => "unspecified delay".to_string(),
    }
}

impl AppError {
    /// Wraps the error with the name of the remote operation that produced it.
    pub fn in_call(self, operation: impl Into<String>) -> Self {
        AppError::Call {
            operation: operation.into(),
            source: Box::new(self),
        }
    }

    /// Whether the error is a throttling or transient failure worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::SlackRateLimit { .. } | AppError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
