use thiserror::Error;

/// Error taxonomy shared by every crate in the workspace. Corresponds to
/// `domain.Err*` sentinel values in the source this was translated from,
/// as typed variants instead of package-level `error` values.
#[derive(Debug, Error)]
pub enum Error {
    #[error("internal error: {0}")]
    Internal(String),

    #[error("requested item not found")]
    NotFound,

    #[error("item already exists")]
    Conflict,

    #[error("given parameter is not valid: {0}")]
    BadParam(String),

    #[error("permission denied")]
    Forbidden,

    #[error("bot access token is empty")]
    EmptyBotToken,

    #[error("unknown report type")]
    UnknownReportType,

    #[error("couldn't update")]
    NotUpdated,

    #[error("unexpected content type: {0}")]
    UnexpectedContentType(String),

    #[error("unexpected status code: {0}")]
    UnexpectedStatusCode(u16),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("queue backend error: {0}")]
    Queue(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
