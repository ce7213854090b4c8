use serde::Deserialize;
use thiserror::Error;

/// Mirrors `IError`/`pbiError`: the error payload thrown by the embedded
/// report renderer's JS when `loadReport`/`render` rejects. `message` is
/// always present; everything else is best-effort detail.
#[derive(Debug, Clone, Deserialize)]
pub struct PbiError {
    pub message: String,
    #[serde(default, rename = "detailedMessage")]
    pub detailed_message: String,
    #[serde(default, rename = "errorCode")]
    pub error_code: String,
    #[serde(default)]
    pub level: i64,
    #[serde(default, rename = "technicalDetails")]
    pub technical_details: Option<TechnicalDetails>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TechnicalDetails {
    #[serde(default, rename = "requestId")]
    pub request_id: String,
    #[serde(default, rename = "errorInfo")]
    pub error_info: Vec<KeyValuePair>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeyValuePair {
    pub key: String,
    pub value: String,
}

impl std::fmt::Display for PbiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if !self.error_code.is_empty() {
            write!(f, " ({})", self.error_code)?;
        }
        if !self.detailed_message.is_empty() {
            write!(f, ": {}", self.detailed_message)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("resource file not found: {0}")]
    ResourceNotFound(String),
    #[error("browser automation error: {0}")]
    Browser(String),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("report failed to load: {0}")]
    Load(PbiError),
    #[error("report failed to render: {0}")]
    Render(PbiError),
    #[error("couldn't marshal configuration: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("couldn't decode renderer response: {0}")]
    Decode(String),
}
