use reqwest::StatusCode;
use thiserror::Error;

pub type CiviResult<T> = Result<T, CiviError>;

/// Errors raised while talking to CiviCRM or processing records for it.
#[derive(Debug, Error)]
pub enum CiviError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("CiviCRM returned status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("request is too long, check server limits or enable force_post")]
    RequestTooLong,
    #[error("failed to decode API reply: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("drush call failed ({status}): {output}")]
    Shell { status: String, output: String },
    #[error("API is not reachable:\n{}", .attempts.join("\n\n"))]
    Unreachable { attempts: Vec<String> },
    #[error("API error: {message}")]
    Api {
        message: String,
        code: Option<String>,
    },
    #[error("query for {entity_type} not unique ({count} matches for {query})")]
    Ambiguous {
        entity_type: String,
        query: String,
        count: usize,
    },
    #[error("bad update policy '{0}', must be 'update', 'fill' or 'replace'")]
    InvalidUpdatePolicy(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("{0}")]
    Record(String),
}

impl CiviError {
    /// Whether the failure happened below the API layer (connectivity, status, decoding).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            CiviError::Http(_)
                | CiviError::Status { .. }
                | CiviError::RequestTooLong
                | CiviError::Decode(_)
                | CiviError::Io(_)
                | CiviError::Shell { .. }
                | CiviError::Unreachable { .. }
        )
    }

    /// HTTP status attached to the failure, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            CiviError::Status { status, .. } => Some(status.as_u16()),
            CiviError::RequestTooLong => Some(StatusCode::URI_TOO_LONG.as_u16()),
            CiviError::Http(err) => err.status().map(|status| status.as_u16()),
            _ => None,
        }
    }

    pub fn status(status: StatusCode, body: String) -> Self {
        CiviError::Status { status, body }
    }

    pub fn record(message: impl Into<String>) -> Self {
        CiviError::Record(message.into())
    }
}
