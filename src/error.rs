//! Error types, organized by subsystem: parsing, storage, and tool calls.
//!
//! Storage errors carry the client-fixable validation cases (empty content,
//! missing scope path) as their own variants so the protocol layer can map
//! them onto the JSON-RPC taxonomy without string matching.

use thiserror::Error;

/// Errors raised by the parser layer. Never fatal to a scan.
#[derive(Debug, Error)]
pub enum ParseError {
    /// No adapter is mapped to the file's extension.
    #[error("unsupported language for {0}")]
    UnsupportedLanguage(String),

    /// The grammar produced no tree at all; nothing could be recovered.
    #[error("failed to parse {path}: {reason}")]
    ParseFailed { path: String, reason: String },
}

/// Errors raised by the index and memory stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("content must not be empty")]
    EmptyContent,

    #[error("scopePath is required when scope is '{0}'")]
    ScopePathRequired(String),

    #[error("id is required")]
    IdRequired,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid {field}: {message}")]
    Invalid { field: &'static str, message: String },

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    /// True for SQLITE_BUSY / SQLITE_LOCKED, the only failures worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors surfaced to protocol clients.
///
/// Every variant maps to one JSON-RPC code; `Internal` keeps its source for
/// server-side logging only and is never shown to the caller.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid params: {message}")]
    InvalidParams {
        field: Option<String>,
        message: String,
        kind: &'static str,
    },

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("server not initialized")]
    NotInitialized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl ToolError {
    /// A required field was missing or null.
    pub fn missing(field: &str) -> Self {
        Self::InvalidParams {
            field: Some(field.to_string()),
            message: format!("missing required parameter '{field}'"),
            kind: "invalid_params",
        }
    }

    /// A field was present but unusable.
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidParams {
            field: Some(field.to_string()),
            message: message.into(),
            kind: "invalid_params",
        }
    }

    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        Self::Internal(err.into())
    }

    /// Snake-case name of the taxonomy member, sent as `error.data.type`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidParams { kind, .. } => kind,
            Self::MethodNotFound(_) => "method_not_found",
            Self::NotInitialized => "not_initialized",
            Self::NotFound(_) => "not_found",
            Self::Timeout(_) => "timeout",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<StoreError> for ToolError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::EmptyContent => Self::InvalidParams {
                field: Some("content".into()),
                message: err.to_string(),
                kind: "empty_content",
            },
            StoreError::ScopePathRequired(_) => Self::InvalidParams {
                field: Some("scopePath".into()),
                message: err.to_string(),
                kind: "scope_path_required",
            },
            StoreError::IdRequired => Self::InvalidParams {
                field: Some("id".into()),
                message: err.to_string(),
                kind: "id_required",
            },
            StoreError::Invalid { field, message } => Self::InvalidParams {
                field: Some(field.to_string()),
                message: format!("invalid {field}: {message}"),
                kind: "invalid_params",
            },
            StoreError::NotFound(what) => Self::NotFound(what),
            other => Self::Internal(anyhow::Error::new(other)),
        }
    }
}
