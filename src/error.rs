use axum::http::StatusCode;
use std::fmt;
use thiserror::Error;

/// ConfigError
///
/// Misconfiguration detected while building the router or loading the
/// environment. These surface at construction or URL-build time and are never
/// recovered by the router itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("route method must not be empty")]
    EmptyMethod,
    #[error("invalid HTTP method '{0}'")]
    InvalidMethod(String),
    #[error("invalid route pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("route {method} {pattern} is already registered")]
    DuplicateRoute { method: String, pattern: String },
    #[error("route name '{0}' is already registered")]
    DuplicateName(String),
    #[error("invalid route target: {0}")]
    InvalidTarget(String),
    #[error("invalid role name '{0}'")]
    InvalidRole(String),
    #[error("invalid base url '{0}'")]
    InvalidBaseUrl(String),
    #[error("no base url configured and none could be derived from the request")]
    MissingBaseUrl,
    #[error("views directory '{0}' does not exist or is not a directory")]
    InvalidViewsDir(String),
    #[error("environment variable {0} must be set")]
    MissingVar(&'static str),
    #[error("environment variable {name} is invalid: {reason}")]
    InvalidVar { name: &'static str, reason: String },
}

/// UrlError
///
/// Failure to build an outbound URL from a route name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrlError {
    #[error("route '{0}' not found")]
    RouteNotFound(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// ViewError
///
/// Failure to resolve or render a view file.
#[derive(Debug, Error)]
pub enum ViewError {
    #[error("view name {0:?} contains a null byte")]
    InvalidInput(String),
    #[error("view '{0}' resolves outside the views root")]
    PathEscape(String),
    #[error("view '{0}' does not exist or is not readable")]
    NotReadable(String),
    #[error("failed to render view '{name}': {source}")]
    Render {
        name: String,
        #[source]
        source: minijinja::Error,
    },
}

/// DispatchError
///
/// Everything that can go wrong between matching a request and emitting its
/// body. The error handler collapses these into an [`HttpFailure`].
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
    #[error(transparent)]
    View(#[from] ViewError),
    #[error(transparent)]
    Url(#[from] UrlError),
}

impl DispatchError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The HTTP status this failure maps to. Anything that is not one of the
    /// three expected client outcomes is a 500.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) | Self::View(_) | Self::Url(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// HttpFailure
///
/// A terminal failure for the current request: a status code plus a
/// human-readable message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFailure {
    pub status: StatusCode,
    pub message: String,
}

impl HttpFailure {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<DispatchError> for HttpFailure {
    fn from(err: DispatchError) -> Self {
        Self::new(err.status(), err.to_string())
    }
}

impl fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status.as_u16(), self.message)
    }
}
