use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Low-level failure reported by a [`Navigator`](crate::navigator::Navigator).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {reason}")]
pub struct NavigatorError {
    pub kind: NavigatorErrorKind,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigatorErrorKind {
    Timeout,
    StaleElement,
    ElementNotFound,
    Navigation,
    Script,
    Closed,
    Other,
}

impl std::fmt::Display for NavigatorErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Timeout => "timeout",
            Self::StaleElement => "stale element",
            Self::ElementNotFound => "element not found",
            Self::Navigation => "navigation error",
            Self::Script => "script exception",
            Self::Closed => "browser closed",
            Self::Other => "protocol error",
        };
        f.write_str(name)
    }
}

impl NavigatorError {
    pub fn new(kind: NavigatorErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    pub fn timeout(reason: impl Into<String>) -> Self {
        Self::new(NavigatorErrorKind::Timeout, reason)
    }

    pub fn element_not_found(selector: &str) -> Self {
        Self::new(NavigatorErrorKind::ElementNotFound, selector)
    }

    pub fn script(reason: impl Into<String>) -> Self {
        Self::new(NavigatorErrorKind::Script, reason)
    }

    /// Timeouts and stale element handles are worth one more attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            NavigatorErrorKind::Timeout | NavigatorErrorKind::StaleElement
        )
    }
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Navigation failed for {url}: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Authentication failed at {last_url} after {last_action}: {signal}")]
    Authentication {
        last_url: String,
        last_action: String,
        signal: String,
    },

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("{step} timed out after {timeout_ms}ms")]
    Timeout { step: String, timeout_ms: u64 },

    #[error("Request waited {waited_ms}ms in queue without being admitted")]
    QueueTimeout { waited_ms: u64 },

    #[error("Navigator error: {0}")]
    Navigator(#[from] NavigatorError),

    #[error("Workflow cancelled before {0}")]
    Cancelled(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("File I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDeError(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerError(#[from] toml::ser::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("General error: {0}")]
    General(String),
}

/// Stable, serializable classification of a failure surfaced in a workflow result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NavigationError,
    AuthenticationError,
    ExtractionError,
    TimeoutError,
    QueueTimeoutError,
    NavigatorError,
    Cancelled,
    InvalidRequest,
    SessionNotFound,
    Internal,
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Navigation { .. } => ErrorKind::NavigationError,
            Self::Authentication { .. } => ErrorKind::AuthenticationError,
            Self::Extraction(_) => ErrorKind::ExtractionError,
            Self::Timeout { .. } => ErrorKind::TimeoutError,
            Self::QueueTimeout { .. } => ErrorKind::QueueTimeoutError,
            Self::Navigator(_) => ErrorKind::NavigatorError,
            Self::Cancelled(_) => ErrorKind::Cancelled,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::SessionNotFound(_) => ErrorKind::SessionNotFound,
            _ => ErrorKind::Internal,
        }
    }

    /// Whether the navigator reported a failure worth one more attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Navigator(e) => e.is_transient(),
            _ => false,
        }
    }

    pub fn suggestions(&self) -> Vec<String> {
        match self {
            Self::Navigation { url, .. } => vec![
                format!("Verify that {} is reachable", url),
                "Increase the step timeout with --timeout".into(),
                "Check network connectivity".into(),
            ],
            Self::Authentication { .. } => vec![
                "Check the username and password".into(),
                "Override the login selectors with --username-selector, --password-selector and --submit-selector".into(),
                "Run with --verbose to see every login step".into(),
            ],
            Self::Extraction(_) => vec![
                "Check that the extraction service is running".into(),
                "Verify extractor.endpoint in the configuration".into(),
            ],
            Self::Timeout { timeout_ms, .. } => vec![
                format!("Increase timeout with --timeout {}", timeout_ms * 2),
                "Use --wait-for with a selector that appears once content is loaded".into(),
            ],
            Self::QueueTimeout { .. } => vec![
                "The browser is busy with other requests; retry later".into(),
                "Raise queue.admission_timeout_ms in the configuration".into(),
            ],
            Self::ConfigError(_) | Self::TomlDeError(_) | Self::TomlSerError(_) => vec![
                "Check configuration file syntax".into(),
                "Show the effective configuration with: crawl-orchestrator config show".into(),
            ],
            Self::SessionNotFound(_) => {
                vec!["Submit a workflow first; sessions are created on demand".into()]
            }
            _ => vec!["Run with --verbose for more details".into()],
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidRequest(_) => 2,
            Self::Navigation { .. } | Self::Navigator(_) => 3,
            Self::Timeout { .. } | Self::QueueTimeout { .. } => 4,
            Self::Authentication { .. } => 5,
            Self::Extraction(_) | Self::Http(_) => 6,
            Self::ConfigError(_) | Self::TomlDeError(_) | Self::TomlSerError(_) => 7,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_navigator_errors() {
        assert!(NavigatorError::timeout("slow").is_transient());
        assert!(NavigatorError::new(NavigatorErrorKind::StaleElement, "gone").is_transient());
        assert!(!NavigatorError::element_not_found("#x").is_transient());
        assert!(!NavigatorError::script("boom").is_transient());
    }

    #[test]
    fn test_error_kind_mapping() {
        let err = OrchestratorError::Timeout {
            step: "wait_for".into(),
            timeout_ms: 5000,
        };
        assert_eq!(err.kind(), ErrorKind::TimeoutError);
        assert!(!err.is_transient());

        let err: OrchestratorError = NavigatorError::timeout("Request timed out").into();
        assert!(err.is_transient());

        let err = OrchestratorError::Extraction("bad json".into());
        assert_eq!(err.kind(), ErrorKind::ExtractionError);
        assert!(!err.is_transient());

        let err: OrchestratorError = NavigatorError::element_not_found("#login").into();
        assert_eq!(err.kind(), ErrorKind::NavigatorError);
        assert!(err.to_string().contains("#login"));
    }

    #[test]
    fn test_authentication_is_never_transient() {
        let err = OrchestratorError::Authentication {
            last_url: "https://example.com/login".into(),
            last_action: "click".into(),
            signal: "login form still present".into(),
        };
        assert!(!err.is_transient());
        assert_eq!(err.exit_code(), 5);
        assert!(!err.suggestions().is_empty());
    }
}
