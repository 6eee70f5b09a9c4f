use crate::OrchestratorError;
use crate::action_log::ActionRecord;
use crate::error::ErrorKind;
use crate::extractor::Extraction;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl From<&OrchestratorError> for ErrorInfo {
    fn from(err: &OrchestratorError) -> Self {
        let mut details = Map::new();
        match err {
            OrchestratorError::Navigation { url, reason } => {
                details.insert("url".into(), url.clone().into());
                details.insert("reason".into(), reason.clone().into());
            }
            OrchestratorError::Authentication {
                last_url,
                last_action,
                signal,
            } => {
                details.insert("last_url".into(), last_url.clone().into());
                details.insert("last_action".into(), last_action.clone().into());
                details.insert("signal".into(), signal.clone().into());
            }
            OrchestratorError::Timeout { step, timeout_ms } => {
                details.insert("step".into(), step.clone().into());
                details.insert("timeout_ms".into(), (*timeout_ms).into());
            }
            OrchestratorError::QueueTimeout { waited_ms } => {
                details.insert("waited_ms".into(), (*waited_ms).into());
            }
            OrchestratorError::Navigator(e) => {
                details.insert("navigator_error".into(), e.kind.to_string().into());
            }
            _ => {}
        }

        Self {
            kind: err.kind(),
            message: err.to_string(),
            details,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageExtraction {
    pub url: String,
    pub extraction: Extraction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageFailure {
    pub url: String,
    pub error: ErrorInfo,
}

/// Outcome of one submitted workflow. Failures are reported here rather than
/// as an `Err`, together with every step recorded up to the failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub session_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction: Option<Extraction>,
    /// Per-page output of a multi-page workflow.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pages: Vec<PageExtraction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_data: Option<Map<String, Value>>,
    pub action_log: Vec<ActionRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Pages that failed while continue-on-error was in effect.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<PageFailure>,
}

impl WorkflowResult {
    pub fn failed(session_id: impl Into<String>, err: &OrchestratorError) -> Self {
        Self {
            session_id: session_id.into(),
            success: false,
            extraction: None,
            pages: Vec::new(),
            processed_data: None,
            action_log: Vec::new(),
            error: Some(ErrorInfo::from(err)),
            errors: Vec::new(),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}
