pub mod action_log;
pub mod cli;
pub mod config;
pub mod error;
pub mod extractor;
pub mod js_templates;
pub mod navigator;
pub mod orchestrator;
pub mod output;
pub mod queue;
pub mod request;
pub mod result;
pub mod server;
pub mod session;
pub mod timeouts;

pub use config::Config;
pub use error::{ErrorKind, NavigatorError, OrchestratorError};
pub use orchestrator::{Orchestrator, OrchestratorStatus, WorkflowState};
pub use request::{
    AuthCredentials, BrowserAction, ExtractionOptions, FormSubmission, LoginSelectors,
    ScriptedAction, WorkflowRequest,
};
pub use result::WorkflowResult;

pub type Result<T> = std::result::Result<T, OrchestratorError>;
