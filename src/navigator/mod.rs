pub mod cdp;

use crate::error::NavigatorError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use cdp::CdpNavigator;

pub type NavResult<T> = std::result::Result<T, NavigatorError>;

/// What `wait_for` should observe on the page before returning `true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum WaitCondition {
    /// The document finished loading.
    Load,
    /// An element matching the CSS selector is present.
    Selector(String),
    /// No element matches the CSS selector.
    SelectorAbsent(String),
    /// The visible text of the page contains the string.
    Text(String),
    /// The current URL differs from the given one.
    UrlChanged(String),
}

impl std::fmt::Display for WaitCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Load => write!(f, "page load"),
            Self::Selector(s) => write!(f, "selector {}", s),
            Self::SelectorAbsent(s) => write!(f, "absence of {}", s),
            Self::Text(t) => write!(f, "text '{}'", t),
            Self::UrlChanged(u) => write!(f, "URL change from {}", u),
        }
    }
}

/// Browser capability consumed by the orchestrator.
///
/// One instance drives one page and is not safe to use from two workflows at
/// the same time; the [`Serializer`](crate::queue::Serializer) owns it and
/// hands it out to one admitted request at a time.
#[async_trait::async_trait]
pub trait Navigator: Send + Sync {
    async fn navigate(&self, url: &str) -> NavResult<()>;

    /// Returns `Ok(false)` if the condition was not met within `timeout`.
    async fn wait_for(&self, condition: &WaitCondition, timeout: Duration) -> NavResult<bool>;

    async fn type_text(&self, selector: &str, text: &str) -> NavResult<()>;

    async fn click(&self, selector: &str) -> NavResult<()>;

    async fn evaluate(&self, script: &str) -> NavResult<String>;

    async fn scroll_to_bottom(&self) -> NavResult<()>;

    async fn current_url(&self) -> NavResult<String>;

    /// Whether the underlying browser is up and able to take commands.
    async fn is_ready(&self) -> bool {
        true
    }

    /// Releases the browser. Called once, on orchestrator shutdown.
    async fn close(&self) {}
}
