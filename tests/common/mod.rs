#![allow(dead_code)]

use async_trait::async_trait;
use crawl_orchestrator::error::{NavigatorError, NavigatorErrorKind};
use crawl_orchestrator::extractor::{ContentProcessor, Extraction, ExtractionStrategy, Extractor};
use crawl_orchestrator::navigator::{NavResult, Navigator, WaitCondition};
use crawl_orchestrator::{Config, Orchestrator, OrchestratorError};
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const LOGIN_URL: &str = "https://example.com/login";
pub const DASHBOARD_URL: &str = "https://example.com/dashboard";
pub const DEFAULT_HTML: &str = "<html><body>Hi</body></html>";

/// In-memory browser with a scripted site.
///
/// Flags a call that starts while another is still running, so tests can
/// assert the navigator was never shared.
pub struct ScriptedNavigator {
    pub(crate) pages: Mutex<HashMap<String, String>>,
    pub(crate) forms: Mutex<HashSet<String>>,
    pub(crate) links: Mutex<HashMap<(String, String), String>>,
    pub(crate) typed: Mutex<Vec<(String, String)>>,
    pub(crate) current: Mutex<String>,
    pub(crate) calls: Mutex<Vec<String>>,
    pub(crate) in_call: AtomicBool,
    pub(crate) overlapped: AtomicBool,
    pub(crate) navigations: AtomicUsize,
    pub(crate) transient_failures: AtomicUsize,
    pub(crate) login_form_present: AtomicBool,
    pub(crate) login_rejected: AtomicBool,
    pub accept_login: bool,
    /// A rejected login leaves the page unchanged instead of showing an error.
    pub silent_rejection: bool,
    pub content_never_ready: bool,
    /// `wait_for` never returns, except for text checks.
    pub wait_hangs: bool,
    pub call_delay: Duration,
}

impl Default for ScriptedNavigator {
    fn default() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
            forms: Mutex::new(HashSet::new()),
            links: Mutex::new(HashMap::new()),
            typed: Mutex::new(Vec::new()),
            current: Mutex::new("about:blank".into()),
            calls: Mutex::new(Vec::new()),
            in_call: AtomicBool::new(false),
            overlapped: AtomicBool::new(false),
            navigations: AtomicUsize::new(0),
            transient_failures: AtomicUsize::new(0),
            login_form_present: AtomicBool::new(false),
            login_rejected: AtomicBool::new(false),
            accept_login: true,
            silent_rejection: false,
            content_never_ready: false,
            wait_hangs: false,
            call_delay: Duration::ZERO,
        }
    }
}

impl ScriptedNavigator {
    pub fn with_page(self, url: &str, html: &str) -> Self {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), html.to_string());
        self
    }

    /// Marks `url` as a page with fillable inputs.
    pub fn with_form(self, url: &str) -> Self {
        self.forms.lock().unwrap().insert(url.to_string());
        self
    }

    /// Clicking `selector` on `from` leads to `to`.
    pub fn with_link(self, from: &str, selector: &str, to: &str) -> Self {
        self.links
            .lock()
            .unwrap()
            .insert((from.to_string(), selector.to_string()), to.to_string());
        self
    }

    /// `(selector, text)` pairs passed to `type_text`, in call order.
    pub fn typed(&self) -> Vec<(String, String)> {
        self.typed.lock().unwrap().clone()
    }

    /// Number of calls whose description starts with `prefix`.
    pub fn calls_to(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// The next `n` navigations fail with a navigator timeout.
    pub fn failing_navigations(self, n: usize) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn navigations(&self) -> usize {
        self.navigations.load(Ordering::SeqCst)
    }

    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    /// URLs passed to `navigate`, in call order.
    pub fn visited(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter_map(|c| c.strip_prefix("navigate ").map(str::to_string))
            .collect()
    }

    async fn enter(&self, call: String) -> CallGuard<'_> {
        if self.in_call.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        self.calls.lock().unwrap().push(call);
        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }
        CallGuard(&self.in_call)
    }

    fn current(&self) -> String {
        self.current.lock().unwrap().clone()
    }

    fn current_html(&self) -> String {
        let current = self.current();
        let mut html = self
            .pages
            .lock()
            .unwrap()
            .get(&current)
            .cloned()
            .unwrap_or_else(|| DEFAULT_HTML.to_string());
        if current == LOGIN_URL && self.login_rejected.load(Ordering::SeqCst) {
            html.push_str("<p class=\"error\">Invalid password</p>");
        }
        html
    }
}

struct CallGuard<'a>(&'a AtomicBool);

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Navigator for ScriptedNavigator {
    async fn navigate(&self, url: &str) -> NavResult<()> {
        let _guard = self.enter(format!("navigate {}", url)).await;
        self.navigations.fetch_add(1, Ordering::SeqCst);

        if self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(NavigatorError::timeout("Request timed out."));
        }
        if url.contains("unreachable") {
            return Err(NavigatorError::new(
                NavigatorErrorKind::Navigation,
                "net::ERR_NAME_NOT_RESOLVED",
            ));
        }

        *self.current.lock().unwrap() = url.to_string();
        self.login_form_present
            .store(url == LOGIN_URL, Ordering::SeqCst);
        Ok(())
    }

    async fn wait_for(&self, condition: &WaitCondition, timeout: Duration) -> NavResult<bool> {
        let _guard = self.enter(format!("wait_for {}", condition)).await;

        if self.wait_hangs && !matches!(condition, WaitCondition::Text(_)) {
            std::future::pending::<()>().await;
        }
        if self.content_never_ready && !matches!(condition, WaitCondition::Text(_)) {
            tokio::time::sleep(timeout).await;
            return Ok(false);
        }

        Ok(match condition {
            WaitCondition::Load | WaitCondition::Selector(_) => true,
            WaitCondition::SelectorAbsent(_) => !self.login_form_present.load(Ordering::SeqCst),
            WaitCondition::Text(text) => self
                .current_html()
                .to_lowercase()
                .contains(&text.to_lowercase()),
            WaitCondition::UrlChanged(from) => self.current() != *from,
        })
    }

    async fn type_text(&self, selector: &str, text: &str) -> NavResult<()> {
        let _guard = self.enter(format!("type {}", selector)).await;
        let has_form = self.forms.lock().unwrap().contains(&self.current());
        if self.login_form_present.load(Ordering::SeqCst) || has_form {
            self.typed
                .lock()
                .unwrap()
                .push((selector.to_string(), text.to_string()));
            Ok(())
        } else {
            Err(NavigatorError::element_not_found(selector))
        }
    }

    async fn click(&self, selector: &str) -> NavResult<()> {
        let _guard = self.enter(format!("click {}", selector)).await;
        let link = self
            .links
            .lock()
            .unwrap()
            .get(&(self.current(), selector.to_string()))
            .cloned();
        if let Some(target) = link {
            *self.current.lock().unwrap() = target;
            return Ok(());
        }
        if self.current() != LOGIN_URL {
            return Err(NavigatorError::element_not_found(selector));
        }

        if self.accept_login {
            *self.current.lock().unwrap() = DASHBOARD_URL.to_string();
            self.login_form_present.store(false, Ordering::SeqCst);
        } else if !self.silent_rejection {
            self.login_rejected.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn evaluate(&self, _script: &str) -> NavResult<String> {
        let _guard = self.enter("evaluate".into()).await;
        Ok(self.current_html())
    }

    async fn scroll_to_bottom(&self) -> NavResult<()> {
        let _guard = self.enter("scroll".into()).await;
        Ok(())
    }

    async fn current_url(&self) -> NavResult<String> {
        Ok(self.current())
    }
}

/// Returns the text between `<body>` and `</body>`. Pages whose body says
/// `FAIL` make it fail.
pub struct EchoExtractor;

#[async_trait]
impl Extractor for EchoExtractor {
    async fn extract(
        &self,
        html: &str,
        _strategy: &ExtractionStrategy,
        _options: &Map<String, Value>,
    ) -> crawl_orchestrator::Result<Extraction> {
        let body = html
            .split_once("<body>")
            .and_then(|(_, rest)| rest.split_once("</body>"))
            .map(|(body, _)| body.to_string())
            .unwrap_or_default();

        if body.contains("FAIL") {
            return Err(OrchestratorError::Extraction("unparseable page".into()));
        }
        Ok(Extraction {
            content: body,
            structured_data: None,
        })
    }
}

/// Collects words that look like email addresses.
pub struct EmailProcessor;

#[async_trait]
impl ContentProcessor for EmailProcessor {
    async fn process(&self, extraction: &Extraction) -> crawl_orchestrator::Result<Map<String, Value>> {
        let emails: Vec<Value> = extraction
            .content
            .split_whitespace()
            .filter(|w| w.contains('@'))
            .map(|w| json!(w))
            .collect();
        let mut data = Map::new();
        data.insert("emails".into(), Value::Array(emails));
        Ok(data)
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.orchestrator.step_timeout_ms = 1_000;
    config.orchestrator.content_timeout_ms = 2_000;
    config.orchestrator.retry_backoff_ms = 500;
    config.queue.admission_timeout_ms = 10_000;
    config
}

pub fn orchestrator(navigator: Arc<ScriptedNavigator>) -> Orchestrator {
    orchestrator_with(navigator, test_config())
}

pub fn orchestrator_with(navigator: Arc<ScriptedNavigator>, config: Config) -> Orchestrator {
    Orchestrator::new(navigator, Arc::new(EchoExtractor), config)
}
