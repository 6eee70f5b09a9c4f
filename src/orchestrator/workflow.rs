use super::WorkflowState;
use crate::action_log::{ActionRecord, ActionStatus};
use crate::config::Config;
use crate::error::ErrorKind;
use crate::extractor::{Extraction, Extractor};
use crate::js_templates;
use crate::navigator::{NavResult, Navigator, WaitCondition};
use crate::request::{
    AuthCredentials, BrowserAction, ExtractionOptions, FormSubmission, ResolvedSelectors,
    ScriptedAction, check_url,
};
use crate::result::{ErrorInfo, PageExtraction, PageFailure};
use crate::session::{AuthStatus, CookiesHandle, SharedSlot};
use crate::timeouts::ms;
use crate::{OrchestratorError, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Work handed to a [`Run`] once the request holds the navigator.
pub(crate) enum Job {
    Extract {
        url: String,
        options: ExtractionOptions,
    },
    Authenticate {
        credentials: AuthCredentials,
    },
    AuthenticateAndExtract {
        credentials: AuthCredentials,
        url: String,
        options: ExtractionOptions,
    },
    Crawl {
        urls: Box<dyn Iterator<Item = String> + Send>,
        options: ExtractionOptions,
        continue_on_error: bool,
    },
    Interactive {
        url: String,
        actions: Vec<ScriptedAction>,
        options: ExtractionOptions,
    },
    FormSubmit {
        url: String,
        form: FormSubmission,
        options: ExtractionOptions,
    },
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Extract { .. } => "extract",
            Self::Authenticate { .. } => "authenticate",
            Self::AuthenticateAndExtract { .. } => "authenticated_extract",
            Self::Crawl { .. } => "crawl",
            Self::Interactive { .. } => "interactive",
            Self::FormSubmit { .. } => "form_submit",
        }
    }
}

/// What a run produced. Partial output survives a failure.
#[derive(Debug, Default)]
pub(crate) struct Outcome {
    pub extraction: Option<Extraction>,
    pub pages: Vec<PageExtraction>,
    pub errors: Vec<PageFailure>,
    pub error: Option<OrchestratorError>,
}

impl Outcome {
    fn failed(err: OrchestratorError) -> Self {
        Self {
            error: Some(err),
            ..Default::default()
        }
    }
}

enum LoginSignal {
    Observed(String),
    Rejected(String),
}

/// Executes the steps of one admitted request against the navigator.
///
/// Every step checks for cancellation first, runs under a deadline and
/// appends its outcome to the session's action log. Session state is only
/// locked for the duration of a single mutation.
pub(crate) struct Run<'a> {
    pub nav: &'a dyn Navigator,
    pub extractor: &'a dyn Extractor,
    pub slot: &'a SharedSlot,
    pub config: &'a Config,
    pub cancel: &'a CancellationToken,
}

impl Run<'_> {
    pub async fn execute(&self, job: Job) -> Outcome {
        let outcome = match job {
            Job::Extract { url, options } => match self.extract_page(&url, &options).await {
                Ok(extraction) => Outcome {
                    extraction: Some(extraction),
                    ..Default::default()
                },
                Err(e) => Outcome::failed(e),
            },
            Job::Authenticate { credentials } => match self.authenticate(&credentials).await {
                Ok(()) => Outcome::default(),
                Err(e) => Outcome::failed(e),
            },
            Job::AuthenticateAndExtract {
                credentials,
                url,
                options,
            } => match self.authenticate(&credentials).await {
                Ok(()) => match self.extract_page(&url, &options).await {
                    Ok(extraction) => Outcome {
                        extraction: Some(extraction),
                        ..Default::default()
                    },
                    Err(e) => Outcome::failed(e),
                },
                Err(e) => Outcome::failed(e),
            },
            Job::Crawl {
                urls,
                options,
                continue_on_error,
            } => self.crawl(urls, &options, continue_on_error).await,
            Job::Interactive {
                url,
                actions,
                options,
            } => self.interact(&url, &actions, &options).await,
            Job::FormSubmit { url, form, options } => {
                match self.submit_form(&url, &form, &options).await {
                    Ok(extraction) => Outcome {
                        extraction: Some(extraction),
                        ..Default::default()
                    },
                    Err(e) => Outcome::failed(e),
                }
            }
        };

        if let Some(OrchestratorError::Cancelled(ref step)) = outcome.error {
            self.record(ActionRecord::new(
                "cancelled",
                ActionStatus::Failed,
                format!("Workflow cancelled before {}", step),
            ))
            .await;
            let mut slot = self.slot.write().await;
            slot.session.close();
        }

        outcome
    }

    /// navigate -> wait for content -> (scroll) -> snapshot -> extract.
    pub async fn extract_page(&self, url: &str, options: &ExtractionOptions) -> Result<Extraction> {
        let result = self.extract_page_steps(url, options).await;
        if result.is_err() {
            self.enter(WorkflowState::Failed).await;
        }
        result
    }

    async fn extract_page_steps(&self, url: &str, options: &ExtractionOptions) -> Result<Extraction> {
        self.open(url).await?;
        let extraction = self.extract_current(url, options).await?;
        self.enter(WorkflowState::Done).await;
        Ok(extraction)
    }

    /// Navigates to `url`, retrying transient failures.
    async fn open(&self, url: &str) -> Result<()> {
        let nav = self.nav;
        let orchestrator = &self.config.orchestrator;

        self.enter(WorkflowState::Navigating).await;
        let navigated = self
            .nav_step(
                "navigate",
                orchestrator.step_timeout(),
                orchestrator.max_retries,
                move || nav.navigate(url),
            )
            .await
            .map_err(|e| navigation_error(url, e));
        self.settle("navigate", navigated).await?;
        self.record(
            ActionRecord::new("navigate", ActionStatus::Success, format!("Navigated to {}", url))
                .with_detail("url", url),
        )
        .await;
        Ok(())
    }

    /// wait for content -> (scroll) -> snapshot -> extract, on the page the
    /// navigator is showing.
    async fn extract_current(&self, url: &str, options: &ExtractionOptions) -> Result<Extraction> {
        let nav = self.nav;
        let orchestrator = &self.config.orchestrator;

        self.enter(WorkflowState::WaitingForContent).await;
        let condition = options.wait_for.clone().unwrap_or(WaitCondition::Load);
        let waited = self
            .await_condition("wait_for_content", &condition)
            .await
            .map_err(|e| match e {
                OrchestratorError::Timeout { .. } => e,
                other => navigation_error(url, other),
            });
        self.settle("wait_for_content", waited).await?;
        self.record(
            ActionRecord::new(
                "wait_for_content",
                ActionStatus::Success,
                format!("Observed {}", condition),
            )
            .with_detail("condition", condition.to_string()),
        )
        .await;

        let passes = options.scroll_passes(orchestrator.scroll_to_bottom);
        if passes > 0 {
            self.scroll(passes).await?;
        }

        self.enter(WorkflowState::Extracting).await;
        let snapshot = self
            .nav_step(
                "snapshot",
                orchestrator.step_timeout(),
                orchestrator.max_retries,
                move || nav.evaluate(js_templates::OUTER_HTML),
            )
            .await;
        let html = self.settle("snapshot", snapshot).await?;
        self.record(
            ActionRecord::new("snapshot", ActionStatus::Success, "Captured page HTML")
                .with_detail("html_bytes", html.len()),
        )
        .await;

        self.checkpoint("extract").await?;
        let mut extractor_options = options.options.clone();
        extractor_options
            .entry("url")
            .or_insert_with(|| url.to_string().into());
        let extracted = self
            .extractor
            .extract(&html, &options.strategy, &extractor_options)
            .await
            .map_err(|e| match e {
                OrchestratorError::Extraction(_) => e,
                other => OrchestratorError::Extraction(other.to_string()),
            });
        let extraction = self.settle("extract", extracted).await?;

        let mut record = ActionRecord::new(
            "extract",
            ActionStatus::Success,
            format!("Extracted content with {} strategy", options.strategy.name()),
        )
        .with_detail("strategy", options.strategy.name())
        .with_detail("content_chars", extraction.content.chars().count());
        if let Some(ref items) = extraction.structured_data {
            record = record.with_detail("items", items.len());
        }
        self.record(record).await;

        let current_url = nav
            .current_url()
            .await
            .unwrap_or_else(|_| url.to_string());
        {
            let mut slot = self.slot.write().await;
            slot.session.current_url = Some(current_url);
        }

        Ok(extraction)
    }

    /// Scrolls to the bottom `passes` times, letting lazy content settle in
    /// between. A failed pass is logged and ends scrolling; extraction goes
    /// ahead with what is loaded.
    async fn scroll(&self, passes: u32) -> Result<()> {
        let nav = self.nav;
        let orchestrator = &self.config.orchestrator;
        let settle = Duration::from_millis(orchestrator.scroll_settle_ms);

        let mut done = 0;
        while done < passes {
            let scrolled = self
                .nav_step("scroll", orchestrator.step_timeout(), 0, move || {
                    nav.scroll_to_bottom()
                })
                .await;
            match scrolled {
                Ok(()) => {
                    done += 1;
                    self.pause("scroll", settle).await?;
                }
                Err(e @ OrchestratorError::Cancelled(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!("Scroll failed after {} pass(es), extracting what is loaded: {}", done, e);
                    self.record(
                        ActionRecord::new("scroll", ActionStatus::Warning, format!("Scroll failed: {}", e))
                            .with_detail("passes", done),
                    )
                    .await;
                    return Ok(());
                }
            }
        }

        self.record(
            ActionRecord::new(
                "scroll",
                ActionStatus::Success,
                format!("Scrolled to bottom {} time(s)", done),
            )
            .with_detail("passes", done),
        )
        .await;
        Ok(())
    }

    /// Runs scripted actions after opening `url`, extracting after every
    /// action flagged `extract_after` (or after the last one when none is).
    /// Pages extracted before a failure are kept.
    async fn interact(&self, url: &str, actions: &[ScriptedAction], options: &ExtractionOptions) -> Outcome {
        let mut outcome = Outcome::default();
        if let Err(e) = self.interact_steps(url, actions, options, &mut outcome.pages).await {
            self.enter(WorkflowState::Failed).await;
            outcome.error = Some(e);
        }
        outcome
    }

    async fn interact_steps(
        &self,
        url: &str,
        actions: &[ScriptedAction],
        options: &ExtractionOptions,
        pages: &mut Vec<PageExtraction>,
    ) -> Result<()> {
        self.open(url).await?;
        self.enter(WorkflowState::Interacting).await;

        let flagged = actions.iter().any(|a| a.extract_after);
        for (index, scripted) in actions.iter().enumerate() {
            self.perform(index, &scripted.action).await?;

            let last = index + 1 == actions.len();
            if scripted.extract_after || (!flagged && last) {
                let page_url = self
                    .nav
                    .current_url()
                    .await
                    .unwrap_or_else(|_| url.to_string());
                let extraction = self.extract_current(&page_url, options).await?;
                pages.push(PageExtraction {
                    url: page_url,
                    extraction,
                });
                self.enter(WorkflowState::Interacting).await;
            }
        }

        self.record(
            ActionRecord::new(
                "interactive",
                ActionStatus::Success,
                format!(
                    "Ran {} action(s), extracted {} page(s)",
                    actions.len(),
                    pages.len()
                ),
            )
            .with_detail("actions", actions.len())
            .with_detail("extractions", pages.len()),
        )
        .await;
        self.enter(WorkflowState::Done).await;
        Ok(())
    }

    async fn perform(&self, index: usize, action: &BrowserAction) -> Result<()> {
        let nav = self.nav;
        let orchestrator = &self.config.orchestrator;
        let step_timeout = orchestrator.step_timeout();
        let step = action.name();

        let done = match action {
            BrowserAction::Navigate { url } => {
                self.open(url).await?;
                self.enter(WorkflowState::Interacting).await;
                return Ok(());
            }
            BrowserAction::Scroll { times } => {
                return self.scroll(times.unwrap_or(1)).await;
            }
            BrowserAction::Click { selector } => self
                .nav_step(step, step_timeout, 0, move || nav.click(selector))
                .await
                .map(|()| format!("Clicked {}", selector)),
            BrowserAction::Type { selector, text } => self
                .nav_step(step, step_timeout, 0, move || nav.type_text(selector, text))
                .await
                .map(|()| format!("Typed {} character(s) into {}", text.chars().count(), selector)),
            BrowserAction::Wait { condition } => self
                .await_condition(step, condition)
                .await
                .map(|()| format!("Observed {}", condition)),
            BrowserAction::Evaluate { script } => self
                .nav_step(step, step_timeout, 0, move || nav.evaluate(script))
                .await
                .map(|out| format!("Evaluated script, {} byte(s) returned", out.len())),
        };

        let message = self.settle(step, done).await?;
        self.record(ActionRecord::new(step, ActionStatus::Success, message).with_detail("index", index))
            .await;
        Ok(())
    }

    /// navigate -> fill fields -> submit -> extract the resulting page.
    async fn submit_form(&self, url: &str, form: &FormSubmission, options: &ExtractionOptions) -> Result<Extraction> {
        let result = self.submit_form_steps(url, form, options).await;
        if result.is_err() {
            self.enter(WorkflowState::Failed).await;
        }
        result
    }

    async fn submit_form_steps(
        &self,
        url: &str,
        form: &FormSubmission,
        options: &ExtractionOptions,
    ) -> Result<Extraction> {
        let nav = self.nav;
        let step_timeout = self.config.orchestrator.step_timeout();

        self.open(url).await?;
        self.enter(WorkflowState::Interacting).await;

        for field in &form.fields {
            let (selector, value) = (field.selector.as_str(), field.value.as_str());
            let typed = self
                .nav_step("fill_field", step_timeout, 0, move || nav.type_text(selector, value))
                .await;
            self.settle("fill_field", typed).await?;
            self.record(
                ActionRecord::new("fill_field", ActionStatus::Success, format!("Filled {}", selector))
                    .with_detail("selector", selector),
            )
            .await;
        }

        let submit = form
            .submit
            .as_deref()
            .unwrap_or(self.config.auth.submit_selector.as_str());
        let clicked = self
            .nav_step("submit_form", step_timeout, 0, move || nav.click(submit))
            .await;
        self.settle("submit_form", clicked).await?;
        self.record(
            ActionRecord::new("submit_form", ActionStatus::Success, "Submitted form")
                .with_detail("selector", submit)
                .with_detail("fields", form.fields.len()),
        )
        .await;
        self.pause("submit_form", Duration::from_millis(ms::POST_SUBMIT_SETTLE))
            .await?;

        let page_url = nav.current_url().await.unwrap_or_else(|_| url.to_string());
        let extraction = self.extract_current(&page_url, options).await?;
        self.enter(WorkflowState::Done).await;
        Ok(extraction)
    }

    /// Logs in through the login form. Never retried: a failure leaves the
    /// session in `auth_status = failed`.
    pub async fn authenticate(&self, credentials: &AuthCredentials) -> Result<()> {
        let status = self.slot.read().await.session.auth_status;
        match status {
            AuthStatus::Authenticated => {
                self.record(ActionRecord::new(
                    "authenticate",
                    ActionStatus::Info,
                    "Session already authenticated",
                ))
                .await;
                return Ok(());
            }
            AuthStatus::None => {}
            other => {
                let err = OrchestratorError::Authentication {
                    last_url: credentials.login_url.clone(),
                    last_action: "none".into(),
                    signal: format!(
                        "session auth status is {:?}; clean the session up before logging in again",
                        other
                    ),
                };
                self.record_failure("authenticate", &err).await;
                return Err(err);
            }
        }

        let result = self.authenticate_steps(credentials).await;
        if result.is_err() {
            self.enter(WorkflowState::Failed).await;
        }
        result
    }

    async fn authenticate_steps(&self, credentials: &AuthCredentials) -> Result<()> {
        let nav = self.nav;
        let step_timeout = self.config.orchestrator.step_timeout();
        let selectors = credentials.selectors.resolve(&self.config.auth);
        let login_url = credentials.login_url.as_str();

        self.set_auth_status(AuthStatus::Pending).await?;
        self.enter(WorkflowState::Navigating).await;

        let navigated = self
            .nav_step("navigate_login", step_timeout, 0, move || nav.navigate(login_url))
            .await;
        self.auth_step("navigate_login", navigated, login_url).await?;
        self.record(
            ActionRecord::new(
                "navigate_login",
                ActionStatus::Success,
                format!("Opened login page {}", login_url),
            )
            .with_detail("url", login_url),
        )
        .await;

        self.enter(WorkflowState::Authenticating).await;

        let (user_sel, username) = (selectors.username.as_str(), credentials.username.as_str());
        let typed = self
            .nav_step("type_username", step_timeout, 0, move || {
                nav.type_text(user_sel, username)
            })
            .await;
        self.auth_step("type_username", typed, login_url).await?;
        self.record(
            ActionRecord::new("type_username", ActionStatus::Success, "Entered username")
                .with_detail("selector", user_sel),
        )
        .await;

        let (pass_sel, password) = (selectors.password.as_str(), credentials.password.as_str());
        let typed = self
            .nav_step("type_password", step_timeout, 0, move || {
                nav.type_text(pass_sel, password)
            })
            .await;
        self.auth_step("type_password", typed, login_url).await?;
        self.record(
            ActionRecord::new("type_password", ActionStatus::Success, "Entered password")
                .with_detail("selector", pass_sel),
        )
        .await;

        let submit_sel = selectors.submit.as_str();
        let clicked = self
            .nav_step("submit_login", step_timeout, 0, move || nav.click(submit_sel))
            .await;
        self.auth_step("submit_login", clicked, login_url).await?;
        self.record(
            ActionRecord::new("submit_login", ActionStatus::Success, "Submitted login form")
                .with_detail("selector", submit_sel),
        )
        .await;

        self.pause("await_login", Duration::from_millis(ms::POST_SUBMIT_SETTLE))
            .await?;
        let signal = self.login_signal(login_url, &selectors).await;
        let signal = self.auth_step("await_login", signal, login_url).await?;

        match signal {
            LoginSignal::Observed(observed) => {
                let current_url = nav
                    .current_url()
                    .await
                    .unwrap_or_else(|_| login_url.to_string());
                {
                    let mut slot = self.slot.write().await;
                    slot.session.set_auth_status(AuthStatus::Authenticated)?;
                    slot.session.cookies_handle =
                        Some(CookiesHandle::new(uuid::Uuid::new_v4().to_string()));
                    slot.session.current_url = Some(current_url.clone());
                }
                self.record(
                    ActionRecord::new("authenticate", ActionStatus::Success, "Logged in")
                        .with_detail("signal", observed.clone())
                        .with_detail("url", current_url),
                )
                .await;
                self.enter(WorkflowState::Done).await;
                tracing::info!("Authentication succeeded ({})", observed);
                Ok(())
            }
            LoginSignal::Rejected(signal) => {
                Err(self.auth_failure("await_login", signal, login_url).await)
            }
        }
    }

    /// Waits for evidence that the login went through: the success indicator
    /// if one was given, otherwise a URL change or the login form going away.
    /// Error indicator text on the page overrides both.
    async fn login_signal(&self, login_url: &str, selectors: &ResolvedSelectors) -> Result<LoginSignal> {
        let content_timeout = self.config.orchestrator.content_timeout();

        let primary = match selectors.success_indicator {
            Some(ref indicator) => WaitCondition::Selector(indicator.clone()),
            None => WaitCondition::UrlChanged(login_url.to_string()),
        };
        let observed = self
            .wait_step("await_login", &primary, content_timeout, 0)
            .await?;

        for indicator in &selectors.error_indicators {
            let text = WaitCondition::Text(indicator.clone());
            let found = self
                .wait_step("await_login", &text, Duration::ZERO, 0)
                .await?;
            if found {
                return Ok(LoginSignal::Rejected(format!(
                    "error indicator '{}' on page",
                    indicator
                )));
            }
        }

        if observed {
            return Ok(LoginSignal::Observed(primary.to_string()));
        }
        if selectors.success_indicator.is_some() {
            return Ok(LoginSignal::Rejected(format!(
                "{} not observed within {}ms",
                primary,
                content_timeout.as_millis()
            )));
        }

        let absent = WaitCondition::SelectorAbsent(selectors.password.clone());
        let form_gone = self
            .wait_step("await_login", &absent, Duration::ZERO, 0)
            .await?;
        if form_gone {
            Ok(LoginSignal::Observed("login form gone".into()))
        } else {
            Ok(LoginSignal::Rejected("login form still present".into()))
        }
    }

    async fn crawl(
        &self,
        urls: Box<dyn Iterator<Item = String> + Send>,
        options: &ExtractionOptions,
        continue_on_error: bool,
    ) -> Outcome {
        let mut outcome = Outcome::default();

        for url in urls {
            let page = match check_url("url", &url) {
                Ok(()) => self.extract_page(&url, options).await,
                Err(e) => {
                    self.record_failure("validate_url", &e).await;
                    Err(e)
                }
            };

            match page {
                Ok(extraction) => outcome.pages.push(PageExtraction { url, extraction }),
                Err(e @ OrchestratorError::Cancelled(_)) => {
                    outcome.error = Some(e);
                    return outcome;
                }
                Err(e) if continue_on_error => {
                    tracing::warn!("Page {} failed, continuing: {}", url, e);
                    outcome.errors.push(PageFailure {
                        url,
                        error: ErrorInfo::from(&e),
                    });
                }
                Err(e) => {
                    outcome.error = Some(e);
                    return outcome;
                }
            }
        }

        let status = if outcome.errors.is_empty() {
            ActionStatus::Success
        } else {
            ActionStatus::Warning
        };
        self.record(
            ActionRecord::new(
                "crawl",
                status,
                format!(
                    "Crawled {} page(s), {} failed",
                    outcome.pages.len() + outcome.errors.len(),
                    outcome.errors.len()
                ),
            )
            .with_detail("succeeded", outcome.pages.len())
            .with_detail("failed", outcome.errors.len()),
        )
        .await;

        outcome
    }

    /// Runs one navigator call under `budget`, retrying up to `retries` times
    /// on transient failures and deadline overruns.
    async fn nav_step<T, F, Fut>(&self, step: &str, budget: Duration, retries: u32, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = NavResult<T>>,
    {
        self.attempt(step, budget, retries, true, op).await
    }

    /// Runs `wait_for` under its own timeout plus a short grace. Transient
    /// navigator failures are retried; an overrun of the grace is final.
    async fn wait_step(
        &self,
        step: &str,
        condition: &WaitCondition,
        timeout: Duration,
        retries: u32,
    ) -> Result<bool> {
        let nav = self.nav;
        self.attempt(step, wait_budget(timeout), retries, false, move || {
            nav.wait_for(condition, timeout)
        })
        .await
        .map_err(|e| match e {
            OrchestratorError::Timeout { .. } => OrchestratorError::Timeout {
                step: format!("waiting for {}", condition),
                timeout_ms: timeout.as_millis() as u64,
            },
            other => other,
        })
    }

    /// Waits for `condition` under the content timeout; not seeing it in
    /// time is a `Timeout`.
    async fn await_condition(&self, step: &str, condition: &WaitCondition) -> Result<()> {
        let orchestrator = &self.config.orchestrator;
        let content_timeout = orchestrator.content_timeout();
        let met = self
            .wait_step(step, condition, content_timeout, orchestrator.max_retries)
            .await?;
        if met {
            Ok(())
        } else {
            Err(OrchestratorError::Timeout {
                step: format!("waiting for {}", condition),
                timeout_ms: content_timeout.as_millis() as u64,
            })
        }
    }

    async fn attempt<T, F, Fut>(
        &self,
        step: &str,
        budget: Duration,
        retries: u32,
        retry_overrun: bool,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = NavResult<T>>,
    {
        let mut attempt = 0;
        loop {
            self.checkpoint(step).await?;

            let err = match tokio::time::timeout(budget, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if e.is_transient() => OrchestratorError::Navigator(e),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => {
                    let err = OrchestratorError::Timeout {
                        step: step.to_string(),
                        timeout_ms: budget.as_millis() as u64,
                    };
                    if !retry_overrun {
                        return Err(err);
                    }
                    err
                }
            };

            if attempt >= retries {
                return Err(err);
            }
            attempt += 1;

            let backoff = self.config.orchestrator.backoff(attempt);
            tracing::warn!(
                step,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                "Retrying: {}",
                err
            );
            self.record(
                ActionRecord::new(step, ActionStatus::Warning, format!("Retrying after: {}", err))
                    .with_detail("attempt", attempt)
                    .with_detail("backoff_ms", backoff.as_millis() as u64),
            )
            .await;
            self.pause(step, backoff).await?;
        }
    }

    async fn auth_step<T>(&self, step: &str, result: Result<T>, login_url: &str) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e @ OrchestratorError::Cancelled(_)) => Err(e),
            Err(e) => Err(self.auth_failure(step, e.to_string(), login_url).await),
        }
    }

    async fn auth_failure(&self, last_action: &str, signal: String, login_url: &str) -> OrchestratorError {
        let last_url = self
            .nav
            .current_url()
            .await
            .unwrap_or_else(|_| login_url.to_string());

        {
            let mut slot = self.slot.write().await;
            if let Err(e) = slot.session.set_auth_status(AuthStatus::Failed) {
                tracing::debug!("{}", e);
            }
        }

        let err = OrchestratorError::Authentication {
            last_url,
            last_action: last_action.to_string(),
            signal,
        };
        tracing::warn!("{}", err);
        self.record_failure("authenticate", &err).await;
        err
    }

    async fn set_auth_status(&self, next: AuthStatus) -> Result<()> {
        let mut slot = self.slot.write().await;
        slot.session.set_auth_status(next)
    }

    /// Records a failed step. Cancellation is recorded once, by `execute`.
    async fn settle<T>(&self, step: &str, result: Result<T>) -> Result<T> {
        if let Err(ref e) = result
            && !matches!(e, OrchestratorError::Cancelled(_))
        {
            self.record_failure(step, e).await;
        }
        result
    }

    async fn record_failure(&self, step: &str, err: &OrchestratorError) {
        let status = match err.kind() {
            ErrorKind::TimeoutError => ActionStatus::Timeout,
            _ => ActionStatus::Failed,
        };
        let info = ErrorInfo::from(err);
        let mut record = ActionRecord::new(step, status, err.to_string())
            .with_detail("error_kind", format!("{:?}", info.kind));
        for (key, value) in info.details {
            record = record.with_detail(&key, value);
        }
        self.record(record).await;
    }

    async fn record(&self, record: ActionRecord) {
        let mut slot = self.slot.write().await;
        slot.session.touch();
        slot.log.append(record);
    }

    async fn enter(&self, next: WorkflowState) {
        let mut slot = self.slot.write().await;
        let current = slot.session.workflow_state;
        if current.can_transition_to(next) {
            slot.session.workflow_state = next;
        } else if current != next {
            tracing::debug!("Ignoring workflow transition {} -> {}", current, next);
        }
    }

    async fn checkpoint(&self, step: &str) -> Result<()> {
        if self.cancel.is_cancelled() || self.slot.read().await.session.is_closed() {
            return Err(OrchestratorError::Cancelled(step.to_string()));
        }
        Ok(())
    }

    async fn pause(&self, step: &str, duration: Duration) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(OrchestratorError::Cancelled(step.to_string())),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

fn navigation_error(url: &str, err: OrchestratorError) -> OrchestratorError {
    match err {
        OrchestratorError::Cancelled(_) => err,
        other => OrchestratorError::Navigation {
            url: url.to_string(),
            reason: other.to_string(),
        },
    }
}

/// Deadline for a `wait_for` call: the navigator's own timeout plus two
/// poll intervals.
fn wait_budget(timeout: Duration) -> Duration {
    timeout + Duration::from_millis(ms::POLL_INTERVAL * 2)
}
