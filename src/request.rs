use crate::config::AuthConfig;
use crate::extractor::ExtractionStrategy;
use crate::navigator::WaitCondition;
use crate::session::SessionKind;
use crate::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Serialize, Deserialize)]
pub struct AuthCredentials {
    pub login_url: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    #[serde(default)]
    pub selectors: LoginSelectors,
}

impl AuthCredentials {
    /// Checks the login URL and that both credentials are present.
    pub fn validate(&self) -> Result<()> {
        check_url("login_url", &self.login_url)?;
        if self.username.is_empty() || self.password.is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "username and password are required".into(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for AuthCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthCredentials")
            .field("login_url", &self.login_url)
            .field("username", &self.username)
            .field("password", &"********")
            .field("selectors", &self.selectors)
            .finish()
    }
}

/// Per-request overrides of the configured login selectors.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoginSelectors {
    pub username: Option<String>,
    pub password: Option<String>,
    pub submit: Option<String>,
    /// Selector that only appears once logged in.
    pub success_indicator: Option<String>,
    /// Text that marks a rejected login.
    pub error_indicator: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSelectors {
    pub username: String,
    pub password: String,
    pub submit: String,
    pub success_indicator: Option<String>,
    pub error_indicators: Vec<String>,
}

impl LoginSelectors {
    pub fn resolve(&self, defaults: &AuthConfig) -> ResolvedSelectors {
        let mut error_indicators = defaults.error_indicators.clone();
        if let Some(ref extra) = self.error_indicator {
            error_indicators.insert(0, extra.clone());
        }
        ResolvedSelectors {
            username: self
                .username
                .clone()
                .unwrap_or_else(|| defaults.username_selector.clone()),
            password: self
                .password
                .clone()
                .unwrap_or_else(|| defaults.password_selector.clone()),
            submit: self
                .submit
                .clone()
                .unwrap_or_else(|| defaults.submit_selector.clone()),
            success_indicator: self.success_indicator.clone(),
            error_indicators,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExtractionOptions {
    #[serde(default)]
    pub strategy: ExtractionStrategy,
    /// Condition that marks the content as ready. Defaults to page load.
    pub wait_for: Option<WaitCondition>,
    /// Scroll to the bottom before snapshotting, for infinite-scroll pages.
    pub scroll_to_bottom: Option<bool>,
    /// Number of scroll passes. Overrides `scroll_to_bottom` when set.
    pub scroll_times: Option<u32>,
    /// Passed through to the extractor unchanged.
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl ExtractionOptions {
    /// Scroll passes to run before the snapshot.
    pub fn scroll_passes(&self, scroll_by_default: bool) -> u32 {
        match self.scroll_times {
            Some(times) => times,
            None if self.scroll_to_bottom.unwrap_or(scroll_by_default) => 1,
            None => 0,
        }
    }
}

pub const MAX_SCROLL_PASSES: u32 = 50;

/// One browser step of an interactive workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrowserAction {
    Navigate { url: String },
    Click { selector: String },
    Type { selector: String, text: String },
    Wait { condition: WaitCondition },
    Scroll { times: Option<u32> },
    Evaluate { script: String },
}

impl BrowserAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Navigate { .. } => "navigate",
            Self::Click { .. } => "click",
            Self::Type { .. } => "type",
            Self::Wait { .. } => "wait",
            Self::Scroll { .. } => "scroll",
            Self::Evaluate { .. } => "evaluate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptedAction {
    #[serde(flatten)]
    pub action: BrowserAction,
    /// Extract the page once this action has run.
    #[serde(default)]
    pub extract_after: bool,
}

impl ScriptedAction {
    pub fn new(action: BrowserAction) -> Self {
        Self {
            action,
            extract_after: false,
        }
    }

    pub fn then_extract(mut self) -> Self {
        self.extract_after = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormField {
    pub selector: String,
    pub value: String,
}

/// Fields to fill, in order, and the button that submits them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FormSubmission {
    pub fields: Vec<FormField>,
    /// Falls back to `auth.submit_selector`.
    pub submit: Option<String>,
}

impl FormSubmission {
    pub fn field(mut self, selector: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(FormField {
            selector: selector.into(),
            value: value.into(),
        });
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub session_id: Option<String>,
    pub target_url: String,
    #[serde(default)]
    pub workflow_kind: SessionKind,
    pub auth_credentials: Option<AuthCredentials>,
    #[serde(default)]
    pub extraction_options: ExtractionOptions,
    /// Pages visited after `target_url` in a multi-page workflow.
    #[serde(default)]
    pub pages: Vec<String>,
    pub continue_on_error: Option<bool>,
    /// Steps of an interactive workflow, run after opening `target_url`.
    #[serde(default)]
    pub actions: Vec<ScriptedAction>,
    /// Form filled and submitted on `target_url` in a form_submit workflow.
    pub form: Option<FormSubmission>,
}

impl WorkflowRequest {
    pub fn plain(url: impl Into<String>) -> Self {
        Self {
            session_id: None,
            target_url: url.into(),
            workflow_kind: SessionKind::Plain,
            auth_credentials: None,
            extraction_options: ExtractionOptions::default(),
            pages: Vec::new(),
            continue_on_error: None,
            actions: Vec::new(),
            form: None,
        }
    }

    pub fn authenticated(target_url: impl Into<String>, credentials: AuthCredentials) -> Self {
        Self {
            workflow_kind: SessionKind::Authenticated,
            auth_credentials: Some(credentials),
            ..Self::plain(target_url)
        }
    }

    pub fn multi_page(urls: Vec<String>) -> Self {
        let mut urls = urls.into_iter();
        let first = urls.next().unwrap_or_default();
        Self {
            workflow_kind: SessionKind::MultiPage,
            pages: urls.collect(),
            ..Self::plain(first)
        }
    }

    pub fn interactive(start_url: impl Into<String>, actions: Vec<ScriptedAction>) -> Self {
        Self {
            workflow_kind: SessionKind::Interactive,
            actions,
            ..Self::plain(start_url)
        }
    }

    pub fn form_submit(url: impl Into<String>, form: FormSubmission) -> Self {
        Self {
            workflow_kind: SessionKind::FormSubmit,
            form: Some(form),
            ..Self::plain(url)
        }
    }

    pub fn with_session(mut self, id: impl Into<String>) -> Self {
        self.session_id = Some(id.into());
        self
    }

    pub fn with_strategy(mut self, strategy: ExtractionStrategy) -> Self {
        self.extraction_options.strategy = strategy;
        self
    }

    pub fn with_wait_for(mut self, condition: WaitCondition) -> Self {
        self.extraction_options.wait_for = Some(condition);
        self
    }

    pub fn with_continue_on_error(mut self, enabled: bool) -> Self {
        self.continue_on_error = Some(enabled);
        self
    }

    pub fn with_scroll_times(mut self, times: u32) -> Self {
        self.extraction_options.scroll_times = Some(times);
        self
    }

    pub fn validate(self) -> Result<ValidatedRequest> {
        check_url("target_url", &self.target_url)?;
        for page in &self.pages {
            check_url("pages", page)?;
        }

        if self.workflow_kind != SessionKind::MultiPage && !self.pages.is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "pages are only accepted for multi_page workflows".into(),
            ));
        }

        match (&self.workflow_kind, &self.auth_credentials) {
            (SessionKind::Authenticated, None) => {
                return Err(OrchestratorError::InvalidRequest(
                    "authenticated workflow requires auth_credentials".into(),
                ));
            }
            (_, Some(creds)) => creds.validate()?,
            _ => {}
        }

        self.validate_actions()?;
        self.validate_form()?;
        check_scroll_passes(self.extraction_options.scroll_times)?;

        if let ExtractionStrategy::Ai { ref instruction } = self.extraction_options.strategy
            && instruction.trim().is_empty()
        {
            return Err(OrchestratorError::InvalidRequest(
                "ai strategy requires a non-empty instruction".into(),
            ));
        }

        if let Some(ref id) = self.session_id
            && id.trim().is_empty()
        {
            return Err(OrchestratorError::InvalidRequest(
                "session_id must not be blank".into(),
            ));
        }

        Ok(ValidatedRequest(self))
    }
}

impl WorkflowRequest {
    fn validate_actions(&self) -> Result<()> {
        if self.workflow_kind != SessionKind::Interactive {
            if !self.actions.is_empty() {
                return Err(OrchestratorError::InvalidRequest(
                    "actions are only accepted for interactive workflows".into(),
                ));
            }
            return Ok(());
        }

        if self.actions.is_empty() {
            return Err(OrchestratorError::InvalidRequest(
                "interactive workflow requires at least one action".into(),
            ));
        }
        for (index, scripted) in self.actions.iter().enumerate() {
            match scripted.action {
                BrowserAction::Navigate { ref url } => check_url("actions.url", url)?,
                BrowserAction::Click { ref selector } | BrowserAction::Type { ref selector, .. }
                    if selector.trim().is_empty() =>
                {
                    return Err(OrchestratorError::InvalidRequest(format!(
                        "action {} ({}) has an empty selector",
                        index,
                        scripted.action.name()
                    )));
                }
                BrowserAction::Scroll { times } => check_scroll_passes(times)?,
                _ => {}
            }
        }
        Ok(())
    }

    fn validate_form(&self) -> Result<()> {
        match (&self.workflow_kind, &self.form) {
            (SessionKind::FormSubmit, None) => Err(OrchestratorError::InvalidRequest(
                "form_submit workflow requires a form".into(),
            )),
            (SessionKind::FormSubmit, Some(form)) => {
                if form.fields.is_empty() {
                    return Err(OrchestratorError::InvalidRequest(
                        "form requires at least one field".into(),
                    ));
                }
                if form.fields.iter().any(|f| f.selector.trim().is_empty())
                    || form.submit.as_deref().is_some_and(|s| s.trim().is_empty())
                {
                    return Err(OrchestratorError::InvalidRequest(
                        "form selectors must not be blank".into(),
                    ));
                }
                Ok(())
            }
            (_, Some(_)) => Err(OrchestratorError::InvalidRequest(
                "form is only accepted for form_submit workflows".into(),
            )),
            _ => Ok(()),
        }
    }
}

fn check_scroll_passes(times: Option<u32>) -> Result<()> {
    match times {
        Some(n) if n > MAX_SCROLL_PASSES => Err(OrchestratorError::InvalidRequest(format!(
            "scroll_times {} exceeds the maximum of {}",
            n, MAX_SCROLL_PASSES
        ))),
        _ => Ok(()),
    }
}

pub(crate) fn check_url(field: &str, raw: &str) -> Result<()> {
    match url::Url::parse(raw) {
        Ok(u) if matches!(u.scheme(), "http" | "https" | "file") => Ok(()),
        Ok(u) => Err(OrchestratorError::InvalidRequest(format!(
            "{}: unsupported scheme '{}'",
            field,
            u.scheme()
        ))),
        Err(e) => Err(OrchestratorError::InvalidRequest(format!(
            "{}: invalid URL '{}': {}",
            field, raw, e
        ))),
    }
}

/// A request that passed validation. Read-only from here on.
#[derive(Debug, Clone)]
pub struct ValidatedRequest(WorkflowRequest);

impl ValidatedRequest {
    /// Every URL the workflow will extract from, in order.
    pub fn urls(&self) -> Vec<String> {
        std::iter::once(self.0.target_url.clone())
            .chain(self.0.pages.iter().cloned())
            .collect()
    }
}

impl std::ops::Deref for ValidatedRequest {
    type Target = WorkflowRequest;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> AuthCredentials {
        AuthCredentials {
            login_url: "https://example.com/login".into(),
            username: "alice".into(),
            password: "secret".into(),
            selectors: LoginSelectors::default(),
        }
    }

    #[test]
    fn test_plain_request_validates() {
        let req = WorkflowRequest::plain("https://example.com").validate().unwrap();
        assert_eq!(req.urls(), vec!["https://example.com".to_string()]);
    }

    #[test]
    fn test_invalid_url_rejected() {
        let err = WorkflowRequest::plain("not a url").validate().unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidRequest(_)));

        let err = WorkflowRequest::plain("javascript:alert(1)")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("unsupported scheme"));
    }

    #[test]
    fn test_authenticated_requires_credentials() {
        let mut req = WorkflowRequest::plain("https://example.com/dashboard");
        req.workflow_kind = SessionKind::Authenticated;
        assert!(req.validate().is_err());

        let mut bad = creds();
        bad.password.clear();
        assert!(
            WorkflowRequest::authenticated("https://example.com/dashboard", bad)
                .validate()
                .is_err()
        );

        assert!(
            WorkflowRequest::authenticated("https://example.com/dashboard", creds())
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_pages_only_for_multi_page() {
        let mut req = WorkflowRequest::plain("https://example.com");
        req.pages.push("https://example.com/2".into());
        assert!(req.validate().is_err());

        let req = WorkflowRequest::multi_page(vec![
            "https://example.com/1".into(),
            "https://example.com/2".into(),
        ])
        .validate()
        .unwrap();
        assert_eq!(req.urls().len(), 2);
    }

    #[test]
    fn test_ai_strategy_needs_instruction() {
        let req = WorkflowRequest::plain("https://example.com").with_strategy(
            ExtractionStrategy::Ai {
                instruction: "  ".into(),
            },
        );
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_selector_resolution() {
        let defaults = AuthConfig::default();
        let selectors = LoginSelectors {
            username: Some("#email".into()),
            error_indicator: Some("wrong credentials".into()),
            ..Default::default()
        };
        let resolved = selectors.resolve(&defaults);
        assert_eq!(resolved.username, "#email");
        assert_eq!(resolved.password, defaults.password_selector);
        assert_eq!(resolved.error_indicators[0], "wrong credentials");
    }

    #[test]
    fn test_interactive_requires_actions() {
        assert!(
            WorkflowRequest::interactive("https://example.com", Vec::new())
                .validate()
                .is_err()
        );

        let actions = vec![
            ScriptedAction::new(BrowserAction::Click {
                selector: "#more".into(),
            }),
            ScriptedAction::new(BrowserAction::Navigate {
                url: "not a url".into(),
            }),
        ];
        let err = WorkflowRequest::interactive("https://example.com", actions)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("actions.url"));

        let mut plain = WorkflowRequest::plain("https://example.com");
        plain.actions.push(ScriptedAction::new(BrowserAction::Scroll { times: None }));
        assert!(plain.validate().is_err());
    }

    #[test]
    fn test_scripted_action_json() {
        let action: ScriptedAction = serde_json::from_str(
            r##"{"type": "type", "selector": "#q", "text": "rust", "extract_after": true}"##,
        )
        .unwrap();
        assert!(action.extract_after);
        assert_eq!(
            action.action,
            BrowserAction::Type {
                selector: "#q".into(),
                text: "rust".into()
            }
        );

        let action: ScriptedAction =
            serde_json::from_str(r#"{"type": "wait", "condition": {"type": "load"}}"#).unwrap();
        assert!(!action.extract_after);
        assert_eq!(action.action.name(), "wait");
    }

    #[test]
    fn test_form_submit_validation() {
        assert!(
            WorkflowRequest::form_submit("https://example.com/search", FormSubmission::default())
                .validate()
                .is_err()
        );

        let form = FormSubmission::default().field("#q", "rust");
        assert!(
            WorkflowRequest::form_submit("https://example.com/search", form.clone())
                .validate()
                .is_ok()
        );

        let mut plain = WorkflowRequest::plain("https://example.com");
        plain.form = Some(form);
        assert!(plain.validate().is_err());
    }

    #[test]
    fn test_scroll_passes() {
        let mut options = ExtractionOptions::default();
        assert_eq!(options.scroll_passes(false), 0);
        assert_eq!(options.scroll_passes(true), 1);

        options.scroll_times = Some(3);
        assert_eq!(options.scroll_passes(false), 3);

        let req = WorkflowRequest::plain("https://example.com").with_scroll_times(MAX_SCROLL_PASSES + 1);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_credentials_validate() {
        assert!(creds().validate().is_ok());

        let mut bad = creds();
        bad.username.clear();
        assert!(bad.validate().is_err());

        let mut bad = creds();
        bad.login_url = "nowhere".into();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_password_is_not_leaked() {
        let c = creds();
        assert!(!format!("{:?}", c).contains("secret"));
        assert!(!serde_json::to_string(&c).unwrap().contains("secret"));
    }
}
