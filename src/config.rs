use crate::timeouts::{ms, secs};
use crate::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub action_log: ActionLogConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrowserConfig {
    pub chrome_path: Option<PathBuf>,
    #[serde(default = "default_headless")]
    pub headless: bool,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Attach to an already running Chrome on `port` instead of launching one.
    #[serde(default)]
    pub connect_existing: bool,
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    #[serde(default = "default_window_height")]
    pub window_height: u32,
    pub user_agent: Option<String>,
}

/// Step timing and retry policy for workflow execution.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_step_timeout")]
    pub step_timeout_ms: u64,
    #[serde(default = "default_content_timeout")]
    pub content_timeout_ms: u64,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub scroll_to_bottom: bool,
    #[serde(default = "default_scroll_settle")]
    pub scroll_settle_ms: u64,
    #[serde(default)]
    pub continue_on_error: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    #[serde(default = "default_admission_timeout")]
    pub admission_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ActionLogConfig {
    #[serde(default = "default_max_records")]
    pub max_records: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

/// Login form defaults.
///
/// These selectors are heuristics that match the common naming of login
/// fields. They are not expected to fit every form; callers override them per
/// request when a site names its inputs differently.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default = "default_username_selector")]
    pub username_selector: String,
    #[serde(default = "default_password_selector")]
    pub password_selector: String,
    #[serde(default = "default_submit_selector")]
    pub submit_selector: String,
    /// Text fragments that mark a rejected login when found on the page after submit.
    #[serde(default = "default_error_indicators")]
    pub error_indicators: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExtractorConfig {
    #[serde(default = "default_extractor_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_extractor_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct OutputConfig {
    #[serde(default)]
    pub json_pretty: bool,
}

fn default_headless() -> bool {
    true
}
fn default_port() -> u16 {
    9222
}
fn default_window_width() -> u32 {
    1920
}
fn default_window_height() -> u32 {
    1080
}
fn default_step_timeout() -> u64 {
    ms::STEP
}
fn default_content_timeout() -> u64 {
    ms::CONTENT_WAIT
}
fn default_retry_backoff() -> u64 {
    ms::RETRY_BACKOFF
}
fn default_max_retries() -> u32 {
    1
}
fn default_scroll_settle() -> u64 {
    ms::SCROLL_SETTLE
}
fn default_admission_timeout() -> u64 {
    ms::QUEUE_ADMISSION
}
fn default_max_records() -> usize {
    500
}
fn default_idle_timeout() -> u64 {
    secs::SESSION_IDLE
}
fn default_username_selector() -> String {
    "input[name*='user' i], input[name*='email' i], input[placeholder*='user' i], input[type='email']"
        .to_string()
}
fn default_password_selector() -> String {
    "input[type='password'], input[name*='pass' i]".to_string()
}
fn default_submit_selector() -> String {
    "button[type='submit'], input[type='submit'], button[name*='login' i]".to_string()
}
fn default_error_indicators() -> Vec<String> {
    vec![
        "invalid password".to_string(),
        "invalid username".to_string(),
        "incorrect password".to_string(),
        "login failed".to_string(),
    ]
}
fn default_extractor_endpoint() -> String {
    "http://127.0.0.1:11235/extract".to_string()
}
fn default_extractor_timeout() -> u64 {
    secs::EXTRACTOR_REQUEST
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_http_port() -> u16 {
    5000
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: default_headless(),
            port: default_port(),
            connect_existing: false,
            window_width: default_window_width(),
            window_height: default_window_height(),
            user_agent: None,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            step_timeout_ms: default_step_timeout(),
            content_timeout_ms: default_content_timeout(),
            retry_backoff_ms: default_retry_backoff(),
            max_retries: default_max_retries(),
            scroll_to_bottom: false,
            scroll_settle_ms: default_scroll_settle(),
            continue_on_error: false,
        }
    }
}

impl OrchestratorConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn content_timeout(&self) -> Duration {
        Duration::from_millis(self.content_timeout_ms)
    }

    /// Exponential backoff before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            admission_timeout_ms: default_admission_timeout(),
        }
    }
}

impl QueueConfig {
    pub fn admission_timeout(&self) -> Duration {
        Duration::from_millis(self.admission_timeout_ms)
    }
}

impl Default for ActionLogConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username_selector: default_username_selector(),
            password_selector: default_password_selector(),
            submit_selector: default_submit_selector(),
            error_indicators: default_error_indicators(),
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            endpoint: default_extractor_endpoint(),
            request_timeout_secs: default_extractor_timeout(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

pub fn default_config_path() -> Result<PathBuf> {
    default_config_dir().map(|p| p.join("config.toml"))
}

pub fn default_config_dir() -> Result<PathBuf> {
    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .map(PathBuf::from)
        .or_else(dirs::config_dir)
        .map(|p| p.join("crawl-orchestrator"))
        .ok_or_else(|| {
            OrchestratorError::ConfigError("Could not determine config directory".into())
        })
}

pub const PROJECT_CONFIG_FILE: &str = ".crawl-orchestrator.toml";

impl Config {
    pub fn load() -> Result<Self> {
        let global_path = default_config_path()?;
        let project_path = PathBuf::from(PROJECT_CONFIG_FILE);

        let mut config = Self::from_layers(&[global_path.as_path(), project_path.as_path()])?;
        config.load_from_env();

        Ok(config)
    }

    /// Layers the existing files in order; a later file only overrides the
    /// keys it sets.
    pub fn from_layers(paths: &[&std::path::Path]) -> Result<Self> {
        let mut merged = toml::Table::new();
        for path in paths.iter().filter(|p| p.exists()) {
            let content = std::fs::read_to_string(path)?;
            let layer: toml::Table = toml::from_str(&content)?;
            tracing::debug!("Loading config layer {}", path.display());
            merge_tables(&mut merged, layer);
        }
        Ok(toml::Value::Table(merged).try_into()?)
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn load_with_overrides(&self, cli_overrides: ConfigOverrides) -> Self {
        let mut config = self.clone();

        if let Some(headless) = cli_overrides.headless {
            config.browser.headless = headless;
        }
        if let Some(chrome_path) = cli_overrides.chrome_path {
            config.browser.chrome_path = Some(chrome_path);
        }
        if let Some(timeout_ms) = cli_overrides.step_timeout_ms {
            config.orchestrator.step_timeout_ms = timeout_ms;
        }
        if let Some(endpoint) = cli_overrides.extractor_endpoint {
            config.extractor.endpoint = endpoint;
        }
        if let Some(json) = cli_overrides.json {
            config.output.json_pretty = json;
        }

        config
    }

    fn load_from_env(&mut self) {
        if let Ok(headless) = std::env::var("CRAWL_HEADLESS") {
            self.browser.headless = headless == "true" || headless == "1";
        }
        if let Ok(path) = std::env::var("CRAWL_CHROME_PATH") {
            self.browser.chrome_path = Some(PathBuf::from(path));
        }
        if let Ok(timeout) = std::env::var("CRAWL_STEP_TIMEOUT_MS")
            && let Ok(timeout) = timeout.parse()
        {
            self.orchestrator.step_timeout_ms = timeout;
        }
        if let Ok(endpoint) = std::env::var("CRAWL_EXTRACTOR_URL") {
            self.extractor.endpoint = endpoint;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.browser.port < 1024 {
            return Err(OrchestratorError::ConfigError(format!(
                "browser.port {} is below 1024",
                self.browser.port
            )));
        }

        if self.orchestrator.step_timeout_ms == 0 || self.orchestrator.content_timeout_ms == 0 {
            return Err(OrchestratorError::ConfigError(
                "orchestrator timeouts must be greater than 0".into(),
            ));
        }

        if self.queue.admission_timeout_ms == 0 {
            return Err(OrchestratorError::ConfigError(
                "queue.admission_timeout_ms must be greater than 0".into(),
            ));
        }

        if self.action_log.max_records == 0 {
            return Err(OrchestratorError::ConfigError(
                "action_log.max_records must be greater than 0".into(),
            ));
        }

        match url::Url::parse(&self.extractor.endpoint) {
            Ok(u) if u.scheme() == "http" || u.scheme() == "https" => {}
            _ => {
                return Err(OrchestratorError::ConfigError(format!(
                    "extractor.endpoint is not an http(s) URL: {}",
                    self.extractor.endpoint
                )));
            }
        }

        if let Some(ref path) = self.browser.chrome_path
            && !path.exists()
        {
            return Err(OrchestratorError::ConfigError(format!(
                "Chrome path does not exist: {}",
                path.display()
            )));
        }

        Ok(())
    }

    pub fn show_masked(&self) -> String {
        format!(
            r#"Browser:
  Chrome Path: {}
  Headless: {}
  Port: {}

Orchestrator:
  Step Timeout: {}ms
  Content Timeout: {}ms
  Retry Backoff: {}ms (max {} retries)
  Continue On Error: {}

Queue:
  Admission Timeout: {}ms

Action Log:
  Max Records: {}

Extractor:
  Endpoint: {}

Server:
  Listen: {}:{}
"#,
            self.browser
                .chrome_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "auto-detect".into()),
            self.browser.headless,
            self.browser.port,
            self.orchestrator.step_timeout_ms,
            self.orchestrator.content_timeout_ms,
            self.orchestrator.retry_backoff_ms,
            self.orchestrator.max_retries,
            self.orchestrator.continue_on_error,
            self.queue.admission_timeout_ms,
            self.action_log.max_records,
            self.extractor.endpoint,
            self.server.host,
            self.server.http_port,
        )
    }
}

fn merge_tables(base: &mut toml::Table, layer: toml::Table) {
    for (key, value) in layer {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(table)) => {
                merge_tables(existing, table)
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct ConfigOverrides {
    pub headless: Option<bool>,
    pub chrome_path: Option<PathBuf>,
    pub step_timeout_ms: Option<u64>,
    pub extractor_endpoint: Option<String>,
    pub json: Option<bool>,
}
