use super::{NavResult, Navigator, WaitCondition};
use crate::config::BrowserConfig;
use crate::error::{NavigatorError, NavigatorErrorKind};
use crate::timeouts::ms;
use crate::{OrchestratorError, Result, js_templates};
use chromiumoxide::error::CdpError;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// [`Navigator`] backed by a Chrome instance over the DevTools protocol.
pub struct CdpNavigator {
    browser: Mutex<Option<Browser>>,
    page: Page,
    handler_task: JoinHandle<()>,
}

impl CdpNavigator {
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let (browser, mut handler) = if config.connect_existing {
            let debug_url = format!("http://127.0.0.1:{}", config.port);
            tracing::info!("Connecting to existing Chrome at {}", debug_url);
            Browser::connect(&debug_url)
                .await
                .map_err(|e| OrchestratorError::General(format!("Connection failed: {}", e)))?
        } else {
            let chrome_path = config
                .chrome_path
                .clone()
                .unwrap_or_else(|| PathBuf::from("google-chrome"));

            let mut builder = chromiumoxide::BrowserConfig::builder()
                .chrome_executable(&chrome_path)
                .port(config.port)
                .window_size(config.window_width, config.window_height)
                .viewport(None)
                .arg("--no-first-run")
                .arg("--no-default-browser-check")
                .arg("--no-sandbox")
                .arg("--disable-setuid-sandbox");

            if !config.headless {
                builder = builder.with_head();
            }
            if let Some(ref ua) = config.user_agent {
                builder = builder.arg(format!("--user-agent={}", ua));
            }

            let browser_config = builder.build().map_err(OrchestratorError::General)?;

            tracing::info!(
                "Launching Chrome {} (headless={})",
                chrome_path.display(),
                config.headless
            );
            Browser::launch(browser_config)
                .await
                .map_err(|e| OrchestratorError::General(format!("Failed to launch Chrome: {}", e)))?
        };

        let handler_task = tokio::spawn(async move { while handler.next().await.is_some() {} });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| OrchestratorError::General(format!("Failed to open page: {}", e)))?;

        Ok(Self {
            browser: Mutex::new(Some(browser)),
            page,
            handler_task,
        })
    }

    async fn eval_bool(&self, script: &str) -> NavResult<bool> {
        let result = self.page.evaluate(script).await.map_err(map_cdp_error)?;
        Ok(result.value().and_then(|v| v.as_bool()).unwrap_or(false))
    }

    async fn eval_found(&self, script: String, selector: &str) -> NavResult<()> {
        let result = self
            .page
            .evaluate(script.as_str())
            .await
            .map_err(map_cdp_error)?;
        let found = result
            .value()
            .and_then(|v| v.get("found"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if found {
            Ok(())
        } else {
            Err(NavigatorError::element_not_found(selector))
        }
    }
}

#[async_trait::async_trait]
impl Navigator for CdpNavigator {
    async fn navigate(&self, url: &str) -> NavResult<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| match map_cdp_error(e) {
                err if err.kind == NavigatorErrorKind::Other => {
                    NavigatorError::new(NavigatorErrorKind::Navigation, err.reason)
                }
                err => err,
            })?;
        Ok(())
    }

    async fn wait_for(&self, condition: &WaitCondition, timeout: Duration) -> NavResult<bool> {
        let predicate = js_templates::wait_predicate(condition);
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match self.eval_bool(&predicate).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                // The execution context is torn down while a navigation is in progress.
                Err(e) if e.kind == NavigatorErrorKind::Script => {
                    tracing::debug!("wait_for predicate failed mid-navigation: {}", e);
                }
                Err(e) => return Err(e),
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(ms::POLL_INTERVAL)).await;
        }
    }

    async fn type_text(&self, selector: &str, text: &str) -> NavResult<()> {
        match self.page.find_element(selector).await {
            Ok(element) => {
                element.click().await.map_err(map_cdp_error)?;
                element.type_str(text).await.map_err(map_cdp_error)?;
                Ok(())
            }
            Err(e) => {
                tracing::debug!("CDP lookup of {} failed ({}), falling back to JS", selector, e);
                self.eval_found(js_templates::fill_element(selector, text), selector)
                    .await
            }
        }
    }

    async fn click(&self, selector: &str) -> NavResult<()> {
        match self.page.find_element(selector).await {
            Ok(element) => {
                element.click().await.map_err(map_cdp_error)?;
                Ok(())
            }
            Err(e) => {
                tracing::debug!("CDP lookup of {} failed ({}), falling back to JS", selector, e);
                self.eval_found(js_templates::click_element(selector), selector)
                    .await
            }
        }
    }

    async fn evaluate(&self, script: &str) -> NavResult<String> {
        let result = self.page.evaluate(script).await.map_err(map_cdp_error)?;
        Ok(match result.value() {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        })
    }

    async fn scroll_to_bottom(&self) -> NavResult<()> {
        self.eval_bool(js_templates::SCROLL_TO_BOTTOM).await?;
        Ok(())
    }

    async fn current_url(&self) -> NavResult<String> {
        let url = self.page.url().await.map_err(map_cdp_error)?;
        Ok(url.unwrap_or_else(|| "about:blank".to_string()))
    }

    async fn is_ready(&self) -> bool {
        self.browser.lock().await.is_some() && !self.handler_task.is_finished()
    }

    async fn close(&self) {
        if let Some(mut browser) = self.browser.lock().await.take() {
            if let Err(e) = browser.close().await {
                tracing::warn!("Failed to close Chrome cleanly: {}", e);
            }
            browser.wait().await.ok();
        }
        self.handler_task.abort();
    }
}

fn map_cdp_error(err: CdpError) -> NavigatorError {
    let reason = err.to_string();
    let kind = match err {
        CdpError::Timeout => NavigatorErrorKind::Timeout,
        CdpError::NotFound => NavigatorErrorKind::ElementNotFound,
        CdpError::JavascriptException(_) => NavigatorErrorKind::Script,
        _ => classify_reason(&reason),
    };
    NavigatorError::new(kind, reason)
}

fn classify_reason(reason: &str) -> NavigatorErrorKind {
    let lower = reason.to_lowercase();
    if lower.contains("no node") || lower.contains("could not find node") {
        NavigatorErrorKind::StaleElement
    } else if lower.contains("timeout") || lower.contains("timed out") {
        NavigatorErrorKind::Timeout
    } else if lower.contains("net::err") {
        NavigatorErrorKind::Navigation
    } else if lower.contains("channel") || lower.contains("closed") {
        NavigatorErrorKind::Closed
    } else {
        NavigatorErrorKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_reason() {
        assert_eq!(
            classify_reason("Could not find node with given id"),
            NavigatorErrorKind::StaleElement
        );
        assert_eq!(
            classify_reason("Request timed out."),
            NavigatorErrorKind::Timeout
        );
        assert_eq!(
            classify_reason("net::ERR_NAME_NOT_RESOLVED"),
            NavigatorErrorKind::Navigation
        );
        assert_eq!(classify_reason("something else"), NavigatorErrorKind::Other);
    }

    #[test]
    fn test_map_cdp_timeout() {
        let err = map_cdp_error(CdpError::Timeout);
        assert_eq!(err.kind, NavigatorErrorKind::Timeout);
        assert!(err.is_transient());
    }
}
