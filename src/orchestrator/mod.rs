mod state;
mod workflow;

pub use state::WorkflowState;

use crate::action_log::{ActionRecord, ActionStatus};
use crate::config::Config;
use crate::extractor::{ContentProcessor, Extraction, Extractor};
use crate::navigator::Navigator;
use crate::queue::{Admission, Serializer};
use crate::request::{AuthCredentials, ExtractionOptions, FormSubmission, ScriptedAction, WorkflowRequest};
use crate::result::WorkflowResult;
use crate::session::{Session, SessionKind, SessionRegistry, SharedSlot};
use crate::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use workflow::{Job, Outcome, Run};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub initialized: bool,
    pub navigator_ready: bool,
    pub busy: bool,
    pub queued: usize,
    pub active_sessions: usize,
    pub completed_requests: u64,
}

type InflightMap = HashMap<String, HashMap<u64, CancellationToken>>;

/// Drives sessions through extraction, authentication and crawl workflows
/// over a single shared [`Navigator`].
///
/// Callers may submit concurrently; requests run one at a time in arrival
/// order. Every submission returns a [`WorkflowResult`], including failures.
pub struct Orchestrator {
    serializer: Serializer,
    extractor: Arc<dyn Extractor>,
    processor: Option<Arc<dyn ContentProcessor>>,
    sessions: SessionRegistry,
    config: Config,
    inflight: std::sync::Mutex<InflightMap>,
    next_request: AtomicU64,
    completed: AtomicU64,
    initialized: AtomicBool,
}

impl Orchestrator {
    pub fn new(navigator: Arc<dyn Navigator>, extractor: Arc<dyn Extractor>, config: Config) -> Self {
        Self {
            serializer: Serializer::new(navigator, config.queue.admission_timeout()),
            extractor,
            processor: None,
            sessions: SessionRegistry::new(config.action_log.max_records),
            config,
            inflight: std::sync::Mutex::new(HashMap::new()),
            next_request: AtomicU64::new(1),
            completed: AtomicU64::new(0),
            initialized: AtomicBool::new(true),
        }
    }

    pub fn with_processor(mut self, processor: Arc<dyn ContentProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn submit(&self, request: WorkflowRequest) -> WorkflowResult {
        self.submit_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Submits a request that the caller can cancel through `cancel`. A
    /// queued request leaves the queue at once; a running one stops at the
    /// next step boundary and its session is cleaned up.
    pub async fn submit_with_cancel(
        &self,
        request: WorkflowRequest,
        cancel: &CancellationToken,
    ) -> WorkflowResult {
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let kind = request.workflow_kind;

        let request = match request.validate() {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Rejected request: {}", e);
                return WorkflowResult::failed(session_id, &e);
            }
        };

        let options = request.extraction_options.clone();
        let job = match kind {
            SessionKind::Plain => Job::Extract {
                url: request.target_url.clone(),
                options,
            },
            SessionKind::Authenticated => match request.auth_credentials.clone() {
                Some(credentials) => Job::AuthenticateAndExtract {
                    credentials,
                    url: request.target_url.clone(),
                    options,
                },
                None => {
                    let err = OrchestratorError::InvalidRequest(
                        "authenticated workflow requires auth_credentials".into(),
                    );
                    return WorkflowResult::failed(session_id, &err);
                }
            },
            SessionKind::MultiPage => Job::Crawl {
                urls: Box::new(request.urls().into_iter()),
                options,
                continue_on_error: request
                    .continue_on_error
                    .unwrap_or(self.config.orchestrator.continue_on_error),
            },
            SessionKind::Interactive => Job::Interactive {
                url: request.target_url.clone(),
                actions: request.actions.clone(),
                options,
            },
            SessionKind::FormSubmit => match request.form.clone() {
                Some(form) => Job::FormSubmit {
                    url: request.target_url.clone(),
                    form,
                    options,
                },
                None => {
                    let err = OrchestratorError::InvalidRequest(
                        "form_submit workflow requires a form".into(),
                    );
                    return WorkflowResult::failed(session_id, &err);
                }
            },
        };

        self.execute(session_id, kind, job, cancel).await
    }

    /// Plain extraction of one page.
    pub async fn extract_from_page(
        &self,
        session_id: Option<String>,
        url: impl Into<String>,
        options: ExtractionOptions,
    ) -> WorkflowResult {
        let mut request = WorkflowRequest::plain(url);
        request.session_id = session_id;
        request.extraction_options = options;
        self.submit(request).await
    }

    /// Logs the session in without extracting anything. A session that is
    /// already authenticated succeeds without touching the browser.
    pub async fn handle_authentication(
        &self,
        session_id: impl Into<String>,
        credentials: AuthCredentials,
    ) -> WorkflowResult {
        let session_id = session_id.into();
        if let Err(e) = credentials.validate() {
            tracing::warn!("Rejected request: {}", e);
            return WorkflowResult::failed(session_id, &e);
        }
        let job = Job::Authenticate { credentials };
        self.execute(
            session_id,
            SessionKind::Authenticated,
            job,
            &CancellationToken::new(),
        )
        .await
    }

    /// Opens `start_url`, then runs `actions` in order. Each action flagged
    /// `extract_after` yields one entry in `pages`.
    pub async fn interactive_crawl(
        &self,
        session_id: Option<String>,
        start_url: impl Into<String>,
        actions: Vec<ScriptedAction>,
        options: ExtractionOptions,
    ) -> WorkflowResult {
        let mut request = WorkflowRequest::interactive(start_url, actions);
        request.session_id = session_id;
        request.extraction_options = options;
        self.submit(request).await
    }

    /// Fills and submits the form on `url`, then extracts the page it leads to.
    pub async fn form_submit_extract(
        &self,
        session_id: Option<String>,
        url: impl Into<String>,
        form: FormSubmission,
        options: ExtractionOptions,
    ) -> WorkflowResult {
        let mut request = WorkflowRequest::form_submit(url, form);
        request.session_id = session_id;
        request.extraction_options = options;
        self.submit(request).await
    }

    /// Extracts every URL the iterator yields, in order, on one session.
    /// URLs are pulled lazily, so the sequence may be produced while the
    /// crawl runs.
    pub async fn crawl_pages<I>(
        &self,
        session_id: Option<String>,
        urls: I,
        options: ExtractionOptions,
        continue_on_error: bool,
    ) -> WorkflowResult
    where
        I: IntoIterator<Item = String>,
        I::IntoIter: Send + 'static,
    {
        let session_id = session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let job = Job::Crawl {
            urls: Box::new(urls.into_iter()),
            options,
            continue_on_error,
        };
        self.execute(
            session_id,
            SessionKind::MultiPage,
            job,
            &CancellationToken::new(),
        )
        .await
    }

    async fn execute(
        &self,
        session_id: String,
        kind: SessionKind,
        job: Job,
        cancel: &CancellationToken,
    ) -> WorkflowResult {
        if !self.initialized.load(Ordering::SeqCst) {
            let err = OrchestratorError::General("orchestrator has been shut down".into());
            return WorkflowResult::failed(session_id, &err);
        }

        let token = cancel.child_token();
        let _inflight = InflightGuard::register(&self.inflight, &session_id, &self.next_request, &token);

        let result = match self.serializer.admit(&token).await {
            Ok(admission) => self.run(admission, &session_id, kind, job, &token).await,
            Err(e) => self.rejected(&session_id, kind, e).await,
        };

        self.completed.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn run(
        &self,
        admission: Admission,
        session_id: &str,
        kind: SessionKind,
        job: Job,
        token: &CancellationToken,
    ) -> WorkflowResult {
        let slot = self.sessions.get_or_create(session_id, kind).await;
        let mark = slot.read().await.log.mark();
        let job_name = job.name();

        tracing::info!(
            session = session_id,
            ticket = admission.ticket(),
            "Starting {} workflow",
            job_name
        );

        let outcome = {
            let run = Run {
                nav: admission.navigator(),
                extractor: self.extractor.as_ref(),
                slot: &slot,
                config: &self.config,
                cancel: token,
            };
            run.execute(job).await
        };
        drop(admission);

        let result = self.finish(session_id, &slot, mark, outcome).await;
        if result.success {
            tracing::info!(session = session_id, "{} workflow succeeded", job_name);
        } else {
            tracing::warn!(
                session = session_id,
                "{} workflow failed: {}",
                job_name,
                result
                    .error
                    .as_ref()
                    .map(|e| e.message.as_str())
                    .unwrap_or("unknown error")
            );
        }
        result
    }

    async fn finish(&self, session_id: &str, slot: &SharedSlot, mark: u64, outcome: Outcome) -> WorkflowResult {
        let Outcome {
            extraction,
            pages,
            errors,
            error,
        } = outcome;

        let mut result = match error {
            Some(ref e) => WorkflowResult::failed(session_id, e),
            None => WorkflowResult {
                session_id: session_id.to_string(),
                success: true,
                extraction: None,
                pages: Vec::new(),
                processed_data: None,
                action_log: Vec::new(),
                error: None,
                errors: Vec::new(),
            },
        };

        // continue-on-error with nothing extracted is still a failure
        if result.success && pages.is_empty() && !errors.is_empty() {
            result.success = false;
            result.error = Some(errors[0].error.clone());
        }

        if result.success
            && let Some(ref processor) = self.processor
        {
            let extracted: Vec<&Extraction> = extraction
                .iter()
                .chain(pages.iter().map(|p| &p.extraction))
                .collect();
            result.processed_data = self.process(processor.as_ref(), slot, &extracted).await;
        }

        result.extraction = extraction;
        result.pages = pages;
        result.errors = errors;
        result.action_log = slot.read().await.log.since(mark);
        result
    }

    async fn process(
        &self,
        processor: &dyn ContentProcessor,
        slot: &SharedSlot,
        extractions: &[&Extraction],
    ) -> Option<Map<String, Value>> {
        if extractions.is_empty() {
            return None;
        }

        let mut merged = Map::new();
        for extraction in extractions {
            match processor.process(extraction).await {
                Ok(data) => merge_processed(&mut merged, data),
                Err(e) => {
                    tracing::warn!("Content processing failed: {}", e);
                    let mut slot = slot.write().await;
                    slot.log.append(ActionRecord::new(
                        "process",
                        ActionStatus::Warning,
                        format!("Content processing failed: {}", e),
                    ));
                    return None;
                }
            }
        }

        let mut slot = slot.write().await;
        slot.log.append(
            ActionRecord::new("process", ActionStatus::Success, "Processed extracted content")
                .with_detail("entity_kinds", merged.len()),
        );
        Some(merged)
    }

    async fn rejected(&self, session_id: &str, kind: SessionKind, err: OrchestratorError) -> WorkflowResult {
        let slot = self.sessions.get_or_create(session_id, kind).await;
        let mut slot = slot.write().await;
        let mark = slot.log.mark();

        let status = match err {
            OrchestratorError::QueueTimeout { .. } => ActionStatus::Timeout,
            _ => ActionStatus::Failed,
        };
        tracing::warn!(session = session_id, "Request not admitted: {}", err);
        slot.log
            .append(ActionRecord::new("admission", status, err.to_string()));

        let mut result = WorkflowResult::failed(session_id, &err);
        result.action_log = slot.log.since(mark);
        result
    }

    pub async fn get_action_log(&self, session_id: &str) -> Result<Vec<ActionRecord>> {
        let slot = self
            .sessions
            .get(session_id)
            .await
            .ok_or_else(|| OrchestratorError::SessionNotFound(session_id.to_string()))?;
        let slot = slot.read().await;
        Ok(slot.log.snapshot())
    }

    pub async fn session(&self, session_id: &str) -> Option<Session> {
        let slot = self.sessions.get(session_id).await?;
        let slot = slot.read().await;
        Some(slot.session.clone())
    }

    pub async fn list_sessions(&self) -> Vec<Session> {
        self.sessions.list().await
    }

    pub async fn status(&self) -> OrchestratorStatus {
        let queue = self.serializer.stats();
        OrchestratorStatus {
            initialized: self.initialized.load(Ordering::SeqCst),
            navigator_ready: self.serializer.navigator_ready().await,
            busy: queue.busy,
            queued: queue.queued,
            active_sessions: self.sessions.active_count().await,
            completed_requests: self.completed.load(Ordering::SeqCst),
        }
    }

    /// Closes a session: pending and running requests on it are cancelled
    /// and its cookies are dropped. The session and its log stay readable.
    /// Cleaning up a closed session does nothing.
    pub async fn cleanup(&self, session_id: &str) -> Result<()> {
        self.cancel_inflight(session_id);

        let slot = self
            .sessions
            .get(session_id)
            .await
            .ok_or_else(|| OrchestratorError::SessionNotFound(session_id.to_string()))?;
        let mut slot = slot.write().await;
        if !slot.session.is_closed() {
            slot.session.close();
            slot.log.append(ActionRecord::new(
                "cleanup",
                ActionStatus::Info,
                "Session closed",
            ));
            tracing::info!(session = session_id, "Session cleaned up");
        }
        Ok(())
    }

    /// Removes sessions idle for longer than `session.idle_timeout_secs`.
    pub async fn cleanup_idle(&self) -> Vec<String> {
        let max_idle = Duration::from_secs(self.config.session.idle_timeout_secs);
        let idle = self.sessions.idle_ids(max_idle).await;
        for id in &idle {
            if let Err(e) = self.cleanup(id).await {
                tracing::debug!("{}", e);
            }
            self.sessions.remove(id).await;
        }
        if !idle.is_empty() {
            tracing::info!("Evicted {} idle session(s)", idle.len());
        }
        idle
    }

    /// Cancels everything, closes every session and releases the browser.
    pub async fn shutdown(&self) {
        if !self.initialized.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Shutting down orchestrator");

        {
            let inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            for token in inflight.values().flat_map(|tokens| tokens.values()) {
                token.cancel();
            }
        }
        for id in self.sessions.ids().await {
            if let Err(e) = self.cleanup(&id).await {
                tracing::debug!("{}", e);
            }
        }
        self.serializer.close().await;
    }

    fn cancel_inflight(&self, session_id: &str) {
        let inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tokens) = inflight.get(session_id) {
            for token in tokens.values() {
                token.cancel();
            }
        }
    }
}

/// Keeps a request's cancellation token reachable from `cleanup` while the
/// request is queued or running.
struct InflightGuard<'a> {
    map: &'a std::sync::Mutex<InflightMap>,
    session_id: String,
    key: u64,
}

impl<'a> InflightGuard<'a> {
    fn register(
        map: &'a std::sync::Mutex<InflightMap>,
        session_id: &str,
        counter: &AtomicU64,
        token: &CancellationToken,
    ) -> Self {
        let key = counter.fetch_add(1, Ordering::SeqCst);
        map.lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(session_id.to_string())
            .or_default()
            .insert(key, token.clone());
        Self {
            map,
            session_id: session_id.to_string(),
            key,
        }
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tokens) = map.get_mut(&self.session_id) {
            tokens.remove(&self.key);
            if tokens.is_empty() {
                map.remove(&self.session_id);
            }
        }
    }
}

/// Sequences under the same entity kind are concatenated; anything else is
/// replaced by the later value.
fn merge_processed(into: &mut Map<String, Value>, from: Map<String, Value>) {
    for (key, value) in from {
        match (into.get_mut(&key), value) {
            (Some(Value::Array(existing)), Value::Array(more)) => existing.extend(more),
            (_, value) => {
                into.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_processed_concatenates_sequences() {
        let mut merged = Map::new();
        merge_processed(
            &mut merged,
            json!({"emails": ["a@example.com"], "count": 1})
                .as_object()
                .cloned()
                .unwrap(),
        );
        merge_processed(
            &mut merged,
            json!({"emails": ["b@example.com"], "count": 2})
                .as_object()
                .cloned()
                .unwrap(),
        );

        assert_eq!(merged["emails"], json!(["a@example.com", "b@example.com"]));
        assert_eq!(merged["count"], 2);
    }

    #[test]
    fn test_inflight_guard_unregisters() {
        let map = std::sync::Mutex::new(HashMap::new());
        let counter = AtomicU64::new(1);
        let token = CancellationToken::new();
        {
            let _a = InflightGuard::register(&map, "s1", &counter, &token);
            let _b = InflightGuard::register(&map, "s1", &counter, &token);
            assert_eq!(map.lock().unwrap()["s1"].len(), 2);
        }
        assert!(map.lock().unwrap().is_empty());
    }
}
