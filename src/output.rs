use crate::action_log::{ActionRecord, ActionStatus};
use crate::orchestrator::OrchestratorStatus;
use crate::result::WorkflowResult;
use crate::session::Session;
use serde::Serialize;

pub trait OutputFormatter {
    fn format_text(&self) -> String;
    fn format_json(&self, pretty: bool) -> crate::Result<String>;
}

pub fn print_output<T: OutputFormatter>(
    data: &T,
    as_json: bool,
    json_pretty: bool,
) -> crate::Result<()> {
    let output = if as_json {
        data.format_json(json_pretty)?
    } else {
        data.format_text()
    };

    println!("{}", output);
    Ok(())
}

pub fn to_json<T: Serialize>(data: &T, pretty: bool) -> crate::Result<String> {
    if pretty {
        Ok(serde_json::to_string_pretty(data)?)
    } else {
        Ok(serde_json::to_string(data)?)
    }
}

pub mod text {
    use colored::Colorize;

    pub fn success(msg: &str) -> String {
        format!("{} {}", "✓".green().bold(), msg)
    }

    pub fn error(msg: &str) -> String {
        format!("{} {}", "✗".red().bold(), msg)
    }

    pub fn warning(msg: &str) -> String {
        format!("{} {}", "⚠".yellow().bold(), msg)
    }

    pub fn info(msg: &str) -> String {
        format!("{} {}", "ℹ".blue().bold(), msg)
    }

    pub fn section(title: &str) -> String {
        format!("\n{}\n{}", title.bold(), "─".repeat(title.len()))
    }

    pub fn key_value(key: &str, value: &str) -> String {
        format!("  {}: {}", key.bold(), value)
    }

    pub fn table_header(columns: &[&str]) -> String {
        let header = columns
            .iter()
            .map(|c| format!("{:20}", c.bold()))
            .collect::<Vec<_>>()
            .join(" ");
        let divider = "─".repeat(columns.len() * 21);
        format!("{}\n{}", header, divider)
    }

    pub fn table_row(values: &[String]) -> String {
        values
            .iter()
            .map(|v| format!("{:20}", v))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{}...", kept)
        }
    }

    pub fn format_duration_ms(ms: u64) -> String {
        if ms >= 1000 {
            format!("{:.2}s", ms as f64 / 1000.0)
        } else {
            format!("{}ms", ms)
        }
    }
}

pub struct TableBuilder {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self {
            headers: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn headers(mut self, headers: Vec<String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn row(mut self, row: Vec<String>) -> Self {
        self.rows.push(row);
        self
    }

    pub fn build(self) -> String {
        let mut output = String::new();

        if !self.headers.is_empty() {
            output.push_str(&text::table_header(
                &self.headers.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            ));
            output.push('\n');
        }

        for row in self.rows {
            output.push_str(&text::table_row(&row));
            output.push('\n');
        }

        output
    }
}

impl Default for TableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn status_line(record: &ActionRecord) -> String {
    let line = format!(
        "{} {:<18} {}",
        record.timestamp.format("%H:%M:%S%.3f"),
        record.action_name,
        record.message
    );
    match record.status {
        ActionStatus::Success => text::success(&line),
        ActionStatus::Failed | ActionStatus::Timeout => text::error(&line),
        ActionStatus::Warning => text::warning(&line),
        ActionStatus::Info | ActionStatus::InProgress => text::info(&line),
    }
}

impl OutputFormatter for WorkflowResult {
    fn format_text(&self) -> String {
        let mut lines = Vec::new();
        if self.success {
            lines.push(text::success("Workflow completed"));
        } else {
            lines.push(text::error("Workflow failed"));
        }
        lines.push(text::key_value("Session", &self.session_id));

        if let Some(ref error) = self.error {
            lines.push(text::key_value("Error", &format!("{:?}", error.kind)));
            lines.push(text::key_value("Message", &error.message));
        }

        if let Some(ref extraction) = self.extraction {
            lines.push(text::section("Content"));
            lines.push(text::truncate(&extraction.content, 2000));
            if let Some(ref items) = extraction.structured_data {
                lines.push(text::key_value("Structured items", &items.len().to_string()));
            }
        }

        if !self.pages.is_empty() {
            lines.push(text::section("Pages"));
            for page in &self.pages {
                lines.push(text::success(&format!(
                    "{} ({} chars)",
                    page.url,
                    page.extraction.content.chars().count()
                )));
            }
        }

        for failure in &self.errors {
            lines.push(text::error(&format!("{}: {}", failure.url, failure.error.message)));
        }

        if let Some(ref processed) = self.processed_data {
            lines.push(text::section("Processed"));
            for (kind, values) in processed {
                let count = values.as_array().map(|v| v.len()).unwrap_or(1);
                lines.push(text::key_value(kind, &count.to_string()));
            }
        }

        if !self.action_log.is_empty() {
            lines.push(text::section("Actions"));
            lines.extend(self.action_log.iter().map(status_line));
        }

        lines.join("\n")
    }

    fn format_json(&self, pretty: bool) -> crate::Result<String> {
        to_json(self, pretty)
    }
}

impl OutputFormatter for OrchestratorStatus {
    fn format_text(&self) -> String {
        let yes_no = |b: bool| if b { "yes" } else { "no" }.to_string();
        [
            text::section("Orchestrator"),
            text::key_value("Initialized", &yes_no(self.initialized)),
            text::key_value("Navigator ready", &yes_no(self.navigator_ready)),
            text::key_value("Busy", &yes_no(self.busy)),
            text::key_value("Queued", &self.queued.to_string()),
            text::key_value("Active sessions", &self.active_sessions.to_string()),
            text::key_value("Completed requests", &self.completed_requests.to_string()),
        ]
        .join("\n")
    }

    fn format_json(&self, pretty: bool) -> crate::Result<String> {
        to_json(self, pretty)
    }
}

/// Session listing as printed by the CLI.
#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct SessionList(pub Vec<Session>);

impl OutputFormatter for SessionList {
    fn format_text(&self) -> String {
        if self.0.is_empty() {
            return text::info("No sessions");
        }
        let mut table = TableBuilder::new().headers(vec![
            "Session".into(),
            "Kind".into(),
            "Auth".into(),
            "State".into(),
        ]);
        for session in &self.0 {
            table = table.row(vec![
                text::truncate(&session.id, 20),
                format!("{:?}", session.kind),
                format!("{:?}", session.auth_status),
                if session.is_closed() {
                    "closed".to_string()
                } else {
                    session.workflow_state.to_string()
                },
            ]);
        }
        table.build()
    }

    fn format_json(&self, pretty: bool) -> crate::Result<String> {
        to_json(self, pretty)
    }
}

#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct ActionLogView(pub Vec<ActionRecord>);

impl OutputFormatter for ActionLogView {
    fn format_text(&self) -> String {
        if self.0.is_empty() {
            return text::info("No recorded actions");
        }
        self.0.iter().map(status_line).collect::<Vec<_>>().join("\n")
    }

    fn format_json(&self, pretty: bool) -> crate::Result<String> {
        to_json(self, pretty)
    }
}
