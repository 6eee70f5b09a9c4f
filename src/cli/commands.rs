use crate::extractor::ExtractionStrategy;
use crate::navigator::WaitCondition;
use crate::request::{ExtractionOptions, FormSubmission, ScriptedAction};
use crate::{OrchestratorError, Result};
use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    #[command(about = "Extract content from a page")]
    Extract {
        #[arg(help = "URL to extract")]
        url: String,
        #[command(flatten)]
        extraction: ExtractArgs,
        #[arg(long, help = "Session ID to run under (generated if omitted)")]
        session: Option<String>,
    },

    #[command(about = "Log in through a login form, then optionally extract a page")]
    Auth {
        #[arg(help = "Login page URL")]
        login_url: String,
        #[arg(short, long, help = "Username")]
        username: String,
        #[arg(
            short,
            long,
            env = "CRAWL_PASSWORD",
            hide_env_values = true,
            help = "Password"
        )]
        password: String,
        #[arg(long, help = "Page to extract once logged in")]
        target: Option<String>,
        #[command(flatten)]
        selectors: SelectorArgs,
        #[command(flatten)]
        extraction: ExtractArgs,
        #[arg(long, help = "Session ID to run under (generated if omitted)")]
        session: Option<String>,
    },

    #[command(about = "Extract several pages in order on one session")]
    Crawl {
        #[arg(required = true, help = "URLs to extract, in order")]
        urls: Vec<String>,
        #[arg(long, help = "Keep going when a page fails")]
        continue_on_error: bool,
        #[command(flatten)]
        extraction: ExtractArgs,
        #[arg(long, help = "Session ID to run under (generated if omitted)")]
        session: Option<String>,
    },

    #[command(about = "Open a page, run scripted browser actions and extract along the way")]
    Interact {
        #[arg(help = "Start URL")]
        url: String,
        #[arg(long, help = "JSON file with the list of actions")]
        script: PathBuf,
        #[command(flatten)]
        extraction: ExtractArgs,
        #[arg(long, help = "Session ID to run under (generated if omitted)")]
        session: Option<String>,
    },

    #[command(about = "Fill and submit a form, then extract the resulting page")]
    Form {
        #[arg(help = "URL of the page with the form")]
        url: String,
        #[arg(
            long = "field",
            required = true,
            value_name = "SELECTOR=VALUE",
            help = "Field to fill (repeatable, filled in order)"
        )]
        fields: Vec<String>,
        #[arg(long, help = "CSS selector of the submit button")]
        submit: Option<String>,
        #[command(flatten)]
        extraction: ExtractArgs,
        #[arg(long, help = "Session ID to run under (generated if omitted)")]
        session: Option<String>,
    },

    #[command(about = "Serve the HTTP API")]
    Serve {
        #[arg(long, help = "Bind address")]
        host: Option<String>,
        #[arg(long, help = "HTTP port")]
        port: Option<u16>,
    },

    #[command(about = "Show the status of a running server")]
    Status {
        #[command(flatten)]
        remote: RemoteArgs,
    },

    #[command(about = "List sessions on a running server")]
    Sessions {
        #[command(flatten)]
        remote: RemoteArgs,
    },

    #[command(about = "Show the action log of a session on a running server")]
    Actions {
        #[arg(help = "Session ID")]
        session: String,
        #[command(flatten)]
        remote: RemoteArgs,
    },

    #[command(about = "Close a session on a running server")]
    Cleanup {
        #[arg(help = "Session ID")]
        session: String,
        #[command(flatten)]
        remote: RemoteArgs,
    },

    #[command(about = "Configuration management")]
    Config {
        #[command(subcommand)]
        subcommand: ConfigCommand,
    },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommand {
    #[command(about = "Initialize config file with defaults")]
    Init,

    #[command(about = "Show current configuration")]
    Show,

    #[command(about = "Show config file path")]
    Path,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StrategyArg {
    #[default]
    Auto,
    Css,
    Ai,
}

#[derive(Args, Debug, Clone, Default)]
pub struct ExtractArgs {
    #[arg(long, value_enum, default_value_t = StrategyArg::Auto, help = "Extraction strategy")]
    pub strategy: StrategyArg,
    #[arg(long, help = "JSON schema file for the css strategy")]
    pub schema: Option<PathBuf>,
    #[arg(long, help = "Instruction for the ai strategy")]
    pub instruction: Option<String>,
    #[arg(long, help = "CSS selector that marks the content as loaded")]
    pub wait_for: Option<String>,
    #[arg(long, conflicts_with = "wait_for", help = "Text that marks the content as loaded")]
    pub wait_text: Option<String>,
    #[arg(long, help = "Scroll to the bottom before extracting")]
    pub scroll: bool,
    #[arg(long, help = "Number of scroll passes before extracting")]
    pub scroll_times: Option<u32>,
}

impl ExtractArgs {
    pub fn to_options(&self) -> Result<ExtractionOptions> {
        let strategy = match self.strategy {
            StrategyArg::Auto => ExtractionStrategy::Auto,
            StrategyArg::Css => {
                let path = self.schema.as_ref().ok_or_else(|| {
                    OrchestratorError::InvalidRequest("--schema is required for --strategy css".into())
                })?;
                let schema = serde_json::from_str(&std::fs::read_to_string(path)?)?;
                ExtractionStrategy::Css { schema }
            }
            StrategyArg::Ai => ExtractionStrategy::Ai {
                instruction: self.instruction.clone().ok_or_else(|| {
                    OrchestratorError::InvalidRequest(
                        "--instruction is required for --strategy ai".into(),
                    )
                })?,
            },
        };

        let wait_for = match (&self.wait_for, &self.wait_text) {
            (Some(selector), _) => Some(WaitCondition::Selector(selector.clone())),
            (None, Some(text)) => Some(WaitCondition::Text(text.clone())),
            (None, None) => None,
        };

        Ok(ExtractionOptions {
            strategy,
            wait_for,
            scroll_to_bottom: self.scroll.then_some(true),
            scroll_times: self.scroll_times,
            options: Default::default(),
        })
    }
}

pub fn load_actions(path: &std::path::Path) -> Result<Vec<ScriptedAction>> {
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| {
        OrchestratorError::InvalidRequest(format!(
            "invalid action script {}: {}",
            path.display(),
            e
        ))
    })
}

/// Builds a form from `selector=value` pairs. The pair is split at the first
/// `=` outside attribute brackets, so both sides may contain `=`.
pub fn parse_form(fields: &[String], submit: Option<String>) -> Result<FormSubmission> {
    let mut form = FormSubmission {
        fields: Vec::new(),
        submit,
    };
    for field in fields {
        let (selector, value) = split_field(field).ok_or_else(|| {
            OrchestratorError::InvalidRequest(format!(
                "--field expects SELECTOR=VALUE, got '{}'",
                field
            ))
        })?;
        form = form.field(selector.trim(), value);
    }
    Ok(form)
}

fn split_field(field: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (i, c) in field.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            '=' if depth == 0 => return Some((&field[..i], &field[i + 1..])),
            _ => {}
        }
    }
    None
}

#[derive(Args, Debug, Clone, Default)]
pub struct RemoteArgs {
    #[arg(long, help = "Server URL (defaults to the configured host and port)")]
    pub server: Option<String>,
}

#[derive(Args, Debug, Clone, Default)]
pub struct SelectorArgs {
    #[arg(long, help = "CSS selector of the username field")]
    pub username_selector: Option<String>,
    #[arg(long, help = "CSS selector of the password field")]
    pub password_selector: Option<String>,
    #[arg(long, help = "CSS selector of the submit button")]
    pub submit_selector: Option<String>,
    #[arg(long, help = "CSS selector that only exists once logged in")]
    pub success_selector: Option<String>,
    #[arg(long, help = "Text shown when the login is rejected")]
    pub error_text: Option<String>,
}
