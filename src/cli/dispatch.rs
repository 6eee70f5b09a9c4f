use super::Cli;
use super::client::ServerClient;
use super::commands::{self, Command, ConfigCommand, RemoteArgs, SelectorArgs};
use crate::config::{self, Config};
use crate::error::ErrorKind;
use crate::extractor::HttpExtractor;
use crate::navigator::CdpNavigator;
use crate::output::{self, ActionLogView, OutputFormatter, SessionList, text};
use crate::request::{AuthCredentials, LoginSelectors, WorkflowRequest};
use crate::result::WorkflowResult;
use crate::{Orchestrator, OrchestratorError, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub async fn dispatch(mut cli: Cli, config: Config) -> Result<()> {
    let command = match cli.command.take() {
        Some(cmd) => cmd,
        None => {
            eprintln!("No command provided. Use --help for usage.");
            std::process::exit(1);
        }
    };

    match command {
        Command::Config { subcommand } => handle_config_command(subcommand, &cli, &config),
        Command::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.http_port);
            let orchestrator = Arc::new(build_orchestrator(&config).await?);
            crate::server::http::serve(orchestrator, &host, port).await
        }
        Command::Status { remote } => {
            let status = server_client(&remote, &config)?.status().await?;
            output::print_output(&status, cli.json, config.output.json_pretty)
        }
        Command::Sessions { remote } => {
            let sessions = server_client(&remote, &config)?.sessions().await?;
            output::print_output(&SessionList(sessions), cli.json, config.output.json_pretty)
        }
        Command::Actions { session, remote } => {
            let actions = server_client(&remote, &config)?.actions(&session).await?;
            output::print_output(&ActionLogView(actions), cli.json, config.output.json_pretty)
        }
        Command::Cleanup { session, remote } => {
            server_client(&remote, &config)?.cleanup(&session).await?;
            if cli.json {
                println!("{}", serde_json::json!({"ok": true, "session_id": session}));
            } else {
                println!("{}", text::success(&format!("Session {} closed", session)));
            }
            Ok(())
        }
        Command::Extract {
            url,
            extraction,
            session,
        } => {
            let mut request = WorkflowRequest::plain(url);
            request.session_id = session;
            request.extraction_options = extraction.to_options()?;
            run_workflow(request, &cli, &config).await
        }
        Command::Auth {
            login_url,
            username,
            password,
            target,
            selectors,
            extraction,
            session,
        } => {
            let credentials = AuthCredentials {
                login_url,
                username,
                password,
                selectors: login_selectors(selectors),
            };
            match target {
                Some(target) => {
                    let mut request = WorkflowRequest::authenticated(target, credentials);
                    request.session_id = session;
                    request.extraction_options = extraction.to_options()?;
                    run_workflow(request, &cli, &config).await
                }
                None => {
                    let orchestrator = build_orchestrator(&config).await?;
                    let session = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                    let result = orchestrator.handle_authentication(session, credentials).await;
                    orchestrator.shutdown().await;
                    report(&result, &cli, &config)
                }
            }
        }
        Command::Interact {
            url,
            script,
            extraction,
            session,
        } => {
            let mut request = WorkflowRequest::interactive(url, commands::load_actions(&script)?);
            request.session_id = session;
            request.extraction_options = extraction.to_options()?;
            run_workflow(request, &cli, &config).await
        }
        Command::Form {
            url,
            fields,
            submit,
            extraction,
            session,
        } => {
            let mut request = WorkflowRequest::form_submit(url, commands::parse_form(&fields, submit)?);
            request.session_id = session;
            request.extraction_options = extraction.to_options()?;
            run_workflow(request, &cli, &config).await
        }
        Command::Crawl {
            urls,
            continue_on_error,
            extraction,
            session,
        } => {
            let mut request = WorkflowRequest::multi_page(urls).with_continue_on_error(continue_on_error);
            request.session_id = session;
            request.extraction_options = extraction.to_options()?;
            run_workflow(request, &cli, &config).await
        }
    }
}

async fn build_orchestrator(config: &Config) -> Result<Orchestrator> {
    let extractor = HttpExtractor::new(&config.extractor)?;
    tracing::debug!("Using extraction service at {}", extractor.endpoint());
    let navigator = CdpNavigator::launch(&config.browser).await?;
    Ok(Orchestrator::new(
        Arc::new(navigator),
        Arc::new(extractor),
        config.clone(),
    ))
}

fn server_client(remote: &RemoteArgs, config: &Config) -> Result<ServerClient> {
    match remote.server {
        Some(ref url) => ServerClient::new(url.clone()),
        None => ServerClient::from_config(&config.server),
    }
}

/// Runs one request; Ctrl-C cancels it at the next step boundary.
async fn run_workflow(request: WorkflowRequest, cli: &Cli, config: &Config) -> Result<()> {
    // Reject bad input before paying for a browser launch.
    let request = request.validate()?;
    let orchestrator = build_orchestrator(config).await?;

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{}", text::warning("Cancelling after the current step..."));
                cancel.cancel();
            }
        })
    };

    let started = std::time::Instant::now();
    let result = orchestrator
        .submit_with_cancel((*request).clone(), &cancel)
        .await;
    watcher.abort();
    orchestrator.shutdown().await;

    tracing::info!(
        "Workflow finished in {}",
        text::format_duration_ms(started.elapsed().as_millis() as u64)
    );
    report(&result, cli, config)
}

fn report(result: &WorkflowResult, cli: &Cli, config: &Config) -> Result<()> {
    output::print_output(result, cli.json, config.output.json_pretty)?;
    if let Some(kind) = result.error_kind() {
        std::process::exit(exit_code(kind));
    }
    Ok(())
}

fn exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::InvalidRequest => 2,
        ErrorKind::NavigationError | ErrorKind::NavigatorError => 3,
        ErrorKind::TimeoutError | ErrorKind::QueueTimeoutError => 4,
        ErrorKind::AuthenticationError => 5,
        ErrorKind::ExtractionError => 6,
        ErrorKind::Cancelled => 130,
        _ => 1,
    }
}

fn login_selectors(args: SelectorArgs) -> LoginSelectors {
    LoginSelectors {
        username: args.username_selector,
        password: args.password_selector,
        submit: args.submit_selector,
        success_indicator: args.success_selector,
        error_indicator: args.error_text,
    }
}

#[derive(Debug, Serialize)]
pub struct ConfigInfo {
    pub path: PathBuf,
    pub exists: bool,
}

impl OutputFormatter for ConfigInfo {
    fn format_text(&self) -> String {
        format!(
            "{}\n{}",
            text::key_value("Config Path", &self.path.display().to_string()),
            text::key_value("Exists", &self.exists.to_string())
        )
    }

    fn format_json(&self, pretty: bool) -> Result<String> {
        output::to_json(self, pretty)
    }
}

struct ConfigShow<'a>(&'a Config);

impl OutputFormatter for ConfigShow<'_> {
    fn format_text(&self) -> String {
        self.0.show_masked()
    }

    fn format_json(&self, pretty: bool) -> Result<String> {
        output::to_json(self.0, pretty)
    }
}

fn handle_config_command(subcommand: ConfigCommand, cli: &Cli, config: &Config) -> Result<()> {
    match subcommand {
        ConfigCommand::Init => {
            let info = config_init(&config::default_config_path()?)?;
            output::print_output(&info, cli.json, true)
        }
        ConfigCommand::Show => output::print_output(&ConfigShow(config), cli.json, true),
        ConfigCommand::Path => {
            let path = config::default_config_path()?;
            let exists = path.exists();
            output::print_output(&ConfigInfo { path, exists }, cli.json, true)
        }
    }
}

fn config_init(config_path: &std::path::Path) -> Result<ConfigInfo> {
    let config_dir = config_path
        .parent()
        .ok_or_else(|| OrchestratorError::ConfigError("Invalid config path".into()))?;

    std::fs::create_dir_all(config_dir)?;

    if config_path.exists() {
        return Err(OrchestratorError::ConfigError(format!(
            "Config file already exists at {}",
            config_path.display()
        )));
    }

    let toml_content = toml::to_string_pretty(&Config::default())?;
    std::fs::write(config_path, toml_content)?;

    Ok(ConfigInfo {
        path: config_path.to_path_buf(),
        exists: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_init_writes_defaults_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let info = config_init(&path).unwrap();
        assert!(info.exists);
        let written = Config::from_file(&path).unwrap();
        assert_eq!(written.action_log.max_records, 500);

        assert!(matches!(
            config_init(&path),
            Err(OrchestratorError::ConfigError(_))
        ));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(ErrorKind::AuthenticationError), 5);
        assert_eq!(exit_code(ErrorKind::TimeoutError), 4);
        assert_eq!(exit_code(ErrorKind::Internal), 1);
    }

    #[test]
    fn test_login_selectors_from_args() {
        let selectors = login_selectors(SelectorArgs {
            username_selector: Some("#email".into()),
            error_text: Some("Wrong password".into()),
            ..Default::default()
        });
        assert_eq!(selectors.username.as_deref(), Some("#email"));
        assert_eq!(selectors.error_indicator.as_deref(), Some("Wrong password"));
        assert!(selectors.submit.is_none());
    }
}
