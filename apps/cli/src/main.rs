//! Conductor CLI
//!
//! Developer-facing client for the Conductor API: submit specs, invoke
//! golden paths, watch live events, and inspect deployment status.
//!
//! Exit codes: 0 success, 1 generic error, 2 authentication, 3 validation,
//! 4 deployment failure, 5 timeout.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use reqwest::StatusCode;

use conductor_domain::ScoreSpec;

mod client;

use client::{ApiClient, CliError};

#[derive(Parser)]
#[command(name = "conductor")]
#[command(about = "Conductor platform orchestration CLI")]
struct Cli {
    /// API server base URL
    #[arg(long, env = "CONDUCTOR_SERVER", default_value = "http://localhost:8081")]
    server: String,

    /// Bearer token (defaults to IDP_API_KEY)
    #[arg(long, env = "IDP_API_KEY")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a Score spec for deployment
    Deploy {
        /// Path to the spec YAML
        spec: PathBuf,
        /// Watch events until the deployment finishes
        #[arg(short, long)]
        watch: bool,
        /// Give up after this many seconds when watching
        #[arg(long, default_value_t = 600)]
        timeout: u64,
    },
    /// Invoke a golden-path workflow for a spec's application
    Run {
        /// Golden-path workflow name
        golden_path: String,
        /// Path to the spec YAML naming the application
        spec: PathBuf,
    },
    /// Stream live events for an application
    Watch {
        /// Application name
        app: String,
    },
    /// Show recent executions and resources for an application
    Status {
        /// Application name
        app: String,
    },
    /// Validate a spec file locally without submitting it
    Validate {
        /// Path to the spec YAML
        spec: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let client = ApiClient::new(&cli.server, cli.token.as_deref());

    let result = match cli.command {
        Commands::Deploy {
            spec,
            watch,
            timeout,
        } => deploy(&client, &spec, watch, timeout).await,
        Commands::Run { golden_path, spec } => run(&client, &golden_path, &spec).await,
        Commands::Watch { app } => client.watch_events(&app).await,
        Commands::Status { app } => status(&client, &app).await,
        Commands::Validate { spec } => validate(&spec),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

fn read_spec(path: &PathBuf) -> Result<(String, ScoreSpec), CliError> {
    let yaml = std::fs::read_to_string(path)
        .map_err(|e| CliError::Generic(format!("reading {}: {e}", path.display())))?;
    let spec = ScoreSpec::from_yaml(&yaml).map_err(|e| CliError::Validation(e.to_string()))?;
    Ok((yaml, spec))
}

async fn deploy(
    client: &ApiClient,
    path: &PathBuf,
    watch: bool,
    timeout_secs: u64,
) -> Result<(), CliError> {
    let (yaml, spec) = read_spec(path)?;
    let app = spec.app_name().to_string();

    let response: serde_json::Value = client.post_yaml("/api/specs", yaml).await?;
    println!(
        "submitted {app} (task {})",
        response["task_id"].as_str().unwrap_or("?")
    );

    if !watch {
        return Ok(());
    }

    // Poll executions until the deployment reaches a terminal state.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout_secs);
    loop {
        if tokio::time::Instant::now() >= deadline {
            return Err(CliError::Timeout(format!(
                "deployment of {app} did not finish within {timeout_secs}s"
            )));
        }
        tokio::time::sleep(Duration::from_secs(2)).await;

        let page: serde_json::Value = client
            .get(&format!("/api/workflows?app={app}&limit=1"))
            .await?;
        let Some(latest) = page["items"].as_array().and_then(|items| items.first()) else {
            continue;
        };
        match latest["status"].as_str() {
            Some("completed") => {
                println!("deployment of {app} completed");
                return Ok(());
            }
            Some("failed") => {
                let error = latest["error_message"].as_str().unwrap_or("unknown error");
                return Err(CliError::Deployment(format!(
                    "deployment of {app} failed: {error}"
                )));
            }
            _ => {}
        }
    }
}

async fn run(client: &ApiClient, golden_path: &str, path: &PathBuf) -> Result<(), CliError> {
    let (_, spec) = read_spec(path)?;
    let body = serde_json::json!({
        "workflow": golden_path,
        "app_name": spec.app_name(),
    });
    let response: serde_json::Value = client.post_json("/api/workflows/execute", &body).await?;
    println!(
        "started {golden_path} for {} (execution {})",
        spec.app_name(),
        response["execution_id"].as_str().unwrap_or("?")
    );
    Ok(())
}

async fn status(client: &ApiClient, app: &str) -> Result<(), CliError> {
    let executions: serde_json::Value = client
        .get(&format!("/api/workflows?app={app}&limit=5"))
        .await?;

    println!("recent executions for {app}:");
    for execution in executions["items"].as_array().unwrap_or(&Vec::new()) {
        println!(
            "  {}  {}  {}",
            execution["id"].as_str().unwrap_or("?"),
            execution["workflow_name"].as_str().unwrap_or("?"),
            execution["status"].as_str().unwrap_or("?"),
        );
    }

    let graph: serde_json::Value = client.get(&format!("/api/graph/{app}")).await?;
    println!("resources:");
    for node in graph["nodes"].as_array().unwrap_or(&Vec::new()) {
        if node["kind"].as_str() == Some("resource") {
            println!(
                "  {}  {}",
                node["label"].as_str().unwrap_or("?"),
                node["status"].as_str().unwrap_or("-"),
            );
        }
    }
    Ok(())
}

fn validate(path: &PathBuf) -> Result<(), CliError> {
    let (_, spec) = read_spec(path)?;
    println!(
        "{} is valid: {} container(s), {} resource(s)",
        path.display(),
        spec.containers.len(),
        spec.resources.len()
    );
    Ok(())
}

/// Map HTTP errors to the documented exit codes.
pub(crate) fn classify_status(status: StatusCode, body: String) -> CliError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => CliError::Auth(body),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => CliError::Validation(body),
        _ => CliError::Generic(format!("{status}: {body}")),
    }
}
