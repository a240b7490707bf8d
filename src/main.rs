//! react-loop - command-line entry point
//!
//! Answers one question with the built-in tools and prints the outcome.
//! Set `REACT_CONFIG` to load settings from a YAML file instead of the
//! environment.

use std::process::ExitCode;
use std::sync::Arc;

use react_loop::{agent::Agent, config::Config, llm::OpenAiCompatibleClient, tools::ToolRegistry, RunResult};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "react_loop=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let query = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if query.trim().is_empty() {
        anyhow::bail!("usage: react-loop <question>");
    }

    // Load configuration
    let config = match std::env::var("REACT_CONFIG") {
        Ok(path) => Config::from_yaml_file(path)?,
        Err(_) => Config::from_env()?,
    };
    info!("Loaded configuration: model={}", config.default_model);

    let llm = Arc::new(OpenAiCompatibleClient::from_config(&config)?);
    let agent = Agent::from_config(&config, llm);
    let tools = ToolRegistry::with_builtin_tools();

    let result = agent.run(&query, &tools, config.max_iterations).await?;
    let code = match &result {
        RunResult::Completed { output, .. } => {
            println!("{}", output.trim());
            ExitCode::SUCCESS
        }
        RunResult::ExhaustedIterations { last_transcript } => {
            eprintln!(
                "No answer after {} steps; last observation: {}",
                last_transcript.len(),
                last_transcript
                    .last()
                    .map(|s| s.observation.as_str())
                    .unwrap_or("-")
            );
            ExitCode::from(2)
        }
        RunResult::ParseFailure { raw_text, cause, .. } => {
            eprintln!("Could not parse model output ({}):\n{}", cause, raw_text);
            ExitCode::from(3)
        }
    };
    Ok(code)
}
