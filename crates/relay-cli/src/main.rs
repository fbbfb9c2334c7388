// Relay CLI
//
// Thin front-end over relay-lib: run a prompt through the engine, classify a
// provider error, or report which engine binary would be used.

use clap::{Parser, Subcommand};
use relay_lib::models::engine::{ConversationId, EngineCompletion, EngineRequest, InvocationState};
use relay_lib::services::engine::{detect_engine, EngineDriver, EngineError, EngineObserver};
use relay_lib::services::health::{classify, infer_provider, should_penalize_caller};
use relay_lib::config::MAX_TIMEOUT_SECS;
use relay_lib::{MemorySessionStore, RelayConfig};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(about = "Drive the reasoning engine and inspect provider errors")]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a prompt to the engine; reads stdin when PROMPT is omitted
    Ask {
        #[arg(long, default_value_t = 0)]
        conversation: ConversationId,
        /// Session token from an earlier run
        #[arg(long)]
        resume: Option<String>,
        /// Hard deadline in seconds, overriding the configured one
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..=MAX_TIMEOUT_SECS))]
        timeout: Option<u64>,
        prompt: Option<String>,
    },
    /// Classify a provider error message
    Classify { text: String },
    /// Locate the engine binary and print its version
    Detect,
}

enum Outcome {
    Completed(EngineCompletion),
    Failed(EngineError),
}

/// Streams deltas to stderr and keeps the terminal outcome
#[derive(Default)]
struct CliObserver {
    printed: Mutex<usize>,
    outcome: Mutex<Option<Outcome>>,
}

impl CliObserver {
    fn set_outcome(&self, outcome: Outcome) {
        let mut slot = self.outcome.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(outcome);
    }

    fn take_outcome(&self) -> Option<Outcome> {
        self.outcome.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

impl EngineObserver for CliObserver {
    fn on_delta(&self, accumulated: &str) {
        let mut printed = self.printed.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(fresh) = accumulated.get(*printed..) {
            let mut stderr = std::io::stderr();
            let _ = stderr.write_all(fresh.as_bytes());
            let _ = stderr.flush();
        }
        *printed = accumulated.len();
    }

    fn on_complete(&self, completion: EngineCompletion) {
        self.set_outcome(Outcome::Completed(completion));
    }

    fn on_error(&self, error: EngineError) {
        self.set_outcome(Outcome::Failed(error));
    }

    fn on_cancelled(&self) {
        eprintln!("\n[cancelled]");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match cli.command {
        Command::Classify { text } => {
            let class = classify(&text);
            let report = serde_json::json!({
                "class": class,
                "penalizeCaller": should_penalize_caller(class),
                "provider": infer_provider(&text),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Detect => {
            let config = RelayConfig::load(cli.config.as_deref())?;
            let detected = detect_engine(&config.engine).await?;
            println!("{}", serde_json::to_string_pretty(&detected)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Ask {
            conversation,
            resume,
            timeout,
            prompt,
        } => {
            let config = RelayConfig::load(cli.config.as_deref())?;
            let prompt = match prompt {
                Some(p) => p,
                None => {
                    let mut buf = String::new();
                    tokio::io::stdin().read_to_string(&mut buf).await?;
                    buf
                }
            };
            if prompt.trim().is_empty() {
                return Err("empty prompt".into());
            }

            ask(config, conversation, resume, timeout, prompt).await
        }
    }
}

async fn ask(
    config: RelayConfig,
    conversation: ConversationId,
    resume: Option<String>,
    timeout: Option<u64>,
    prompt: String,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let driver = EngineDriver::new(config.engine, Arc::new(MemorySessionStore::new()))?;

    let mut request = EngineRequest::new(conversation, prompt).with_resume_token(resume);
    if let Some(secs) = timeout {
        request = request.with_timeout(std::time::Duration::from_secs(secs));
    }

    let observer = Arc::new(CliObserver::default());
    let handle = driver.invoke(request, observer.clone());

    let canceller = handle.canceller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("[CLI] Interrupt received, cancelling");
            canceller.cancel();
        }
    });

    let state = handle.join().await;
    eprintln!();

    match (state, observer.take_outcome()) {
        (_, Some(Outcome::Completed(completion))) => {
            match &completion.tool_call {
                Some(call) => println!("{}", serde_json::to_string_pretty(call)?),
                None => println!("{}", completion.text),
            }
            if let Some(token) = &completion.resume_token {
                eprintln!("resume token: {}", token);
            }
            Ok(ExitCode::SUCCESS)
        }
        (_, Some(Outcome::Failed(error))) => {
            eprintln!("error [{}]: {}", error.code().as_str(), error);
            Ok(ExitCode::FAILURE)
        }
        (InvocationState::Cancelled, None) => Ok(ExitCode::from(130)),
        (state, None) => Err(format!("invocation ended as {} without a result", state).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_bounded() {
        let ok = Cli::try_parse_from(["relay", "ask", "--timeout", "30", "hi"]).unwrap();
        assert!(matches!(ok.command, Command::Ask { timeout: Some(30), .. }));

        let huge = u64::MAX.to_string();
        assert!(Cli::try_parse_from(["relay", "ask", "--timeout", huge.as_str(), "hi"]).is_err());
        assert!(Cli::try_parse_from(["relay", "ask", "--timeout", "0", "hi"]).is_err());
    }
}
