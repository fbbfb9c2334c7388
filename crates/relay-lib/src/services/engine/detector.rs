// Engine Detection
//
// Resolves the configured engine binary and reports its version.

use serde::Serialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::error::{EngineError, EngineResult};
use crate::config::EngineConfig;
use crate::utils::path_resolver;

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedEngine {
    pub binary_path: String,
    pub version: Option<String>,
}

/// Resolve the engine binary to a full path.
///
/// Values containing a path separator are used as-is and must exist; bare
/// names go through the path resolver.
pub fn resolve_binary(config: &EngineConfig) -> EngineResult<String> {
    let binary = config.binary.trim();

    if binary.contains(std::path::MAIN_SEPARATOR) || binary.contains('/') {
        return if Path::new(binary).is_file() {
            Ok(binary.to_string())
        } else {
            Err(EngineError::EngineNotFound(binary.to_string()))
        };
    }

    path_resolver::find_tool(binary).ok_or_else(|| EngineError::EngineNotFound(binary.to_string()))
}

/// Locate the engine and probe its version
pub async fn detect_engine(config: &EngineConfig) -> EngineResult<DetectedEngine> {
    let binary_path = resolve_binary(config)?;
    let version = get_engine_version(&binary_path).await;

    log::info!(
        "[EngineDetector] Found engine at {} (version {})",
        binary_path,
        version.as_deref().unwrap_or("unknown")
    );

    Ok(DetectedEngine { binary_path, version })
}

async fn get_engine_version(binary_path: &str) -> Option<String> {
    let probe = Command::new(binary_path)
        .arg("--version")
        .env("PATH", path_resolver::get_path())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(VERSION_PROBE_TIMEOUT, probe).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            log::debug!("[EngineDetector] Version probe failed: {}", e);
            return None;
        }
        Err(_) => {
            log::debug!("[EngineDetector] Version probe timed out");
            return None;
        }
    };

    if !output.status.success() {
        return None;
    }

    parse_version_output(&String::from_utf8_lossy(&output.stdout))
}

/// First token starting with a digit, else the whole trimmed output
fn parse_version_output(output: &str) -> Option<String> {
    let output = output.trim();
    if output.is_empty() {
        return None;
    }

    output
        .split_whitespace()
        .find(|s| s.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false))
        .map(|s| s.to_string())
        .or_else(|| Some(output.to_string()))
}
