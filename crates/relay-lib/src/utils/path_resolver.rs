// Path resolution utilities
// The engine is usually installed through npm or a per-user installer, so it
// may live outside the PATH the relay was started with. Search the common
// install locations and hand child processes a PATH that includes them.

use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Cache for resolved tool paths
static TOOL_PATH_CACHE: Lazy<RwLock<HashMap<String, Option<String>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Cached PATH string for child processes
static CACHED_PATH: Lazy<String> = Lazy::new(build_path_string);

/// Get the home directory, preferring $HOME
pub fn get_home_dir() -> Option<String> {
    if let Ok(home) = std::env::var("HOME") {
        if !home.is_empty() {
            return Some(home);
        }
    }

    dirs::home_dir().map(|p| p.to_string_lossy().to_string())
}

/// Well-known install locations, highest priority first
fn get_install_paths() -> Vec<PathBuf> {
    let home = get_home_dir().unwrap_or_default();

    vec![
        // Native installer
        PathBuf::from(format!("{}/.claude/local", home)),
        PathBuf::from(format!("{}/.local/bin", home)),
        // npm global prefix
        PathBuf::from(format!("{}/.npm-global/bin", home)),
        // Volta
        PathBuf::from(format!("{}/.volta/bin", home)),
        // Homebrew (Apple Silicon)
        PathBuf::from("/opt/homebrew/bin"),
        PathBuf::from("/usr/local/bin"),
        // System
        PathBuf::from("/usr/bin"),
        PathBuf::from("/bin"),
    ]
}

/// Inherited PATH entries followed by the install locations, deduplicated
fn get_search_paths() -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = std::env::var_os("PATH")
        .map(|p| std::env::split_paths(&p).collect())
        .unwrap_or_default();

    for path in get_install_paths() {
        if !paths.contains(&path) {
            paths.push(path);
        }
    }

    paths
}

fn build_path_string() -> String {
    get_search_paths()
        .iter()
        .map(|p| p.to_string_lossy().to_string())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(":")
}

/// Get the PATH string for child processes
pub fn get_path() -> &'static str {
    &CACHED_PATH
}

/// Find a tool by name. Returns the full path if found.
pub fn find_tool(tool_name: &str) -> Option<String> {
    if let Ok(cache) = TOOL_PATH_CACHE.read() {
        if let Some(cached) = cache.get(tool_name) {
            return cached.clone();
        }
    }

    let result = find_tool_uncached(tool_name);

    if let Ok(mut cache) = TOOL_PATH_CACHE.write() {
        cache.insert(tool_name.to_string(), result.clone());
    }

    result
}

fn find_tool_uncached(tool_name: &str) -> Option<String> {
    get_search_paths()
        .into_iter()
        .map(|base| base.join(tool_name))
        .find(|candidate| is_executable(candidate))
        .map(|p| p.to_string_lossy().to_string())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Clear the tool path cache
pub fn clear_cache() {
    if let Ok(mut cache) = TOOL_PATH_CACHE.write() {
        cache.clear();
    }
}
