//! Path expansion, text loading and the interactive server prompt.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::get_version;

/// Resolves a leading `~` against the user's home directory
pub fn expand_tilde(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => return PathBuf::from(path),
    };
    match home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => PathBuf::from(path),
    }
}

fn home_dir() -> Option<PathBuf> {
    let var = if cfg!(windows) { "USERPROFILE" } else { "HOME" };
    std::env::var_os(var).map(PathBuf::from)
}

pub fn is_remote(path_or_url: &str) -> bool {
    path_or_url.starts_with("http://") || path_or_url.starts_with("https://")
}

/// GETs `url` and returns the body; non-2xx statuses are errors
pub async fn fetch_text(url: &str) -> Result<String> {
    debug!("GET {}", url);

    let client = reqwest::Client::builder()
        .user_agent(format!("waypoint/{}", get_version()))
        .build()
        .context("Failed to build HTTP client")?;

    client
        .get(url)
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .with_context(|| format!("Failed to fetch {}", url))?
        .text()
        .await
        .with_context(|| format!("Failed to read response body from {}", url))
}

pub async fn read_text(path_or_url: &str) -> Result<String> {
    if is_remote(path_or_url) {
        return fetch_text(path_or_url).await;
    }

    let path = expand_tilde(path_or_url);
    tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

// ============================================================================
// User Prompts
// ============================================================================

/// Prompt the user to pick a server, with `default` preselected.
///
/// Returns `None` when the list is empty, the user skips, or the prompt fails.
pub fn prompt_server_choice(labels: &[String], default: usize) -> Option<usize> {
    use dialoguer::{Select, theme::ColorfulTheme};

    if labels.is_empty() {
        return None;
    }

    let mut items: Vec<&str> = vec!["(keep current server)"];
    items.extend(labels.iter().map(|s| s.as_str()));

    println!();
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Route through")
        .items(&items)
        .default((default + 1).min(labels.len()))
        .interact();

    match selection {
        Ok(0) => {
            info!("Server selection skipped");
            None
        }
        Ok(idx) => {
            info!("Selected {}", labels[idx - 1].trim());
            Some(idx - 1)
        }
        Err(e) => {
            warn!("Server prompt failed: {}", e);
            None
        }
    }
}
