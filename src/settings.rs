use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::helpers::{expand_tilde, fetch_text, is_remote};
use crate::probe::{DEFAULT_SAMPLES, ProbeOptions};
use crate::ranker::{DEFAULT_CONCURRENCY, RankerOptions};
use crate::subscription::Subscription;

const MIN_TIMEOUT_MS: u64 = 500;
const MAX_TIMEOUT_MS: u64 = 30_000;

// ============================================================================
// Settings Types
// ============================================================================

/// Settings parsed from TOML file
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Server store path, default "./servers.json"
    #[serde(default = "default_store")]
    pub store: String,

    /// Outbound document output path, default "./out/outbound.json"
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default)]
    pub probe: ProbeSettings,

    #[serde(default)]
    pub ranking: RankingSettings,

    /// Subscriptions refreshed by `import` without a source
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ProbeSettings {
    /// Hard per-probe timeout in milliseconds
    pub timeout_ms: u64,

    /// Attempts per strategy; the minimum is kept
    pub samples: u32,

    /// Try ICMP echo first
    pub icmp: bool,

    /// Fall back to HTTP HEAD on web ports
    pub http: bool,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            timeout_ms: 3000,
            samples: DEFAULT_SAMPLES,
            icmp: true,
            http: true,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct RankingSettings {
    /// Maximum probes in flight
    pub concurrency: usize,

    /// Write the best server's config after every ranking pass
    pub auto_switch: bool,
}

impl Default for RankingSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            auto_switch: false,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store: default_store(),
            output: default_output(),
            probe: ProbeSettings::default(),
            ranking: RankingSettings::default(),
            subscriptions: Vec::new(),
        }
    }
}

// ============================================================================
// Settings Implementation
// ============================================================================

impl Settings {
    /// Parse settings from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(content).context("Failed to parse settings TOML")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&self.probe.timeout_ms) {
            anyhow::bail!(
                "Invalid probe.timeout_ms {}: must be between {} and {}",
                self.probe.timeout_ms,
                MIN_TIMEOUT_MS,
                MAX_TIMEOUT_MS
            );
        }
        if self.probe.samples == 0 {
            anyhow::bail!("Invalid probe.samples: must be at least 1");
        }
        if self.ranking.concurrency == 0 {
            anyhow::bail!("Invalid ranking.concurrency: must be at least 1");
        }

        let mut names = HashSet::new();
        for sub in &self.subscriptions {
            if sub.name.trim().is_empty() {
                anyhow::bail!("Subscription name must not be empty");
            }
            if !names.insert(sub.name.as_str()) {
                anyhow::bail!("Duplicate subscription name: {}", sub.name);
            }
            if !is_remote(&sub.url) {
                anyhow::bail!(
                    "Subscription '{}' must use an http(s) URL: {}",
                    sub.name,
                    sub.url
                );
            }
        }
        Ok(())
    }

    /// Load settings from file path
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read settings from {:?}", path))?;
        Self::from_toml(&content)
    }

    /// Load settings from URL
    pub async fn from_url(url: &str) -> Result<Self> {
        let content = fetch_text(url).await?;
        Self::from_toml(&content)
    }

    /// Load settings from file path or URL
    pub async fn load(path_or_url: &str) -> Result<Self> {
        if is_remote(path_or_url) {
            Self::from_url(path_or_url).await
        } else {
            Self::from_file(&expand_tilde(path_or_url)).await
        }
    }

    pub fn probe_options(&self) -> ProbeOptions {
        ProbeOptions {
            timeout: Duration::from_millis(self.probe.timeout_ms),
            samples: self.probe.samples,
            icmp: self.probe.icmp,
            http: self.probe.http,
        }
    }

    pub fn ranker_options(&self) -> RankerOptions {
        RankerOptions {
            concurrency: self.ranking.concurrency,
            auto_switch: self.ranking.auto_switch,
        }
    }

    pub fn store_path(&self) -> PathBuf {
        expand_tilde(&self.store)
    }

    pub fn output_path(&self) -> PathBuf {
        expand_tilde(&self.output)
    }
}

fn default_store() -> String {
    "./servers.json".to_string()
}

fn default_output() -> String {
    "./out/outbound.json".to_string()
}
