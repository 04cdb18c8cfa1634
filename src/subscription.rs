//! Subscription import
//!
//! Batch import never stops at a bad entry: every line is parsed and the
//! outcome is tallied in an [`ImportReport`]. A subscription refresh replaces
//! that subscription's records wholesale while keeping user favorites.

use std::collections::HashSet;
use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::codec::base64::decode_subscription_content;
use crate::codec::{CodecError, CodecRegistry};
use crate::helpers::fetch_text;
use crate::record::ServerRecord;
use crate::store::ServerStore;

// ============================================================================
// Subscription Types
// ============================================================================

/// Remote list of share links
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Subscription {
    /// Name/identifier for this subscription
    pub name: String,

    /// URL to fetch the subscription from
    pub url: String,

    /// Optional filter to drop imported servers by index (0-based).
    /// E.g., `filter = [0, 1]` drops the first two servers, which providers
    /// often use for traffic and expiry banners.
    #[serde(default)]
    pub filter: Vec<usize>,
}

/// A link that could not be imported
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportFailure {
    /// 1-based line number in the decoded content
    pub line: usize,
    pub link: String,
    pub error: CodecError,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub records: Vec<ServerRecord>,
    pub failures: Vec<ImportFailure>,
}

impl ImportReport {
    pub fn succeeded(&self) -> usize {
        self.records.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn total(&self) -> usize {
        self.succeeded() + self.failed()
    }

    /// Drops records by index, as configured per subscription
    pub fn apply_filter(&mut self, filter: &[usize]) {
        if filter.is_empty() {
            return;
        }
        let before = self.records.len();
        let mut index = 0;
        self.records.retain(|_| {
            let keep = !filter.contains(&index);
            index += 1;
            keep
        });
        debug!(
            "Filter removed {} records (indices {:?}), {} remaining",
            before - self.records.len(),
            filter,
            self.records.len()
        );
    }
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} imported, {} failed", self.succeeded(), self.failed())
    }
}

// ============================================================================
// Import
// ============================================================================

/// Parses every link in `content` (already decoded). Blank and `#` lines are
/// skipped; a link repeated within the content is imported once.
pub fn import_links(
    registry: &CodecRegistry,
    content: &str,
    subscription: Option<&str>,
) -> ImportReport {
    let mut report = ImportReport::default();
    let mut seen = HashSet::new();

    for (index, line) in content.lines().enumerate() {
        let link = line.trim();
        if link.is_empty() || link.starts_with('#') {
            continue;
        }

        match registry.parse_link(link) {
            Ok(record) => {
                if !seen.insert(record.id.clone()) {
                    debug!("Skipping duplicate link on line {}", index + 1);
                    continue;
                }
                let record = match subscription {
                    Some(name) => record.with_subscription(name),
                    None => record,
                };
                report.records.push(record);
            }
            Err(error) => {
                warn!("Skipping line {}: {}", index + 1, error);
                report.failures.push(ImportFailure {
                    line: index + 1,
                    link: link.to_string(),
                    error,
                });
            }
        }
    }

    info!("Import finished: {}", report);
    report
}

/// Decodes subscription content and imports it on the blocking pool, off
/// the interactive path.
pub async fn import_links_off_thread(
    content: String,
    subscription: Option<String>,
) -> Result<ImportReport> {
    tokio::task::spawn_blocking(move || -> Result<ImportReport> {
        let decoded = decode_subscription_content(&content)?;
        Ok(import_links(
            &CodecRegistry::new(),
            &decoded,
            subscription.as_deref(),
        ))
    })
    .await
    .context("Import task failed")?
}

/// Fetches and imports one subscription, applying its filter
pub async fn fetch_subscription(subscription: &Subscription) -> Result<ImportReport> {
    info!(
        "Fetching subscription '{}' from {}",
        subscription.name, subscription.url
    );
    let content = fetch_text(&subscription.url).await?;
    let mut report =
        import_links_off_thread(content, Some(subscription.name.clone())).await?;
    report.apply_filter(&subscription.filter);
    Ok(report)
}

// ============================================================================
// Resync
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResyncSummary {
    pub added: usize,
    pub removed: usize,
    pub kept: usize,
}

/// Replaces every record of subscription `name` with the imported set.
/// An imported record whose id is already stored, under any subscription or
/// none, keeps its favorite flag and last latency.
pub fn resync<S: ServerStore + ?Sized>(
    store: &mut S,
    name: &str,
    report: &ImportReport,
) -> ResyncSummary {
    let previous: HashSet<String> = store
        .list()
        .into_iter()
        .filter(|r| r.subscription.as_deref() == Some(name))
        .map(|r| r.id)
        .collect();

    let mut summary = ResyncSummary::default();
    let mut incoming = HashSet::new();
    for record in &report.records {
        let mut record = record.clone().with_subscription(name);
        if let Some(existing) = store.get(&record.id) {
            record.favorite = existing.favorite;
            record.latency = existing.latency;
        }
        if previous.contains(&record.id) {
            summary.kept += 1;
        } else {
            summary.added += 1;
        }
        incoming.insert(record.id.clone());
        store.upsert(record);
    }

    for id in previous.difference(&incoming) {
        store.delete(id);
        summary.removed += 1;
    }

    info!(
        "Resynced subscription '{}': {} added, {} removed, {} kept",
        name, summary.added, summary.removed, summary.kept
    );
    summary
}
