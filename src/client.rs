//! Client orchestration
//!
//! Ties settings, the codec registry, the server store and the ranker
//! together for the CLI commands.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::codec::{CodecRegistry, ValidationReport};
use crate::config::OutboundDocument;
use crate::helpers::{expand_tilde, read_text};
use crate::probe::{Latency, LatencyProbe};
use crate::ranker::{RankingPass, ServerRanker};
use crate::record::{Protocol, ServerRecord};
use crate::settings::Settings;
use crate::store::{JsonFileStore, ServerStore, apply_latencies};
use crate::subscription::{
    ImportReport, fetch_subscription, import_links_off_thread, resync,
};

pub struct Client {
    settings: Settings,
    registry: CodecRegistry,
}

impl Client {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            registry: CodecRegistry::new(),
        }
    }

    /// Loads settings from a path or URL, or uses defaults
    pub async fn load(settings: Option<&str>) -> Result<Self> {
        let settings = match settings {
            Some(path_or_url) => {
                info!("Loading settings from: {}", path_or_url);
                Settings::load(path_or_url).await?
            }
            None => {
                debug!("No settings file given, using defaults");
                Settings::default()
            }
        };
        Ok(Self::new(settings))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn protocols(&self) -> Vec<Protocol> {
        self.registry.supported_protocols().into_iter().collect()
    }

    // ========================================================================
    // Links and Configs
    // ========================================================================

    /// Parses a link and validates the resulting record
    pub fn parse(&self, link: &str) -> Result<(ServerRecord, ValidationReport)> {
        let record = self.registry.parse_link(link)?;
        let report = self.registry.validate(&record);
        Ok((record, report))
    }

    /// Canonical share link for `link`
    pub fn canonical_link(&self, link: &str) -> Result<String> {
        let record = self.registry.parse_link(link)?;
        Ok(self.registry.generate_url(&record)?)
    }

    /// Validated outbound document for a record
    pub fn generate(&self, record: &ServerRecord) -> Result<OutboundDocument> {
        self.registry
            .generate_config(record)
            .with_context(|| format!("Cannot generate config for '{}'", record.name))
    }

    /// A share link, or the id or name of a stored record
    pub async fn resolve(&self, link_or_id: &str) -> Result<ServerRecord> {
        if link_or_id.contains("://") {
            return Ok(self.registry.parse_link(link_or_id)?);
        }

        let store = self.open_store().await?;
        store
            .find(link_or_id)
            .with_context(|| format!("No stored server with id or name '{}'", link_or_id))
    }

    /// Writes the document as pretty JSON, creating parent directories
    pub async fn write_config(
        &self,
        document: &OutboundDocument,
        output_override: Option<&str>,
    ) -> Result<PathBuf> {
        let path = match output_override {
            Some(path) => expand_tilde(path),
            None => self.settings.output_path(),
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create output directory {:?}", parent))?;
        }

        let json = document.to_json_pretty()?;
        tokio::fs::write(&path, &json)
            .await
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        info!("Config written to {:?}", path);
        Ok(path)
    }

    // ========================================================================
    // Store, Import and Ranking
    // ========================================================================

    pub async fn open_store(&self) -> Result<JsonFileStore> {
        JsonFileStore::open(self.settings.store_path()).await
    }

    /// Imports from a file or URL, or refreshes every configured subscription
    /// when no source is given
    pub async fn import(&self, source: Option<&str>) -> Result<ImportReport> {
        let mut store = self.open_store().await?;

        let report = match source {
            Some(source) => {
                info!("Importing links from {}", source);
                let content = read_text(source).await?;
                let report = import_links_off_thread(content, None).await?;
                for record in &report.records {
                    store.upsert(record.clone());
                }
                report
            }
            None => self.refresh_subscriptions(&mut store).await?,
        };

        store.save().await?;
        Ok(report)
    }

    async fn refresh_subscriptions(&self, store: &mut JsonFileStore) -> Result<ImportReport> {
        let subscriptions = &self.settings.subscriptions;
        if subscriptions.is_empty() {
            anyhow::bail!("No import source given and no subscriptions configured");
        }

        let mut total = ImportReport::default();
        for (index, sub) in subscriptions.iter().enumerate() {
            info!(
                "Refreshing subscription [{}/{}]: '{}'",
                index + 1,
                subscriptions.len(),
                sub.name
            );
            match fetch_subscription(sub).await {
                Ok(report) => {
                    resync(store, &sub.name, &report);
                    total.records.extend(report.records);
                    total.failures.extend(report.failures);
                }
                Err(e) => {
                    // Log error but continue with other subscriptions
                    warn!("Failed to fetch subscription '{}': {}", sub.name, e);
                    debug!("Error details for '{}': {:?}", sub.name, e);
                }
            }
        }
        Ok(total)
    }

    /// Probes every stored record, persists the latencies and returns the
    /// ranking. Ctrl-C cancels the pass and all in-flight probes.
    pub async fn rank(&self) -> Result<RankingPass> {
        let mut store = self.open_store().await?;
        let records = store.list();
        if records.is_empty() {
            warn!("Server store {} is empty, nothing to rank", store.path().display());
            return Ok(RankingPass {
                ranked: Vec::new(),
                selected: None,
            });
        }

        let ranker = ServerRanker::new(
            LatencyProbe::new(self.settings.probe_options()),
            self.settings.ranker_options(),
        );

        let pass = tokio::select! {
            pass = ranker.refresh(&records) => pass?,
            _ = tokio::signal::ctrl_c() => {
                ranker.cancel();
                anyhow::bail!("Ranking interrupted");
            }
        };

        apply_latencies(&mut store, &pass.ranked);
        store.save().await?;
        Ok(pass)
    }

    /// Single measurement with the configured strategy
    pub async fn ping(&self, host: &str, port: u16, timeout: Option<Duration>) -> Latency {
        let options = self.settings.probe_options();
        let timeout = timeout.unwrap_or(options.timeout);
        LatencyProbe::new(options)
            .measure_with_timeout(host, port, timeout)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BLOCK_TAG, DIRECT_TAG, PROXY_TAG};

    const TROJAN: &str = "trojan://secret@a.example.com:443?sni=a.example.com#A";
    const VLESS: &str =
        "vless://b831381d-6324-4d53-ad4f-8cda48b30811@b.example.com:443?security=tls&sni=b.example.com#B";

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("waypoint-client-{}-{}", name, std::process::id()))
    }

    fn client_in(dir: &std::path::Path) -> Client {
        let settings = Settings {
            store: dir.join("servers.json").display().to_string(),
            output: dir.join("out/outbound.json").display().to_string(),
            ..Settings::default()
        };
        Client::new(settings)
    }

    #[test]
    fn test_parse_reports_warnings() {
        let client = Client::new(Settings::default());
        let (record, report) = client.parse("trojan://secret@a.example.com:443").unwrap();
        assert_eq!(record.protocol(), Protocol::Trojan);
        assert!(report.is_valid());
    }

    #[test]
    fn test_parse_error_is_reported() {
        let client = Client::new(Settings::default());
        let err = client.parse("tuic://x@a.com:443").unwrap_err();
        assert!(err.to_string().contains("unsupported protocol"));
    }

    #[test]
    fn test_canonical_link_is_stable() {
        let client = Client::new(Settings::default());
        let once = client.canonical_link(TROJAN).unwrap();
        let twice = client.canonical_link(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_protocols() {
        let client = Client::new(Settings::default());
        assert_eq!(client.protocols().len(), 7);
    }

    #[tokio::test]
    async fn test_import_file_then_resolve_and_write_config() {
        let dir = temp_dir("import");
        let _ = tokio::fs::remove_dir_all(&dir).await;
        tokio::fs::create_dir_all(&dir).await.unwrap();

        let links = dir.join("links.txt");
        tokio::fs::write(&links, format!("{TROJAN}\n{VLESS}\nbogus://nothing\n"))
            .await
            .unwrap();

        let client = client_in(&dir);
        let report = client
            .import(Some(links.to_str().unwrap()))
            .await
            .unwrap();
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);

        let record = client.resolve("B").await.unwrap();
        assert_eq!(record.protocol(), Protocol::VLess);
        let by_id = client.resolve(&record.id).await.unwrap();
        assert_eq!(by_id, record);

        let document = client.generate(&record).unwrap();
        let tags: Vec<&str> = document.outbounds.iter().map(|o| o.tag.as_str()).collect();
        assert_eq!(tags, vec![PROXY_TAG, DIRECT_TAG, BLOCK_TAG]);

        let path = client.write_config(&document, None).await.unwrap();
        let written = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(written.contains("\"vless\""));

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_resolve_unknown_name() {
        let dir = temp_dir("resolve");
        let client = client_in(&dir);
        let err = client.resolve("nobody").await.unwrap_err();
        assert!(err.to_string().contains("No stored server"));
    }

    #[tokio::test]
    async fn test_import_without_source_or_subscriptions() {
        let dir = temp_dir("nosource");
        let client = client_in(&dir);
        let err = client.import(None).await.unwrap_err();
        assert!(err.to_string().contains("no subscriptions configured"));
    }

    #[tokio::test]
    async fn test_rank_empty_store() {
        let dir = temp_dir("rank-empty");
        let client = client_in(&dir);
        let pass = client.rank().await.unwrap();
        assert!(pass.ranked.is_empty());
        assert!(pass.selected.is_none());
    }
}
