//! Server ranking
//!
//! [`ServerRanker`] probes a set of records concurrently, waits for every
//! probe to finish or time out, then orders the results: favorites first,
//! then ascending latency, with [`Latency::Failed`] last within each bucket.
//!
//! Only one pass runs at a time. Starting a new pass cancels the previous
//! one, and cancelling a pass aborts every in-flight probe task.

use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::probe::{Latency, LatencyProbe, Probe};
use crate::record::ServerRecord;

pub const DEFAULT_CONCURRENCY: usize = 16;

// ============================================================================
// Types
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RankerOptions {
    /// Upper bound on probes in flight
    pub concurrency: usize,
    /// Select the best server automatically after each refresh
    pub auto_switch: bool,
}

impl Default for RankerOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            auto_switch: false,
        }
    }
}

/// A record paired with the latency measured in this pass. The record's own
/// latency field carries the same value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RankedServer {
    pub record: ServerRecord,
    pub latency: Latency,
}

/// Result of [`ServerRanker::refresh`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RankingPass {
    pub ranked: Vec<RankedServer>,
    /// Best record, set only when auto-switch is enabled
    pub selected: Option<ServerRecord>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RankError {
    /// The pass was cancelled explicitly or superseded by a newer pass
    Cancelled,
}

impl fmt::Display for RankError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RankError::Cancelled => write!(f, "ranking pass was cancelled"),
        }
    }
}

impl std::error::Error for RankError {}

// ============================================================================
// Server Ranker
// ============================================================================

pub struct ServerRanker<P: Probe = LatencyProbe> {
    probe: Arc<P>,
    options: RankerOptions,
    current: Mutex<Option<CancellationToken>>,
}

impl<P: Probe> ServerRanker<P> {
    pub fn new(probe: P, options: RankerOptions) -> Self {
        Self::with_shared_probe(Arc::new(probe), options)
    }

    pub fn with_shared_probe(probe: Arc<P>, options: RankerOptions) -> Self {
        Self {
            probe,
            options,
            current: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &RankerOptions {
        &self.options
    }

    pub fn set_auto_switch(&mut self, enabled: bool) {
        self.options.auto_switch = enabled;
    }

    /// Cancels the running pass, if any
    pub fn cancel(&self) {
        let token = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(token) = token {
            debug!("Cancelling ranking pass");
            token.cancel();
        }
    }

    /// Probes every record and returns them in ranking order.
    ///
    /// Output is produced only once every probe has completed. Cancellation
    /// discards all results.
    pub async fn rank_all(&self, records: &[ServerRecord]) -> Result<Vec<RankedServer>, RankError> {
        let token = self.begin_pass();
        info!(
            "Ranking {} servers (concurrency {})",
            records.len(),
            self.options.concurrency.max(1)
        );

        let latencies = self.probe_all(records, &token).await?;

        let mut ranked: Vec<RankedServer> = records
            .iter()
            .zip(latencies)
            .map(|(record, latency)| {
                let mut record = record.clone();
                record.latency = Some(latency);
                RankedServer { record, latency }
            })
            .collect();
        ranked.sort_by(ranking_order);

        let reachable = ranked.iter().filter(|r| !r.latency.is_failed()).count();
        info!("Ranked {} servers, {} reachable", ranked.len(), reachable);
        Ok(ranked)
    }

    /// Head of [`rank_all`](Self::rank_all)
    pub async fn pick_best(&self, records: &[ServerRecord]) -> Result<Option<ServerRecord>, RankError> {
        let ranked = self.rank_all(records).await?;
        Ok(ranked.into_iter().next().map(|r| r.record))
    }

    /// Ranks, then selects the best record when auto-switch is on
    pub async fn refresh(&self, records: &[ServerRecord]) -> Result<RankingPass, RankError> {
        let ranked = self.rank_all(records).await?;
        let selected = if self.options.auto_switch {
            ranked.first().map(|r| r.record.clone())
        } else {
            None
        };

        if let Some(record) = &selected {
            info!("Auto-switch selected '{}'", record.name);
        }
        Ok(RankingPass { ranked, selected })
    }

    fn begin_pass(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(token.clone());
        if let Some(previous) = previous {
            debug!("New ranking pass supersedes the previous one");
            previous.cancel();
        }
        token
    }

    /// One task per record; each writes only its own slot
    async fn probe_all(
        &self,
        records: &[ServerRecord],
        token: &CancellationToken,
    ) -> Result<Vec<Latency>, RankError> {
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for (index, record) in records.iter().enumerate() {
            let probe = Arc::clone(&self.probe);
            let semaphore = Arc::clone(&semaphore);
            let host = record.host.clone();
            let port = record.port;

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return (index, Latency::Failed);
                };
                (index, probe.measure(&host, port).await)
            });
        }

        let mut slots = vec![Latency::Failed; records.len()];
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tasks.abort_all();
                    info!("Ranking pass cancelled, {} probes aborted", tasks.len());
                    return Err(RankError::Cancelled);
                }
                joined = tasks.join_next() => match joined {
                    Some(Ok((index, latency))) => slots[index] = latency,
                    Some(Err(e)) => warn!("Probe task failed: {}", e),
                    None => break,
                },
            }
        }

        Ok(slots)
    }
}

/// Favorites first, then ascending latency; `sort_by` keeps input order for ties
fn ranking_order(a: &RankedServer, b: &RankedServer) -> Ordering {
    b.record
        .favorite
        .cmp(&a.record.favorite)
        .then_with(|| a.latency.cmp(&b.latency))
}
