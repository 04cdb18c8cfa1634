//! Latency probing
//!
//! [`LatencyProbe`] measures round-trip connect time to one endpoint with a
//! layered strategy, stopping at the first strategy that succeeds:
//!
//! 1. ICMP echo through the system `ping`, where the environment permits it
//! 2. TCP connect timing
//! 3. HTTP HEAD timing, only on conventional web ports
//!
//! Each strategy samples a few times and keeps the minimum. Every failure
//! path, including the hard timeout, folds into [`Latency::Failed`].

use std::cmp::Ordering;
use std::fmt;
use std::future::Future;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::net::{TcpStream, lookup_host};
use tokio::process::Command;
use tracing::{debug, trace, warn};

use crate::get_version;
use crate::record::bracket_host;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_SAMPLES: u32 = 3;

// ============================================================================
// Latency
// ============================================================================

/// Outcome of one measurement. `Failed` is distinct from `Millis(0)` and
/// sorts after every successful measurement.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Latency {
    Millis(u64),
    Failed,
}

impl Latency {
    pub fn from_duration(duration: Duration) -> Self {
        Latency::Millis(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Latency::Failed)
    }

    pub fn millis(&self) -> Option<u64> {
        match self {
            Latency::Millis(ms) => Some(*ms),
            Latency::Failed => None,
        }
    }
}

impl Ord for Latency {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Latency::Millis(a), Latency::Millis(b)) => a.cmp(b),
            (Latency::Millis(_), Latency::Failed) => Ordering::Less,
            (Latency::Failed, Latency::Millis(_)) => Ordering::Greater,
            (Latency::Failed, Latency::Failed) => Ordering::Equal,
        }
    }
}

impl PartialOrd for Latency {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Latency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Latency::Millis(ms) => write!(f, "{} ms", ms),
            Latency::Failed => write!(f, "no ping"),
        }
    }
}

// ============================================================================
// Probe Options
// ============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeOptions {
    /// Hard limit for one whole measurement
    pub timeout: Duration,
    /// Attempts per strategy
    pub samples: u32,
    /// Try ICMP echo before TCP
    pub icmp: bool,
    /// Fall back to HTTP HEAD on web ports
    pub http: bool,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            samples: DEFAULT_SAMPLES,
            icmp: true,
            http: true,
        }
    }
}

impl ProbeOptions {
    /// Per-attempt bound: a quarter of the hard timeout
    pub fn attempt_timeout(&self) -> Duration {
        self.timeout / 4
    }
}

// ============================================================================
// Probe Trait
// ============================================================================

/// Something that can measure the latency of an endpoint
pub trait Probe: Send + Sync + 'static {
    fn measure(&self, host: &str, port: u16) -> impl Future<Output = Latency> + Send;
}

// ============================================================================
// Latency Probe
// ============================================================================

pub struct LatencyProbe {
    options: ProbeOptions,
    http: Option<reqwest::Client>,
}

impl Default for LatencyProbe {
    fn default() -> Self {
        Self::new(ProbeOptions::default())
    }
}

impl LatencyProbe {
    pub fn new(options: ProbeOptions) -> Self {
        let http = if options.http {
            match build_http_client() {
                Ok(client) => Some(client),
                Err(e) => {
                    warn!("Failed to build HTTP probe client, HEAD timing disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Self { options, http }
    }

    pub fn options(&self) -> &ProbeOptions {
        &self.options
    }

    /// Measures with an explicit hard timeout instead of the configured one
    pub async fn measure_with_timeout(&self, host: &str, port: u16, timeout: Duration) -> Latency {
        let started = Instant::now();
        match tokio::time::timeout(timeout, self.run_strategies(host, port, timeout / 4)).await {
            Ok(latency) => {
                debug!(
                    "Probed {}:{} -> {} in {:?}",
                    host,
                    port,
                    latency,
                    started.elapsed()
                );
                latency
            }
            Err(_) => {
                debug!("Probe of {}:{} hit the {:?} timeout", host, port, timeout);
                Latency::Failed
            }
        }
    }

    async fn run_strategies(&self, host: &str, port: u16, attempt_timeout: Duration) -> Latency {
        let samples = self.options.samples.max(1);

        if self.options.icmp
            && let Some(rtt) = sample(samples, || icmp_attempt(host, attempt_timeout)).await
        {
            trace!("ICMP succeeded for {}", host);
            return Latency::from_duration(rtt);
        }

        if let Some(rtt) = sample(samples, || tcp_attempt(host, port, attempt_timeout)).await {
            trace!("TCP connect succeeded for {}:{}", host, port);
            return Latency::from_duration(rtt);
        }

        if let Some(client) = &self.http
            && let Some(scheme) = web_scheme(port)
        {
            let url = format!("{}://{}:{}/", scheme, bracket_host(host), port);
            if let Some(rtt) = sample(samples, || head_attempt(client, &url, attempt_timeout)).await
            {
                trace!("HTTP HEAD succeeded for {}", url);
                return Latency::from_duration(rtt);
            }
        }

        Latency::Failed
    }
}

impl Probe for LatencyProbe {
    fn measure(&self, host: &str, port: u16) -> impl Future<Output = Latency> + Send {
        self.measure_with_timeout(host, port, self.options.timeout)
    }
}

fn build_http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(format!("waypoint/{}", get_version()))
        .danger_accept_invalid_certs(true)
        .no_proxy()
        .redirect(reqwest::redirect::Policy::none())
        .build()
}

// ============================================================================
// Strategies
// ============================================================================

/// Runs up to `samples` attempts and keeps the fastest. Gives up on the
/// strategy at the first failure when nothing has succeeded yet.
async fn sample<F, Fut>(samples: u32, mut attempt: F) -> Option<Duration>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<Duration>>,
{
    let mut best: Option<Duration> = None;
    for _ in 0..samples {
        match attempt().await {
            Some(rtt) => best = Some(best.map_or(rtt, |b| b.min(rtt))),
            None if best.is_none() => break,
            None => {}
        }
    }
    best
}

/// One echo through the system `ping`. Any failure (missing binary, no
/// permission, no reply) returns `None` so the next strategy runs.
async fn icmp_attempt(host: &str, timeout: Duration) -> Option<Duration> {
    let wait_secs = timeout.as_secs().max(1).to_string();
    let child = Command::new("ping")
        .args(["-n", "-c", "1", "-W", &wait_secs])
        .arg(host)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(timeout, child).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            trace!("ICMP unavailable: {}", e);
            return None;
        }
        Err(_) => return None,
    };

    if !output.status.success() {
        return None;
    }
    parse_ping_time(&String::from_utf8_lossy(&output.stdout))
}

/// Extracts the round-trip time from `ping` output (`time=12.3 ms` or `time<1 ms`)
pub(crate) fn parse_ping_time(output: &str) -> Option<Duration> {
    let start = output
        .find("time=")
        .or_else(|| output.find("time<"))
        .map(|idx| idx + 5)?;
    let number: String = output[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let ms: f64 = number.parse().ok()?;
    Duration::try_from_secs_f64(ms / 1000.0).ok()
}

/// Resolves, then times only the connect. The socket is closed on drop.
async fn tcp_attempt(host: &str, port: u16, timeout: Duration) -> Option<Duration> {
    let addr = match tokio::time::timeout(timeout, lookup_host((host, port))).await {
        Ok(Ok(mut addrs)) => addrs.next()?,
        Ok(Err(e)) => {
            trace!("Failed to resolve {}: {}", host, e);
            return None;
        }
        Err(_) => return None,
    };

    let started = Instant::now();
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            let rtt = started.elapsed();
            drop(stream);
            Some(rtt)
        }
        Ok(Err(e)) => {
            trace!("TCP connect to {} failed: {}", addr, e);
            None
        }
        Err(_) => None,
    }
}

/// Any HTTP response counts, whatever its status
async fn head_attempt(client: &reqwest::Client, url: &str, timeout: Duration) -> Option<Duration> {
    let started = Instant::now();
    match client.head(url).timeout(timeout).send().await {
        Ok(_) => Some(started.elapsed()),
        Err(e) => {
            trace!("HEAD {} failed: {}", url, e);
            None
        }
    }
}

fn web_scheme(port: u16) -> Option<&'static str> {
    match port {
        80 | 8080 => Some("http"),
        443 | 8443 => Some("https"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn tcp_only(timeout: Duration) -> ProbeOptions {
        ProbeOptions {
            timeout,
            samples: 2,
            icmp: false,
            http: false,
        }
    }

    #[test]
    fn test_latency_ordering() {
        let mut values = vec![
            Latency::Failed,
            Latency::Millis(50),
            Latency::Millis(0),
            Latency::Millis(20),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Latency::Millis(0),
                Latency::Millis(20),
                Latency::Millis(50),
                Latency::Failed
            ]
        );
        assert!(Latency::Millis(u64::MAX) < Latency::Failed);
    }

    #[test]
    fn test_latency_display() {
        assert_eq!(Latency::Millis(42).to_string(), "42 ms");
        assert_eq!(Latency::Failed.to_string(), "no ping");
    }

    #[test]
    fn test_latency_serde() {
        assert_eq!(serde_json::to_string(&Latency::Failed).unwrap(), "\"failed\"");
        assert_eq!(
            serde_json::to_string(&Latency::Millis(7)).unwrap(),
            r#"{"millis":7}"#
        );
        let parsed: Latency = serde_json::from_str(r#"{"millis":12}"#).unwrap();
        assert_eq!(parsed, Latency::Millis(12));
    }

    #[test]
    fn test_parse_ping_time() {
        let as_ms = |d: Duration| d.as_secs_f64() * 1000.0;

        let linux = "64 bytes from 1.1.1.1: icmp_seq=1 ttl=57 time=12.4 ms";
        let rtt = parse_ping_time(linux).unwrap();
        assert!((as_ms(rtt) - 12.4).abs() < 1e-3);

        let sub_ms = "Reply from 10.0.0.1: bytes=32 time<1ms TTL=64";
        let rtt = parse_ping_time(sub_ms).unwrap();
        assert!((as_ms(rtt) - 1.0).abs() < 1e-3);

        assert_eq!(parse_ping_time("Request timed out."), None);
        assert_eq!(parse_ping_time("time=abc"), None);

        // Out of Duration's range
        let huge = format!("time={} ms", "9".repeat(400));
        assert_eq!(parse_ping_time(&huge), None);
    }

    #[test]
    fn test_web_scheme() {
        assert_eq!(web_scheme(80), Some("http"));
        assert_eq!(web_scheme(8443), Some("https"));
        assert_eq!(web_scheme(22), None);
    }

    #[test]
    fn test_attempt_timeout_is_quarter() {
        let options = ProbeOptions {
            timeout: Duration::from_millis(2000),
            ..ProbeOptions::default()
        };
        assert_eq!(options.attempt_timeout(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_sample_keeps_minimum() {
        let mut durations = vec![30u64, 10, 20].into_iter();
        let best = sample(3, || {
            let next = durations.next().map(Duration::from_millis);
            async move { next }
        })
        .await;
        assert_eq!(best, Some(Duration::from_millis(10)));
    }

    #[tokio::test]
    async fn test_sample_stops_at_first_failure() {
        let mut calls = 0;
        let best = sample(3, || {
            calls += 1;
            async { None }
        })
        .await;
        assert_eq!(best, None);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_measure_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let probe = LatencyProbe::new(tcp_only(Duration::from_secs(2)));
        let latency = probe.measure("127.0.0.1", port).await;
        assert!(!latency.is_failed());
    }

    #[tokio::test]
    async fn test_measure_unroutable_returns_failed_within_timeout() {
        let timeout = Duration::from_millis(800);
        let probe = LatencyProbe::new(tcp_only(timeout));

        let started = Instant::now();
        let latency = probe.measure("192.0.2.1", 9).await;
        assert_eq!(latency, Latency::Failed);
        assert!(started.elapsed() < timeout + Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_measure_unresolvable_host() {
        let probe = LatencyProbe::new(tcp_only(Duration::from_millis(800)));
        let latency = probe.measure("host.invalid", 443).await;
        assert_eq!(latency, Latency::Failed);
    }

    /// Answers every request on one connection with an empty 200
    async fn serve_head_once(listener: TcpListener) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            request.extend_from_slice(&buf[..n]);
        }
        assert!(request.starts_with(b"HEAD / "));
        socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_head_attempt_times_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(serve_head_once(listener));

        let client = build_http_client().unwrap();
        let url = format!("http://127.0.0.1:{port}/");
        let rtt = head_attempt(&client, &url, Duration::from_secs(2)).await;
        assert!(rtt.is_some());
        assert!(rtt.unwrap() < Duration::from_secs(2));

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_head_attempt_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = build_http_client().unwrap();
        let url = format!("http://127.0.0.1:{port}/");
        assert_eq!(head_attempt(&client, &url, Duration::from_secs(1)).await, None);
    }
}
