//! Prometheus-compatible metrics endpoint
//!
//! Exposes redaction, cache and refresh counters in Prometheus format.
//! Default endpoint: http://localhost:9090/metrics

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::visibility::VisibilityStore;

/// Values read from live state at render time rather than counted
#[derive(Debug, Clone, Copy, Default)]
pub struct Gauges {
    pub players_with_settings: u64,
}

/// Metrics registry
#[derive(Debug)]
pub struct Metrics {
    // Packet pipeline
    pub packets_written: AtomicU64,
    pub packets_redacted: AtomicU64,
    pub packets_passed: AtomicU64,
    pub records_redacted: AtomicU64,
    pub redaction_failures: AtomicU64,
    pub bytes_sent: AtomicU64,

    // Entity resolver
    pub resolver_hits: AtomicU64,
    pub resolver_scans: AtomicU64,

    // Broadcast dedup cache
    pub dedup_hits: AtomicU64,
    pub dedup_misses: AtomicU64,
    pub dedup_evictions: AtomicU64,

    // Equipment re-sends
    pub refresh_scheduled: AtomicU64,
    pub refresh_coalesced: AtomicU64,
    pub refresh_failed: AtomicU64,

    // State file
    pub saves_completed: AtomicU64,
    pub saves_failed: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            packets_written: AtomicU64::new(0),
            packets_redacted: AtomicU64::new(0),
            packets_passed: AtomicU64::new(0),
            records_redacted: AtomicU64::new(0),
            redaction_failures: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            resolver_hits: AtomicU64::new(0),
            resolver_scans: AtomicU64::new(0),
            dedup_hits: AtomicU64::new(0),
            dedup_misses: AtomicU64::new(0),
            dedup_evictions: AtomicU64::new(0),
            refresh_scheduled: AtomicU64::new(0),
            refresh_coalesced: AtomicU64::new(0),
            refresh_failed: AtomicU64::new(0),
            saves_completed: AtomicU64::new(0),
            saves_failed: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self, gauges: &Gauges) -> String {
        let mut output = String::with_capacity(2048);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!("armor_veil_packets_written_total", "Packets handed to a viewer channel", "counter",
            self.packets_written.load(Ordering::Relaxed));
        metric!("armor_veil_packets_redacted_total", "Packets rewritten with hidden armor", "counter",
            self.packets_redacted.load(Ordering::Relaxed));
        metric!("armor_veil_packets_passed_total", "Packets forwarded unchanged", "counter",
            self.packets_passed.load(Ordering::Relaxed));
        metric!("armor_veil_records_redacted_total", "Entity records rewritten", "counter",
            self.records_redacted.load(Ordering::Relaxed));
        metric!("armor_veil_redaction_failures_total", "Redaction attempts that failed open", "counter",
            self.redaction_failures.load(Ordering::Relaxed));
        metric!("armor_veil_bytes_sent_total", "Bytes queued to transports", "counter",
            self.bytes_sent.load(Ordering::Relaxed));

        metric!("armor_veil_resolver_hits_total", "Network id lookups served from cache", "counter",
            self.resolver_hits.load(Ordering::Relaxed));
        metric!("armor_veil_resolver_scans_total", "Network id lookups that scanned the roster", "counter",
            self.resolver_scans.load(Ordering::Relaxed));

        metric!("armor_veil_dedup_hits_total", "Broadcast packets served already decoded", "counter",
            self.dedup_hits.load(Ordering::Relaxed));
        metric!("armor_veil_dedup_misses_total", "Broadcast packets decoded", "counter",
            self.dedup_misses.load(Ordering::Relaxed));
        metric!("armor_veil_dedup_evictions_total", "Decoded broadcast entries evicted", "counter",
            self.dedup_evictions.load(Ordering::Relaxed));

        metric!("armor_veil_refresh_scheduled_total", "Equipment re-sends scheduled", "counter",
            self.refresh_scheduled.load(Ordering::Relaxed));
        metric!("armor_veil_refresh_coalesced_total", "Equipment re-send triggers coalesced", "counter",
            self.refresh_coalesced.load(Ordering::Relaxed));
        metric!("armor_veil_refresh_failed_total", "Equipment re-sends that failed", "counter",
            self.refresh_failed.load(Ordering::Relaxed));

        metric!("armor_veil_saves_completed_total", "State file saves written", "counter",
            self.saves_completed.load(Ordering::Relaxed));
        metric!("armor_veil_saves_failed_total", "State file saves that failed", "counter",
            self.saves_failed.load(Ordering::Relaxed));

        metric!("armor_veil_players_with_settings", "Players with an explicit visibility mask", "gauge",
            gauges.players_with_settings);
        metric!("armor_veil_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// Generate JSON format metrics
    pub fn to_json(&self, gauges: &Gauges) -> String {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        serde_json::json!({
            "packets": {
                "written": load(&self.packets_written),
                "redacted": load(&self.packets_redacted),
                "passed": load(&self.packets_passed),
                "records_redacted": load(&self.records_redacted),
                "failures": load(&self.redaction_failures),
                "bytes_sent": load(&self.bytes_sent),
            },
            "resolver": {
                "hits": load(&self.resolver_hits),
                "scans": load(&self.resolver_scans),
            },
            "dedup": {
                "hits": load(&self.dedup_hits),
                "misses": load(&self.dedup_misses),
                "evictions": load(&self.dedup_evictions),
            },
            "refresh": {
                "scheduled": load(&self.refresh_scheduled),
                "coalesced": load(&self.refresh_coalesced),
                "failed": load(&self.refresh_failed),
            },
            "saves": {
                "completed": load(&self.saves_completed),
                "failed": load(&self.saves_failed),
            },
            "players_with_settings": gauges.players_with_settings,
            "uptime_seconds": self.uptime_seconds(),
        })
        .to_string()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Largest request head we look at; only the request line matters
const MAX_REQUEST_HEAD: usize = 1024;

/// One canned HTTP/1.1 response
#[derive(Debug, PartialEq, Eq)]
pub struct Response {
    pub status: &'static str,
    pub content_type: &'static str,
    pub body: String,
}

impl Response {
    fn ok(content_type: &'static str, body: String) -> Self {
        Self {
            status: "200 OK",
            content_type,
            body,
        }
    }

    fn error(status: &'static str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: String::new(),
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        format!(
            "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            self.content_type,
            self.body.len(),
            self.body
        )
        .into_bytes()
    }
}

/// Serves `/metrics`, `/metrics/json` and `/health`
///
/// Gauges are read from the store per request, so they never lag behind it.
pub struct MetricsServer {
    metrics: Arc<Metrics>,
    store: Arc<VisibilityStore>,
}

impl MetricsServer {
    pub fn new(metrics: Arc<Metrics>, store: Arc<VisibilityStore>) -> Self {
        Self { metrics, store }
    }

    pub fn gauges(&self) -> Gauges {
        Gauges {
            players_with_settings: self.store.len() as u64,
        }
    }

    /// Answer a request given its request line, e.g. `GET /metrics HTTP/1.1`
    pub fn respond(&self, request_line: &str) -> Response {
        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
            return Response::error("400 Bad Request");
        };
        if method != "GET" {
            return Response::error("405 Method Not Allowed");
        }

        let path = target.split('?').next().unwrap_or(target);
        match path {
            "/metrics" => Response::ok(
                "text/plain; version=0.0.4",
                self.metrics.to_prometheus(&self.gauges()),
            ),
            "/metrics/json" => Response::ok("application/json", self.metrics.to_json(&self.gauges())),
            "/health" => Response::ok("text/plain", "OK".to_string()),
            _ => Response::error("404 Not Found"),
        }
    }

    /// Accept connections until the listener fails
    pub async fn serve(self: Arc<Self>, port: u16) -> anyhow::Result<()> {
        let addr = format!("0.0.0.0:{}", port);
        let listener = TcpListener::bind(&addr).await?;
        info!("Metrics server listening on http://{}/metrics", addr);

        loop {
            let (socket, peer) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle(socket).await {
                    debug!("Metrics request from {} failed: {}", peer, e);
                }
            });
        }
    }

    async fn handle(&self, mut socket: TcpStream) -> std::io::Result<()> {
        let mut head = [0u8; MAX_REQUEST_HEAD];
        let n = socket.read(&mut head).await?;
        if n == 0 {
            return Ok(());
        }
        let request = String::from_utf8_lossy(&head[..n]);
        let request_line = request.lines().next().unwrap_or_default();
        socket.write_all(&self.respond(request_line).to_bytes()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::visibility::GlobalVisibilityConfig;
    use uuid::Uuid;

    fn server() -> (MetricsServer, Arc<Metrics>, Arc<VisibilityStore>) {
        let metrics = Arc::new(Metrics::new());
        let store = Arc::new(VisibilityStore::new(GlobalVisibilityConfig::default()));
        (MetricsServer::new(metrics.clone(), store.clone()), metrics, store)
    }

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.packets_written.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.dedup_hits.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_prometheus_format() {
        let metrics = Metrics::new();
        metrics.packets_redacted.store(12, Ordering::Relaxed);
        Metrics::incr(&metrics.refresh_coalesced);

        let output = metrics.to_prometheus(&Gauges {
            players_with_settings: 7,
        });

        assert!(output.contains("armor_veil_packets_redacted_total 12"));
        assert!(output.contains("armor_veil_refresh_coalesced_total 1"));
        assert!(output.contains("armor_veil_players_with_settings 7"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn test_json_format() {
        let metrics = Metrics::new();
        metrics.resolver_scans.store(3, Ordering::Relaxed);

        let json = metrics.to_json(&Gauges::default());
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["resolver"]["scans"], 3);
        assert_eq!(parsed["packets"]["written"], 0);
        assert_eq!(parsed["players_with_settings"], 0);
    }

    #[test]
    fn test_players_gauge_tracks_store() {
        let (server, _, store) = server();
        assert_eq!(server.gauges().players_with_settings, 0);

        let player = Uuid::new_v4();
        store.set_mask(player, 0b0011);
        store.set_mask(Uuid::new_v4(), 0x100);
        let response = server.respond("GET /metrics HTTP/1.1");
        assert!(response.body.contains("armor_veil_players_with_settings 2"));

        store.set_mask(player, 0);
        assert_eq!(server.gauges().players_with_settings, 1);
    }

    #[test]
    fn test_routes() {
        let (server, metrics, _) = server();
        Metrics::incr(&metrics.saves_completed);

        let json = server.respond("GET /metrics/json?pretty=1 HTTP/1.1");
        assert_eq!(json.status, "200 OK");
        assert_eq!(json.content_type, "application/json");
        assert!(json.body.contains("\"completed\":1"));

        assert_eq!(server.respond("GET /health HTTP/1.1").body, "OK");
        assert_eq!(server.respond("GET /metricsx HTTP/1.1").status, "404 Not Found");
        assert_eq!(
            server.respond("POST /metrics HTTP/1.1").status,
            "405 Method Not Allowed"
        );
        assert_eq!(server.respond("").status, "400 Bad Request");
    }

    #[test]
    fn test_response_bytes() {
        let bytes = Response::ok("text/plain", "OK".to_string()).to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\nOK"));
    }
}
