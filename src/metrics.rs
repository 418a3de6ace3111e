//! Prometheus-compatible metrics endpoint
//!
//! Counters are plain atomics updated from the session, connection and
//! broadcast paths. The endpoint is a minimal HTTP responder on its own port
//! and is only started when `METRICS_PORT` is set.

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Rolling window for publish-time percentiles
const PUBLISH_HISTORY: usize = 1000;

/// Metrics registry for the game server
#[derive(Debug)]
pub struct Metrics {
    // Connections
    pub players_connected: AtomicU64,
    pub connections_total: AtomicU64,
    pub connections_rejected: AtomicU64,

    // Outbound traffic
    pub messages_enqueued: AtomicU64,
    pub messages_dropped: AtomicU64,
    pub messages_sent: AtomicU64,
    pub bytes_sent: AtomicU64,

    // Inbound traffic
    pub messages_received: AtomicU64,
    pub bytes_received: AtomicU64,
    pub intents_ignored: AtomicU64,

    // Broadcast ticks
    pub deltas_published: AtomicU64,
    pub ticks_skipped: AtomicU64,
    pub publish_time_us: AtomicU64,
    pub publish_time_p95_us: AtomicU64,
    pub publish_time_p99_us: AtomicU64,
    pub publish_time_max_us: AtomicU64,

    // Game
    pub items_collected: AtomicU64,
    pub games_completed: AtomicU64,
    pub resets: AtomicU64,

    start_time: Instant,
    publish_history: Mutex<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            players_connected: AtomicU64::new(0),
            connections_total: AtomicU64::new(0),
            connections_rejected: AtomicU64::new(0),
            messages_enqueued: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            intents_ignored: AtomicU64::new(0),
            deltas_published: AtomicU64::new(0),
            ticks_skipped: AtomicU64::new(0),
            publish_time_us: AtomicU64::new(0),
            publish_time_p95_us: AtomicU64::new(0),
            publish_time_p99_us: AtomicU64::new(0),
            publish_time_max_us: AtomicU64::new(0),
            items_collected: AtomicU64::new(0),
            games_completed: AtomicU64::new(0),
            resets: AtomicU64::new(0),
            start_time: Instant::now(),
            publish_history: Mutex::new(VecDeque::with_capacity(PUBLISH_HISTORY)),
        }
    }

    #[inline]
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn player_joined(&self) {
        Self::incr(&self.players_connected);
        Self::incr(&self.connections_total);
    }

    pub fn player_left(&self) {
        // Saturating: a stray double decrement must not wrap the gauge
        let _ = self
            .players_connected
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
    }

    /// Record the time one publication took and update percentiles
    pub fn record_publish_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.publish_time_us.store(us, Ordering::Relaxed);
        Self::incr(&self.deltas_published);

        let mut history = self.publish_history.lock();
        history.push_back(us);
        while history.len() > PUBLISH_HISTORY {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();
            let last = sorted.len() - 1;
            let p95 = ((sorted.len() as f32 * 0.95) as usize).min(last);
            let p99 = ((sorted.len() as f32 * 0.99) as usize).min(last);

            self.publish_time_p95_us.store(sorted[p95], Ordering::Relaxed);
            self.publish_time_p99_us.store(sorted[p99], Ordering::Relaxed);
            self.publish_time_max_us.store(sorted[last], Ordering::Relaxed);
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP grid_collector_{} {}\n# TYPE grid_collector_{} {}\ngrid_collector_{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!("players_connected", "Currently connected players", "gauge",
            self.players_connected.load(Ordering::Relaxed));
        metric!("connections_total", "Accepted WebSocket connections", "counter",
            self.connections_total.load(Ordering::Relaxed));
        metric!("connections_rejected_total", "Failed or refused upgrade attempts", "counter",
            self.connections_rejected.load(Ordering::Relaxed));

        metric!("messages_enqueued_total", "Messages placed in player mailboxes", "counter",
            self.messages_enqueued.load(Ordering::Relaxed));
        metric!("messages_dropped_total", "Messages dropped on a full mailbox", "counter",
            self.messages_dropped.load(Ordering::Relaxed));
        metric!("messages_sent_total", "Messages written to sockets", "counter",
            self.messages_sent.load(Ordering::Relaxed));
        metric!("bytes_sent_total", "Bytes written to sockets", "counter",
            self.bytes_sent.load(Ordering::Relaxed));
        metric!("messages_received_total", "Client messages received", "counter",
            self.messages_received.load(Ordering::Relaxed));
        metric!("bytes_received_total", "Client bytes received", "counter",
            self.bytes_received.load(Ordering::Relaxed));
        metric!("intents_ignored_total", "Malformed or rejected client intents", "counter",
            self.intents_ignored.load(Ordering::Relaxed));

        metric!("deltas_published_total", "Delta updates broadcast", "counter",
            self.deltas_published.load(Ordering::Relaxed));
        metric!("ticks_skipped_total", "Broadcast ticks with nothing to publish", "counter",
            self.ticks_skipped.load(Ordering::Relaxed));
        metric!("publish_time_microseconds", "Last publication time", "gauge",
            self.publish_time_us.load(Ordering::Relaxed));
        metric!("publish_time_p95_microseconds", "95th percentile publication time", "gauge",
            self.publish_time_p95_us.load(Ordering::Relaxed));
        metric!("publish_time_p99_microseconds", "99th percentile publication time", "gauge",
            self.publish_time_p99_us.load(Ordering::Relaxed));
        metric!("publish_time_max_microseconds", "Maximum publication time in window", "gauge",
            self.publish_time_max_us.load(Ordering::Relaxed));

        metric!("items_collected_total", "Items collected", "counter",
            self.items_collected.load(Ordering::Relaxed));
        metric!("games_completed_total", "Episodes ended by collecting the last item", "counter",
            self.games_completed.load(Ordering::Relaxed));
        metric!("resets_total", "Episodes restarted on request", "counter",
            self.resets.load(Ordering::Relaxed));
        metric!("uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }

    /// JSON format metrics for direct API access
    pub fn to_json(&self) -> String {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        serde_json::json!({
            "players": {
                "connected": load(&self.players_connected),
                "connections_total": load(&self.connections_total),
                "connections_rejected": load(&self.connections_rejected),
            },
            "network": {
                "messages_enqueued": load(&self.messages_enqueued),
                "messages_dropped": load(&self.messages_dropped),
                "messages_sent": load(&self.messages_sent),
                "bytes_sent": load(&self.bytes_sent),
                "messages_received": load(&self.messages_received),
                "bytes_received": load(&self.bytes_received),
                "intents_ignored": load(&self.intents_ignored),
            },
            "broadcast": {
                "deltas_published": load(&self.deltas_published),
                "ticks_skipped": load(&self.ticks_skipped),
                "publish_time_us": load(&self.publish_time_us),
                "publish_time_p95_us": load(&self.publish_time_p95_us),
                "publish_time_p99_us": load(&self.publish_time_p99_us),
                "publish_time_max_us": load(&self.publish_time_max_us),
            },
            "game": {
                "items_collected": load(&self.items_collected),
                "games_completed": load(&self.games_completed),
                "resets": load(&self.resets),
                "uptime_seconds": self.uptime_seconds(),
            },
        })
        .to_string()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Route a raw HTTP request to a response
fn respond(metrics: &Metrics, request: &str) -> String {
    let path = request
        .lines()
        .next()
        .and_then(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some("GET"), Some(path)) => Some(path),
                _ => None,
            }
        })
        .unwrap_or("");

    let (content_type, body) = match path {
        "/metrics" => ("text/plain; version=0.0.4", metrics.to_prometheus()),
        "/metrics/json" => ("application/json", metrics.to_json()),
        "/health" | "/" => ("text/plain", "OK".to_string()),
        _ => {
            return "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .to_string()
        }
    };

    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        content_type,
        body.len(),
        body
    )
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(
    metrics: Arc<Metrics>,
    address: IpAddr,
    port: u16,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind((address, port)).await?;
    info!("Metrics server listening on http://{}/metrics", listener.local_addr()?);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);
                    let response = respond(&metrics, &request);
                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}
