//! Request and error counters for a network.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

/// Live counters, shared by a network's handle.
#[derive(Debug, Default)]
pub struct NetworkMetrics {
    requests: AtomicU64,
    errors: AtomicU64,
    last_active: Mutex<Option<DateTime<Utc>>>,
    performance: Mutex<BTreeMap<String, f64>>,
}

impl NetworkMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a request and mark the network active now.
    pub async fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        *self.last_active.lock().await = Some(Utc::now());
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Merge named performance figures, overwriting existing names.
    pub async fn update(&self, figures: impl IntoIterator<Item = (String, f64)>) {
        self.performance.lock().await.extend(figures);
    }

    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Errors per request; zero before the first request.
    pub fn error_rate(&self) -> f64 {
        let requests = self.request_count();
        if requests == 0 {
            return 0.0;
        }
        self.error_count() as f64 / requests as f64
    }

    pub async fn last_active(&self) -> Option<DateTime<Utc>> {
        *self.last_active.lock().await
    }

    pub async fn performance(&self) -> BTreeMap<String, f64> {
        self.performance.lock().await.clone()
    }
}

/// Point-in-time view of a network, as reported by `NetworkHandle::get_metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub network_id: String,
    pub name: String,
    pub is_active: bool,
    pub request_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub last_active: Option<DateTime<Utc>>,
    pub performance_metrics: BTreeMap<String, f64>,
    pub sub_networks_count: usize,
    /// Messages the protocol handed to handlers or resolved
    pub messages_received: u64,
    pub handler_failures: u64,
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Network {} ({}):", self.network_id, self.name)?;
        writeln!(f, "  Active:     {}", self.is_active)?;
        writeln!(f, "  Requests:   {}", self.request_count)?;
        writeln!(f, "  Errors:     {} ({:.1}%)", self.error_count, self.error_rate * 100.0)?;
        writeln!(f, "  Received:   {}", self.messages_received)?;
        writeln!(f, "  Failures:   {}", self.handler_failures)?;
        write!(f, "  Sub-nets:   {}", self.sub_networks_count)
    }
}
