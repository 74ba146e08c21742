// src/metrics.rs
//
// Prometheus metrics surface, served over tiny_http on a dedicated OS
// thread so a slow scrape never touches the trading loop.

use std::sync::Arc;
use std::thread::JoinHandle;

use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};
use tiny_http::{Header, Response, Server};

#[derive(Clone)]
pub struct EngineMetrics {
    registry: Registry,
    order_count: GaugeVec,
    account_balance: GaugeVec,
    market_volume_24h: CounterVec,
}

impl EngineMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let order_count = GaugeVec::new(
            Opts::new("order_count", "Resting order count"),
            &["side", "market"],
        )
        .expect("order count gauge");
        let account_balance = GaugeVec::new(
            Opts::new("account_balance", "Account balance by currency"),
            &["name", "type", "currency"],
        )
        .expect("account balance gauge");
        let market_volume_24h = CounterVec::new(
            Opts::new("market_volume_24h", "Observed 24h market volume"),
            &["market"],
        )
        .expect("market volume counter");
        registry
            .register(Box::new(order_count.clone()))
            .expect("reg order count");
        registry
            .register(Box::new(account_balance.clone()))
            .expect("reg account balance");
        registry
            .register(Box::new(market_volume_24h.clone()))
            .expect("reg market volume");
        Self {
            registry,
            order_count,
            account_balance,
            market_volume_24h,
        }
    }

    pub fn set_order_count(&self, side: &str, market: &str, count: usize) {
        self.order_count
            .with_label_values(&[side, market])
            .set(count as f64);
    }

    pub fn set_account_balance(&self, name: &str, kind: &str, currency: &str, value: f64) {
        self.account_balance
            .with_label_values(&[name, kind, currency])
            .set(value);
    }

    pub fn add_market_volume(&self, market: &str, base_volume: f64) {
        self.market_volume_24h
            .with_label_values(&[market])
            .inc_by(base_volume);
    }

    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        if encoder.encode(&self.registry.gather(), &mut buf).is_err() {
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Scrape endpoint. `stop()` unblocks the server thread.
pub struct MetricsServer {
    server: Arc<Server>,
    handle: Option<JoinHandle<()>>,
}

impl MetricsServer {
    pub fn start(bind: &str, metrics: EngineMetrics) -> std::io::Result<Self> {
        let server = Arc::new(
            Server::http(bind).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?,
        );
        let accept = Arc::clone(&server);
        let handle = std::thread::spawn(move || {
            for request in accept.incoming_requests() {
                let body = metrics.render();
                let header =
                    Header::from_bytes(&b"Content-Type"[..], &b"text/plain; version=0.0.4"[..])
                        .expect("content-type header");
                let _ = request.respond(Response::from_string(body).with_header(header));
            }
        });
        Ok(Self {
            server,
            handle: Some(handle),
        })
    }

    pub fn stop(mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauges_render_with_labels() {
        let metrics = EngineMetrics::new();
        metrics.set_order_count("buy", "BTCUSD", 4);
        metrics.set_account_balance("main", "free", "USD", 100.5);
        metrics.add_market_volume("BTCUSD", 12.5);
        let rendered = metrics.render();
        assert!(rendered.contains("order_count{market=\"BTCUSD\",side=\"buy\"} 4"));
        assert!(rendered.contains("account_balance"));
        assert!(rendered.contains("market_volume_24h{market=\"BTCUSD\"} 12.5"));
    }
}
