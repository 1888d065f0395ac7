// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, GaugeVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Chat & parse flow --------
pub static CHATS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("chats_total", "inbound chat messages").unwrap());

pub static CHATS_BY_SHOP: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("chats_total_by_shop", "inbound chat messages per shop"),
        &["shop"],
    )
    .unwrap()
});

pub static PARSE_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "parse_outcomes_total",
            "parser outcomes (label: outcome = intent|unknown_item|invalid_number|no_intent)",
        ),
        &["outcome"],
    )
    .unwrap()
});

// -------- Negotiation outcomes --------
pub static TRADES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("trades_total", "settled trades"), &["side", "shop"]).unwrap()
});

pub static TRADE_COUNTERS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("trade_counters_total", "price rejections answered with a counter-offer"),
        &["side"],
    )
    .unwrap()
});

pub static TRADE_REJECTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("trade_rejects_total", "guard refusals (label: reason)"),
        &["reason"],
    )
    .unwrap()
});

// -------- Market --------
pub static MARKET_PRICE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("market_price", "current price per item"), &["item"]).unwrap()
});

pub static MARKET_DEMAND: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(Opts::new("market_demand", "demand multiplier per item"), &["item"]).unwrap()
});

pub static MARKET_REFRESHES: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("market_refreshes_total", "lazy price refreshes performed").unwrap());

// -------- Dialogue fallback --------
pub static DIALOGUE_FALLBACKS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("dialogue_fallbacks_total", "messages delegated to the dialogue backend")
        .unwrap()
});

pub static DIALOGUE_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("dialogue_errors_total", "dialogue backend failures recovered as apologies")
        .unwrap()
});

// -------- Sessions --------
pub static PORTFOLIO_RESETS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("portfolio_resets_total", "explicit portfolio resets").unwrap());

// ---- Config visibility (dialogue mode / shops) ----
pub static CONFIG_DIALOGUE_MODE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_dialogue_mode", "dialogue mode (label: mode)"),
        &["mode"],
    )
    .unwrap()
});

pub static CONFIG_SHOP: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("config_shop", "configured shops (label: shop)"), &["shop"])
        .unwrap()
});

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(CHATS.clone())),
        REGISTRY.register(Box::new(CHATS_BY_SHOP.clone())),
        REGISTRY.register(Box::new(PARSE_OUTCOMES.clone())),
        REGISTRY.register(Box::new(TRADES.clone())),
        REGISTRY.register(Box::new(TRADE_COUNTERS.clone())),
        REGISTRY.register(Box::new(TRADE_REJECTS.clone())),
        REGISTRY.register(Box::new(MARKET_PRICE.clone())),
        REGISTRY.register(Box::new(MARKET_DEMAND.clone())),
        REGISTRY.register(Box::new(MARKET_REFRESHES.clone())),
        REGISTRY.register(Box::new(DIALOGUE_FALLBACKS.clone())),
        REGISTRY.register(Box::new(DIALOGUE_ERRORS.clone())),
        REGISTRY.register(Box::new(PORTFOLIO_RESETS.clone())),
        // Config visibility
        REGISTRY.register(Box::new(CONFIG_DIALOGUE_MODE.clone())),
        REGISTRY.register(Box::new(CONFIG_SHOP.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics) — tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    // Read a bit to consume headers (no full parse)
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Run the metrics server in a dedicated OS thread (keeps Tokio runtime clean)
pub async fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                eprintln!("metrics bind {addr} failed: {e}");
                return;
            }
        };
        eprintln!("metrics listening on http://{addr}/ (and /metrics)");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => eprintln!("metrics accept error: {}", e),
            }
        }
    });
}
