// ===============================
// src/main.rs
// ===============================
/*
 cd /home/kukuhtw/rust/pasar_bot_rust

 # konfigurasi yang aktif
curl -s localhost:9898/metrics | egrep '^config_(dialogue_mode|shop)'

# aktivitas chat & hasil negosiasi
curl -s localhost:9898/metrics | grep '^chats_total_by_shop'
curl -s localhost:9898/metrics | grep '^trades_total'

# coba menawar
curl -s localhost:8080/chat -X POST -d '{"shop_id":1,"user_message":"buy 2 bulbs for 45"}'

*/
/*
=============================================================================
Project : pasar_bot_rust — multi-shop haggling marketplace engine in Rust
Module  : <module_name>.rs
Version : 0.3.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
Email   : kukuhtw@gmail.com
WhatsApp: https://wa.me/628129893706
LinkedIn: https://id.linkedin.com/in/kukuhtw
License : MIT (see LICENSE)

Summary : Simulates an electronics bazaar: independent shopkeepers price a
          shared stochastic market, parse free-text offers, haggle within
          demand-scaled acceptance bands, settle into a per-session wallet/
          inventory ledger, delegate small talk to Gemini, expose Prometheus
          metrics, and record JSONL events.

(c) 2025 Kukuh TW. All rights reserved where applicable.
=============================================================================
*/
mod arbiter;
mod config;
mod dialogue; // small talk backend (mock / Gemini REST)
mod domain;
mod engine;
mod market;
mod metrics;
mod parser;
mod portfolio;
mod recorder;
mod server;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::config::DialogueMode;
use crate::domain::Event;

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt().with_env_filter("info").init();

    // ---- Load config & tuning ----
    let (args, tuning) = config::load();

    // ---- Metrics ----
    metrics::init();
    tokio::spawn(metrics::serve_metrics(args.metrics_port));

    // ---- Human-friendly startup info + export config to metrics ----
    let dialogue_mode_str = match args.dialogue_mode {
        DialogueMode::Mock => "mock",
        DialogueMode::Gemini => "gemini",
    };
    let shop_names: Vec<&str> = args.shops.iter().map(|s| s.name.as_str()).collect();

    info!(
        port = args.port,
        metrics_port = args.metrics_port,
        dialogue_mode = %dialogue_mode_str,
        shops = ?shop_names,
        update_period_secs = tuning.update_period_secs,
        seed_wallet = tuning.seed_wallet,
        "startup config"
    );

    crate::metrics::CONFIG_DIALOGUE_MODE
        .with_label_values(&[dialogue_mode_str])
        .set(1);
    for s in &args.shops {
        crate::metrics::CONFIG_SHOP.with_label_values(&[&s.name]).set(1);
    }

    // ---- Recorder (optional) ----
    let (rec_tx, rec_rx) = mpsc::channel::<Event>(8192);
    let rec_tx = if let Some(path) = args.record_file.clone() {
        tokio::spawn(recorder::run(rec_rx, path));
        Some(rec_tx)
    } else {
        None
    };

    // ---- Dialogue backend ----
    let dialogue = dialogue::Backend::from_config(&args);

    // ---- Engine (market + sessions + arbiter) ----
    let engine = Arc::new(engine::Engine::new(
        args.catalog.clone(),
        args.shops.clone(),
        tuning,
        dialogue,
        rec_tx,
    ));

    // ---- Chat API ----
    server::serve(engine, args.port).await;
}
