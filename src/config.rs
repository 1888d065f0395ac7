// ===============================
// src/config.rs
// ===============================
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
use dotenvy::dotenv;
use std::env;
use tracing::warn;

use crate::domain::{Catalog, ItemKind, ItemSpec, Shop};

/// Backend untuk small talk (utterance tanpa intent terstruktur)
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DialogueMode {
    Mock,
    Gemini,
}

impl DialogueMode {
    pub fn from_env(key: &str, default_mode: DialogueMode) -> DialogueMode {
        match env::var(key).unwrap_or_default().to_ascii_lowercase().as_str() {
            "mock"   => DialogueMode::Mock,
            "gemini" => DialogueMode::Gemini,
            _ => default_mode,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Args {
    // HTTP
    pub port: u16,
    pub metrics_port: u16,

    // files
    pub record_file: Option<String>,

    // dialogue backend
    pub dialogue_mode: DialogueMode,
    pub gemini_api_key: Option<String>,
    pub gemini_base_url: String,
    pub gemini_model: String,

    // marketplace
    pub shops: Vec<Shop>,
    pub catalog: Catalog,
}

/// Parameter ekonomi pasar & negosiasi (analog Limits di engine trading)
#[derive(Clone, Debug)]
pub struct Tuning {
    pub update_period_secs: i64,
    pub transcript_cap: usize,
    /// Langkah harga maksimum per refresh, fraksi dari base price.
    pub step_cap_frac: f64,
    /// Nudge demand saat Buy/Sell settle.
    pub nudge_buy: f64,
    pub nudge_sell: f64,
    /// Ambang qty untuk perlakuan grosir.
    pub bulk_buy_qty: i64,
    pub bulk_sell_qty: i64,
    pub seed_wallet: i64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            update_period_secs: 60,
            transcript_cap: 50,
            step_cap_frac: 0.2,
            nudge_buy: 1.05,
            nudge_sell: 0.95,
            bulk_buy_qty: 10,
            bulk_sell_qty: 15,
            seed_wallet: 1_000,
        }
    }
}

fn env_u16(key: &str, default: u16) -> u16 {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}
fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}
fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

/// Satu toko: "1:ElectroMart:Bulb:0.95"
fn parse_shop(s: &str) -> Option<Shop> {
    let mut parts = s.trim().split(':');
    let id = parts.next()?.trim().parse::<u32>().ok()?;
    let name = parts.next()?.trim();
    let specialty = ItemKind::from_token(parts.next()?)?;
    let discount_rate = parts.next()?.trim().parse::<f64>().ok()?;
    if name.is_empty() || !(discount_rate > 0.0 && discount_rate < 1.0) {
        return None;
    }
    Some(Shop { id, name: name.to_string(), specialty, discount_rate })
}

fn default_shops() -> Vec<Shop> {
    vec![
        Shop { id: 1, name: "ElectroMart".into(), specialty: ItemKind::Bulb, discount_rate: 0.95 },
        Shop { id: 2, name: "CircuitWorld".into(), specialty: ItemKind::Resistor, discount_rate: 0.92 },
        Shop { id: 3, name: "WireHub".into(), specialty: ItemKind::Wire, discount_rate: 0.90 },
    ]
}

/// SHOPS=1:ElectroMart:Bulb:0.95,2:CircuitWorld:Resistor:0.92,...
fn load_shops() -> Vec<Shop> {
    if let Ok(val) = env::var("SHOPS") {
        let mut out: Vec<Shop> = val.split(',').filter_map(parse_shop).collect();
        out.dedup_by_key(|s| s.id);
        if !out.is_empty() {
            return out;
        }
        warn!("SHOPS set but nothing parsed, falling back to defaults");
    }
    default_shops()
}

/// Satu barang: "Bulb:50:0.15:5" (nama:base_price:volatility:seed_qty)
fn parse_item(s: &str) -> Option<ItemSpec> {
    let mut parts = s.trim().split(':');
    let kind = ItemKind::from_token(parts.next()?)?;
    let base_price = parts.next()?.trim().parse::<i64>().ok()?;
    let volatility = parts.next()?.trim().parse::<f64>().ok()?;
    let seed_qty = parts.next()?.trim().parse::<i64>().ok()?;
    if base_price < 1 || !(volatility > 0.0 && volatility < 1.0) || seed_qty < 0 {
        return None;
    }
    Some(ItemSpec { kind, base_price, volatility, seed_qty })
}

fn default_spec(kind: ItemKind) -> ItemSpec {
    match kind {
        ItemKind::Bulb => ItemSpec { kind, base_price: 50, volatility: 0.15, seed_qty: 5 },
        ItemKind::Wire => ItemSpec { kind, base_price: 20, volatility: 0.25, seed_qty: 10 },
        ItemKind::Resistor => ItemSpec { kind, base_price: 10, volatility: 0.30, seed_qty: 15 },
        ItemKind::Capacitor => ItemSpec { kind, base_price: 30, volatility: 0.20, seed_qty: 8 },
        ItemKind::Battery => ItemSpec { kind, base_price: 100, volatility: 0.10, seed_qty: 3 },
    }
}

/// ITEMS=Bulb:50:0.15:5,Wire:20:0.25:10,... Item yang tidak disebut
/// memakai default; katalog selalu berisi kelima ItemKind.
fn load_catalog() -> Catalog {
    let overrides: Vec<ItemSpec> = env::var("ITEMS")
        .map(|val| val.split(',').filter_map(parse_item).collect())
        .unwrap_or_default();

    let specs = ItemKind::ALL
        .iter()
        .map(|&k| overrides.iter().find(|s| s.kind == k).copied().unwrap_or_else(|| default_spec(k)))
        .collect();
    Catalog::new(specs)
}

pub fn load() -> (Args, Tuning) {
    // Pastikan .env dibaca (PORT, GEMINI_API_KEY, SHOPS, dll)
    let _ = dotenv();

    // ===== Basic =====
    let port = env_u16("PORT", 8080);
    let metrics_port = env_u16("METRICS_PORT", 9898);
    let record_file = env::var("RECORD_FILE").ok();

    // ===== Dialogue backend =====
    let dialogue_mode = DialogueMode::from_env("DIALOGUE_MODE", DialogueMode::Mock);
    let gemini_api_key = env::var("GEMINI_API_KEY").ok().filter(|s| !s.is_empty());
    let gemini_base_url = env::var("GEMINI_BASE_URL")
        .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string());
    let gemini_model =
        env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".to_string());

    // ===== Marketplace =====
    let shops = load_shops();
    let catalog = load_catalog();

    let args = Args {
        port,
        metrics_port,
        record_file,
        dialogue_mode,
        gemini_api_key,
        gemini_base_url,
        gemini_model,
        shops,
        catalog,
    };

    // ===== Tuning =====
    let d = Tuning::default();
    let tuning = Tuning {
        update_period_secs: env_i64("UPDATE_PERIOD_SECS", d.update_period_secs),
        transcript_cap: env_i64("TRANSCRIPT_CAP", d.transcript_cap as i64).max(1) as usize,
        step_cap_frac: env_f64("STEP_CAP_FRAC", d.step_cap_frac),
        nudge_buy: env_f64("DEMAND_NUDGE_BUY", d.nudge_buy),
        nudge_sell: env_f64("DEMAND_NUDGE_SELL", d.nudge_sell),
        bulk_buy_qty: env_i64("BULK_BUY_QTY", d.bulk_buy_qty),
        bulk_sell_qty: env_i64("BULK_SELL_QTY", d.bulk_sell_qty),
        seed_wallet: env_i64("SEED_WALLET", d.seed_wallet),
    };

    (args, tuning)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_shop_entry() {
        let s = parse_shop("7:VoltBazaar:battery:0.9").unwrap();
        assert_eq!(s.id, 7);
        assert_eq!(s.name, "VoltBazaar");
        assert_eq!(s.specialty, ItemKind::Battery);
        assert!((s.discount_rate - 0.9).abs() < 1e-9);
    }

    #[test]
    fn rejects_bad_shop_entries() {
        assert!(parse_shop("x:NoId:Bulb:0.95").is_none());
        assert!(parse_shop("4:NoSuchItem:gizmo:0.95").is_none());
        assert!(parse_shop("4:BadRate:Bulb:1.5").is_none());
    }

    #[test]
    fn parses_item_entry_and_bounds() {
        let spec = parse_item("Wire:25:0.2:12").unwrap();
        assert_eq!(spec.kind, ItemKind::Wire);
        assert_eq!(spec.base_price, 25);
        assert_eq!(spec.seed_qty, 12);
        assert!(parse_item("Wire:0:0.2:12").is_none()); // harga dasar < 1
        assert!(parse_item("Wire:25:1.2:12").is_none()); // volatilitas di luar (0,1)
    }
}
