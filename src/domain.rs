// ===============================
// src/domain.rs
// ===============================
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side { Buy, Sell }
impl Side {
    pub fn label(&self) -> &'static str { match self { Side::Buy => "buy", Side::Sell => "sell" } }
}

/// Katalog barang tertutup: token bebas dari user dipetakan ke enum ini,
/// bukan ke string key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind { Bulb, Wire, Resistor, Capacitor, Battery }

impl ItemKind {
    pub const ALL: [ItemKind; 5] =
        [ItemKind::Bulb, ItemKind::Wire, ItemKind::Resistor, ItemKind::Capacitor, ItemKind::Battery];

    pub fn name(&self) -> &'static str {
        match self {
            ItemKind::Bulb => "Bulb",
            ItemKind::Wire => "Wire",
            ItemKind::Resistor => "Resistor",
            ItemKind::Capacitor => "Capacitor",
            ItemKind::Battery => "Battery",
        }
    }

    /// Case-insensitive lookup, toleran bentuk jamak ("wires", "batteries").
    pub fn from_token(token: &str) -> Option<ItemKind> {
        let t = token.trim().trim_matches(|c: char| !c.is_ascii_alphabetic()).to_ascii_lowercase();
        if t.is_empty() { return None; }
        for kind in ItemKind::ALL {
            let name = kind.name().to_ascii_lowercase();
            if t == name { return Some(kind); }
            if let Some(stem) = t.strip_suffix('s') {
                if stem == name { return Some(kind); }
            }
            if let Some(stem) = t.strip_suffix("ies") {
                if format!("{stem}y") == name { return Some(kind); }
            }
        }
        None
    }
}

/// Parameter per barang: harga dasar, volatilitas harga, dan seed inventory user.
#[derive(Debug, Clone, Copy)]
pub struct ItemSpec { pub kind: ItemKind, pub base_price: i64, pub volatility: f64, pub seed_qty: i64 }

#[derive(Debug, Clone)]
pub struct Catalog { specs: Vec<ItemSpec> }

impl Catalog {
    pub fn new(specs: Vec<ItemSpec>) -> Self { Self { specs } }

    pub fn spec(&self, kind: ItemKind) -> &ItemSpec {
        // katalog selalu lengkap (dijamin oleh config::load)
        self.specs.iter().find(|s| s.kind == kind).unwrap_or(&self.specs[0])
    }

    pub fn iter(&self) -> impl Iterator<Item = &ItemSpec> { self.specs.iter() }

    pub fn names() -> String {
        ItemKind::ALL.iter().map(|k| k.name()).collect::<Vec<_>>().join(", ")
    }
}

/// Konfigurasi toko, immutable setelah startup.
#[derive(Debug, Clone)]
pub struct Shop { pub id: u32, pub name: String, pub specialty: ItemKind, pub discount_rate: f64 }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub side: Side,
    pub item: ItemKind,
    pub qty: i64,
    pub unit_price: i64,
    pub total: i64,
    pub shop: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profit: Option<f64>, // Sell saja
    pub ts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker { User, Shop }

/// Satu baris transcript pasar bersama (dialog maupun deal).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub shop_id: u32,
    pub speaker: Speaker,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade: Option<Transaction>,
    pub ts: i64,
}

/// Intent terstruktur hasil parsing satu utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeIntent {
    pub side: Side,
    pub item: ItemKind,
    pub qty: i64,
    pub unit_price: i64,
    pub shop_id: u32,
    /// True kalau intent direkonstruksi dari tawaran toko sendiri ("ok deal").
    /// Harga kutipan toko tidak dinegosiasi ulang; guard dana/stok tetap jalan.
    pub accepted_offer: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Intent(TradeIntent),
    /// Kata kerja dikenal tapi nama barang tidak ada di katalog.
    UnknownItem { side: Side, token: String },
    /// Qty/harga ketemu tapi bukan bilangan bulat positif.
    InvalidNumber,
    NoIntent,
}

/// Event untuk recorder JSONL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Chat { session: String, shop: String, user: String, reply: String, ts: i64 },
    Trade(Transaction),
    Refresh { ts: i64 },
    Note(String),
}

// ---- Payload read-only untuk HTTP layer ----

#[derive(Debug, Clone, Serialize)]
pub struct ItemQuote { pub item: ItemKind, pub price: i64, pub demand: f64 }

#[derive(Debug, Clone, Serialize)]
pub struct MarketSnapshot { pub prices: Vec<ItemQuote>, pub seconds_until_refresh: i64 }

#[derive(Debug, Clone, Serialize)]
pub struct HoldingSummary {
    pub item: ItemKind,
    pub qty: i64,
    pub avg_buy_price: f64,
    pub current_price: i64,
    pub market_value: i64,
    pub unrealized_pnl: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioSummary { pub wallet: i64, pub realized_pnl: f64, pub holdings: Vec<HoldingSummary> }

/// Jawaban engine untuk satu pesan user.
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub shop_name: String,
    pub text: String,
    pub settled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction: Option<Transaction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_lookup_is_case_insensitive_and_plural_tolerant() {
        assert_eq!(ItemKind::from_token("bulb"), Some(ItemKind::Bulb));
        assert_eq!(ItemKind::from_token("WIRES"), Some(ItemKind::Wire));
        assert_eq!(ItemKind::from_token("Batteries"), Some(ItemKind::Battery));
        assert_eq!(ItemKind::from_token("resistors,"), Some(ItemKind::Resistor));
        assert_eq!(ItemKind::from_token("gadget"), None);
        assert_eq!(ItemKind::from_token(""), None);
    }
}
