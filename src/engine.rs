// ===============================
// src/engine.rs (parser -> arbiter -> ledger facade)
// ===============================
//
// Satu Engine per proses. MarketState adalah satu-satunya resource lintas
// session; gate refresh dan pembacaan harga jalan di bawah mutex yang sama,
// jadi dua request yang sama-sama melihat gate terbuka tetap ter-serialisasi
// (yang kalah melihat gate sudah tertutup). Portfolio dikunci per session.
// Urutan lock selalu market -> lepas -> portfolio -> lepas -> market;
// tidak ada lock yang dipegang melewati await dialogue.
//

use std::sync::{Arc, Mutex, MutexGuard};

use ahash::AHashMap as HashMap;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::arbiter::{self, Outcome, TradeError};
use crate::config::Tuning;
use crate::dialogue::{self, Backend, ShopContext};
use crate::domain::{
    Catalog, Event, ItemKind, ItemQuote, MarketSnapshot, ParseOutcome, PortfolioSummary, Reply,
    Shop, Side, Speaker, TranscriptEntry,
};
use crate::market::MarketState;
use crate::metrics::{
    CHATS, CHATS_BY_SHOP, DIALOGUE_ERRORS, DIALOGUE_FALLBACKS, PARSE_OUTCOMES, PORTFOLIO_RESETS,
    TRADES, TRADE_COUNTERS, TRADE_REJECTS,
};
use crate::parser;
use crate::portfolio::Portfolio;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid shop selection: {0}")]
    UnknownShop(u32),
}

/// Lock yang poisoned tetap dipakai: state di dalamnya selalu konsisten
/// per operasi, dan tidak ada alasan mematikan proses untuk itu.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct Engine {
    catalog: Catalog,
    shops: Vec<Shop>,
    tuning: Tuning,
    market: Mutex<MarketState>,
    sessions: Mutex<HashMap<String, Arc<Mutex<Portfolio>>>>,
    dialogue: Backend,
    rec_tx: Option<mpsc::Sender<Event>>,
}

impl Engine {
    pub fn new(
        catalog: Catalog,
        shops: Vec<Shop>,
        tuning: Tuning,
        dialogue: Backend,
        rec_tx: Option<mpsc::Sender<Event>>,
    ) -> Self {
        let now = Utc::now().timestamp();
        let market = Mutex::new(MarketState::new(&catalog, &tuning, now));
        Self {
            catalog,
            shops,
            tuning,
            market,
            sessions: Mutex::new(HashMap::new()),
            dialogue,
            rec_tx,
        }
    }

    fn shop(&self, shop_id: u32) -> Option<Shop> {
        self.shops.iter().find(|s| s.id == shop_id).cloned()
    }

    /// Portfolio session; dibuat dengan seed default saat kontak pertama.
    fn portfolio(&self, session_id: &str) -> Arc<Mutex<Portfolio>> {
        let mut sessions = lock(&self.sessions);
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(Portfolio::seeded(&self.catalog, self.tuning.seed_wallet)))
            })
            .clone()
    }

    fn record(&self, ev: Event) {
        if let Some(tx) = &self.rec_tx {
            let _ = tx.try_send(ev);
        }
    }

    /// Entry point tunggal: parse -> adjudikasi -> settle -> balasan teks.
    /// Semua kegagalan selain shop id salah jadi teks ke user, bukan error.
    pub async fn evaluate_message(
        &self,
        session_id: &str,
        shop_id: u32,
        utterance: &str,
    ) -> Result<Reply, EngineError> {
        let shop = self.shop(shop_id).ok_or(EngineError::UnknownShop(shop_id))?;
        let now = Utc::now().timestamp();
        CHATS.inc();
        CHATS_BY_SHOP.with_label_values(&[&shop.name]).inc();

        // fase 1: market lock, gate refresh + lookback + parse (CPU murni)
        let (parsed, quote) = {
            let mut market = lock(&self.market);
            if market.refresh_if_due(&self.catalog, &self.tuning, now, &mut rand::thread_rng()) {
                self.record(Event::Refresh { ts: now });
            }
            let tail = market.shop_tail(shop_id, parser::LOOKBACK);
            let parsed = parser::parse(utterance, shop_id, &tail);
            // snapshot harga+demand barang intent, konsisten di bawah lock yang sama
            let quote = match &parsed {
                ParseOutcome::Intent(i) => (market.price(i.item), market.demand_of(i.item)),
                _ => (0, 1.0),
            };
            (parsed, quote)
        };

        let (text, settled, transaction) = match parsed {
            ParseOutcome::Intent(intent) => {
                PARSE_OUTCOMES.with_label_values(&["intent"]).inc();
                let (price, demand) = quote;

                // fase 2: portfolio lock, guard + settle dalam satu akuisisi
                let handle = self.portfolio(session_id);
                let verdict = {
                    let mut pf = lock(&handle);
                    arbiter::evaluate(
                        &intent,
                        &shop,
                        price,
                        demand,
                        &mut pf,
                        &self.tuning,
                        now,
                        &mut rand::thread_rng(),
                    )
                };

                match verdict {
                    Outcome::Settled(tx) => {
                        // fase 3: market lock lagi, feedback demand
                        lock(&self.market).nudge_demand(intent.item, intent.side, &self.tuning);
                        TRADES.with_label_values(&[intent.side.label(), &shop.name]).inc();
                        self.record(Event::Trade(tx.clone()));
                        info!(
                            shop = %shop.name,
                            side = %intent.side.label(),
                            item = %intent.item.name(),
                            qty = intent.qty,
                            px = intent.unit_price,
                            "deal settled"
                        );
                        let text = match intent.side {
                            Side::Buy => format!(
                                "Deal! {} {} for ₹{} each — ₹{} total. Pleasure doing business.",
                                tx.qty, tx.item.name(), tx.unit_price, tx.total
                            ),
                            Side::Sell => format!(
                                "Deal! I'll take {} {} at ₹{} each — ₹{} to you.",
                                tx.qty, tx.item.name(), tx.unit_price, tx.total
                            ),
                        };
                        (text, true, Some(tx))
                    }
                    Outcome::Counter { bound } => {
                        TRADE_COUNTERS.with_label_values(&[intent.side.label()]).inc();
                        // frasa sengaja memakai pola tawaran yang dikenali
                        // parser, jadi "ok deal" berikutnya langsung settle
                        let text = match intent.side {
                            Side::Buy => format!(
                                "₹{} is too low for me. I can sell you {} {} for ₹{} — best price.",
                                intent.unit_price, intent.qty, intent.item.name(), bound
                            ),
                            Side::Sell => format!(
                                "₹{} is too steep. I can buy {} {} at ₹{}, take it or leave it.",
                                intent.unit_price, intent.qty, intent.item.name(), bound
                            ),
                        };
                        (text, false, None)
                    }
                    Outcome::Refused(err) => {
                        TRADE_REJECTS.with_label_values(&[err.label()]).inc();
                        let text = match &err {
                            TradeError::InsufficientFunds { needed, wallet } => format!(
                                "That's ₹{needed} all up and your wallet holds ₹{wallet}. \
                                 Come back with ₹{} more.",
                                needed - wallet
                            ),
                            TradeError::InsufficientStock { requested, held } => format!(
                                "You're offering {requested} but you only hold {held}. \
                                 Can't buy what you don't have."
                            ),
                        };
                        (text, false, None)
                    }
                }
            }
            ParseOutcome::UnknownItem { token, .. } => {
                PARSE_OUTCOMES.with_label_values(&["unknown_item"]).inc();
                (
                    format!("No '{}' on my shelves. I trade in: {}.", token, Catalog::names()),
                    false,
                    None,
                )
            }
            ParseOutcome::InvalidNumber => {
                PARSE_OUTCOMES.with_label_values(&["invalid_number"]).inc();
                (
                    "Quantity and price must both be positive whole numbers — try again."
                        .to_string(),
                    false,
                    None,
                )
            }
            ParseOutcome::NoIntent => {
                PARSE_OUTCOMES.with_label_values(&["no_intent"]).inc();
                DIALOGUE_FALLBACKS.inc();
                let ctx = self.shop_context(&shop);
                // tidak ada lock yang dipegang selama await
                let text = match self.dialogue.reply(&ctx, utterance).await {
                    Ok(t) => t,
                    Err(e) => {
                        DIALOGUE_ERRORS.inc();
                        warn!(?e, shop = %shop.name, "dialogue backend failed");
                        dialogue::APOLOGY.to_string()
                    }
                };
                (text, false, None)
            }
        };

        // transcript bersama: ucapan user + balasan toko (deal menempel di entry toko)
        {
            let mut market = lock(&self.market);
            market.push_entry(
                TranscriptEntry {
                    shop_id,
                    speaker: Speaker::User,
                    text: utterance.to_string(),
                    trade: None,
                    ts: now,
                },
                &self.tuning,
            );
            market.push_entry(
                TranscriptEntry {
                    shop_id,
                    speaker: Speaker::Shop,
                    text: text.clone(),
                    trade: transaction.clone(),
                    ts: now,
                },
                &self.tuning,
            );
        }
        self.record(Event::Chat {
            session: session_id.to_string(),
            shop: shop.name.clone(),
            user: utterance.to_string(),
            reply: text.clone(),
            ts: now,
        });

        Ok(Reply { shop_name: shop.name, text, settled, transaction })
    }

    /// Konteks pasar untuk prompt dialogue: string saja, disusun di bawah
    /// lock lalu dilepas sebelum await.
    fn shop_context(&self, shop: &Shop) -> ShopContext {
        let market = lock(&self.market);
        let price_board = self
            .catalog
            .iter()
            .map(|s| format!("{} ₹{}", s.kind.name(), market.price(s.kind)))
            .collect::<Vec<_>>()
            .join(", ");
        let demand_note = format!(
            "Demand factors: {}",
            self.catalog
                .iter()
                .map(|s| format!("{} {:.2}", s.kind.name(), market.demand_of(s.kind)))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let recent_lines = market
            .recent(3)
            .iter()
            .rev() // kronologis untuk prompt
            .map(|e| {
                let who = match e.speaker {
                    Speaker::User => "user",
                    Speaker::Shop => "shop",
                };
                format!("[{who}] {}", e.text)
            })
            .collect();
        ShopContext {
            shop_name: shop.name.clone(),
            competitors: self
                .shops
                .iter()
                .filter(|s| s.id != shop.id)
                .map(|s| s.name.clone())
                .collect(),
            price_board,
            demand_note,
            recent_lines,
        }
    }

    pub fn market_snapshot(&self) -> MarketSnapshot {
        let now = Utc::now().timestamp();
        let mut market = lock(&self.market);
        if market.refresh_if_due(&self.catalog, &self.tuning, now, &mut rand::thread_rng()) {
            self.record(Event::Refresh { ts: now });
        }
        MarketSnapshot {
            prices: self
                .catalog
                .iter()
                .map(|s| ItemQuote {
                    item: s.kind,
                    price: market.price(s.kind),
                    demand: market.demand_of(s.kind),
                })
                .collect(),
            seconds_until_refresh: market.seconds_until_refresh(now),
        }
    }

    pub fn portfolio_summary(&self, session_id: &str) -> PortfolioSummary {
        let prices: HashMap<ItemKind, i64> = {
            let market = lock(&self.market);
            ItemKind::ALL.iter().map(|&k| (k, market.price(k))).collect()
        };
        let handle = self.portfolio(session_id);
        let pf = lock(&handle);
        pf.summary(|item| prices.get(&item).copied().unwrap_or(1))
    }

    pub fn reset_portfolio(&self, session_id: &str) {
        let handle = self.portfolio(session_id);
        lock(&handle).reset(&self.catalog, self.tuning.seed_wallet);
        PORTFOLIO_RESETS.inc();
        info!(session = %session_id, "portfolio reset to seed state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ItemSpec;

    fn engine() -> Engine {
        let catalog = Catalog::new(vec![
            ItemSpec { kind: ItemKind::Bulb, base_price: 50, volatility: 0.15, seed_qty: 5 },
            ItemSpec { kind: ItemKind::Wire, base_price: 20, volatility: 0.25, seed_qty: 10 },
            ItemSpec { kind: ItemKind::Resistor, base_price: 10, volatility: 0.30, seed_qty: 15 },
            ItemSpec { kind: ItemKind::Capacitor, base_price: 30, volatility: 0.20, seed_qty: 8 },
            ItemSpec { kind: ItemKind::Battery, base_price: 100, volatility: 0.10, seed_qty: 3 },
        ]);
        let shops = vec![
            Shop { id: 1, name: "ElectroMart".into(), specialty: ItemKind::Bulb, discount_rate: 0.95 },
            Shop { id: 2, name: "CircuitWorld".into(), specialty: ItemKind::Resistor, discount_rate: 0.92 },
            Shop { id: 3, name: "WireHub".into(), specialty: ItemKind::Wire, discount_rate: 0.90 },
        ];
        Engine::new(catalog, shops, Tuning::default(), Backend::Mock, None)
    }

    #[tokio::test]
    async fn unknown_shop_is_a_typed_error() {
        let engine = engine();
        let err = engine.evaluate_message("s1", 99, "hello").await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownShop(99)));
    }

    #[tokio::test]
    async fn small_talk_goes_to_the_dialogue_backend() {
        let engine = engine();
        let reply = engine.evaluate_message("s1", 1, "namaste, how is business?").await.unwrap();
        assert!(!reply.settled);
        assert!(reply.transaction.is_none());
        assert!(reply.text.contains("ElectroMart"));
    }

    #[tokio::test]
    async fn generous_buy_settles_and_debits_the_wallet() {
        let engine = engine();
        let reply = engine.evaluate_message("s1", 1, "buy 1 bulb for 60").await.unwrap();
        assert!(reply.settled, "reply: {}", reply.text);
        let tx = reply.transaction.unwrap();
        assert_eq!(tx.total, 60);

        let summary = engine.portfolio_summary("s1");
        assert_eq!(summary.wallet, Tuning::default().seed_wallet - 60);
        let bulb = summary.holdings.iter().find(|h| h.item == ItemKind::Bulb).unwrap();
        assert_eq!(bulb.qty, 6);
    }

    #[tokio::test]
    async fn lowball_counter_then_deal_settles_at_the_quoted_price() {
        let engine = engine();
        let reply = engine.evaluate_message("s1", 1, "buy 1 bulb for 10").await.unwrap();
        assert!(!reply.settled);
        assert!(reply.text.contains("I can sell you 1 Bulb for ₹"), "reply: {}", reply.text);

        let reply = engine.evaluate_message("s1", 1, "ok deal").await.unwrap();
        assert!(reply.settled, "reply: {}", reply.text);
        let tx = reply.transaction.unwrap();
        // kutipan toko: referensi 47 × band default 0.85..0.90
        assert!((40..=42).contains(&tx.unit_price), "price {}", tx.unit_price);
        assert_eq!(engine.portfolio_summary("s1").wallet, Tuning::default().seed_wallet - tx.total);
    }

    #[tokio::test]
    async fn overselling_is_refused_without_mutation() {
        let engine = engine();
        let reply = engine.evaluate_message("s1", 1, "sell 5 batteries for 50").await.unwrap();
        assert!(!reply.settled);
        assert!(reply.text.contains("only hold 3"), "reply: {}", reply.text);

        let summary = engine.portfolio_summary("s1");
        assert_eq!(summary.wallet, Tuning::default().seed_wallet);
        let battery = summary.holdings.iter().find(|h| h.item == ItemKind::Battery).unwrap();
        assert_eq!(battery.qty, 3);
    }

    #[tokio::test]
    async fn reset_restores_the_seed_state() {
        let engine = engine();
        let reply = engine.evaluate_message("s1", 1, "buy 1 bulb for 60").await.unwrap();
        assert!(reply.settled);
        engine.reset_portfolio("s1");

        let summary = engine.portfolio_summary("s1");
        assert_eq!(summary.wallet, Tuning::default().seed_wallet);
        let bulb = summary.holdings.iter().find(|h| h.item == ItemKind::Bulb).unwrap();
        assert_eq!(bulb.qty, 5);
    }

    #[tokio::test]
    async fn sessions_do_not_share_portfolios() {
        let engine = engine();
        let reply = engine.evaluate_message("alice", 1, "buy 1 bulb for 60").await.unwrap();
        assert!(reply.settled);
        assert_eq!(engine.portfolio_summary("bob").wallet, Tuning::default().seed_wallet);
    }

    #[tokio::test]
    async fn snapshot_reports_prices_and_countdown() {
        let engine = engine();
        let snap = engine.market_snapshot();
        assert_eq!(snap.prices.len(), 5);
        let bulb = snap.prices.iter().find(|q| q.item == ItemKind::Bulb).unwrap();
        assert_eq!(bulb.price, 50);
        assert!(snap.seconds_until_refresh <= Tuning::default().update_period_secs);
        assert!(snap.seconds_until_refresh >= 0);
    }
}
