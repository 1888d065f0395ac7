// ===============================
// src/portfolio.rs (wallet, inventory & PnL ledger)
// ===============================
//
// Satu Portfolio per session. Wallet dan holdings HANYA dimutasi lewat
// apply_buy/apply_sell di jalur settlement arbiter (single writer);
// komponen lain cuma baca lewat summary().
//

use ahash::AHashMap as HashMap;

use crate::domain::{Catalog, HoldingSummary, ItemKind, PortfolioSummary, Transaction};

#[derive(Debug, Clone, Copy, Default)]
pub struct Holding {
    pub qty: i64,
    pub avg_buy_price: f64,
}

#[derive(Debug, Clone)]
pub struct Portfolio {
    wallet: i64,
    holdings: HashMap<ItemKind, Holding>,
    history: Vec<Transaction>,
    realized_pnl: f64,
}

impl Portfolio {
    /// Seed awal: inventory default katalog, cost basis = base price.
    pub fn seeded(catalog: &Catalog, wallet: i64) -> Self {
        let mut holdings = HashMap::new();
        for spec in catalog.iter() {
            holdings.insert(
                spec.kind,
                Holding { qty: spec.seed_qty, avg_buy_price: spec.base_price as f64 },
            );
        }
        Self { wallet, holdings, history: Vec::new(), realized_pnl: 0.0 }
    }

    pub fn wallet(&self) -> i64 {
        self.wallet
    }

    pub fn qty(&self, item: ItemKind) -> i64 {
        self.holdings.get(&item).map(|h| h.qty).unwrap_or(0)
    }

    pub fn avg_buy_price(&self, item: ItemKind) -> f64 {
        self.holdings.get(&item).map(|h| h.avg_buy_price).unwrap_or(0.0)
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn history(&self) -> &[Transaction] {
        &self.history
    }

    /// Settlement Buy: debit wallet, naikkan qty, cost basis = rata-rata
    /// tertimbang lot lama + lot baru. Caller sudah memeriksa dana cukup.
    pub fn apply_buy(&mut self, item: ItemKind, qty: i64, unit_price: i64) {
        self.wallet -= unit_price.saturating_mul(qty);
        let h = self.holdings.entry(item).or_default();
        let new_qty = h.qty + qty;
        h.avg_buy_price = if new_qty == 0 {
            0.0 // guard pembagian nol; qty > 0 membuat ini tak tercapai
        } else if h.qty == 0 {
            unit_price as f64
        } else {
            (h.avg_buy_price * h.qty as f64 + (unit_price * qty) as f64) / new_qty as f64
        };
        h.qty = new_qty;
    }

    /// Settlement Sell: kredit wallet, turunkan qty, realisasi profit
    /// terhadap cost basis. Return profit untuk dicatat di Transaction.
    /// Caller sudah memeriksa stok cukup.
    pub fn apply_sell(&mut self, item: ItemKind, qty: i64, unit_price: i64) -> f64 {
        self.wallet += unit_price.saturating_mul(qty);
        let h = self.holdings.entry(item).or_default();
        let profit = (unit_price as f64 - h.avg_buy_price) * qty as f64;
        h.qty -= qty;
        if h.qty == 0 {
            h.avg_buy_price = 0.0; // posisi flat, basis ikut nol
        }
        self.realized_pnl += profit;
        profit
    }

    pub fn record(&mut self, tx: Transaction) {
        self.history.push(tx);
    }

    /// Ringkasan read-only: nilai pasar & unrealized PnL per barang.
    pub fn summary(&self, quote: impl Fn(ItemKind) -> i64) -> PortfolioSummary {
        let holdings = ItemKind::ALL
            .iter()
            .map(|&item| {
                let h = self.holdings.get(&item).copied().unwrap_or_default();
                let current_price = quote(item);
                HoldingSummary {
                    item,
                    qty: h.qty,
                    avg_buy_price: h.avg_buy_price,
                    current_price,
                    market_value: current_price.saturating_mul(h.qty),
                    unrealized_pnl: (current_price as f64 - h.avg_buy_price) * h.qty as f64,
                }
            })
            .collect();
        PortfolioSummary { wallet: self.wallet, realized_pnl: self.realized_pnl, holdings }
    }

    /// Kembali ke seed state; history dan PnL dibuang.
    pub fn reset(&mut self, catalog: &Catalog, wallet: i64) {
        *self = Portfolio::seeded(catalog, wallet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ItemSpec;

    fn catalog() -> Catalog {
        Catalog::new(vec![
            ItemSpec { kind: ItemKind::Bulb, base_price: 50, volatility: 0.15, seed_qty: 5 },
            ItemSpec { kind: ItemKind::Wire, base_price: 20, volatility: 0.25, seed_qty: 10 },
            ItemSpec { kind: ItemKind::Resistor, base_price: 10, volatility: 0.30, seed_qty: 15 },
            ItemSpec { kind: ItemKind::Capacitor, base_price: 30, volatility: 0.20, seed_qty: 8 },
            ItemSpec { kind: ItemKind::Battery, base_price: 100, volatility: 0.10, seed_qty: 3 },
        ])
    }

    #[test]
    fn buy_debits_wallet_and_weights_cost_basis() {
        let mut pf = Portfolio::seeded(&catalog(), 1_000);
        // seed Bulb: 5 @ 50
        pf.apply_buy(ItemKind::Bulb, 5, 70);
        assert_eq!(pf.wallet(), 1_000 - 350);
        assert_eq!(pf.qty(ItemKind::Bulb), 10);
        assert!((pf.avg_buy_price(ItemKind::Bulb) - 60.0).abs() < 1e-9); // (5*50 + 5*70) / 10
    }

    #[test]
    fn first_buy_into_empty_holding_sets_basis() {
        let mut pf = Portfolio::seeded(&catalog(), 500);
        pf.apply_sell(ItemKind::Battery, 3, 100); // flat
        assert_eq!(pf.qty(ItemKind::Battery), 0);
        assert!((pf.avg_buy_price(ItemKind::Battery) - 0.0).abs() < 1e-9);

        pf.apply_buy(ItemKind::Battery, 2, 90);
        assert!((pf.avg_buy_price(ItemKind::Battery) - 90.0).abs() < 1e-9);
    }

    #[test]
    fn sell_credits_wallet_and_realizes_pnl() {
        let mut pf = Portfolio::seeded(&catalog(), 1_000);
        // seed Wire: 10 @ 20
        let profit = pf.apply_sell(ItemKind::Wire, 4, 26);
        assert!((profit - 24.0).abs() < 1e-9); // (26-20)*4
        assert_eq!(pf.wallet(), 1_000 + 104);
        assert_eq!(pf.qty(ItemKind::Wire), 6);
        assert!((pf.realized_pnl() - 24.0).abs() < 1e-9);
    }

    #[test]
    fn summary_reports_market_value_and_unrealized() {
        let pf = Portfolio::seeded(&catalog(), 1_000);
        let summary = pf.summary(|item| if item == ItemKind::Wire { 25 } else { 10 });
        let wire = summary.holdings.iter().find(|h| h.item == ItemKind::Wire).unwrap();
        assert_eq!(wire.qty, 10);
        assert_eq!(wire.market_value, 250);
        assert!((wire.unrealized_pnl - 50.0).abs() < 1e-9); // (25-20)*10
        assert_eq!(summary.wallet, 1_000);
    }

    #[test]
    fn reset_restores_seed_and_discards_history() {
        let catalog = catalog();
        let mut pf = Portfolio::seeded(&catalog, 1_000);
        pf.apply_buy(ItemKind::Bulb, 2, 45);
        pf.record(Transaction {
            side: crate::domain::Side::Buy,
            item: ItemKind::Bulb,
            qty: 2,
            unit_price: 45,
            total: 90,
            shop: "ElectroMart".into(),
            profit: None,
            ts: 0,
        });
        pf.reset(&catalog, 1_000);
        assert_eq!(pf.wallet(), 1_000);
        assert_eq!(pf.qty(ItemKind::Bulb), 5);
        assert!(pf.history().is_empty());
        assert!((pf.realized_pnl() - 0.0).abs() < 1e-9);
    }
}
