// ===============================
// src/market.rs (shared stochastic market)
// ===============================
//
// Satu instance untuk seluruh proses, dibagi semua session:
// - refresh_if_due : recompute harga+demand, lazy time-gate (bukan timer).
//   Caller yang melihat gate terbuka melakukan recompute; yang lain skip.
//   Check-and-advance harus jalan di bawah satu lock (lihat engine.rs).
// - nudge_demand   : feedback loop Buy/Sell -> demand, sinkron saat settle.
// - transcript     : log dialog & deal bersama, cap 50 entry, tertua keluar.
//
// Komponen ini tidak bisa gagal; gate tertutup berarti "harga tetap".
//

use ahash::AHashMap as HashMap;
use rand::Rng;
use std::collections::VecDeque;

use crate::config::Tuning;
use crate::domain::{Catalog, ItemKind, Side, Speaker, TranscriptEntry};
use crate::metrics::{MARKET_DEMAND, MARKET_PRICE, MARKET_REFRESHES};

pub const DEMAND_FLOOR: f64 = 0.5;
pub const DEMAND_CEIL: f64 = 2.0;

pub struct MarketState {
    prices: HashMap<ItemKind, i64>,
    demand: HashMap<ItemKind, f64>,
    last_update: i64,
    next_update: i64,
    transcript: VecDeque<TranscriptEntry>,
}

impl MarketState {
    pub fn new(catalog: &Catalog, tuning: &Tuning, now: i64) -> Self {
        let mut prices = HashMap::new();
        let mut demand = HashMap::new();
        for kind in ItemKind::ALL {
            let spec = catalog.spec(kind);
            prices.insert(kind, spec.base_price);
            demand.insert(kind, 1.0);
            MARKET_PRICE.with_label_values(&[kind.name()]).set(spec.base_price);
            MARKET_DEMAND.with_label_values(&[kind.name()]).set(1.0);
        }
        Self {
            prices,
            demand,
            last_update: now,
            next_update: now + tuning.update_period_secs,
            transcript: VecDeque::with_capacity(tuning.transcript_cap),
        }
    }

    pub fn price(&self, item: ItemKind) -> i64 {
        self.prices.get(&item).copied().unwrap_or(1)
    }

    pub fn demand_of(&self, item: ItemKind) -> f64 {
        self.demand.get(&item).copied().unwrap_or(1.0)
    }

    pub fn seconds_until_refresh(&self, now: i64) -> i64 {
        (self.next_update - now).max(0)
    }

    /// Recompute harga & demand kalau periode update sudah lewat.
    /// Return true hanya untuk caller yang benar-benar melakukan recompute.
    pub fn refresh_if_due(
        &mut self,
        catalog: &Catalog,
        tuning: &Tuning,
        now: i64,
        rng: &mut impl Rng,
    ) -> bool {
        if now - self.last_update < tuning.update_period_secs {
            return false;
        }

        for spec in catalog.iter() {
            let noise = rng.gen_range(1.0 - spec.volatility..=1.0 + spec.volatility);

            let d = self.demand.entry(spec.kind).or_insert(1.0);
            *d = (*d * rng.gen_range(0.9..=1.1)).clamp(DEMAND_FLOOR, DEMAND_CEIL);
            let d = *d;

            let prior = self.prices.get(&spec.kind).copied().unwrap_or(spec.base_price);
            let step_cap = tuning.step_cap_frac * spec.base_price as f64;
            let candidate = spec.base_price as f64 * d * noise;
            let clamped = candidate.clamp(prior as f64 - step_cap, prior as f64 + step_cap);
            let new_price = (clamped.round() as i64).max(1);

            self.prices.insert(spec.kind, new_price);
            MARKET_PRICE.with_label_values(&[spec.kind.name()]).set(new_price);
            MARKET_DEMAND.with_label_values(&[spec.kind.name()]).set(d);
        }

        self.last_update = now;
        self.next_update = now + tuning.update_period_secs;
        MARKET_REFRESHES.inc();
        true
    }

    /// Deal yang settle menggeser demand barangnya: Buy menaikkan,
    /// Sell menurunkan. Dipanggil sinkron di jalur settlement, bukan
    /// ditunda sampai refresh berikutnya.
    pub fn nudge_demand(&mut self, item: ItemKind, side: Side, tuning: &Tuning) {
        let factor = match side {
            Side::Buy => tuning.nudge_buy,
            Side::Sell => tuning.nudge_sell,
        };
        let d = self.demand.entry(item).or_insert(1.0);
        *d = (*d * factor).clamp(DEMAND_FLOOR, DEMAND_CEIL);
        MARKET_DEMAND.with_label_values(&[item.name()]).set(*d);
    }

    pub fn push_entry(&mut self, entry: TranscriptEntry, tuning: &Tuning) {
        if self.transcript.len() >= tuning.transcript_cap {
            self.transcript.pop_front();
        }
        self.transcript.push_back(entry);
    }

    /// Entry terbaru lebih dulu, ucapan si toko saja, untuk lookback
    /// acceptance/counter di parser.
    pub fn shop_tail(&self, shop_id: u32, n: usize) -> Vec<TranscriptEntry> {
        self.transcript
            .iter()
            .rev()
            .filter(|e| e.shop_id == shop_id && e.speaker == Speaker::Shop)
            .take(n)
            .cloned()
            .collect()
    }

    /// Entry terbaru lebih dulu, semua pembicara. Konteks prompt dialogue.
    pub fn recent(&self, n: usize) -> Vec<TranscriptEntry> {
        self.transcript.iter().rev().take(n).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ItemSpec;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn catalog() -> Catalog {
        Catalog::new(vec![
            ItemSpec { kind: ItemKind::Bulb, base_price: 50, volatility: 0.15, seed_qty: 5 },
            ItemSpec { kind: ItemKind::Wire, base_price: 20, volatility: 0.25, seed_qty: 10 },
            ItemSpec { kind: ItemKind::Resistor, base_price: 10, volatility: 0.30, seed_qty: 15 },
            ItemSpec { kind: ItemKind::Capacitor, base_price: 30, volatility: 0.20, seed_qty: 8 },
            ItemSpec { kind: ItemKind::Battery, base_price: 100, volatility: 0.10, seed_qty: 3 },
        ])
    }

    fn entry(shop_id: u32, speaker: Speaker, text: &str) -> TranscriptEntry {
        TranscriptEntry { shop_id, speaker, text: text.into(), trade: None, ts: 0 }
    }

    #[test]
    fn refresh_respects_step_cap_and_floor() {
        let catalog = catalog();
        let tuning = Tuning::default();
        let mut rng = StdRng::seed_from_u64(7);
        let mut market = MarketState::new(&catalog, &tuning, 0);

        let mut now = 0;
        for _ in 0..200 {
            now += tuning.update_period_secs;
            let before: Vec<(ItemKind, i64)> =
                ItemKind::ALL.iter().map(|&k| (k, market.price(k))).collect();
            assert!(market.refresh_if_due(&catalog, &tuning, now, &mut rng));
            for (kind, old) in before {
                let new = market.price(kind);
                let cap = (tuning.step_cap_frac * catalog.spec(kind).base_price as f64).round() as i64;
                assert!((new - old).abs() <= cap, "{kind:?}: {old} -> {new} exceeds cap {cap}");
                assert!(new >= 1);
            }
        }
    }

    #[test]
    fn demand_stays_in_bounds() {
        let catalog = catalog();
        let tuning = Tuning::default();
        let mut rng = StdRng::seed_from_u64(11);
        let mut market = MarketState::new(&catalog, &tuning, 0);

        let mut now = 0;
        for _ in 0..500 {
            now += tuning.update_period_secs;
            market.refresh_if_due(&catalog, &tuning, now, &mut rng);
            for kind in ItemKind::ALL {
                let d = market.demand_of(kind);
                assert!((DEMAND_FLOOR..=DEMAND_CEIL).contains(&d), "{kind:?} demand {d}");
            }
        }
    }

    #[test]
    fn gate_is_idempotent_within_one_period() {
        let catalog = catalog();
        let tuning = Tuning::default();
        let mut rng = StdRng::seed_from_u64(3);
        let mut market = MarketState::new(&catalog, &tuning, 0);

        // gate belum terbuka
        assert!(!market.refresh_if_due(&catalog, &tuning, tuning.update_period_secs - 1, &mut rng));

        assert!(market.refresh_if_due(&catalog, &tuning, tuning.update_period_secs, &mut rng));
        let snapshot: Vec<i64> = ItemKind::ALL.iter().map(|&k| market.price(k)).collect();

        // panggilan kedua dalam periode yang sama: no-op
        assert!(!market.refresh_if_due(&catalog, &tuning, tuning.update_period_secs + 1, &mut rng));
        let after: Vec<i64> = ItemKind::ALL.iter().map(|&k| market.price(k)).collect();
        assert_eq!(snapshot, after);
    }

    #[test]
    fn nudges_move_demand_and_clamp() {
        let catalog = catalog();
        let tuning = Tuning::default();
        let mut market = MarketState::new(&catalog, &tuning, 0);

        market.nudge_demand(ItemKind::Wire, Side::Buy, &tuning);
        assert!(market.demand_of(ItemKind::Wire) > 1.0);

        for _ in 0..200 {
            market.nudge_demand(ItemKind::Wire, Side::Buy, &tuning);
        }
        assert!(market.demand_of(ItemKind::Wire) <= DEMAND_CEIL);

        for _ in 0..400 {
            market.nudge_demand(ItemKind::Wire, Side::Sell, &tuning);
        }
        assert!(market.demand_of(ItemKind::Wire) >= DEMAND_FLOOR);
    }

    #[test]
    fn transcript_evicts_oldest_at_cap() {
        let catalog = catalog();
        let tuning = Tuning::default();
        let mut market = MarketState::new(&catalog, &tuning, 0);

        for i in 0..60 {
            market.push_entry(entry(1, Speaker::Shop, &format!("line {i}")), &tuning);
        }
        let recent = market.recent(tuning.transcript_cap + 10);
        assert_eq!(recent.len(), tuning.transcript_cap);
        assert_eq!(recent.first().unwrap().text, "line 59");
        assert_eq!(recent.last().unwrap().text, "line 10");
    }

    #[test]
    fn shop_tail_filters_by_shop_and_speaker() {
        let catalog = catalog();
        let tuning = Tuning::default();
        let mut market = MarketState::new(&catalog, &tuning, 0);

        market.push_entry(entry(1, Speaker::Shop, "old offer"), &tuning);
        market.push_entry(entry(2, Speaker::Shop, "other shop"), &tuning);
        market.push_entry(entry(1, Speaker::User, "user line"), &tuning);
        market.push_entry(entry(1, Speaker::Shop, "new offer"), &tuning);

        let tail = market.shop_tail(1, 3);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].text, "new offer");
        assert_eq!(tail[1].text, "old offer");
    }
}
