// ===============================
// src/arbiter.rs (acceptance bands & settlement)
// ===============================
//
// Satu ronde negosiasi, stateless:
// 1) hitung band penerimaan toko (stochastic per ronde, skala demand),
// 2) guard dana/stok,
// 3) kalau lolos: settle ke ledger dan bangun Transaction.
//
// Penolakan harga bukan penolakan kosong: bound yang dihitung dikirim
// balik sebagai tawaran terbaik toko. Bound tidak pernah tergantung harga
// yang diuji, hanya referensi/demand/qty/rng.
//

use rand::Rng;
use thiserror::Error;

use crate::config::Tuning;
use crate::domain::{Shop, Side, TradeIntent, Transaction};
use crate::portfolio::Portfolio;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TradeError {
    #[error("insufficient funds: need ₹{needed}, wallet has ₹{wallet}")]
    InsufficientFunds { needed: i64, wallet: i64 },
    #[error("insufficient stock: asked for {requested}, holding {held}")]
    InsufficientStock { requested: i64, held: i64 },
}

impl TradeError {
    pub fn label(&self) -> &'static str {
        match self {
            TradeError::InsufficientFunds { .. } => "insufficient_funds",
            TradeError::InsufficientStock { .. } => "insufficient_stock",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Settled(Transaction),
    /// Harga di luar band; bound jadi counter-offer toko.
    Counter { bound: i64 },
    Refused(TradeError),
}

// Rentang flexibility per kondisi demand. Nilai persisnya ditarik uniform
// per ronde, jadi dua tawaran identik bisa dapat verdict berbeda.
const BUY_FLEX_FIRM: (f64, f64) = (0.92, 0.97); // demand tinggi: toko pegang harga
const BUY_FLEX_NORMAL: (f64, f64) = (0.85, 0.90);
const BUY_FLEX_WIDE: (f64, f64) = (0.80, 0.88); // demand rendah: toko longgar

const SELL_MARKUP_HIGH: (f64, f64) = (1.10, 1.20); // demand tinggi: toko berani bayar
const SELL_MARKUP_NORMAL: (f64, f64) = (1.05, 1.12);
const SELL_MARKUP_LOW: (f64, f64) = (1.02, 1.08);

const DEMAND_HIGH: f64 = 1.2;
const DEMAND_LOW: f64 = 0.8;

/// Pembelian grosir melonggarkan batas bawah sedikit lagi.
const BULK_BUY_WIDEN: f64 = 0.03;
/// Toko bayar lebih untuk barang spesialisasinya ...
const SPECIALTY_SELL_BUMP: f64 = 0.05;
/// ... dan menekan harga kalau disodori qty besar.
const BULK_SELL_TRIM: f64 = 0.05;

/// Harga referensi toko: harga pasar, didiskon (dipotong ke rupiah bulat)
/// untuk barang spesialisasi. 50 × 0.95 => 47.
fn reference_price(shop: &Shop, intent: &TradeIntent, market_price: i64) -> i64 {
    if intent.item == shop.specialty {
        ((market_price as f64) * shop.discount_rate) as i64
    } else {
        market_price
    }
}

fn buy_lower_bound(reference: i64, demand: f64, qty: i64, tuning: &Tuning, rng: &mut impl Rng) -> i64 {
    let (lo, hi) = if demand > DEMAND_HIGH {
        BUY_FLEX_FIRM
    } else if demand < DEMAND_LOW {
        BUY_FLEX_WIDE
    } else {
        BUY_FLEX_NORMAL
    };
    let mut flex = rng.gen_range(lo..=hi);
    if qty >= tuning.bulk_buy_qty {
        flex -= BULK_BUY_WIDEN;
    }
    ((reference as f64 * flex).round() as i64).max(1)
}

fn sell_upper_bound(
    market_price: i64,
    demand: f64,
    qty: i64,
    specialty: bool,
    tuning: &Tuning,
    rng: &mut impl Rng,
) -> i64 {
    let (lo, hi) = if demand > DEMAND_HIGH {
        SELL_MARKUP_HIGH
    } else if demand < DEMAND_LOW {
        SELL_MARKUP_LOW
    } else {
        SELL_MARKUP_NORMAL
    };
    let mut markup = rng.gen_range(lo..=hi);
    if specialty {
        markup += SPECIALTY_SELL_BUMP;
    }
    if qty > tuning.bulk_sell_qty {
        markup -= BULK_SELL_TRIM;
    }
    ((market_price as f64 * markup).round() as i64).max(1)
}

/// Adjudikasi satu intent terhadap band toko + guard ledger, lalu settle.
/// `market_price`/`demand` adalah snapshot konsisten milik barang intent;
/// nudge demand & append transcript dilakukan caller setelah settle.
pub fn evaluate(
    intent: &TradeIntent,
    shop: &Shop,
    market_price: i64,
    demand: f64,
    portfolio: &mut Portfolio,
    tuning: &Tuning,
    now: i64,
    rng: &mut impl Rng,
) -> Outcome {
    match intent.side {
        Side::Buy => {
            // harga kutipan toko sendiri ("ok deal") tidak dinegosiasi ulang
            if !intent.accepted_offer {
                let reference = reference_price(shop, intent, market_price);
                let bound = buy_lower_bound(reference, demand, intent.qty, tuning, rng);
                if intent.unit_price < bound {
                    return Outcome::Counter { bound };
                }
            }
            let total = intent.unit_price.saturating_mul(intent.qty);
            if total > portfolio.wallet() {
                return Outcome::Refused(TradeError::InsufficientFunds {
                    needed: total,
                    wallet: portfolio.wallet(),
                });
            }
            portfolio.apply_buy(intent.item, intent.qty, intent.unit_price);
            let tx = Transaction {
                side: Side::Buy,
                item: intent.item,
                qty: intent.qty,
                unit_price: intent.unit_price,
                total,
                shop: shop.name.clone(),
                profit: None,
                ts: now,
            };
            portfolio.record(tx.clone());
            Outcome::Settled(tx)
        }
        Side::Sell => {
            // guard stok duluan, terlepas dari harga
            let held = portfolio.qty(intent.item);
            if intent.qty > held {
                return Outcome::Refused(TradeError::InsufficientStock {
                    requested: intent.qty,
                    held,
                });
            }
            if !intent.accepted_offer {
                let specialty = intent.item == shop.specialty;
                let bound =
                    sell_upper_bound(market_price, demand, intent.qty, specialty, tuning, rng);
                if intent.unit_price > bound {
                    return Outcome::Counter { bound };
                }
            }
            let total = intent.unit_price.saturating_mul(intent.qty);
            let profit = portfolio.apply_sell(intent.item, intent.qty, intent.unit_price);
            let tx = Transaction {
                side: Side::Sell,
                item: intent.item,
                qty: intent.qty,
                unit_price: intent.unit_price,
                total,
                shop: shop.name.clone(),
                profit: Some(profit),
                ts: now,
            };
            portfolio.record(tx.clone());
            Outcome::Settled(tx)
        }
    }
}
