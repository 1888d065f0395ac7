// ===============================
// src/parser.rs
// ===============================
//
// Tiga bentuk utterance yang dikenali, dicoba berurutan:
// 1) Perintah langsung : "buy 5 wires for ₹22", "sell batteries 3 at 95"
// 2) Menerima tawaran  : "ok deal" -> rekonstruksi dari tawaran toko
//    terakhir di transcript (lookback 3, terdekat dulu)
// 3) Counter-offer     : "how about ₹18 for the wires" -> qty diambil dari
//    tawaran toko terakhir, arah dari frasa toko sebelumnya
//
// Tidak ada yang cocok -> NoIntent (bukan error; diserahkan ke dialogue
// fallback). Kata kerja dikenal + barang tak dikenal -> UnknownItem.
// Qty/harga nol atau overflow -> InvalidNumber.
//

use once_cell::sync::Lazy;
use regex::Regex;

use crate::domain::{ItemKind, ParseOutcome, Side, TradeIntent, TranscriptEntry};

/// verb qty item [for/at/@] [₹] price
static RE_DIRECT_QIP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(buy|purchase|acquire|sell|offer|give)\s+(\d+)\s*(?:x\s*)?([A-Za-z]+)[\s,]*(?:for|at|@)?\s*(?:₹|rs\.?|inr)?\s*(\d+)\b",
    )
    .unwrap()
});

/// verb item qty [for/at/@] [₹] price
static RE_DIRECT_IQP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(buy|purchase|acquire|sell|offer|give)\s+([A-Za-z]+)\s+(?:x\s*)?(\d+)[\s,]*(?:for|at|@)?\s*(?:₹|rs\.?|inr)?\s*(\d+)\b",
    )
    .unwrap()
});

static RE_ACCEPT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(accept|deal|okay|ok|yes|yeah|agreed|fine|sounds\s+good|why\s+not)\b")
        .unwrap()
});

static RE_COUNTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(how\s+about|what\s+about|counter|i\s+propose|i'?ll\s+pay|i\s+will\s+pay|can\s+you\s+do|make\s+it)\b",
    )
    .unwrap()
});

/// Pola tawaran di ucapan toko: "I can sell you 5 Wires for ₹22"
static RE_OFFER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(buy|sell)\b(?:\s+you)?\s+(\d+)\s+([A-Za-z]+)\s+(?:for|at)\s*(?:₹|rs\.?|inr)?\s*(\d+)\b",
    )
    .unwrap()
});

/// Counter lengkap: qty item (for/at) price
static RE_COUNTER_QIP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d+)\s+([A-Za-z]+)\s*(?:for|at|@)\s*(?:₹|rs\.?|inr)?\s*(\d+)\b").unwrap()
});

/// Counter singkat: price item (qty dipulihkan dari tawaran toko)
static RE_COUNTER_PI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:₹|rs\.?|inr)?\s*(\d+)\s*(?:for|per|each|apiece)?\s*(?:(?:the|those|your|an|a)\b)?\s*([A-Za-z]+)",
    )
    .unwrap()
});

// Arah counter dari frasa toko sebelumnya
static RE_CUE_BUY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(i\s+can\s+sell|sell\s+you|buy\s+from\s+me)\b").unwrap()
});
static RE_CUE_SELL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(i\s+can\s+buy|buy\s+from\s+you|sell\s+to\s+me|sell\s+me)\b").unwrap()
});

/// Berapa entry toko yang discan untuk acceptance/counter lookback.
pub const LOOKBACK: usize = 3;

fn verb_side(verb: &str) -> Side {
    match verb.to_ascii_lowercase().as_str() {
        "buy" | "purchase" | "acquire" => Side::Buy,
        _ => Side::Sell,
    }
}

fn positive(field: &str) -> Option<i64> {
    field.parse::<i64>().ok().filter(|v| *v > 0)
}

/// Tawaran toko terbaru di tail: (sisi user, qty, item, harga).
/// "I can sell ..." berarti user membeli, dan sebaliknya.
fn latest_offer(shop_tail: &[TranscriptEntry]) -> Option<(Side, i64, ItemKind, i64)> {
    for entry in shop_tail.iter().take(LOOKBACK) {
        for cap in RE_OFFER.captures_iter(&entry.text) {
            let side = match verb_side(&cap[1]) {
                Side::Sell => Side::Buy, // toko menjual -> user membeli
                Side::Buy => Side::Sell,
            };
            let (Some(qty), Some(price)) = (positive(&cap[2]), positive(&cap[4])) else { continue };
            let Some(item) = ItemKind::from_token(&cap[3]) else { continue };
            return Some((side, qty, item, price));
        }
    }
    None
}

fn try_direct(utterance: &str, shop_id: u32) -> Option<ParseOutcome> {
    let cap = RE_DIRECT_QIP
        .captures(utterance)
        .map(|c| (c, true))
        .or_else(|| RE_DIRECT_IQP.captures(utterance).map(|c| (c, false)))?;
    let (cap, qty_first) = cap;

    let side = verb_side(&cap[1]);
    let (qty_raw, item_raw) = if qty_first { (&cap[2], &cap[3]) } else { (&cap[3], &cap[2]) };

    let Some(item) = ItemKind::from_token(item_raw) else {
        return Some(ParseOutcome::UnknownItem { side, token: item_raw.to_string() });
    };
    let (Some(qty), Some(unit_price)) = (positive(qty_raw), positive(&cap[4])) else {
        return Some(ParseOutcome::InvalidNumber);
    };
    Some(ParseOutcome::Intent(TradeIntent { side, item, qty, unit_price, shop_id, accepted_offer: false }))
}

fn try_acceptance(utterance: &str, shop_id: u32, shop_tail: &[TranscriptEntry]) -> Option<ParseOutcome> {
    if !RE_ACCEPT.is_match(utterance) || RE_COUNTER.is_match(utterance) {
        return None;
    }
    let (side, qty, item, unit_price) = latest_offer(shop_tail)?;
    Some(ParseOutcome::Intent(TradeIntent { side, item, qty, unit_price, shop_id, accepted_offer: true }))
}

fn counter_direction(shop_tail: &[TranscriptEntry]) -> Side {
    for entry in shop_tail.iter().take(LOOKBACK) {
        if RE_CUE_BUY.is_match(&entry.text) {
            return Side::Buy;
        }
        if RE_CUE_SELL.is_match(&entry.text) {
            return Side::Sell;
        }
    }
    // tanpa petunjuk, anggap user sedang membeli
    Side::Buy
}

fn try_counter(utterance: &str, shop_id: u32, shop_tail: &[TranscriptEntry]) -> Option<ParseOutcome> {
    if !RE_COUNTER.is_match(utterance) {
        return None;
    }
    let side = counter_direction(shop_tail);

    // qty item price dalam satu utterance
    for cap in RE_COUNTER_QIP.captures_iter(utterance) {
        let (Some(qty), Some(unit_price)) = (positive(&cap[1]), positive(&cap[3])) else { continue };
        let Some(item) = ItemKind::from_token(&cap[2]) else { continue };
        return Some(ParseOutcome::Intent(TradeIntent { side, item, qty, unit_price, shop_id, accepted_offer: false }));
    }

    // price item saja; qty dari tawaran toko terakhir (default 1)
    for cap in RE_COUNTER_PI.captures_iter(utterance) {
        let Some(unit_price) = positive(&cap[1]) else { continue };
        let Some(item) = ItemKind::from_token(&cap[2]) else { continue };
        let qty = latest_offer(shop_tail).map(|(_, q, _, _)| q).unwrap_or(1);
        return Some(ParseOutcome::Intent(TradeIntent { side, item, qty, unit_price, shop_id, accepted_offer: false }));
    }
    None
}

/// `shop_tail`: entry toko terbaru lebih dulu (lihat MarketState::shop_tail).
pub fn parse(utterance: &str, shop_id: u32, shop_tail: &[TranscriptEntry]) -> ParseOutcome {
    if let Some(out) = try_direct(utterance, shop_id) {
        return out;
    }
    if let Some(out) = try_acceptance(utterance, shop_id, shop_tail) {
        return out;
    }
    if let Some(out) = try_counter(utterance, shop_id, shop_tail) {
        return out;
    }
    ParseOutcome::NoIntent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Speaker;

    fn shop_line(text: &str) -> TranscriptEntry {
        TranscriptEntry { shop_id: 1, speaker: Speaker::Shop, text: text.into(), trade: None, ts: 0 }
    }

    fn intent(out: ParseOutcome) -> TradeIntent {
        match out {
            ParseOutcome::Intent(i) => i,
            other => panic!("expected intent, got {other:?}"),
        }
    }

    #[test]
    fn direct_buy_with_currency_marker() {
        let i = intent(parse("buy 5 wires for ₹22", 1, &[]));
        assert_eq!(i.side, Side::Buy);
        assert_eq!(i.item, ItemKind::Wire);
        assert_eq!(i.qty, 5);
        assert_eq!(i.unit_price, 22);
        assert_eq!(i.shop_id, 1);
    }

    #[test]
    fn direct_variants_and_orderings() {
        let i = intent(parse("Purchase 2 Capacitors @ 28", 2, &[]));
        assert_eq!((i.side, i.item, i.qty, i.unit_price), (Side::Buy, ItemKind::Capacitor, 2, 28));

        let i = intent(parse("sell batteries 3 at 95", 1, &[]));
        assert_eq!((i.side, i.item, i.qty, i.unit_price), (Side::Sell, ItemKind::Battery, 3, 95));

        let i = intent(parse("I want to sell 3 batteries at Rs 95", 1, &[]));
        assert_eq!((i.side, i.item, i.qty, i.unit_price), (Side::Sell, ItemKind::Battery, 3, 95));
    }

    #[test]
    fn recognized_verb_unknown_item_is_explicit() {
        match parse("buy 5 gizmos for 10", 1, &[]) {
            ParseOutcome::UnknownItem { side, token } => {
                assert_eq!(side, Side::Buy);
                assert_eq!(token.to_ascii_lowercase(), "gizmos");
            }
            other => panic!("expected UnknownItem, got {other:?}"),
        }
    }

    #[test]
    fn zero_quantity_or_price_is_invalid_not_noise() {
        assert_eq!(parse("buy 0 wires for 5", 1, &[]), ParseOutcome::InvalidNumber);
        assert_eq!(parse("sell 3 wires for 0", 1, &[]), ParseOutcome::InvalidNumber);
    }

    #[test]
    fn acceptance_reconstructs_shop_sell_offer() {
        let tail = vec![shop_line("I can sell you 5 Wires for ₹22, final price.")];
        let i = intent(parse("ok deal", 1, &tail));
        assert_eq!((i.side, i.item, i.qty, i.unit_price), (Side::Buy, ItemKind::Wire, 5, 22));
        assert!(i.accepted_offer);
    }

    #[test]
    fn acceptance_maps_shop_buy_to_user_sell() {
        let tail = vec![shop_line("Fine, I can buy 4 Resistors for ₹9 from you.")];
        let i = intent(parse("deal!", 1, &tail));
        assert_eq!((i.side, i.item, i.qty, i.unit_price), (Side::Sell, ItemKind::Resistor, 4, 9));
    }

    #[test]
    fn acceptance_uses_closest_offer_first() {
        let tail = vec![
            shop_line("I can sell you 2 Bulbs for ₹48."),
            shop_line("I can sell you 5 Wires for ₹22."),
        ];
        let i = intent(parse("yes, sounds good", 1, &tail));
        assert_eq!((i.item, i.qty, i.unit_price), (ItemKind::Bulb, 2, 48));
    }

    #[test]
    fn acceptance_without_prior_offer_falls_through() {
        assert_eq!(parse("ok deal", 1, &[]), ParseOutcome::NoIntent);
        let tail = vec![shop_line("Welcome to the shop!")];
        assert_eq!(parse("ok deal", 1, &tail), ParseOutcome::NoIntent);
    }

    #[test]
    fn counter_with_full_shape() {
        let tail = vec![shop_line("I can sell you 5 Wires for ₹22.")];
        let i = intent(parse("how about 5 wires for 18", 1, &tail));
        assert_eq!((i.side, i.item, i.qty, i.unit_price), (Side::Buy, ItemKind::Wire, 5, 18));
    }

    #[test]
    fn counter_price_only_recovers_qty_from_offer() {
        let tail = vec![shop_line("I can sell you 5 Wires for ₹22.")];
        let i = intent(parse("how about ₹18 for the wires?", 1, &tail));
        assert_eq!((i.side, i.item, i.qty, i.unit_price), (Side::Buy, ItemKind::Wire, 5, 18));
    }

    #[test]
    fn counter_defaults_qty_one_without_offer() {
        let i = intent(parse("I'll pay 45 for a bulb", 1, &[]));
        assert_eq!((i.side, i.item, i.qty, i.unit_price), (Side::Buy, ItemKind::Bulb, 1, 45));
    }

    #[test]
    fn counter_direction_follows_shop_cue() {
        let tail = vec![shop_line("I can buy 10 Wires at ₹15, sell to me anytime.")];
        let i = intent(parse("how about 17 for the wires", 1, &tail));
        assert_eq!(i.side, Side::Sell);
        assert_eq!(i.qty, 10); // qty dipulihkan dari tawaran toko
        assert_eq!(i.unit_price, 17);
    }

    #[test]
    fn acceptance_mixed_with_counter_term_is_a_counter() {
        let tail = vec![shop_line("I can sell you 5 Wires for ₹22.")];
        let i = intent(parse("ok, but how about 5 wires for 19", 1, &tail));
        assert_eq!(i.unit_price, 19);
    }

    #[test]
    fn small_talk_is_no_intent() {
        assert_eq!(parse("hello, how's business today?", 1, &[]), ParseOutcome::NoIntent);
        assert_eq!(parse("what do you have in stock?", 1, &[]), ParseOutcome::NoIntent);
    }
}
