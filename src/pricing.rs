//! Instant-Offer Pricing Engine
//! Condition-adjusted purchase offers computed from a market price and a
//! buyer's configurable rule set

use std::collections::HashMap;

use tracing::warn;

use crate::error::CoreError;
use crate::fees::{round_half_up, FeeConfig};
use crate::models::Condition;

/// Validated per-condition multiplier overrides for one instant buyer.
pub type ConditionRuleMap = HashMap<Condition, f64>;

/// Offers land on R50 boundaries. Product decision: sellers see friendly
/// round numbers, not precision artifacts.
const OFFER_STEP_CENTS: i64 = 5_000;

/// Built-in multiplier table, used when a buyer carries no override rules.
fn default_multiplier(condition: Condition) -> f64 {
    match condition {
        Condition::New => 1.10,
        Condition::LikeNew => 1.05,
        Condition::Good => 1.00,
        Condition::Fair => 0.85,
        Condition::Poor => 0.70,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct InstantOfferQuote {
    pub seller_receives_cents: i64,
    pub buyer_pays_cents: i64,
    pub platform_fee_cents: i64,
}

/// Round to the nearest R50 step, half-up.
fn round_to_offer_step(value: f64) -> i64 {
    let steps = (value / OFFER_STEP_CENTS as f64 + 0.5).floor() as i64;
    steps * OFFER_STEP_CENTS
}

/// Compute one instant buyer's standing offer.
///
/// A rule map missing the listing's condition degrades to a neutral 1.0
/// multiplier rather than failing, so one sparse buyer configuration never
/// blocks offer generation.
pub fn calculate_instant_offer(
    market_price_cents: i64,
    condition: Condition,
    base_offer_rate: f64,
    condition_rules: Option<&ConditionRuleMap>,
    config: &FeeConfig,
) -> Result<InstantOfferQuote, CoreError> {
    if market_price_cents < 0 {
        return Err(CoreError::Validation(format!(
            "market price must be non-negative, got {}",
            market_price_cents
        )));
    }
    if !(0.0..=1.0).contains(&base_offer_rate) {
        return Err(CoreError::Validation(format!(
            "base offer rate must be within [0, 1], got {}",
            base_offer_rate
        )));
    }

    let multiplier = match condition_rules {
        Some(rules) => rules.get(&condition).copied().unwrap_or(1.0),
        None => default_multiplier(condition),
    };

    let seller_receives_cents =
        round_to_offer_step(market_price_cents as f64 * base_offer_rate * multiplier);
    let platform_fee_cents = round_half_up(seller_receives_cents as f64 * config.instant_fee_rate);

    Ok(InstantOfferQuote {
        seller_receives_cents,
        buyer_pays_cents: seller_receives_cents + platform_fee_cents,
        platform_fee_cents,
    })
}

/// Parse a buyer's stored condition-rule JSON blob into a validated map.
/// Unrecognized condition keys are dropped with a warning; they must never
/// fail the generation pass for the other buyers.
pub fn parse_condition_rules(raw: &str) -> Result<ConditionRuleMap, CoreError> {
    let parsed: HashMap<String, f64> = serde_json::from_str(raw)
        .map_err(|e| CoreError::Validation(format!("malformed condition rules: {}", e)))?;

    let mut rules = ConditionRuleMap::new();
    for (key, multiplier) in parsed {
        match Condition::from_key(&key) {
            Some(condition) => {
                rules.insert(condition, multiplier);
            }
            None => {
                warn!("Ignoring unknown condition key in rule blob: {}", key);
            }
        }
    }
    Ok(rules)
}

// ========================================
// Tests
// ========================================
