//! Fee Calculator
//! Pure fee-split computation for marketplace sales (EFT / card rails)

use crate::error::CoreError;
use crate::models::PaymentMethod;

// ========================================
// Configuration
// ========================================

/// Fee rates and thresholds. Built once from the environment and passed in
/// explicitly, so tests can run against fixed rates.
#[derive(Debug, Clone)]
pub struct FeeConfig {
    /// Platform commission on the item price (fraction, e.g. 0.055 = 5.5%)
    pub platform_rate: f64,
    /// Card processing surcharge (fraction, e.g. 0.02 = 2%)
    pub card_rate: f64,
    /// Item prices at or below this are commission-free (cents, R1,000)
    pub free_threshold_cents: i64,
    /// Platform commission on instant offers (fraction, e.g. 0.05 = 5%)
    pub instant_fee_rate: f64,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            platform_rate: 0.055,
            card_rate: 0.02,
            free_threshold_cents: 100_000,
            instant_fee_rate: 0.05,
        }
    }
}

// ========================================
// Fee breakdown
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct FeeBreakdown {
    pub platform_fee_cents: i64,
    pub card_fee_cents: i64,
    pub total_fee_cents: i64,
    pub seller_receives_cents: i64,
}

/// Round-half-up to a whole minor unit. Inputs are non-negative.
pub fn round_half_up(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}

/// Compute the fee split for one sale.
///
/// Each fee is rounded half-up exactly once; the seller payout is then plain
/// integer arithmetic, so `platform + card + seller == item_price` holds
/// whenever the payout does not floor at zero.
pub fn calculate_fees(
    item_price_cents: i64,
    method: PaymentMethod,
    config: &FeeConfig,
) -> Result<FeeBreakdown, CoreError> {
    if item_price_cents < 0 {
        return Err(CoreError::Validation(format!(
            "item price must be non-negative, got {}",
            item_price_cents
        )));
    }

    // Threshold check comes before the percentage: small sales are
    // commission-free outright.
    let platform_fee_cents = if item_price_cents <= config.free_threshold_cents {
        0
    } else {
        round_half_up(item_price_cents as f64 * config.platform_rate)
    };

    let card_fee_cents = match method {
        PaymentMethod::Card => round_half_up(item_price_cents as f64 * config.card_rate),
        PaymentMethod::Eft => 0,
    };

    let seller_receives_cents = (item_price_cents - platform_fee_cents - card_fee_cents).max(0);

    Ok(FeeBreakdown {
        platform_fee_cents,
        card_fee_cents,
        total_fee_cents: platform_fee_cents + card_fee_cents,
        seller_receives_cents,
    })
}

// ========================================
// Tests
// ========================================
