//! Payment Rail interface
//! EFT initiation and card capture behind a trait, so the settlement core
//! never talks to a gateway directly and tests can inject failing rails

use uuid::Uuid;

use crate::error::CoreError;

// ========================================
// Rail results
// ========================================

/// Result of initiating an EFT: the reference the buyer must quote on the
/// bank transfer. Verification happens asynchronously, out of band.
#[derive(Debug, Clone)]
pub struct EftInitiation {
    pub reference: String,
}

/// Result of an immediate card capture.
#[derive(Debug, Clone)]
pub struct CardCapture {
    pub gateway_transaction_id: String,
}

// ========================================
// Trait
// ========================================

/// External payment collaborator. A failed call must abort checkout before
/// any persistence — callers invoke the rail first, then commit.
pub trait PaymentRail: Send + Sync {
    fn process_eft(&self, amount_cents: i64, reference: &str) -> Result<EftInitiation, CoreError>;

    fn process_card(&self, amount_cents: i64, token: &str) -> Result<CardCapture, CoreError>;
}

/// Generate an EFT payment reference (EFT- + base32 8 chars)
pub fn generate_eft_reference() -> String {
    use rand::Rng;
    let random_bytes: [u8; 5] = rand::thread_rng().gen();
    let encoded = base32::encode(base32::Alphabet::Crockford, &random_bytes);
    format!("EFT-{}", encoded)
}

// ========================================
// Simulated rail
// ========================================

/// Stand-in gateway. EFT initiation always succeeds (verification is manual
/// anyway); card capture declines the magic "declined" token and empty
/// tokens so the failure path stays exercisable end to end.
#[derive(Debug, Clone, Default)]
pub struct SimulatedRail;

impl PaymentRail for SimulatedRail {
    fn process_eft(&self, _amount_cents: i64, reference: &str) -> Result<EftInitiation, CoreError> {
        Ok(EftInitiation {
            reference: reference.to_string(),
        })
    }

    fn process_card(&self, _amount_cents: i64, token: &str) -> Result<CardCapture, CoreError> {
        if token.is_empty() || token == "declined" {
            return Err(CoreError::PaymentRail("card declined".to_string()));
        }
        Ok(CardCapture {
            gateway_transaction_id: format!("CARD-{}", Uuid::new_v4()),
        })
    }
}
