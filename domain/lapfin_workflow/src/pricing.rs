//! # Pricing
//!
//! Splits a laptop price into the 70% collected on delivery and the 30%
//! paid online. Amounts are integer minor units (pesewas); the initial part
//! is rounded half-up and the final part is whatever remains, so the two
//! always add back to the total.

use serde::{Deserialize, Serialize};

use crate::errors::PricingError;
use crate::types::PaymentType;

/// Percentage of the price collected on delivery.
pub const INITIAL_PERCENT: i64 = 70;
/// Percentage of the price paid online after delivery.
pub const FINAL_PERCENT: i64 = 100 - INITIAL_PERCENT;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub total_price: i64,
    pub initial_amount: i64,
    pub final_amount: i64,
}

impl PriceBreakdown {
    pub fn from_total(total_price: i64) -> Result<Self, PricingError> {
        if total_price <= 0 {
            return Err(PricingError::NonPositiveTotal(total_price));
        }
        let scaled = total_price
            .checked_mul(INITIAL_PERCENT)
            .and_then(|v| v.checked_add(50))
            .ok_or(PricingError::Overflow(total_price))?;
        let initial_amount = scaled / 100;
        Ok(Self {
            total_price,
            initial_amount,
            final_amount: total_price - initial_amount,
        })
    }

    pub fn amount_for(&self, kind: PaymentType) -> i64 {
        match kind {
            PaymentType::Initial70 => self.initial_amount,
            PaymentType::Final30 => self.final_amount,
        }
    }
}
