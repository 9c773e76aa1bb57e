//! Commission fee calculation.
//!
//! Fee rates are configuration in basis points (100 bps = 1%), split between
//! a buyer-side share added on top of the subtotal and a host-side share
//! deducted from the payout. A quote is taken once, at hold issuance, and the
//! resulting breakdown is persisted on the booking; later schedule changes
//! never retroactively change a stored breakdown.

use crate::Amount;

/// Platform commission rates in basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSchedule {
    /// Added on top of the subtotal, paid by the buyer.
    pub buyer_fee_bps: u32,
    /// Deducted from the subtotal before the host payout.
    pub host_fee_bps: u32,
}

impl Default for FeeSchedule {
    /// 5% buyer-side, 5% host-side.
    fn default() -> Self {
        Self {
            buyer_fee_bps: 500,
            host_fee_bps: 500,
        }
    }
}

/// The breakdown persisted on a booking when its hold is issued.
///
/// Invariant: `customer_total - deposit - application_fee == host_payout`,
/// exact to the cent. Each fee is rounded once (half-up) and reused, so the
/// identity holds by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeBreakdown {
    /// base + delivery.
    pub subtotal: Amount,
    pub buyer_fee: Amount,
    pub host_fee: Amount,
    /// What the buyer's payment method is held/charged for.
    pub customer_total: Amount,
    /// buyer_fee + host_fee, the platform's take.
    pub application_fee: Amount,
    /// subtotal - host_fee, what the host receives.
    pub host_payout: Amount,
}

impl FeeSchedule {
    /// Quote a booking. Pure; the deposit passes through untouched into the
    /// customer total and never attracts commission.
    pub fn quote(&self, base: Amount, delivery: Amount, deposit: Option<Amount>) -> FeeBreakdown {
        let deposit = deposit.unwrap_or(Amount::ZERO);
        let subtotal = base + delivery;
        let buyer_fee = subtotal.apply_bps(self.buyer_fee_bps);
        let host_fee = subtotal.apply_bps(self.host_fee_bps);

        FeeBreakdown {
            subtotal,
            buyer_fee,
            host_fee,
            customer_total: subtotal + buyer_fee + deposit,
            application_fee: buyer_fee + host_fee,
            host_payout: subtotal - host_fee,
        }
    }
}
