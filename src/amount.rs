use std::fmt;

/// Money in the smallest currency unit (cents), stored as an integer.
/// All stored and transferred values go through this type; percentage
/// derivation rounds half-up back to the unit, so floats never reach rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn from_cents(value: i64) -> Self {
        Amount(value)
    }

    pub fn cents(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Derive a basis-point share of this amount, rounded half-up to the unit.
    ///
    /// Uses a 128-bit intermediate so large amounts cannot overflow.
    pub fn apply_bps(&self, bps: u32) -> Amount {
        debug_assert!(self.0 >= 0, "bps derivation on negative amount");
        let scaled = self.0 as i128 * bps as i128;
        Amount(((scaled + 5_000) / 10_000) as i64)
    }

    /// Subtract, clamping at zero. Used for partial-refund deductions where
    /// a deduction larger than the deposit refunds nothing rather than
    /// charging the shopper.
    pub fn saturating_sub(&self, rhs: Amount) -> Amount {
        Amount((self.0 - rhs.0).max(0))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl std::ops::Add for Amount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Amount(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Amount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Amount(self.0 - rhs.0)
    }
}

impl std::ops::AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_cents_preserves_value() {
        assert_eq!(Amount::from_cents(12345).cents(), 12345);
    }

    #[test]
    fn default_is_zero() {
        assert_eq!(Amount::default(), Amount::ZERO);
        assert!(Amount::ZERO.is_zero());
    }

    #[test]
    fn display_formats_cents() {
        assert_eq!(Amount::from_cents(20000).to_string(), "200.00");
        assert_eq!(Amount::from_cents(1).to_string(), "0.01");
        assert_eq!(Amount::from_cents(15050).to_string(), "150.50");
        assert_eq!(Amount::from_cents(0).to_string(), "0.00");
    }

    #[test]
    fn display_formats_negative() {
        assert_eq!(Amount::from_cents(-1).to_string(), "-0.01");
        assert_eq!(Amount::from_cents(-50250).to_string(), "-502.50");
    }

    #[test]
    fn apply_bps_exact() {
        // 10% of 200.00 is 20.00
        assert_eq!(
            Amount::from_cents(20000).apply_bps(1000),
            Amount::from_cents(2000)
        );
    }

    #[test]
    fn apply_bps_rounds_half_up() {
        // 3.33 * 15% = 0.4995 -> 0.50
        assert_eq!(Amount::from_cents(333).apply_bps(1500), Amount::from_cents(50));
        // 0.01 * 5% = 0.0005 -> 0.00 (below half)
        assert_eq!(Amount::from_cents(1).apply_bps(500), Amount::ZERO);
        // 0.10 * 5% = 0.005 -> 0.01 (half rounds up)
        assert_eq!(Amount::from_cents(10).apply_bps(500), Amount::from_cents(1));
    }

    #[test]
    fn apply_bps_zero_rate() {
        assert_eq!(Amount::from_cents(99999).apply_bps(0), Amount::ZERO);
    }

    #[test]
    fn apply_bps_large_amount_does_not_overflow() {
        let large = Amount::from_cents(i64::MAX / 2);
        let fee = large.apply_bps(1000);
        assert!(fee.cents() > 0);
    }

    #[test]
    fn saturating_sub_clamps_at_zero() {
        let deposit = Amount::from_cents(20000);
        assert_eq!(
            deposit.saturating_sub(Amount::from_cents(5000)),
            Amount::from_cents(15000)
        );
        assert_eq!(
            deposit.saturating_sub(Amount::from_cents(30000)),
            Amount::ZERO
        );
    }

    #[test]
    fn add_and_sub() {
        let a = Amount::from_cents(100);
        let b = Amount::from_cents(30);
        assert_eq!(a + b, Amount::from_cents(130));
        assert_eq!(a - b, Amount::from_cents(70));
    }

    #[test]
    fn add_assign() {
        let mut a = Amount::from_cents(100);
        a += Amount::from_cents(50);
        assert_eq!(a, Amount::from_cents(150));
    }
}
