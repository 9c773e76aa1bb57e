//! Core domain types for the escrow lifecycle engine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::Amount;
use crate::fees::FeeBreakdown;

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_type!(
    /// Booking identifier.
    BookingId
);
id_type!(
    /// User identifier (host, shopper, or admin).
    UserId
);
id_type!(
    /// Listing identifier.
    ListingId
);
id_type!(
    /// Promo reward record identifier.
    RewardId
);
id_type!(
    /// Opaque processor reference to an authorization hold.
    HoldRef
);
id_type!(
    /// Opaque processor reference to a captured charge.
    ChargeRef
);
id_type!(
    /// Opaque processor reference to an issued refund.
    RefundRef
);
id_type!(
    /// Opaque processor reference to an outbound transfer.
    TransferRef
);
id_type!(
    /// Opaque reference to a user's connected payout destination account.
    DestinationRef
);
id_type!(
    /// Opaque reference to a buyer's stored payment method.
    PaymentMethodRef
);

/// Error returned when parsing a status/role string from a flat record.
#[derive(Debug, Error)]
#[error("unrecognized {kind} '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let text = match self {
                    $($name::$variant => $text,)+
                };
                f.write_str(text)
            }
        }

        impl FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(ParseEnumError {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

/// How funds are captured when the hold is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMethod {
    /// Request-to-book: the hold waits for a host decision.
    #[default]
    Manual,
    /// Instant book: hold and capture are the same step.
    Automatic,
}

string_enum!(CaptureMethod, "capture method", {
    Manual => "manual",
    Automatic => "automatic",
});

/// Buyer-side authorization hold lifecycle. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HoldStatus {
    /// No hold has been issued yet.
    #[default]
    None,
    /// Hold open against the buyer's payment method, awaiting a decision.
    Pending,
    /// Funds captured; only a refund (not a release) can return them.
    Captured,
    /// Hold cancelled; the reservation returned to the buyer uncharged.
    Released,
}

string_enum!(HoldStatus, "hold status", {
    None => "none",
    Pending => "pending",
    Captured => "captured",
    Released => "released",
});

/// Security-deposit lifecycle. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepositStatus {
    #[default]
    None,
    Charged,
    Refunded,
    Forfeited,
}

string_enum!(DepositStatus, "deposit status", {
    None => "none",
    Charged => "charged",
    Refunded => "refunded",
    Forfeited => "forfeited",
});

/// Manually-imposed suspension of the post-capture payout to the host.
/// Orthogonal to [`HoldStatus`]: this blocks payout issuance, not capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminPayoutHold {
    pub until: DateTime<Utc>,
    pub reason: String,
    pub set_by: UserId,
}

impl AdminPayoutHold {
    /// A hold only blocks payout while its expiry is in the future.
    pub fn active(&self, now: DateTime<Utc>) -> bool {
        self.until > now
    }
}

/// The central financial record. Never deleted; every money-moving
/// operation mutates exactly one of its state field groups.
#[derive(Debug, Clone)]
pub struct Booking {
    pub id: BookingId,
    pub listing: ListingId,
    pub host: UserId,
    pub shopper: UserId,

    pub base_amount: Amount,
    pub delivery_fee: Amount,
    pub deposit_amount: Option<Amount>,
    /// Fee breakdown persisted at hold issuance from the schedule in effect
    /// at that moment; never recomputed from a later snapshot.
    pub pricing: Option<FeeBreakdown>,

    pub payment_method: PaymentMethodRef,
    pub capture_method: CaptureMethod,
    /// Processor hold reference; set once, immutable after capture.
    pub payment_ref: Option<HoldRef>,
    /// Processor charge reference, set on capture.
    pub charge_ref: Option<ChargeRef>,
    pub hold_status: HoldStatus,
    pub hold_expires_at: Option<DateTime<Utc>>,

    pub admin_hold: Option<AdminPayoutHold>,

    pub deposit_status: DepositStatus,
    pub deposit_charge_ref: Option<ChargeRef>,
    pub deposit_note: Option<String>,
    pub deposit_refunded_at: Option<DateTime<Utc>>,

    /// One-way latch: once true, no hold or deposit mutation is permitted.
    pub payout_processed: bool,
    pub payout_ref: Option<TransferRef>,
}

impl Booking {
    /// Create a fresh booking request with no processor linkage yet.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: BookingId,
        listing: ListingId,
        host: UserId,
        shopper: UserId,
        base_amount: Amount,
        delivery_fee: Amount,
        deposit_amount: Option<Amount>,
        payment_method: PaymentMethodRef,
        capture_method: CaptureMethod,
    ) -> Self {
        Self {
            id,
            listing,
            host,
            shopper,
            base_amount,
            delivery_fee,
            deposit_amount,
            pricing: None,
            payment_method,
            capture_method,
            payment_ref: None,
            charge_ref: None,
            hold_status: HoldStatus::None,
            hold_expires_at: None,
            admin_hold: None,
            deposit_status: DepositStatus::None,
            deposit_charge_ref: None,
            deposit_note: None,
            deposit_refunded_at: None,
            payout_processed: false,
            payout_ref: None,
        }
    }

    /// True iff a non-expired admin payout hold is present.
    pub fn payout_blocked(&self, now: DateTime<Utc>) -> bool {
        self.admin_hold.as_ref().is_some_and(|h| h.active(now))
    }
}

/// Why a pending hold was released. Carried into the buyer notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    Declined,
    Expired,
    Cancelled,
}

impl fmt::Display for ReleaseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ReleaseReason::Declined => "declined by host",
            ReleaseReason::Expired => "authorization hold expired",
            ReleaseReason::Cancelled => "booking cancelled",
        };
        f.write_str(text)
    }
}

/// End-of-rental resolution for the security deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundPolicy {
    Full,
    Partial { deduction: Amount },
    Forfeit,
}

/// Who is asking. Every mutating operation takes an explicit actor so
/// authorization is a pure check of (actor, booking), not ambient session
/// state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(user: UserId, role: Role) -> Self {
        Self { user, role }
    }

    pub fn shopper(user: impl Into<String>) -> Self {
        Self::new(UserId::new(user), Role::Shopper)
    }

    pub fn host(user: impl Into<String>) -> Self {
        Self::new(UserId::new(user), Role::Host)
    }

    pub fn admin(user: impl Into<String>) -> Self {
        Self::new(UserId::new(user), Role::Admin)
    }

    /// The unattended actor used by sweeps and scheduled jobs.
    pub fn system() -> Self {
        Self::new(UserId::new("system"), Role::System)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }

    pub fn is_system(&self) -> bool {
        matches!(self.role, Role::System)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Shopper,
    Host,
    Admin,
    System,
}

string_enum!(Role, "role", {
    Shopper => "shopper",
    Host => "host",
    Admin => "admin",
    System => "system",
});

/// Which promotional reward pool a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolType {
    ListingReward,
    ContestWinner,
}

string_enum!(PoolType, "pool type", {
    ListingReward => "listing_reward",
    ContestWinner => "contest_winner",
});

/// Promo payout status. `Failed` may be retried on a later run;
/// `Disqualified` never is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RewardStatus {
    #[default]
    Pending,
    Eligible,
    Paid,
    Failed,
    Disqualified,
}

string_enum!(RewardStatus, "reward status", {
    Pending => "pending",
    Eligible => "eligible",
    Paid => "paid",
    Failed => "failed",
    Disqualified => "disqualified",
});

/// A promotional reward or contest win awaiting payout. Never deleted.
#[derive(Debug, Clone)]
pub struct RewardRecord {
    pub id: RewardId,
    pub pool: PoolType,
    pub beneficiary: UserId,
    pub listing: ListingId,
    pub status: RewardStatus,
    pub disqualified_reason: Option<String>,
    /// Destination account actually paid; recorded only once paid so later
    /// batch runs can de-duplicate against it.
    pub destination: Option<DestinationRef>,
    pub transfer_ref: Option<TransferRef>,
    pub initiated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RewardRecord {
    pub fn new(
        id: RewardId,
        pool: PoolType,
        beneficiary: UserId,
        listing: ListingId,
    ) -> Self {
        Self {
            id,
            pool,
            beneficiary,
            listing,
            status: RewardStatus::Pending,
            disqualified_reason: None,
            destination: None,
            transfer_ref: None,
            initiated_at: None,
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn booking() -> Booking {
        Booking::new(
            BookingId::new("b1"),
            ListingId::new("l1"),
            UserId::new("host1"),
            UserId::new("shopper1"),
            Amount::from_cents(10000),
            Amount::from_cents(2000),
            Some(Amount::from_cents(20000)),
            PaymentMethodRef::new("pm_1"),
            CaptureMethod::Manual,
        )
    }

    #[test]
    fn new_booking_starts_unlinked() {
        let b = booking();
        assert_eq!(b.hold_status, HoldStatus::None);
        assert_eq!(b.deposit_status, DepositStatus::None);
        assert!(b.payment_ref.is_none());
        assert!(b.pricing.is_none());
        assert!(!b.payout_processed);
    }

    #[test]
    fn admin_hold_blocks_only_until_expiry() {
        let now = Utc::now();
        let mut b = booking();
        b.admin_hold = Some(AdminPayoutHold {
            until: now + Duration::days(3),
            reason: "fraud review".to_string(),
            set_by: UserId::new("admin1"),
        });

        assert!(b.payout_blocked(now));
        assert!(!b.payout_blocked(now + Duration::days(4)));
    }

    #[test]
    fn no_admin_hold_means_not_blocked() {
        assert!(!booking().payout_blocked(Utc::now()));
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            HoldStatus::None,
            HoldStatus::Pending,
            HoldStatus::Captured,
            HoldStatus::Released,
        ] {
            assert_eq!(status.to_string().parse::<HoldStatus>().unwrap(), status);
        }
        for status in [
            RewardStatus::Pending,
            RewardStatus::Eligible,
            RewardStatus::Paid,
            RewardStatus::Failed,
            RewardStatus::Disqualified,
        ] {
            assert_eq!(status.to_string().parse::<RewardStatus>().unwrap(), status);
        }
    }

    #[test]
    fn unrecognized_status_string_fails() {
        let err = "capturedd".parse::<HoldStatus>().unwrap_err();
        assert_eq!(err.kind, "hold status");
    }

    #[test]
    fn release_reason_messages() {
        assert_eq!(ReleaseReason::Declined.to_string(), "declined by host");
        assert_eq!(
            ReleaseReason::Expired.to_string(),
            "authorization hold expired"
        );
    }
}
