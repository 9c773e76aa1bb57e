//! Error taxonomy for lifecycle operations.
//!
//! Precondition violations are rejected before any processor call and carry
//! enough context for an actionable message; processor failures pass through
//! [`ProcessorError`] with the backend's message attached.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::{BookingId, DepositStatus, Role, UserId};
use crate::processor::ProcessorError;

/// Top-level error returned by [`Engine::apply`](super::Engine::apply) and
/// the individual lifecycle operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("booking {0} not found")]
    BookingNotFound(BookingId),

    #[error("{user} ({role}) is not allowed to {action} booking {booking}")]
    NotAuthorized {
        user: UserId,
        role: Role,
        action: &'static str,
        booking: BookingId,
    },

    #[error("hold operation failed: {0}")]
    Hold(#[from] HoldError),

    #[error("admin payout hold rejected: {0}")]
    AdminHold(#[from] AdminHoldError),

    #[error("deposit settlement failed: {0}")]
    Deposit(#[from] DepositError),

    #[error("payout failed: {0}")]
    Payout(#[from] PayoutError),

    #[error(transparent)]
    Processor(#[from] ProcessorError),
}

/// Error issuing, capturing, or releasing the buyer-side authorization hold.
#[derive(Debug, Error)]
pub enum HoldError {
    #[error("host {0} has not finished payout onboarding, so this booking cannot be charged yet")]
    HostPayoutNotConfigured(UserId),

    #[error("hold for booking {0} is already captured; use a refund instead of a release")]
    CannotReleaseCapturedHold(BookingId),

    #[error("hold for booking {0} was already released and can no longer be captured")]
    CannotCaptureReleasedHold(BookingId),

    #[error("no hold has been issued for booking {0}")]
    HoldNotIssued(BookingId),

    #[error("payout for booking {0} is already processed; its hold can no longer change")]
    PayoutAlreadyProcessed(BookingId),
}

/// Error setting the admin payout hold.
#[derive(Debug, Error)]
pub enum AdminHoldError {
    #[error("payout for booking {0} was already processed; a payout hold would have no effect")]
    PayoutAlreadyProcessed(BookingId),

    #[error("hold-until {until} is not in the future")]
    HoldUntilInPast { until: DateTime<Utc> },

    #[error("a payout hold requires a non-empty reason")]
    EmptyReason,
}

/// Error settling the security deposit.
#[derive(Debug, Error)]
pub enum DepositError {
    #[error("booking {0} has no deposit to refund")]
    NoDepositToRefund(BookingId),

    #[error("deposit for booking {booking} is '{status}', not 'charged'")]
    DepositAlreadyRefunded {
        booking: BookingId,
        status: DepositStatus,
    },

    #[error("deposit for booking {0} has no processor charge reference")]
    MissingChargeRef(BookingId),

    #[error("payout for booking {0} is already processed; its deposit can no longer change")]
    PayoutAlreadyProcessed(BookingId),
}

/// Error issuing the post-capture host payout.
#[derive(Debug, Error)]
pub enum PayoutError {
    #[error("payout for booking {0} was already processed")]
    AlreadyProcessed(BookingId),

    #[error("hold for booking {0} is not captured; there is nothing to pay out")]
    HoldNotCaptured(BookingId),

    #[error("payout for booking {booking} is on hold until {until}: {reason}")]
    OnHold {
        booking: BookingId,
        until: DateTime<Utc>,
        reason: String,
    },

    #[error("booking {0} has no persisted fee breakdown")]
    MissingBreakdown(BookingId),

    #[error("host {0} has no payout destination configured")]
    DestinationNotConfigured(UserId),
}
