//! Booking payment & escrow lifecycle engine.
//!
//! Moves bookings through authorization-hold, capture, release, deposit
//! settlement, and payout issuance, and pays out promotional rewards in
//! batch. Every transition re-reads the current status and aborts
//! (idempotently where safe, loudly otherwise) when the precondition no
//! longer holds, so concurrent double-invocation needs no locks. Processor
//! failures propagate with no local mutation; notifications are emitted only
//! after the ledger change and never affect the outcome.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tokio_stream::{Stream, StreamExt};
use tracing::{info, warn};

use crate::Amount;
use crate::fees::{FeeBreakdown, FeeSchedule};
use crate::identity::IdentityProvider;
use crate::model::{
    Actor, AdminPayoutHold, Booking, BookingId, CaptureMethod, ChargeRef, DepositStatus,
    HoldRef, HoldStatus, PoolType, RefundPolicy, ReleaseReason, RewardId, RewardRecord, Role,
    TransferRef, UserId,
};
use crate::notify::{Channel, Event, Notifier};
use crate::processor::{CallMeta, PaymentProcessor};

mod error;
pub use error::{AdminHoldError, DepositError, EngineError, HoldError, PayoutError};

mod promo;
pub use promo::{BatchSummary, PromoAmounts};

/// The processor's maximum authorization window.
pub const HOLD_WINDOW_DAYS: i64 = 7;

/// Time source. Operations never call `Utc::now()` directly so
/// expiry-sensitive behavior is testable.
#[derive(Debug, Clone, Copy, Default)]
pub enum Clock {
    #[default]
    System,
    Fixed(DateTime<Utc>),
}

impl Clock {
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(t) => *t,
        }
    }
}

/// Immutable record of an admin action against an entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditNote {
    pub entity: String,
    pub actor: UserId,
    pub note: String,
    pub at: DateTime<Utc>,
}

/// Returned by [`Engine::issue_hold`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldReceipt {
    pub hold_ref: HoldRef,
    /// `None` for instant-book holds, which are captured in the same step.
    pub expires_at: Option<DateTime<Utc>>,
}

/// Returned by [`Engine::settle_deposit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub refund_amount: Amount,
    pub final_status: DepositStatus,
}

/// One unit of work against the engine, with an explicit actor.
#[derive(Debug, Clone)]
pub enum Command {
    IssueHold {
        booking: BookingId,
        actor: Actor,
    },
    CaptureHold {
        booking: BookingId,
        actor: Actor,
    },
    ReleaseHold {
        booking: BookingId,
        actor: Actor,
        reason: ReleaseReason,
    },
    SweepExpiredHolds,
    SetAdminPayoutHold {
        booking: BookingId,
        actor: Actor,
        until: DateTime<Utc>,
        reason: String,
    },
    ClearAdminPayoutHold {
        booking: BookingId,
        actor: Actor,
        reason: String,
    },
    SettleDeposit {
        booking: BookingId,
        actor: Actor,
        policy: RefundPolicy,
        notes: Option<String>,
    },
    ProcessPayout {
        booking: BookingId,
        actor: Actor,
    },
    RunPromoBatch {
        pool: PoolType,
    },
}

/// The lifecycle engine. Owns the booking and reward records (the unit of
/// mutation) plus the external seams: processor, identity directory,
/// notification channel, clock.
pub struct Engine<P, I> {
    bookings: HashMap<BookingId, Booking>,
    rewards: HashMap<RewardId, RewardRecord>,
    fees: FeeSchedule,
    promo: PromoAmounts,
    currency: String,
    processor: P,
    identity: I,
    notifier: Notifier,
    clock: Clock,
    audit: Vec<AuditNote>,
}

/// Public API
impl<P: PaymentProcessor, I: IdentityProvider> Engine<P, I> {
    pub fn new(processor: P, identity: I) -> Self {
        Self {
            bookings: HashMap::new(),
            rewards: HashMap::new(),
            fees: FeeSchedule::default(),
            promo: PromoAmounts::default(),
            currency: "usd".to_string(),
            processor,
            identity,
            notifier: Notifier::noop(),
            clock: Clock::System,
            audit: Vec::new(),
        }
    }

    pub fn with_fees(mut self, fees: FeeSchedule) -> Self {
        self.fees = fees;
        self
    }

    pub fn with_promo_amounts(mut self, promo: PromoAmounts) -> Self {
        self.promo = promo;
        self
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn insert_booking(&mut self, booking: Booking) {
        self.bookings.insert(booking.id.clone(), booking);
    }

    pub fn insert_reward(&mut self, reward: RewardRecord) {
        self.rewards.insert(reward.id.clone(), reward);
    }

    pub fn booking(&self, id: &BookingId) -> Option<&Booking> {
        self.bookings.get(id)
    }

    pub fn bookings(&self) -> impl Iterator<Item = &Booking> + '_ {
        self.bookings.values()
    }

    pub fn reward(&self, id: &RewardId) -> Option<&RewardRecord> {
        self.rewards.get(id)
    }

    pub fn rewards(&self) -> impl Iterator<Item = &RewardRecord> + '_ {
        self.rewards.values()
    }

    /// The append-only audit trail of admin actions.
    pub fn audit(&self) -> &[AuditNote] {
        &self.audit
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// Run the engine over a command stream. A failed command is logged and
    /// never stops the stream.
    pub async fn run(&mut self, mut stream: impl Stream<Item = Command> + Unpin) {
        while let Some(command) = stream.next().await {
            let _ = self.apply(command);
        }
    }

    /// Apply a single command, logging the outcome.
    pub fn apply(&mut self, command: Command) -> Result<(), EngineError> {
        match command {
            Command::IssueHold { booking, actor } => {
                let result = self.issue_hold(&booking, &actor);
                Self::log_result("issue_hold", &booking, &result);
                result.map(|_| ())
            }
            Command::CaptureHold { booking, actor } => {
                let result = self.capture_hold(&booking, &actor);
                Self::log_result("capture_hold", &booking, &result);
                result.map(|_| ())
            }
            Command::ReleaseHold {
                booking,
                actor,
                reason,
            } => {
                let result = self.release_hold(&booking, &actor, reason);
                Self::log_result("release_hold", &booking, &result);
                result
            }
            Command::SweepExpiredHolds => {
                let released = self.sweep_expired_holds();
                info!(released, "sweep_expired_holds applied");
                Ok(())
            }
            Command::SetAdminPayoutHold {
                booking,
                actor,
                until,
                reason,
            } => {
                let result = self.set_admin_payout_hold(&booking, until, &reason, &actor);
                Self::log_result("set_admin_payout_hold", &booking, &result);
                result
            }
            Command::ClearAdminPayoutHold {
                booking,
                actor,
                reason,
            } => {
                let result = self.clear_admin_payout_hold(&booking, &reason, &actor);
                Self::log_result("clear_admin_payout_hold", &booking, &result);
                result
            }
            Command::SettleDeposit {
                booking,
                actor,
                policy,
                notes,
            } => {
                let result = self.settle_deposit(&booking, policy, notes.as_deref(), &actor);
                Self::log_result("settle_deposit", &booking, &result);
                result.map(|_| ())
            }
            Command::ProcessPayout { booking, actor } => {
                let result = self.process_payout(&booking, &actor);
                Self::log_result("process_payout", &booking, &result);
                result.map(|_| ())
            }
            Command::RunPromoBatch { pool } => {
                let summary = self.run_promo_batch(pool);
                info!(
                    pool = %pool,
                    paid = summary.paid,
                    skipped = summary.skipped,
                    disqualified = summary.disqualified,
                    failed = summary.failed,
                    "run_promo_batch applied"
                );
                Ok(())
            }
        }
    }
}

/// Hold issuer & resolver
impl<P: PaymentProcessor, I: IdentityProvider> Engine<P, I> {
    /// Open an authorization hold for the booking's customer total, or
    /// capture immediately for instant-book listings.
    ///
    /// Idempotent: an existing processor reference short-circuits with the
    /// stored receipt and no second hold is created. The host's payout
    /// onboarding is checked before the processor is contacted, so a refused
    /// booking never leaves an orphaned hold behind.
    pub fn issue_hold(
        &mut self,
        id: &BookingId,
        actor: &Actor,
    ) -> Result<HoldReceipt, EngineError> {
        let booking = self
            .bookings
            .get(id)
            .ok_or_else(|| EngineError::BookingNotFound(id.clone()))?;

        authorize(
            actor,
            "issue a hold for",
            id,
            actor.is_admin()
                || actor.is_system()
                || (actor.role == Role::Shopper && actor.user == booking.shopper),
        )?;

        if let Some(hold_ref) = &booking.payment_ref {
            return Ok(HoldReceipt {
                hold_ref: hold_ref.clone(),
                expires_at: booking.hold_expires_at,
            });
        }

        if booking.payout_processed {
            return Err(HoldError::PayoutAlreadyProcessed(id.clone()).into());
        }

        if !self.identity.is_payout_destination_configured(&booking.host) {
            return Err(HoldError::HostPayoutNotConfigured(booking.host.clone()).into());
        }

        let pricing = self
            .fees
            .quote(booking.base_amount, booking.delivery_fee, booking.deposit_amount);
        let capture = booking.capture_method;
        let method = booking.payment_method.clone();
        let meta = CallMeta::booking(id, &[&booking.host, &booking.shopper]);

        let hold_ref = self.processor.create_hold(
            pricing.customer_total,
            &self.currency,
            &method,
            capture,
            &meta,
        )?;

        let now = self.clock.now();
        let booking = self
            .bookings
            .get_mut(id)
            .ok_or_else(|| EngineError::BookingNotFound(id.clone()))?;
        booking.pricing = Some(pricing);
        booking.payment_ref = Some(hold_ref.clone());
        match capture {
            CaptureMethod::Manual => {
                booking.hold_status = HoldStatus::Pending;
                booking.hold_expires_at = Some(now + Duration::days(HOLD_WINDOW_DAYS));
            }
            CaptureMethod::Automatic => {
                // Instant book: hold and capture are the same processor step,
                // so the hold reference doubles as the charge reference.
                booking.hold_status = HoldStatus::Captured;
                booking.charge_ref = Some(ChargeRef::new(hold_ref.as_str()));
            }
        }
        let expires_at = booking.hold_expires_at;

        info!(booking = %id, hold = %hold_ref, capture = %capture, "hold issued");
        Ok(HoldReceipt {
            hold_ref,
            expires_at,
        })
    }

    /// Capture a pending hold (host approval). Idempotent once captured.
    pub fn capture_hold(&mut self, id: &BookingId, actor: &Actor) -> Result<ChargeRef, EngineError> {
        let booking = self
            .bookings
            .get(id)
            .ok_or_else(|| EngineError::BookingNotFound(id.clone()))?;

        authorize(
            actor,
            "capture the hold for",
            id,
            actor.is_admin() || (actor.role == Role::Host && actor.user == booking.host),
        )?;

        match booking.hold_status {
            HoldStatus::Captured => booking
                .charge_ref
                .clone()
                .or_else(|| booking.payment_ref.as_ref().map(|h| ChargeRef::new(h.as_str())))
                .ok_or_else(|| HoldError::HoldNotIssued(id.clone()).into()),
            HoldStatus::Released => Err(HoldError::CannotCaptureReleasedHold(id.clone()).into()),
            HoldStatus::None => Err(HoldError::HoldNotIssued(id.clone()).into()),
            HoldStatus::Pending => {
                let hold_ref = booking
                    .payment_ref
                    .clone()
                    .ok_or_else(|| EngineError::Hold(HoldError::HoldNotIssued(id.clone())))?;
                let meta = CallMeta::booking(id, &[&booking.host, &booking.shopper]);
                let charge = self.processor.capture_hold(&hold_ref, &meta)?;

                let booking = self
                    .bookings
                    .get_mut(id)
                    .ok_or_else(|| EngineError::BookingNotFound(id.clone()))?;
                booking.hold_status = HoldStatus::Captured;
                booking.charge_ref = Some(charge.clone());

                info!(booking = %id, charge = %charge, "hold captured");
                Ok(charge)
            }
        }
    }

    /// Release an uncaptured hold, returning the reservation to the buyer.
    ///
    /// Legal only while the hold is pending; releasing twice is a silent
    /// success with no second processor cancel, and releasing a captured
    /// hold fails — that path is a refund, not a release. The shopper can
    /// never release their own hold.
    pub fn release_hold(
        &mut self,
        id: &BookingId,
        actor: &Actor,
        reason: ReleaseReason,
    ) -> Result<(), EngineError> {
        let booking = self
            .bookings
            .get(id)
            .ok_or_else(|| EngineError::BookingNotFound(id.clone()))?;

        authorize(
            actor,
            "release the hold for",
            id,
            actor.is_admin()
                || actor.is_system()
                || (actor.role == Role::Host && actor.user == booking.host),
        )?;

        match booking.hold_status {
            HoldStatus::Released => Ok(()),
            HoldStatus::Captured => Err(HoldError::CannotReleaseCapturedHold(id.clone()).into()),
            HoldStatus::None => Err(HoldError::HoldNotIssued(id.clone()).into()),
            HoldStatus::Pending => {
                let hold_ref = booking
                    .payment_ref
                    .clone()
                    .ok_or_else(|| EngineError::Hold(HoldError::HoldNotIssued(id.clone())))?;
                let shopper = booking.shopper.clone();
                let host = booking.host.clone();
                let meta = CallMeta::booking(id, &[&host, &shopper]);
                self.processor.cancel_hold(&hold_ref, &meta)?;

                let booking = self
                    .bookings
                    .get_mut(id)
                    .ok_or_else(|| EngineError::BookingNotFound(id.clone()))?;
                booking.hold_status = HoldStatus::Released;

                info!(booking = %id, reason = %reason, "hold released");
                self.notifier.send(
                    &shopper,
                    Channel::Email,
                    Event::HoldReleased {
                        booking: id.clone(),
                        reason,
                    },
                );
                Ok(())
            }
        }
    }

    /// Release every pending hold whose expiry has passed.
    ///
    /// The processor expires such holds on its own; this keeps the local
    /// records from drifting out of sync with that external deadline. Safe
    /// to run redundantly.
    pub fn sweep_expired_holds(&mut self) -> usize {
        let now = self.clock.now();
        let expired: Vec<BookingId> = self
            .bookings
            .values()
            .filter(|b| {
                b.hold_status == HoldStatus::Pending
                    && b.hold_expires_at.is_some_and(|t| t <= now)
            })
            .map(|b| b.id.clone())
            .collect();

        let mut released = 0;
        for id in expired {
            match self.release_hold(&id, &Actor::system(), ReleaseReason::Expired) {
                Ok(()) => released += 1,
                Err(e) => warn!(booking = %id, reason = %e, "expiry sweep could not release hold"),
            }
        }
        if released > 0 {
            info!(released, "expiry sweep released stale holds");
        }
        released
    }
}

/// Admin payout hold
impl<P: PaymentProcessor, I: IdentityProvider> Engine<P, I> {
    /// Suspend the post-capture payout for fraud review or dispute
    /// investigation. Orthogonal to the buyer-side hold lifecycle.
    pub fn set_admin_payout_hold(
        &mut self,
        id: &BookingId,
        until: DateTime<Utc>,
        reason: &str,
        actor: &Actor,
    ) -> Result<(), EngineError> {
        let booking = self
            .bookings
            .get(id)
            .ok_or_else(|| EngineError::BookingNotFound(id.clone()))?;

        authorize(actor, "suspend the payout for", id, actor.is_admin())?;

        if booking.payout_processed {
            return Err(AdminHoldError::PayoutAlreadyProcessed(id.clone()).into());
        }
        let now = self.clock.now();
        if until <= now {
            return Err(AdminHoldError::HoldUntilInPast { until }.into());
        }
        if reason.trim().is_empty() {
            return Err(AdminHoldError::EmptyReason.into());
        }

        let host = booking.host.clone();
        let booking = self
            .bookings
            .get_mut(id)
            .ok_or_else(|| EngineError::BookingNotFound(id.clone()))?;
        booking.admin_hold = Some(AdminPayoutHold {
            until,
            reason: reason.to_string(),
            set_by: actor.user.clone(),
        });
        self.audit.push(AuditNote {
            entity: format!("booking {id}"),
            actor: actor.user.clone(),
            note: format!("payout held until {until}: {reason}"),
            at: now,
        });

        info!(booking = %id, until = %until, "admin payout hold set");
        self.notifier.send(
            &host,
            Channel::InApp,
            Event::PayoutSuspended {
                booking: id.clone(),
                reason: reason.to_string(),
            },
        );
        Ok(())
    }

    /// Lift the payout suspension. Clearing an already-clear hold is a
    /// silent success.
    pub fn clear_admin_payout_hold(
        &mut self,
        id: &BookingId,
        reason: &str,
        actor: &Actor,
    ) -> Result<(), EngineError> {
        let booking = self
            .bookings
            .get(id)
            .ok_or_else(|| EngineError::BookingNotFound(id.clone()))?;

        authorize(actor, "resume the payout for", id, actor.is_admin())?;

        if booking.admin_hold.is_none() {
            return Ok(());
        }

        let host = booking.host.clone();
        let now = self.clock.now();
        let booking = self
            .bookings
            .get_mut(id)
            .ok_or_else(|| EngineError::BookingNotFound(id.clone()))?;
        booking.admin_hold = None;
        self.audit.push(AuditNote {
            entity: format!("booking {id}"),
            actor: actor.user.clone(),
            note: format!("payout hold cleared: {reason}"),
            at: now,
        });

        info!(booking = %id, "admin payout hold cleared");
        self.notifier.send(
            &host,
            Channel::InApp,
            Event::PayoutResumed {
                booking: id.clone(),
            },
        );
        Ok(())
    }
}

/// Deposit settlement & payout issuance
impl<P: PaymentProcessor, I: IdentityProvider> Engine<P, I> {
    /// Resolve the security deposit at the end of the rental.
    ///
    /// A processor refund failure aborts with no local changes applied; a
    /// half-settled ledger is worse than a failed settlement. Notifications
    /// go out only after the ledger update and cannot fail it.
    pub fn settle_deposit(
        &mut self,
        id: &BookingId,
        policy: RefundPolicy,
        notes: Option<&str>,
        actor: &Actor,
    ) -> Result<Settlement, EngineError> {
        let booking = self
            .bookings
            .get(id)
            .ok_or_else(|| EngineError::BookingNotFound(id.clone()))?;

        authorize(
            actor,
            "settle the deposit for",
            id,
            actor.is_admin()
                || actor.is_system()
                || (actor.role == Role::Host && actor.user == booking.host),
        )?;

        if booking.payout_processed {
            return Err(DepositError::PayoutAlreadyProcessed(id.clone()).into());
        }
        let deposit = match booking.deposit_amount {
            Some(d) if !d.is_zero() => d,
            _ => return Err(DepositError::NoDepositToRefund(id.clone()).into()),
        };
        if booking.deposit_status != DepositStatus::Charged {
            return Err(DepositError::DepositAlreadyRefunded {
                booking: id.clone(),
                status: booking.deposit_status,
            }
            .into());
        }
        let charge_ref = booking
            .deposit_charge_ref
            .clone()
            .ok_or_else(|| EngineError::Deposit(DepositError::MissingChargeRef(id.clone())))?;

        let (refund_amount, final_status, mut note) = match policy {
            RefundPolicy::Full => (
                deposit,
                DepositStatus::Refunded,
                format!("full deposit refund of {deposit}"),
            ),
            RefundPolicy::Partial { deduction } => {
                let refund = deposit.saturating_sub(deduction);
                let status = if refund.is_zero() {
                    DepositStatus::Forfeited
                } else {
                    DepositStatus::Refunded
                };
                (
                    refund,
                    status,
                    format!("partial deposit refund of {refund} with {deduction} deducted"),
                )
            }
            RefundPolicy::Forfeit => (
                Amount::ZERO,
                DepositStatus::Forfeited,
                format!("deposit of {deposit} forfeited"),
            ),
        };
        if let Some(extra) = notes.filter(|n| !n.trim().is_empty()) {
            note.push_str(&format!(" ({extra})"));
        }

        let shopper = booking.shopper.clone();
        let host = booking.host.clone();
        if !refund_amount.is_zero() {
            let meta = CallMeta::booking(id, &[&host, &shopper]);
            self.processor.refund(&charge_ref, refund_amount, &meta)?;
        }

        let now = self.clock.now();
        let booking = self
            .bookings
            .get_mut(id)
            .ok_or_else(|| EngineError::BookingNotFound(id.clone()))?;
        booking.deposit_status = final_status;
        booking.deposit_refunded_at = Some(now);
        booking.deposit_note = Some(note);

        info!(booking = %id, refund = %refund_amount, status = %final_status, "deposit settled");
        self.notifier.send_in_app_and_email(
            &shopper,
            Event::DepositSettled {
                booking: id.clone(),
                refund_amount,
                final_status,
            },
        );
        Ok(Settlement {
            refund_amount,
            final_status,
        })
    }

    /// Transfer the host's payout for a captured booking, flipping the
    /// one-way `payout_processed` latch. Consults — never clears — the admin
    /// payout hold.
    pub fn process_payout(&mut self, id: &BookingId, actor: &Actor) -> Result<TransferRef, EngineError> {
        let booking = self
            .bookings
            .get(id)
            .ok_or_else(|| EngineError::BookingNotFound(id.clone()))?;

        authorize(
            actor,
            "issue the payout for",
            id,
            actor.is_admin() || actor.is_system(),
        )?;

        if booking.payout_processed {
            return Err(PayoutError::AlreadyProcessed(id.clone()).into());
        }
        if booking.hold_status != HoldStatus::Captured {
            return Err(PayoutError::HoldNotCaptured(id.clone()).into());
        }
        let now = self.clock.now();
        if let Some(hold) = &booking.admin_hold {
            if hold.active(now) {
                return Err(PayoutError::OnHold {
                    booking: id.clone(),
                    until: hold.until,
                    reason: hold.reason.clone(),
                }
                .into());
            }
        }
        let pricing: FeeBreakdown = booking
            .pricing
            .ok_or_else(|| EngineError::Payout(PayoutError::MissingBreakdown(id.clone())))?;
        let host = booking.host.clone();
        let destination = self
            .identity
            .payout_destination(&host)
            .ok_or_else(|| EngineError::Payout(PayoutError::DestinationNotConfigured(host.clone())))?;

        let meta = CallMeta::booking(id, &[&host]);
        let transfer = self.processor.transfer(&destination, pricing.host_payout, &meta)?;

        let booking = self
            .bookings
            .get_mut(id)
            .ok_or_else(|| EngineError::BookingNotFound(id.clone()))?;
        booking.payout_processed = true;
        booking.payout_ref = Some(transfer.clone());

        info!(booking = %id, amount = %pricing.host_payout, transfer = %transfer, "host payout issued");
        self.notifier.send(
            &host,
            Channel::Email,
            Event::PayoutIssued {
                booking: id.clone(),
                amount: pricing.host_payout,
            },
        );
        Ok(transfer)
    }
}

/// Private API
impl<P: PaymentProcessor, I: IdentityProvider> Engine<P, I> {
    /// Small helper to log command outcomes
    fn log_result<T>(op: &str, booking: &BookingId, result: &Result<T, EngineError>) {
        match result {
            Ok(_) => info!(booking = %booking, "{op} applied"),
            Err(e) => warn!(booking = %booking, reason = %e, "{op} rejected"),
        }
    }
}

fn authorize(
    actor: &Actor,
    action: &'static str,
    booking: &BookingId,
    allowed: bool,
) -> Result<(), EngineError> {
    if allowed {
        Ok(())
    } else {
        Err(EngineError::NotAuthorized {
            user: actor.user.clone(),
            role: actor.role,
            action,
            booking: booking.clone(),
        })
    }
}
