//! Fire-and-forget notification side-channel.
//!
//! State transitions emit [`Notification`]s over a bounded channel; a
//! separate consumer delivers them (in-app feed, email). Delivery is best
//! effort by contract: a full or closed channel is logged and dropped, and
//! never fails or rolls back the financial transition that emitted it.

use std::fmt;

use tokio::sync::mpsc;
use tracing::warn;

use crate::Amount;
use crate::model::{BookingId, DepositStatus, ReleaseReason, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    InApp,
    Email,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    HoldReleased {
        booking: BookingId,
        reason: ReleaseReason,
    },
    PayoutSuspended {
        booking: BookingId,
        reason: String,
    },
    PayoutResumed {
        booking: BookingId,
    },
    DepositSettled {
        booking: BookingId,
        refund_amount: Amount,
        final_status: DepositStatus,
    },
    PayoutIssued {
        booking: BookingId,
        amount: Amount,
    },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::HoldReleased { booking, reason } => {
                write!(f, "your payment for booking {booking} was released: {reason}")
            }
            Event::PayoutSuspended { booking, reason } => {
                write!(f, "payout for booking {booking} is suspended: {reason}")
            }
            Event::PayoutResumed { booking } => {
                write!(f, "payout for booking {booking} is no longer suspended")
            }
            Event::DepositSettled {
                booking,
                refund_amount,
                final_status,
            } => write!(
                f,
                "deposit for booking {booking} settled as {final_status}, {refund_amount} refunded"
            ),
            Event::PayoutIssued { booking, amount } => {
                write!(f, "payout of {amount} issued for booking {booking}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipient: UserId,
    pub channel: Channel,
    pub event: Event,
}

/// Sending half of the side-channel, held by the engine.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: Option<mpsc::Sender<Notification>>,
}

impl Notifier {
    /// A notifier with a consumer attached.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (
            Self {
                sender: Some(sender),
            },
            receiver,
        )
    }

    /// A notifier that drops everything, for contexts with no consumer.
    pub fn noop() -> Self {
        Self { sender: None }
    }

    /// Emit one notification. Never blocks, never errors.
    pub fn send(&self, recipient: &UserId, channel: Channel, event: Event) {
        let Some(sender) = &self.sender else {
            return;
        };
        let notification = Notification {
            recipient: recipient.clone(),
            channel,
            event,
        };
        if let Err(e) = sender.try_send(notification) {
            warn!(recipient = %recipient, "notification dropped: {e}");
        }
    }

    /// Emit the same event in-app and by email, the settlement contract.
    pub fn send_in_app_and_email(&self, recipient: &UserId, event: Event) {
        self.send(recipient, Channel::InApp, event.clone());
        self.send(recipient, Channel::Email, event);
    }
}
