//! Payment processor boundary.
//!
//! The engine never talks to a concrete vendor; it holds an implementation
//! of [`PaymentProcessor`] covering exactly the capabilities it needs: open
//! an authorization hold, capture it, cancel it pre-capture, refund a
//! captured charge, and transfer settled funds to a connected destination.
//! Every call carries [`CallMeta`] so the movement can be reconciled
//! externally against local records.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;

use thiserror::Error;

use crate::Amount;
use crate::model::{
    BookingId, CaptureMethod, ChargeRef, DestinationRef, HoldRef, PaymentMethodRef, RefundRef,
    RewardId, TransferRef, UserId,
};

/// Failure reported by the processor. The engine propagates these with no
/// local state mutation; the message is surfaced to the caller as-is.
#[derive(Debug, Clone, Error)]
pub enum ProcessorError {
    #[error("processor declined: {0}")]
    Declined(String),

    #[error("processor unreachable: {0}")]
    Network(String),

    #[error("unknown processor reference '{0}'")]
    UnknownReference(String),
}

/// Reconciliation metadata attached to every processor call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallMeta {
    /// The local entity this movement belongs to, e.g. `booking bk_1`.
    pub entity: String,
    /// Users involved in the movement.
    pub users: Vec<UserId>,
}

impl CallMeta {
    pub fn booking(id: &BookingId, users: &[&UserId]) -> Self {
        Self {
            entity: format!("booking {id}"),
            users: users.iter().map(|&u| u.clone()).collect(),
        }
    }

    pub fn reward(id: &RewardId, beneficiary: &UserId) -> Self {
        Self {
            entity: format!("reward {id}"),
            users: vec![beneficiary.clone()],
        }
    }
}

/// The abstracted payment processor capability set.
pub trait PaymentProcessor {
    /// Reserve `amount` against the buyer's payment method. With
    /// [`CaptureMethod::Automatic`] the reservation is captured in the same
    /// step.
    fn create_hold(
        &self,
        amount: Amount,
        currency: &str,
        method: &PaymentMethodRef,
        capture: CaptureMethod,
        meta: &CallMeta,
    ) -> Result<HoldRef, ProcessorError>;

    /// Convert an uncaptured hold into a charge.
    fn capture_hold(&self, hold: &HoldRef, meta: &CallMeta) -> Result<ChargeRef, ProcessorError>;

    /// Cancel an uncaptured hold, returning the reservation to the payer.
    fn cancel_hold(&self, hold: &HoldRef, meta: &CallMeta) -> Result<(), ProcessorError>;

    /// Refund part or all of a captured charge.
    fn refund(
        &self,
        charge: &ChargeRef,
        amount: Amount,
        meta: &CallMeta,
    ) -> Result<RefundRef, ProcessorError>;

    /// Pay out to a connected destination account.
    fn transfer(
        &self,
        destination: &DestinationRef,
        amount: Amount,
        meta: &CallMeta,
    ) -> Result<TransferRef, ProcessorError>;
}

/// One recorded call, for assertions and for the sandbox ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorCall {
    CreateHold {
        amount: Amount,
        currency: String,
        method: PaymentMethodRef,
        capture: CaptureMethod,
    },
    CaptureHold {
        hold: HoldRef,
    },
    CancelHold {
        hold: HoldRef,
    },
    Refund {
        charge: ChargeRef,
        amount: Amount,
    },
    Transfer {
        destination: DestinationRef,
        amount: Amount,
    },
}

/// Deterministic in-memory processor: mints sequential references and
/// records every call. Serves as the binary's sandbox backend and the test
/// double; failure injection exercises the no-partial-commit paths.
#[derive(Debug, Default)]
pub struct RecordingProcessor {
    calls: RefCell<Vec<ProcessorCall>>,
    next_ref: Cell<u64>,
    fail_refunds_with: RefCell<Option<String>>,
    fail_transfers_to: RefCell<HashSet<DestinationRef>>,
}

impl RecordingProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<ProcessorCall> {
        self.calls.borrow().clone()
    }

    /// Number of cancel-hold calls made. The idempotent-release property
    /// asserts this stays at one across double invocation.
    pub fn cancel_count(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, ProcessorCall::CancelHold { .. }))
            .count()
    }

    pub fn refund_count(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| matches!(c, ProcessorCall::Refund { .. }))
            .count()
    }

    /// Make all subsequent refunds fail with the given message.
    pub fn fail_refunds(&self, message: impl Into<String>) {
        *self.fail_refunds_with.borrow_mut() = Some(message.into());
    }

    /// Make transfers to this destination fail.
    pub fn fail_transfers_to(&self, destination: DestinationRef) {
        self.fail_transfers_to.borrow_mut().insert(destination);
    }

    fn mint(&self, prefix: &str) -> String {
        let n = self.next_ref.get() + 1;
        self.next_ref.set(n);
        format!("{prefix}_{n}")
    }

    fn record(&self, call: ProcessorCall) {
        self.calls.borrow_mut().push(call);
    }
}

impl PaymentProcessor for RecordingProcessor {
    fn create_hold(
        &self,
        amount: Amount,
        currency: &str,
        method: &PaymentMethodRef,
        capture: CaptureMethod,
        _meta: &CallMeta,
    ) -> Result<HoldRef, ProcessorError> {
        self.record(ProcessorCall::CreateHold {
            amount,
            currency: currency.to_string(),
            method: method.clone(),
            capture,
        });
        Ok(HoldRef::new(self.mint("hold")))
    }

    fn capture_hold(&self, hold: &HoldRef, _meta: &CallMeta) -> Result<ChargeRef, ProcessorError> {
        self.record(ProcessorCall::CaptureHold { hold: hold.clone() });
        Ok(ChargeRef::new(self.mint("ch")))
    }

    fn cancel_hold(&self, hold: &HoldRef, _meta: &CallMeta) -> Result<(), ProcessorError> {
        self.record(ProcessorCall::CancelHold { hold: hold.clone() });
        Ok(())
    }

    fn refund(
        &self,
        charge: &ChargeRef,
        amount: Amount,
        _meta: &CallMeta,
    ) -> Result<RefundRef, ProcessorError> {
        if let Some(message) = self.fail_refunds_with.borrow().clone() {
            return Err(ProcessorError::Declined(message));
        }
        self.record(ProcessorCall::Refund {
            charge: charge.clone(),
            amount,
        });
        Ok(RefundRef::new(self.mint("re")))
    }

    fn transfer(
        &self,
        destination: &DestinationRef,
        amount: Amount,
        _meta: &CallMeta,
    ) -> Result<TransferRef, ProcessorError> {
        if self.fail_transfers_to.borrow().contains(destination) {
            return Err(ProcessorError::Declined(format!(
                "transfer to {destination} rejected"
            )));
        }
        self.record(ProcessorCall::Transfer {
            destination: destination.clone(),
            amount,
        });
        Ok(TransferRef::new(self.mint("tr")))
    }
}
