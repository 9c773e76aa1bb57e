//! Flat-record persistence.
//!
//! Bookings, users, rewards, and command streams live in csv files: one row
//! per record, money as integer cents, timestamps RFC 3339, statuses as the
//! strings defined on the model enums. Row structs are kept separate from
//! the domain types; cross-field rules (pricing columns all-or-none, admin
//! hold columns all-or-none) are enforced on load with line-numbered errors.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::Command;
use crate::fees::FeeBreakdown;
use crate::identity::{Directory, UserProfile};
use crate::model::{
    Actor, AdminPayoutHold, Booking, BookingId, ChargeRef, DestinationRef, HoldRef,
    ListingId, ParseEnumError, PaymentMethodRef, PoolType, RefundPolicy, ReleaseReason, RewardId,
    RewardRecord, TransferRef, UserId,
};
use crate::Amount;

/// Errors reading or writing the flat-record store.
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open {path}: {source}")]
    Open { path: String, source: csv::Error },

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: {source}")]
    Invalid {
        line: usize,
        source: ParseEnumError,
    },

    #[error("line {line}: {message}")]
    Row { line: usize, message: String },

    #[error("line {line}: unrecognized op '{op}'")]
    UnrecognizedOp { line: usize, op: String },

    #[error("line {line}: {op} missing {field}")]
    MissingField {
        line: usize,
        op: String,
        field: &'static str,
    },

    #[error("failed to write csv: {0}")]
    Write(#[from] csv::Error),
}

fn parse_enum<T>(value: &str, line: usize) -> Result<T, CsvError>
where
    T: std::str::FromStr<Err = ParseEnumError>,
{
    value
        .parse()
        .map_err(|source| CsvError::Invalid { line, source })
}

#[derive(Debug, Deserialize, Serialize)]
struct BookingRow {
    id: String,
    listing: String,
    host: String,
    shopper: String,
    base_cents: i64,
    delivery_cents: i64,
    deposit_cents: Option<i64>,
    payment_method: String,
    capture: String,
    hold_status: String,
    payment_ref: Option<String>,
    charge_ref: Option<String>,
    hold_expires_at: Option<DateTime<Utc>>,
    admin_hold_until: Option<DateTime<Utc>>,
    admin_hold_reason: Option<String>,
    admin_hold_set_by: Option<String>,
    deposit_status: String,
    deposit_charge_ref: Option<String>,
    deposit_note: Option<String>,
    deposit_refunded_at: Option<DateTime<Utc>>,
    payout_processed: bool,
    payout_ref: Option<String>,
    customer_total_cents: Option<i64>,
    application_fee_cents: Option<i64>,
    host_payout_cents: Option<i64>,
}

impl BookingRow {
    fn from_booking(b: &Booking) -> Self {
        Self {
            id: b.id.to_string(),
            listing: b.listing.to_string(),
            host: b.host.to_string(),
            shopper: b.shopper.to_string(),
            base_cents: b.base_amount.cents(),
            delivery_cents: b.delivery_fee.cents(),
            deposit_cents: b.deposit_amount.map(|a| a.cents()),
            payment_method: b.payment_method.to_string(),
            capture: b.capture_method.to_string(),
            hold_status: b.hold_status.to_string(),
            payment_ref: b.payment_ref.as_ref().map(ToString::to_string),
            charge_ref: b.charge_ref.as_ref().map(ToString::to_string),
            hold_expires_at: b.hold_expires_at,
            admin_hold_until: b.admin_hold.as_ref().map(|h| h.until),
            admin_hold_reason: b.admin_hold.as_ref().map(|h| h.reason.clone()),
            admin_hold_set_by: b.admin_hold.as_ref().map(|h| h.set_by.to_string()),
            deposit_status: b.deposit_status.to_string(),
            deposit_charge_ref: b.deposit_charge_ref.as_ref().map(ToString::to_string),
            deposit_note: b.deposit_note.clone(),
            deposit_refunded_at: b.deposit_refunded_at,
            payout_processed: b.payout_processed,
            payout_ref: b.payout_ref.as_ref().map(ToString::to_string),
            customer_total_cents: b.pricing.map(|p| p.customer_total.cents()),
            application_fee_cents: b.pricing.map(|p| p.application_fee.cents()),
            host_payout_cents: b.pricing.map(|p| p.host_payout.cents()),
        }
    }

    fn into_booking(self, line: usize) -> Result<Booking, CsvError> {
        let base = Amount::from_cents(self.base_cents);
        let delivery = Amount::from_cents(self.delivery_cents);

        let pricing = match (
            self.customer_total_cents,
            self.application_fee_cents,
            self.host_payout_cents,
        ) {
            (None, None, None) => None,
            (Some(total), Some(app_fee), Some(payout)) => {
                // The stored breakdown is reproducible from these three plus
                // the commercial terms; the per-side fees fall out.
                let subtotal = base + delivery;
                let host_fee = subtotal - Amount::from_cents(payout);
                Some(FeeBreakdown {
                    subtotal,
                    buyer_fee: Amount::from_cents(app_fee) - host_fee,
                    host_fee,
                    customer_total: Amount::from_cents(total),
                    application_fee: Amount::from_cents(app_fee),
                    host_payout: Amount::from_cents(payout),
                })
            }
            _ => {
                return Err(CsvError::Row {
                    line,
                    message: "pricing columns must all be present or all absent".to_string(),
                });
            }
        };

        let admin_hold = match (
            self.admin_hold_until,
            self.admin_hold_reason,
            self.admin_hold_set_by,
        ) {
            (None, None, None) => None,
            (Some(until), Some(reason), Some(set_by)) => Some(AdminPayoutHold {
                until,
                reason,
                set_by: UserId::new(set_by),
            }),
            _ => {
                return Err(CsvError::Row {
                    line,
                    message: "admin hold columns must all be present or all absent".to_string(),
                });
            }
        };

        Ok(Booking {
            id: BookingId::new(self.id),
            listing: ListingId::new(self.listing),
            host: UserId::new(self.host),
            shopper: UserId::new(self.shopper),
            base_amount: base,
            delivery_fee: delivery,
            deposit_amount: self.deposit_cents.map(Amount::from_cents),
            pricing,
            payment_method: PaymentMethodRef::new(self.payment_method),
            capture_method: parse_enum(&self.capture, line)?,
            payment_ref: self.payment_ref.map(HoldRef::new),
            charge_ref: self.charge_ref.map(ChargeRef::new),
            hold_status: parse_enum(&self.hold_status, line)?,
            hold_expires_at: self.hold_expires_at,
            admin_hold,
            deposit_status: parse_enum(&self.deposit_status, line)?,
            deposit_charge_ref: self.deposit_charge_ref.map(ChargeRef::new),
            deposit_note: self.deposit_note,
            deposit_refunded_at: self.deposit_refunded_at,
            payout_processed: self.payout_processed,
            payout_ref: self.payout_ref.map(TransferRef::new),
        })
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct UserRow {
    id: String,
    destination: Option<String>,
    identity_verified: bool,
}

#[derive(Debug, Deserialize, Serialize)]
struct RewardRow {
    id: String,
    pool: String,
    beneficiary: String,
    listing: String,
    status: String,
    disqualified_reason: Option<String>,
    destination: Option<String>,
    transfer_ref: Option<String>,
    initiated_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl RewardRow {
    fn from_reward(r: &RewardRecord) -> Self {
        Self {
            id: r.id.to_string(),
            pool: r.pool.to_string(),
            beneficiary: r.beneficiary.to_string(),
            listing: r.listing.to_string(),
            status: r.status.to_string(),
            disqualified_reason: r.disqualified_reason.clone(),
            destination: r.destination.as_ref().map(ToString::to_string),
            transfer_ref: r.transfer_ref.as_ref().map(ToString::to_string),
            initiated_at: r.initiated_at,
            completed_at: r.completed_at,
        }
    }

    fn into_reward(self, line: usize) -> Result<RewardRecord, CsvError> {
        Ok(RewardRecord {
            id: RewardId::new(self.id),
            pool: parse_enum(&self.pool, line)?,
            beneficiary: UserId::new(self.beneficiary),
            listing: ListingId::new(self.listing),
            status: parse_enum(&self.status, line)?,
            disqualified_reason: self.disqualified_reason,
            destination: self.destination.map(DestinationRef::new),
            transfer_ref: self.transfer_ref.map(TransferRef::new),
            initiated_at: self.initiated_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct CommandRow {
    op: String,
    booking: Option<String>,
    actor: Option<String>,
    role: Option<String>,
    until: Option<DateTime<Utc>>,
    policy: Option<String>,
    deduction_cents: Option<i64>,
    reason: Option<String>,
    notes: Option<String>,
    pool: Option<String>,
}

fn require<T>(value: Option<T>, line: usize, op: &str, field: &'static str) -> Result<T, CsvError> {
    value.ok_or_else(|| CsvError::MissingField {
        line,
        op: op.to_string(),
        field,
    })
}

fn command_from_row(row: CommandRow, line: usize) -> Result<Command, CsvError> {
    let op = row.op.clone();

    let booking = |value: Option<String>| -> Result<BookingId, CsvError> {
        Ok(BookingId::new(require(value, line, &op, "booking")?))
    };
    let actor = |user: Option<String>, role: Option<String>| -> Result<Actor, CsvError> {
        let user = require(user, line, &op, "actor")?;
        let role = require(role, line, &op, "role")?;
        Ok(Actor::new(UserId::new(user), parse_enum(&role, line)?))
    };

    match op.as_str() {
        "issue_hold" => Ok(Command::IssueHold {
            booking: booking(row.booking)?,
            actor: actor(row.actor, row.role)?,
        }),
        "capture_hold" => Ok(Command::CaptureHold {
            booking: booking(row.booking)?,
            actor: actor(row.actor, row.role)?,
        }),
        "release_hold" => {
            let reason = match require(row.reason, line, &op, "reason")?.as_str() {
                "declined" => ReleaseReason::Declined,
                "expired" => ReleaseReason::Expired,
                "cancelled" => ReleaseReason::Cancelled,
                other => {
                    return Err(CsvError::Row {
                        line,
                        message: format!("unrecognized release reason '{other}'"),
                    });
                }
            };
            Ok(Command::ReleaseHold {
                booking: booking(row.booking)?,
                actor: actor(row.actor, row.role)?,
                reason,
            })
        }
        "sweep_expired_holds" => Ok(Command::SweepExpiredHolds),
        "set_admin_payout_hold" => Ok(Command::SetAdminPayoutHold {
            booking: booking(row.booking)?,
            actor: actor(row.actor, row.role)?,
            until: require(row.until, line, &op, "until")?,
            reason: require(row.reason, line, &op, "reason")?,
        }),
        "clear_admin_payout_hold" => Ok(Command::ClearAdminPayoutHold {
            booking: booking(row.booking)?,
            actor: actor(row.actor, row.role)?,
            reason: require(row.reason, line, &op, "reason")?,
        }),
        "settle_deposit" => {
            let policy = match require(row.policy, line, &op, "policy")?.as_str() {
                "full" => RefundPolicy::Full,
                "partial" => RefundPolicy::Partial {
                    deduction: Amount::from_cents(require(
                        row.deduction_cents,
                        line,
                        &op,
                        "deduction_cents",
                    )?),
                },
                "forfeit" => RefundPolicy::Forfeit,
                other => {
                    return Err(CsvError::Row {
                        line,
                        message: format!("unrecognized refund policy '{other}'"),
                    });
                }
            };
            Ok(Command::SettleDeposit {
                booking: booking(row.booking)?,
                actor: actor(row.actor, row.role)?,
                policy,
                notes: row.notes,
            })
        }
        "process_payout" => Ok(Command::ProcessPayout {
            booking: booking(row.booking)?,
            actor: actor(row.actor, row.role)?,
        }),
        "run_promo_batch" => Ok(Command::RunPromoBatch {
            pool: parse_enum::<PoolType>(&require(row.pool, line, &op, "pool")?, line)?,
        }),
        _ => Err(CsvError::UnrecognizedOp { line, op }),
    }
}

fn open_reader(path: impl AsRef<Path>) -> Result<csv::Reader<std::fs::File>, CsvError> {
    let path = path.as_ref();
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|source| CsvError::Open {
            path: path.display().to_string(),
            source,
        })
}

/// Load the full booking ledger. The store is read all-or-nothing: the
/// first bad row aborts the load.
pub fn read_bookings(path: impl AsRef<Path>) -> Result<Vec<Booking>, CsvError> {
    open_reader(path)?
        .into_deserialize::<BookingRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            result
                .map_err(|source| CsvError::Parse { line, source })?
                .into_booking(line)
        })
        .collect()
}

/// Load the user onboarding directory.
pub fn read_users(path: impl AsRef<Path>) -> Result<Directory, CsvError> {
    let mut directory = Directory::new();
    for (idx, result) in open_reader(path)?.into_deserialize::<UserRow>().enumerate() {
        let line = idx + 2;
        let row = result.map_err(|source| CsvError::Parse { line, source })?;
        directory.insert(
            UserId::new(row.id),
            UserProfile {
                destination: row.destination.map(DestinationRef::new),
                identity_verified: row.identity_verified,
            },
        );
    }
    Ok(directory)
}

/// Load the reward ledger.
pub fn read_rewards(path: impl AsRef<Path>) -> Result<Vec<RewardRecord>, CsvError> {
    open_reader(path)?
        .into_deserialize::<RewardRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2;
            result
                .map_err(|source| CsvError::Parse { line, source })?
                .into_reward(line)
        })
        .collect()
}

/// Stream commands from a csv file. Individual bad rows surface as errors
/// without stopping the iterator, so the driver can skip and continue.
pub fn read_commands(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Command, CsvError>>, CsvError> {
    let reader = open_reader(path)?;
    Ok(reader
        .into_deserialize::<CommandRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2;
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            command_from_row(row, line)
        }))
}

/// Write the booking ledger, sorted by id for stable output.
pub fn write_bookings<'a>(
    path: impl AsRef<Path>,
    bookings: impl IntoIterator<Item = &'a Booking>,
) -> Result<(), CsvError> {
    let mut rows: Vec<BookingRow> = bookings.into_iter().map(BookingRow::from_booking).collect();
    rows.sort_by(|a, b| a.id.cmp(&b.id));

    let mut writer = csv::Writer::from_path(path.as_ref())?;
    for row in rows {
        writer.serialize(&row)?;
    }
    writer.flush().map_err(csv::Error::from)?;
    Ok(())
}

/// Write the reward ledger, sorted by id for stable output.
pub fn write_rewards<'a>(
    path: impl AsRef<Path>,
    rewards: impl IntoIterator<Item = &'a RewardRecord>,
) -> Result<(), CsvError> {
    let mut rows: Vec<RewardRow> = rewards.into_iter().map(RewardRow::from_reward).collect();
    rows.sort_by(|a, b| a.id.cmp(&b.id));

    let mut writer = csv::Writer::from_path(path.as_ref())?;
    for row in rows {
        writer.serialize(&row)?;
    }
    writer.flush().map_err(csv::Error::from)?;
    Ok(())
}
