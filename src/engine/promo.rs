//! Promotional reward payout batch.
//!
//! Two independent pools (listing rewards and contest prizes) run through
//! the same pass: select payable records, check the beneficiary's payout
//! prerequisites, de-duplicate destination accounts, transfer the pool's
//! fixed amount. Failures are isolated per record; the batch itself only
//! reports counts.

use std::collections::HashSet;

use tracing::{info, warn};

use super::Engine;
use crate::Amount;
use crate::identity::IdentityProvider;
use crate::model::{DestinationRef, PoolType, RewardId, RewardStatus};
use crate::processor::{CallMeta, PaymentProcessor};

/// Fixed reward amount per pool. Configuration, not per-record data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromoAmounts {
    pub listing_reward: Amount,
    pub contest_prize: Amount,
}

impl Default for PromoAmounts {
    /// $50 listing reward, $500 contest prize.
    fn default() -> Self {
        Self {
            listing_reward: Amount::from_cents(5_000),
            contest_prize: Amount::from_cents(50_000),
        }
    }
}

impl PromoAmounts {
    pub fn amount_for(&self, pool: PoolType) -> Amount {
        match pool {
            PoolType::ListingReward => self.listing_reward,
            PoolType::ContestWinner => self.contest_prize,
        }
    }
}

/// Aggregate outcome of one batch run. Partial failures never abort the
/// batch, so this is the whole result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchSummary {
    pub paid: u32,
    /// Prerequisites not met; status left unchanged for a later run.
    pub skipped: u32,
    /// Fraud signal; never retried.
    pub disqualified: u32,
    /// Processor rejected the transfer; may be retried later.
    pub failed: u32,
}

impl<P: PaymentProcessor, I: IdentityProvider> Engine<P, I> {
    /// Pay out every payable reward in the pool.
    pub fn run_promo_batch(&mut self, pool: PoolType) -> BatchSummary {
        let now = self.clock.now();
        let amount = self.promo.amount_for(pool);

        // Recomputed fresh every run from already-paid records, never cached,
        // so overlapping runs cannot pay one destination twice.
        let mut paid_destinations: HashSet<DestinationRef> = self
            .rewards
            .values()
            .filter(|r| r.pool == pool && r.status == RewardStatus::Paid)
            .filter_map(|r| r.destination.clone())
            .collect();

        let mut candidates: Vec<RewardId> = self
            .rewards
            .values()
            .filter(|r| {
                r.pool == pool
                    && matches!(r.status, RewardStatus::Pending | RewardStatus::Eligible)
            })
            .map(|r| r.id.clone())
            .collect();
        candidates.sort();

        let mut summary = BatchSummary::default();
        for id in candidates {
            let Some(record) = self.rewards.get(&id) else {
                continue;
            };
            let beneficiary = record.beneficiary.clone();

            let Some(destination) = self.identity.payout_destination(&beneficiary) else {
                info!(reward = %id, user = %beneficiary, "skipped: no payout destination");
                summary.skipped += 1;
                continue;
            };
            if !self.identity.is_identity_verified(&beneficiary) {
                info!(reward = %id, user = %beneficiary, "skipped: identity not verified");
                summary.skipped += 1;
                continue;
            }

            if paid_destinations.contains(&destination) {
                // One operator funneling several user records to one account
                let Some(record) = self.rewards.get_mut(&id) else {
                    continue;
                };
                record.status = RewardStatus::Disqualified;
                record.disqualified_reason = Some("duplicate destination account".to_string());
                warn!(reward = %id, destination = %destination, "disqualified: duplicate destination account");
                summary.disqualified += 1;
                continue;
            }

            let meta = CallMeta::reward(&id, &beneficiary);
            let transfer = self.processor.transfer(&destination, amount, &meta);
            let Some(record) = self.rewards.get_mut(&id) else {
                continue;
            };
            record.initiated_at = Some(now);
            match transfer {
                Ok(transfer_ref) => {
                    record.status = RewardStatus::Paid;
                    record.destination = Some(destination.clone());
                    record.transfer_ref = Some(transfer_ref);
                    record.completed_at = Some(now);
                    paid_destinations.insert(destination);
                    summary.paid += 1;
                }
                Err(e) => {
                    record.status = RewardStatus::Failed;
                    warn!(reward = %id, reason = %e, "promo transfer failed");
                    summary.failed += 1;
                }
            }
        }

        info!(
            pool = %pool,
            paid = summary.paid,
            skipped = summary.skipped,
            disqualified = summary.disqualified,
            failed = summary.failed,
            "promo payout batch finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Directory, UserProfile};
    use crate::model::{ListingId, RewardRecord, UserId};
    use crate::processor::RecordingProcessor;

    fn reward(id: &str, pool: PoolType, user: &str) -> RewardRecord {
        RewardRecord::new(
            RewardId::new(id),
            pool,
            UserId::new(user),
            ListingId::new("l1"),
        )
    }

    fn engine_with_users(users: &[(&str, &str)]) -> Engine<RecordingProcessor, Directory> {
        let mut directory = Directory::new();
        for (user, destination) in users {
            directory.insert_ready(*user, *destination);
        }
        Engine::new(RecordingProcessor::new(), directory)
    }

    #[test]
    fn pays_eligible_records_and_stamps_them() {
        let mut engine = engine_with_users(&[("u1", "acct_1")]);
        let mut r = reward("r1", PoolType::ListingReward, "u1");
        r.status = RewardStatus::Eligible;
        engine.insert_reward(r);

        let summary = engine.run_promo_batch(PoolType::ListingReward);
        assert_eq!(summary, BatchSummary { paid: 1, ..Default::default() });

        let r = engine.reward(&RewardId::new("r1")).unwrap();
        assert_eq!(r.status, RewardStatus::Paid);
        assert_eq!(r.destination, Some(DestinationRef::new("acct_1")));
        assert!(r.transfer_ref.is_some());
        assert!(r.initiated_at.is_some());
        assert!(r.completed_at.is_some());
    }

    #[test]
    fn skips_users_missing_prerequisites() {
        let mut engine = engine_with_users(&[]);
        // u1 has no destination at all; u2 has one but is unverified
        {
            let directory = &mut engine.identity;
            directory.insert(
                UserId::new("u2"),
                UserProfile {
                    destination: Some(DestinationRef::new("acct_2")),
                    identity_verified: false,
                },
            );
        }
        engine.insert_reward(reward("r1", PoolType::ListingReward, "u1"));
        engine.insert_reward(reward("r2", PoolType::ListingReward, "u2"));

        let summary = engine.run_promo_batch(PoolType::ListingReward);
        assert_eq!(summary, BatchSummary { skipped: 2, ..Default::default() });

        // Left unchanged, so a later run can retry once prerequisites are met
        assert_eq!(
            engine.reward(&RewardId::new("r1")).unwrap().status,
            RewardStatus::Pending
        );
        assert_eq!(
            engine.reward(&RewardId::new("r2")).unwrap().status,
            RewardStatus::Pending
        );
        assert!(engine.processor().calls().is_empty());
    }

    #[test]
    fn duplicate_destination_pays_at_most_one() {
        // Two user records funneling to the same destination account
        let mut engine = engine_with_users(&[("u1", "acct_shared"), ("u2", "acct_shared")]);
        engine.insert_reward(reward("r1", PoolType::ListingReward, "u1"));
        engine.insert_reward(reward("r2", PoolType::ListingReward, "u2"));

        let summary = engine.run_promo_batch(PoolType::ListingReward);
        assert_eq!(summary.paid, 1);
        assert_eq!(summary.disqualified, 1);

        // Deterministic candidate order: r1 pays, r2 is disqualified
        assert_eq!(
            engine.reward(&RewardId::new("r1")).unwrap().status,
            RewardStatus::Paid
        );
        let r2 = engine.reward(&RewardId::new("r2")).unwrap();
        assert_eq!(r2.status, RewardStatus::Disqualified);
        assert_eq!(
            r2.disqualified_reason.as_deref(),
            Some("duplicate destination account")
        );
        assert!(r2.transfer_ref.is_none());
    }

    #[test]
    fn dedup_set_covers_earlier_runs() {
        let mut engine = engine_with_users(&[("u1", "acct_shared"), ("u2", "acct_shared")]);
        engine.insert_reward(reward("r1", PoolType::ListingReward, "u1"));
        engine.run_promo_batch(PoolType::ListingReward);

        // A record arriving after the first run still hits the paid set
        engine.insert_reward(reward("r2", PoolType::ListingReward, "u2"));
        let summary = engine.run_promo_batch(PoolType::ListingReward);

        assert_eq!(summary.paid, 0);
        assert_eq!(summary.disqualified, 1);
        assert_eq!(
            engine.reward(&RewardId::new("r2")).unwrap().status,
            RewardStatus::Disqualified
        );
    }

    #[test]
    fn pools_deduplicate_independently() {
        let mut engine = engine_with_users(&[("u1", "acct_1")]);
        engine.insert_reward(reward("r1", PoolType::ListingReward, "u1"));
        engine.insert_reward(reward("r2", PoolType::ContestWinner, "u1"));

        assert_eq!(engine.run_promo_batch(PoolType::ListingReward).paid, 1);
        // Same destination may still collect from the other pool
        assert_eq!(engine.run_promo_batch(PoolType::ContestWinner).paid, 1);
    }

    #[test]
    fn batch_only_touches_its_own_pool() {
        let mut engine = engine_with_users(&[("u1", "acct_1")]);
        engine.insert_reward(reward("r1", PoolType::ContestWinner, "u1"));

        let summary = engine.run_promo_batch(PoolType::ListingReward);
        assert_eq!(summary, BatchSummary::default());
        assert_eq!(
            engine.reward(&RewardId::new("r1")).unwrap().status,
            RewardStatus::Pending
        );
    }

    #[test]
    fn transfer_failure_marks_failed_and_continues() {
        let mut engine = engine_with_users(&[("u1", "acct_bad"), ("u2", "acct_2")]);
        engine.processor().fail_transfers_to(DestinationRef::new("acct_bad"));
        engine.insert_reward(reward("r1", PoolType::ListingReward, "u1"));
        engine.insert_reward(reward("r2", PoolType::ListingReward, "u2"));

        let summary = engine.run_promo_batch(PoolType::ListingReward);
        assert_eq!(summary.paid, 1);
        assert_eq!(summary.failed, 1);

        let r1 = engine.reward(&RewardId::new("r1")).unwrap();
        // Failed is retryable, so no destination is recorded
        assert_eq!(r1.status, RewardStatus::Failed);
        assert!(r1.destination.is_none());
        assert_eq!(
            engine.reward(&RewardId::new("r2")).unwrap().status,
            RewardStatus::Paid
        );
    }

    #[test]
    fn failed_record_can_be_retried_after_requeue() {
        let mut engine = engine_with_users(&[("u1", "acct_bad")]);
        engine.processor().fail_transfers_to(DestinationRef::new("acct_bad"));
        engine.insert_reward(reward("r1", PoolType::ListingReward, "u1"));

        assert_eq!(engine.run_promo_batch(PoolType::ListingReward).failed, 1);

        // Failed records are not selected again until re-marked eligible
        assert_eq!(engine.run_promo_batch(PoolType::ListingReward), BatchSummary::default());
    }

    #[test]
    fn pool_amounts_differ() {
        let mut engine = engine_with_users(&[("u1", "acct_1")]);
        engine.insert_reward(reward("r1", PoolType::ContestWinner, "u1"));
        engine.run_promo_batch(PoolType::ContestWinner);

        assert!(engine.processor().calls().iter().any(|c| matches!(
            c,
            crate::processor::ProcessorCall::Transfer { amount, .. }
                if *amount == Amount::from_cents(50_000)
        )));
    }
}
