//! Mining session state machine
//!
//! `Idle → Active → Claimable → Claimed`, plus `Active → Idle` when a
//! session is stopped before anything accrued.
//!
//! Accrual is computed lazily from the rate snapshot whenever the session is
//! read or settled. Boost expiries inside the settled interval split it so
//! each stretch uses the multipliers that were live at the time.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::boost::{self, Boost, BoostTarget};
use crate::collaborators::LedgerReceipt;
use crate::error::{Result, RewardError};
use crate::mining::{MiningCalculator, MiningInputs, MiningRate};

/// Relative pioneer-bonus change that makes a snapshot stale
const NETWORK_DRIFT_TOLERANCE: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Active,
    Claimable,
    Claimed,
}

impl SessionState {
    /// Idle and Claimed sessions are archived
    pub fn is_archived(&self) -> bool {
        matches!(self, SessionState::Idle | SessionState::Claimed)
    }
}

/// Multipliers the session accrues with, minus boosts (applied per stretch)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateSnapshot {
    pub inputs: MiningInputs,
    pub taken_at: DateTime<Utc>,
}

impl RateSnapshot {
    pub fn new(inputs: MiningInputs, taken_at: DateTime<Utc>) -> Self {
        Self {
            inputs: inputs.with_boost(1.0),
            taken_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub session_id: Uuid,
    pub amount: f64,
    /// Accrued above the daily cap; reported, not paid
    pub excess: f64,
    pub claimed_at: DateTime<Utc>,
    pub idempotency_key: String,
    #[serde(default)]
    pub ledger_receipt: Option<LedgerReceipt>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningSession {
    pub session_id: Uuid,
    pub user_id: String,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    /// Accrual has been settled up to this instant
    pub last_update: DateTime<Utc>,
    /// Settled but unclaimed amount
    pub accrued: f64,
    pub snapshot: RateSnapshot,
    #[serde(default)]
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub claim: Option<ClaimRecord>,
}

impl MiningSession {
    pub fn start(user_id: impl Into<String>, snapshot: RateSnapshot, now: DateTime<Utc>) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id: user_id.into(),
            state: SessionState::Active,
            started_at: now,
            last_update: now,
            accrued: 0.0,
            snapshot,
            stopped_at: None,
            claim: None,
        }
    }

    pub fn idempotency_key(&self) -> String {
        format!("claim:{}", self.session_id)
    }

    /// Accrual never runs past `started_at + max_hours`
    fn accrual_end(&self, now: DateTime<Utc>, max_hours: f64) -> DateTime<Utc> {
        let limit = self.started_at + Duration::milliseconds((max_hours * 3_600_000.0) as i64);
        now.min(limit)
    }

    /// Current rate for this session's snapshot with the boosts live at `now`
    pub fn current_rate(
        &self,
        calculator: &MiningCalculator,
        boosts: &[Boost],
        now: DateTime<Utc>,
    ) -> MiningRate {
        let boost = boost::product(boosts, BoostTarget::Mining, now);
        calculator.calculate(&self.snapshot.inputs.with_boost(boost))
    }

    /// Amount accrued since `last_update`, not yet settled
    pub fn pending_accrual(
        &self,
        calculator: &MiningCalculator,
        boosts: &[Boost],
        now: DateTime<Utc>,
    ) -> f64 {
        if self.state != SessionState::Active {
            return 0.0;
        }
        let end = self.accrual_end(now, calculator.config().max_session_hours);
        if end <= self.last_update {
            return 0.0;
        }

        let mut cuts = boost::expiries_between(boosts, BoostTarget::Mining, self.last_update, end);
        cuts.push(end);

        let mut from = self.last_update;
        let mut total = 0.0;
        for to in cuts {
            let millis = (to - from).num_milliseconds();
            // Boosts are live at their expiry instant, so sample mid-stretch
            let sample = from + Duration::milliseconds(millis / 2);
            let hours = millis as f64 / 3_600_000.0;
            total += self.current_rate(calculator, boosts, sample).hourly_rate * hours;
            from = to;
        }
        total
    }

    /// Settled plus pending accrual at `now`
    pub fn accrued_at(&self, calculator: &MiningCalculator, boosts: &[Boost], now: DateTime<Utc>) -> f64 {
        self.accrued + self.pending_accrual(calculator, boosts, now)
    }

    /// Fold pending accrual into `accrued`
    pub fn settle(&mut self, calculator: &MiningCalculator, boosts: &[Boost], now: DateTime<Utc>) {
        if self.state != SessionState::Active {
            return;
        }
        self.accrued += self.pending_accrual(calculator, boosts, now);
        self.last_update = self.last_update.max(now);
    }

    /// Settle with the old multipliers, then accrue with the new ones
    pub fn resnapshot(
        &mut self,
        calculator: &MiningCalculator,
        boosts: &[Boost],
        inputs: MiningInputs,
        now: DateTime<Utc>,
    ) {
        self.settle(calculator, boosts, now);
        self.snapshot = RateSnapshot::new(inputs, now);
    }

    /// Whether network growth since the snapshot moved an active session into
    /// another phase or shifted its pioneer bonus by more than
    /// `NETWORK_DRIFT_TOLERANCE`
    pub fn network_drifted(&self, calculator: &MiningCalculator, network_users: u64) -> bool {
        if self.state != SessionState::Active {
            return false;
        }
        let inputs = &self.snapshot.inputs;
        if calculator.phase_for(network_users) != inputs.phase {
            return true;
        }
        let then = calculator.pioneer_bonus(inputs.network_users);
        let now = calculator.pioneer_bonus(network_users);
        (now - then).abs() > then * NETWORK_DRIFT_TOLERANCE
    }

    pub fn is_claim_eligible(&self, now: DateTime<Utc>, min_interval_secs: i64) -> bool {
        match self.state {
            SessionState::Claimable => true,
            SessionState::Active => now - self.started_at >= Duration::seconds(min_interval_secs),
            _ => false,
        }
    }

    /// `Active → Claimable` if anything accrued, otherwise `Active → Idle`.
    /// Only future accrual is discarded.
    pub fn stop(&mut self, calculator: &MiningCalculator, boosts: &[Boost], now: DateTime<Utc>) -> Result<()> {
        if self.state != SessionState::Active {
            return Err(RewardError::conflict(format!(
                "cannot stop a {:?} session",
                self.state
            )));
        }
        self.settle(calculator, boosts, now);
        self.stopped_at = Some(now);
        self.state = if self.accrued > 0.0 {
            SessionState::Claimable
        } else {
            SessionState::Idle
        };
        Ok(())
    }

    /// Settle and freeze an eligible Active session so it can be claimed
    pub fn make_claimable(
        &mut self,
        calculator: &MiningCalculator,
        boosts: &[Boost],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let min_interval = calculator.config().min_claim_interval_secs;
        match self.state {
            SessionState::Claimable => Ok(()),
            SessionState::Active if self.is_claim_eligible(now, min_interval) => {
                self.settle(calculator, boosts, now);
                self.stopped_at = Some(now);
                self.state = SessionState::Claimable;
                Ok(())
            }
            SessionState::Active => Err(RewardError::conflict(format!(
                "session not claimable until {}",
                self.started_at + Duration::seconds(min_interval)
            ))),
            state => Err(RewardError::conflict(format!(
                "cannot claim a {:?} session",
                state
            ))),
        }
    }

    /// `Claimable → Claimed`; terminal
    pub fn mark_claimed(&mut self, record: ClaimRecord) -> Result<()> {
        if self.state != SessionState::Claimable {
            return Err(RewardError::conflict(format!(
                "cannot claim a {:?} session",
                self.state
            )));
        }
        self.accrued = 0.0;
        self.state = SessionState::Claimed;
        self.claim = Some(record);
        Ok(())
    }
}
