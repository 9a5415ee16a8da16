//! Audit trail
//!
//! Every successful mutating call emits its records exactly once, after the
//! call has fully succeeded. Aborted calls emit nothing. Sinks are
//! append-only and consumed by external observers.

pub mod store;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::math::Amount;
use crate::ports::AccountId;

pub use store::SqliteEventStore;

/// Externally tagged on the wire (`{"Deposit": {...}}`); amounts are `u128`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    // vault
    Deposit {
        user: AccountId,
        assets: Amount,
        shares: Amount,
    },
    Withdraw {
        user: AccountId,
        assets: Amount,
        shares: Amount,
    },
    EmergencyWithdrawal {
        user: AccountId,
        net: Amount,
        fee: Amount,
    },
    TradeExecuted {
        target: AccountId,
        /// Hex-encoded call payload.
        payload: String,
    },
    ProfitRealized {
        profit: Amount,
        fee: Amount,
    },
    StrategyUpdated {
        max_drawdown_bp: u32,
        target_return_bp: u32,
        rebalance_interval_secs: i64,
        allowed_targets: Vec<AccountId>,
        active: bool,
    },
    VaultPaused {
        by: AccountId,
    },
    VaultUnpaused {
        by: AccountId,
    },
    EmergencyTriggered {
        by: AccountId,
    },
    EmergencyResolved {
        by: AccountId,
    },

    // revenue distributor
    RevenueReceived {
        amount: Amount,
        source: String,
    },
    RevenueDistributed {
        stakeholder_id: String,
        payout_target: AccountId,
        amount: Amount,
    },
    StakeholderAdded {
        stakeholder_id: String,
        payout_target: Option<AccountId>,
        shares_bp: u32,
    },
    StakeholderUpdated {
        stakeholder_id: String,
        payout_target: Option<AccountId>,
        shares_bp: u32,
    },
    StakeholderStatusChanged {
        stakeholder_id: String,
        active: bool,
    },

    // profit claims
    ProfitDistributed {
        vault: AccountId,
        user: AccountId,
        amount: Amount,
    },
    ProfitClaimed {
        user: AccountId,
        net: Amount,
        fee: Amount,
    },
    ProfitReinvested {
        vault: AccountId,
        user: AccountId,
        amount: Amount,
    },
    ClaimsFunded {
        funder: AccountId,
        amount: Amount,
    },
    LockupPeriodUpdated {
        seconds: i64,
    },
    EarlyWithdrawalFeeUpdated {
        bp: u32,
    },
}

impl LedgerEvent {
    /// Variant name, used as the indexed column in the SQLite store.
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerEvent::Deposit { .. } => "Deposit",
            LedgerEvent::Withdraw { .. } => "Withdraw",
            LedgerEvent::EmergencyWithdrawal { .. } => "EmergencyWithdrawal",
            LedgerEvent::TradeExecuted { .. } => "TradeExecuted",
            LedgerEvent::ProfitRealized { .. } => "ProfitRealized",
            LedgerEvent::StrategyUpdated { .. } => "StrategyUpdated",
            LedgerEvent::VaultPaused { .. } => "VaultPaused",
            LedgerEvent::VaultUnpaused { .. } => "VaultUnpaused",
            LedgerEvent::EmergencyTriggered { .. } => "EmergencyTriggered",
            LedgerEvent::EmergencyResolved { .. } => "EmergencyResolved",
            LedgerEvent::RevenueReceived { .. } => "RevenueReceived",
            LedgerEvent::RevenueDistributed { .. } => "RevenueDistributed",
            LedgerEvent::StakeholderAdded { .. } => "StakeholderAdded",
            LedgerEvent::StakeholderUpdated { .. } => "StakeholderUpdated",
            LedgerEvent::StakeholderStatusChanged { .. } => "StakeholderStatusChanged",
            LedgerEvent::ProfitDistributed { .. } => "ProfitDistributed",
            LedgerEvent::ProfitClaimed { .. } => "ProfitClaimed",
            LedgerEvent::ProfitReinvested { .. } => "ProfitReinvested",
            LedgerEvent::ClaimsFunded { .. } => "ClaimsFunded",
            LedgerEvent::LockupPeriodUpdated { .. } => "LockupPeriodUpdated",
            LedgerEvent::EarlyWithdrawalFeeUpdated { .. } => "EarlyWithdrawalFeeUpdated",
        }
    }
}

/// One appended record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: Uuid,
    /// Position in the sink, starting at 1.
    pub seq: u64,
    pub ts: DateTime<Utc>,
    /// Account of the ledger that emitted the event.
    pub source: AccountId,
    pub event: LedgerEvent,
}

impl EventRecord {
    pub fn new(seq: u64, source: &AccountId, event: LedgerEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq,
            ts: Utc::now(),
            source: source.clone(),
            event,
        }
    }
}

pub trait EventSink: Send + Sync {
    /// Append the events of one committed call, in order. Calls nested
    /// inside another ledger's call are published right after the outer
    /// call's own events, once the outermost call commits.
    fn publish(&self, source: &AccountId, events: Vec<LedgerEvent>);
}

/// In-process append-only log.
#[derive(Debug, Default)]
pub struct MemoryEventLog {
    records: Mutex<Vec<EventRecord>>,
}

impl MemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<EventRecord> {
        self.records.lock().clone()
    }

    pub fn events(&self) -> Vec<LedgerEvent> {
        self.records.lock().iter().map(|r| r.event.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl EventSink for MemoryEventLog {
    fn publish(&self, source: &AccountId, events: Vec<LedgerEvent>) {
        let mut records = self.records.lock();
        for event in events {
            let seq = records.len() as u64 + 1;
            records.push(EventRecord::new(seq, source, event));
        }
    }
}
