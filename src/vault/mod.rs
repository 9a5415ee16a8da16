//! Vault Module - Pooled Deposits & Operator Trade Settlement
//!
//! - `ledger`: share/asset books, trade settlement, fee routing
//! - `strategy`: operator limits checked on every trade
//! - `position`: per-depositor history

pub mod ledger;
pub mod position;
pub mod strategy;

#[cfg(test)]
mod ledger_tests;

pub use ledger::{
    split_pro_rata, DepositReceipt, EmergencyWithdrawReceipt, TradeReceipt, VaultLedger,
    VaultMetrics, VaultPorts, VaultState, WithdrawReceipt, MAX_EMERGENCY_FEE_BP,
    PERFORMANCE_FEE_BP,
};
pub use position::UserPosition;
pub use strategy::{Strategy, MAX_TARGET_RETURN_BP, MIN_REBALANCE_INTERVAL_SECS};
