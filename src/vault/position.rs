use serde::{Deserialize, Serialize};

use crate::math::Amount;

/// Per-depositor history. Observational only; share math never reads it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPosition {
    pub total_deposited: Amount,
    pub total_withdrawn: Amount,
    /// Withdrawn value above what was deposited.
    pub realized_profit: Amount,
    /// Highest observed asset value of the holder's shares.
    pub high_water_mark: Amount,
    pub active: bool,
    pub deposit_count: u64,
    pub withdraw_count: u64,
    pub first_deposit_at: Option<i64>,
    pub last_deposit_at: Option<i64>,
    pub last_withdraw_at: Option<i64>,
}

impl UserPosition {
    pub fn record_deposit(&mut self, amount: Amount, now: i64) {
        self.total_deposited = self.total_deposited.saturating_add(amount);
        self.deposit_count += 1;
        self.first_deposit_at.get_or_insert(now);
        self.last_deposit_at = Some(now);
        self.active = true;
    }

    /// Profit is recognised once cumulative withdrawals cross cumulative
    /// deposits; everything withdrawn past that point counts.
    pub fn record_withdrawal(&mut self, assets: Amount, now: i64) {
        self.total_withdrawn = self.total_withdrawn.saturating_add(assets);
        self.realized_profit = self.total_withdrawn.saturating_sub(self.total_deposited);
        self.withdraw_count += 1;
        self.last_withdraw_at = Some(now);
    }

    pub fn refresh_high_water_mark(&mut self, value: Amount) {
        self.high_water_mark = self.high_water_mark.max(value);
    }
}
