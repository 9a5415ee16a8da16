use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};
use crate::math::{BPS_DENOMINATOR, SECONDS_PER_DAY};
use crate::ports::AccountId;

/// Upper bound on the advertised target return.
pub const MAX_TARGET_RETURN_BP: u32 = 5_000;
pub const MIN_REBALANCE_INTERVAL_SECS: i64 = SECONDS_PER_DAY;

/// Operator trading limits. Replaced wholesale by `update_strategy`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Strategy {
    pub max_drawdown_bp: u32,
    pub target_return_bp: u32,
    pub rebalance_interval_secs: i64,
    pub allowed_targets: BTreeSet<AccountId>,
    pub active: bool,
}

impl Default for Strategy {
    fn default() -> Self {
        Self {
            max_drawdown_bp: 2_000,
            target_return_bp: 1_000,
            rebalance_interval_secs: SECONDS_PER_DAY,
            allowed_targets: BTreeSet::new(),
            active: false,
        }
    }
}

impl Strategy {
    pub fn validate(&self) -> LedgerResult<()> {
        if self.max_drawdown_bp > BPS_DENOMINATOR {
            return Err(LedgerError::InvalidDrawdownLimit(self.max_drawdown_bp));
        }
        if self.target_return_bp > MAX_TARGET_RETURN_BP {
            return Err(LedgerError::TargetReturnTooHigh {
                bp: self.target_return_bp,
                max_bp: MAX_TARGET_RETURN_BP,
            });
        }
        if self.rebalance_interval_secs < MIN_REBALANCE_INTERVAL_SECS {
            return Err(LedgerError::RebalanceIntervalTooShort {
                seconds: self.rebalance_interval_secs,
                min_seconds: MIN_REBALANCE_INTERVAL_SECS,
            });
        }
        if let Some(bad) = self.allowed_targets.iter().find(|t| !t.is_valid()) {
            return Err(LedgerError::InvalidAccount(bad.to_string()));
        }
        Ok(())
    }

    /// True when trades against `target` are currently permitted.
    pub fn allows(&self, target: &AccountId) -> bool {
        self.active && self.allowed_targets.contains(target)
    }
}
