//! Ledger error taxonomy
//!
//! Every failure aborts the whole operation. The [`ErrorKind`] of an error
//! tells the caller whether resubmitting can ever help.

use crate::math::Amount;
use crate::ports::{AccountId, Capability};

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Broad classes of failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller supplied a bad value (zero/oversized amount, bad id, cap exceeded).
    Validation,
    /// Caller lacks the capability for this entry point.
    Authorization,
    /// Ledger is not in a state that admits the call.
    StatePrecondition,
    /// A transfer, the trade call, or the trade result failed.
    ExternalCall,
}

/// Failures reported by an [`AssetTransferPort`](crate::ports::AssetTransferPort).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    InsufficientBalance {
        account: AccountId,
        needed: Amount,
        available: Amount,
    },
    InsufficientAllowance {
        owner: AccountId,
        spender: AccountId,
        needed: Amount,
        available: Amount,
    },
    /// The port refused the transfer for its own reasons (including a
    /// callback into a locked ledger).
    Rejected(String),
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientBalance {
                account,
                needed,
                available,
            } => write!(
                f,
                "insufficient balance on {}: needed {}, available {}",
                account, needed, available
            ),
            Self::InsufficientAllowance {
                owner,
                spender,
                needed,
                available,
            } => write!(
                f,
                "insufficient allowance {} -> {}: needed {}, available {}",
                owner, spender, needed, available
            ),
            Self::Rejected(reason) => write!(f, "transfer rejected: {}", reason),
        }
    }
}

impl std::error::Error for TransferError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    // --- validation ---
    ZeroAmount,
    /// The computed mint floors to zero shares.
    ZeroShares,
    InvalidAccount(String),
    InsufficientShares {
        requested: Amount,
        available: Amount,
    },
    InsufficientClaimable {
        requested: Amount,
        available: Amount,
    },
    /// Less profit is set aside for this vault than the reinvested deposit asks for.
    InsufficientReinvestment {
        requested: Amount,
        available: Amount,
    },
    FeeTooHigh {
        bp: u32,
        max_bp: u32,
    },
    InvalidDrawdownLimit(u32),
    TargetReturnTooHigh {
        bp: u32,
        max_bp: u32,
    },
    RebalanceIntervalTooShort {
        seconds: i64,
        min_seconds: i64,
    },
    InvalidSharesBp(u32),
    InvalidLockupPeriod(i64),
    AmountOverflow,
    DivisionByZero,

    // --- authorization ---
    Unauthorized {
        caller: AccountId,
        capability: Capability,
    },
    /// Caller holds the vault capability but is not the vault this ledger is bound to.
    UnknownVault(AccountId),

    // --- state preconditions ---
    Paused,
    NotPaused,
    EmergencyActive,
    EmergencyNotActive,
    StrategyInactive,
    TargetNotAllowed(AccountId),
    RebalanceTooSoon {
        next_allowed_at: i64,
    },
    DrawdownExceeded {
        drawdown_bp: u32,
        max_bp: u32,
    },
    NothingToWithdraw,
    NothingToClaim,
    StakeholderExists(String),
    StakeholderNotFound(String),
    StakeholderInactive(String),
    PayoutTargetMissing(String),
    AllocationExceeded {
        allocated_bp: u32,
        requested_bp: u32,
    },
    /// Reducing this allocation would drop entitlement below what was already paid.
    AllocationBelowClaimed {
        stakeholder: String,
        entitlement: Amount,
        claimed: Amount,
    },
    /// The ledger is already inside a mutating call.
    Reentrancy {
        ledger: &'static str,
    },

    // --- external calls ---
    Transfer(TransferError),
    TradeCallFailed(String),
    TradeLoss {
        pre_balance: Amount,
        post_balance: Amount,
    },
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ZeroAmount
            | Self::ZeroShares
            | Self::InvalidAccount(_)
            | Self::InsufficientShares { .. }
            | Self::InsufficientClaimable { .. }
            | Self::InsufficientReinvestment { .. }
            | Self::FeeTooHigh { .. }
            | Self::InvalidDrawdownLimit(_)
            | Self::TargetReturnTooHigh { .. }
            | Self::RebalanceIntervalTooShort { .. }
            | Self::InvalidSharesBp(_)
            | Self::InvalidLockupPeriod(_)
            | Self::AmountOverflow
            | Self::DivisionByZero => ErrorKind::Validation,

            Self::Unauthorized { .. } | Self::UnknownVault(_) => ErrorKind::Authorization,

            Self::Paused
            | Self::NotPaused
            | Self::EmergencyActive
            | Self::EmergencyNotActive
            | Self::StrategyInactive
            | Self::TargetNotAllowed(_)
            | Self::RebalanceTooSoon { .. }
            | Self::DrawdownExceeded { .. }
            | Self::NothingToWithdraw
            | Self::NothingToClaim
            | Self::StakeholderExists(_)
            | Self::StakeholderNotFound(_)
            | Self::StakeholderInactive(_)
            | Self::PayoutTargetMissing(_)
            | Self::AllocationExceeded { .. }
            | Self::AllocationBelowClaimed { .. }
            | Self::Reentrancy { .. } => ErrorKind::StatePrecondition,

            Self::Transfer(_) | Self::TradeCallFailed(_) | Self::TradeLoss { .. } => {
                ErrorKind::ExternalCall
            }
        }
    }

    /// Whether the same call may succeed later without anyone changing
    /// configuration or capabilities.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RebalanceTooSoon { .. } | Self::Paused)
    }
}

impl From<TransferError> for LedgerError {
    fn from(e: TransferError) -> Self {
        Self::Transfer(e)
    }
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroAmount => write!(f, "amount must be greater than zero"),
            Self::ZeroShares => write!(f, "deposit would mint zero shares"),
            Self::InvalidAccount(raw) => write!(f, "invalid account identifier: {:?}", raw),
            Self::InsufficientShares {
                requested,
                available,
            } => write!(
                f,
                "insufficient shares: requested {}, available {}",
                requested, available
            ),
            Self::InsufficientClaimable {
                requested,
                available,
            } => write!(
                f,
                "insufficient claimable profit: requested {}, available {}",
                requested, available
            ),
            Self::InsufficientReinvestment {
                requested,
                available,
            } => write!(
                f,
                "insufficient profit set aside for reinvestment: requested {}, available {}",
                requested, available
            ),
            Self::FeeTooHigh { bp, max_bp } => {
                write!(f, "fee {} bp exceeds cap of {} bp", bp, max_bp)
            }
            Self::InvalidDrawdownLimit(bp) => {
                write!(f, "max drawdown {} bp exceeds 10000 bp", bp)
            }
            Self::TargetReturnTooHigh { bp, max_bp } => {
                write!(f, "target return {} bp exceeds cap of {} bp", bp, max_bp)
            }
            Self::RebalanceIntervalTooShort {
                seconds,
                min_seconds,
            } => write!(
                f,
                "rebalance interval {}s is below the minimum of {}s",
                seconds, min_seconds
            ),
            Self::InvalidSharesBp(bp) => write!(f, "invalid stakeholder share: {} bp", bp),
            Self::InvalidLockupPeriod(secs) => write!(f, "invalid lockup period: {}s", secs),
            Self::AmountOverflow => write!(f, "amount arithmetic overflow"),
            Self::DivisionByZero => write!(f, "division by zero in share math"),
            Self::Unauthorized { caller, capability } => write!(
                f,
                "{} lacks the {} capability",
                caller,
                capability.as_str()
            ),
            Self::UnknownVault(vault) => write!(f, "{} is not a source vault of this ledger", vault),
            Self::Paused => write!(f, "vault is paused"),
            Self::NotPaused => write!(f, "vault is not paused"),
            Self::EmergencyActive => write!(f, "emergency mode is active"),
            Self::EmergencyNotActive => write!(f, "emergency mode is not active"),
            Self::StrategyInactive => write!(f, "strategy is inactive"),
            Self::TargetNotAllowed(target) => {
                write!(f, "trade target {} is not on the allow-list", target)
            }
            Self::RebalanceTooSoon { next_allowed_at } => {
                write!(f, "rebalance too soon; next allowed at {}", next_allowed_at)
            }
            Self::DrawdownExceeded {
                drawdown_bp,
                max_bp,
            } => write!(
                f,
                "drawdown {} bp exceeds strategy limit of {} bp",
                drawdown_bp, max_bp
            ),
            Self::NothingToWithdraw => write!(f, "nothing to withdraw"),
            Self::NothingToClaim => write!(f, "nothing to claim"),
            Self::StakeholderExists(id) => write!(f, "stakeholder {} already exists", id),
            Self::StakeholderNotFound(id) => write!(f, "stakeholder {} not found", id),
            Self::StakeholderInactive(id) => write!(f, "stakeholder {} is inactive", id),
            Self::PayoutTargetMissing(id) => {
                write!(f, "stakeholder {} has no payout target", id)
            }
            Self::AllocationExceeded {
                allocated_bp,
                requested_bp,
            } => write!(
                f,
                "allocation would exceed 10000 bp: {} bp allocated, {} bp requested",
                allocated_bp, requested_bp
            ),
            Self::AllocationBelowClaimed {
                stakeholder,
                entitlement,
                claimed,
            } => write!(
                f,
                "stakeholder {} entitlement {} would fall below claimed {}",
                stakeholder, entitlement, claimed
            ),
            Self::Reentrancy { ledger } => write!(f, "reentrant call into {}", ledger),
            Self::Transfer(e) => write!(f, "{}", e),
            Self::TradeCallFailed(reason) => write!(f, "trade call failed: {}", reason),
            Self::TradeLoss {
                pre_balance,
                post_balance,
            } => write!(
                f,
                "trade lost value: balance {} -> {}",
                pre_balance, post_balance
            ),
        }
    }
}

impl std::error::Error for LedgerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transfer(e) => Some(e),
            _ => None,
        }
    }
}
