//! Profit claims with lockup and early-withdrawal fee

pub mod ledger;


pub use ledger::{
    ClaimLeg, ClaimPorts, ClaimQuote, ClaimRouting, ClaimState, ProfitClaimLedger, VaultClaim,
    MAX_EARLY_WITHDRAWAL_FEE_BP,
};
