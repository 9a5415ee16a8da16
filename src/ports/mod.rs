//! Collaborator ports
//!
//! The ledgers never reach for ambient state. Everything they observe or
//! affect outside their own books goes through one of these traits:
//!
//! - [`AssetTransferPort`]: all-or-nothing movement of the pooled asset,
//!   with savepoints so an aborted call puts every transfer back
//! - [`CapabilityGate`]: who may call privileged entry points
//! - [`Clock`]: wall-clock seconds for lockups and rebalance gating
//! - [`TradeVenue`]: the opaque trade call whose only visible effect is a balance delta
//! - [`VaultRegistry`]: ordered list of live vaults for multi-vault claims
//! - [`RevenueSink`] / [`ProfitSink`]: the seams between the three ledgers
//!
//! In-memory implementations for tests and simulation live in [`memory`].

pub mod memory;

use std::any::Any;

use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult, TransferError};
use crate::math::Amount;

pub use memory::*;

/// Opaque account identity. Normalised to trimmed lowercase so the same
/// wallet never lands under two keys, including when read from config.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String")]
pub struct AccountId(String);

impl AccountId {
    /// Parse a caller-supplied identifier, rejecting blanks.
    pub fn parse(raw: &str) -> LedgerResult<Self> {
        let id = Self::from(raw);
        if id.0.is_empty() {
            return Err(LedgerError::InvalidAccount(raw.to_string()));
        }
        Ok(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
    }
}

impl From<&str> for AccountId {
    fn from(raw: &str) -> Self {
        Self(raw.trim().to_lowercase())
    }
}

impl From<String> for AccountId {
    fn from(raw: String) -> Self {
        Self::from(raw.as_str())
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Named capabilities consulted by privileged entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Admin,
    Operator,
    Emergency,
    /// Held by vaults allowed to credit profit claims.
    Vault,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Admin => "admin",
            Capability::Operator => "operator",
            Capability::Emergency => "emergency",
            Capability::Vault => "vault",
        }
    }
}

/// Opaque capture of a transfer port's state, taken when a call opens and
/// handed back to [`AssetTransferPort::restore`] if that call aborts.
pub struct TransferSavepoint(Box<dyn Any + Send>);

impl TransferSavepoint {
    pub fn new<T: Any + Send>(state: T) -> Self {
        Self(Box::new(state))
    }

    /// The captured state, if it was taken by a port of type `T`.
    pub fn into_inner<T: Any>(self) -> Option<T> {
        self.0.downcast::<T>().ok().map(|state| *state)
    }
}

impl std::fmt::Debug for TransferSavepoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TransferSavepoint")
    }
}

pub trait AssetTransferPort: Send + Sync {
    fn balance_of(&self, account: &AccountId) -> Amount;

    /// Move `amount` from `from` into `to`, spending an allowance `from`
    /// granted to `to`.
    fn pull(&self, from: &AccountId, to: &AccountId, amount: Amount) -> Result<(), TransferError>;

    /// Move `amount` of `from`'s own balance to `to`.
    fn push(&self, from: &AccountId, to: &AccountId, amount: Amount) -> Result<(), TransferError>;

    /// Raise the allowance `owner` grants to `spender` by `amount`.
    fn approve(
        &self,
        owner: &AccountId,
        spender: &AccountId,
        amount: Amount,
    ) -> Result<(), TransferError>;

    fn allowance(&self, owner: &AccountId, spender: &AccountId) -> Amount;

    /// Capture balances and allowances as they are now.
    fn savepoint(&self) -> TransferSavepoint;

    /// Put balances and allowances back to `savepoint`, undoing every
    /// transfer, approval and venue effect since it was taken.
    fn restore(&self, savepoint: TransferSavepoint);
}

pub trait CapabilityGate: Send + Sync {
    fn has(&self, caller: &AccountId, capability: Capability) -> bool;
}

/// Fail with [`LedgerError::Unauthorized`] unless `caller` holds `capability`.
pub fn require_capability(
    gate: &dyn CapabilityGate,
    caller: &AccountId,
    capability: Capability,
) -> LedgerResult<()> {
    if gate.has(caller, capability) {
        Ok(())
    } else {
        Err(LedgerError::Unauthorized {
            caller: caller.clone(),
            capability,
        })
    }
}

pub trait Clock: Send + Sync {
    /// Unix seconds.
    fn now(&self) -> i64;
}

/// The external trade target. Implementations may do anything with the
/// vault's balance; the vault only looks at the balance before and after.
pub trait TradeVenue: Send + Sync {
    fn execute(&self, vault: &AccountId, target: &AccountId, payload: &[u8])
        -> Result<(), String>;
}

pub trait VaultRegistry: Send + Sync {
    /// Live vaults in registry order.
    fn list_active_vaults(&self) -> Vec<AccountId>;
}

/// Where fees go. Implemented by the revenue distributor.
pub trait RevenueSink: Send + Sync {
    /// Account that pulls revenue; payers approve it before calling.
    fn account(&self) -> &AccountId;

    fn receive_revenue(&self, caller: &AccountId, amount: Amount, source: &str)
        -> LedgerResult<()>;
}

/// Where a vault's profit remainder is credited. Implemented by the profit
/// claim ledger.
pub trait ProfitSink: Send + Sync {
    /// Account that holds profit set aside for reinvestment.
    fn account(&self) -> &AccountId;

    /// Fails if `vault` may not credit profit here.
    fn ensure_source(&self, vault: &AccountId) -> LedgerResult<()>;

    /// Credit every `(user, amount)` pair as one atomic unit.
    fn distribute_profits_batch(
        &self,
        vault: &AccountId,
        credits: &[(AccountId, Amount)],
    ) -> LedgerResult<()>;

    /// Consume `amount` of the profit `user` set aside for `vault`. The vault
    /// then pulls that amount from [`ProfitSink::account`].
    fn take_reinvestment(&self, vault: &AccountId, user: &AccountId, amount: Amount)
        -> LedgerResult<()>;
}
