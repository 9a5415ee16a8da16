//! In-memory port implementations
//!
//! Deterministic stand-ins for the external collaborators. The simulator
//! binary and every test wire the ledgers against these.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tracing::warn;

use super::{
    AccountId, AssetTransferPort, Capability, CapabilityGate, Clock, TradeVenue,
    TransferSavepoint, VaultRegistry,
};
use crate::error::TransferError;
use crate::math::Amount;

// =============================================================================
// ASSET BANK
// =============================================================================

#[derive(Debug, Clone, Default)]
struct BankBooks {
    balances: HashMap<AccountId, Amount>,
    allowances: HashMap<(AccountId, AccountId), Amount>,
}

impl BankBooks {
    fn balance(&self, account: &AccountId) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    fn move_funds(
        &mut self,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<(), TransferError> {
        let available = self.balance(from);
        if available < amount {
            return Err(TransferError::InsufficientBalance {
                account: from.clone(),
                needed: amount,
                available,
            });
        }
        let credited = self
            .balance(to)
            .checked_add(amount)
            .ok_or_else(|| TransferError::Rejected("balance overflow".to_string()))?;
        self.balances.insert(from.clone(), available - amount);
        self.balances.insert(to.clone(), credited);
        Ok(())
    }
}

/// Single-asset token bank with ERC-20 style allowances.
#[derive(Debug, Default)]
pub struct InMemoryAssetBank {
    books: Mutex<BankBooks>,
}

impl InMemoryAssetBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `amount` out of thin air (test funding, simulated trade gains).
    pub fn mint(&self, account: &AccountId, amount: Amount) {
        let mut books = self.books.lock();
        let entry = books.balances.entry(account.clone()).or_insert(0);
        *entry = entry.saturating_add(amount);
    }

    /// Destroy up to `amount`; returns what was actually burned.
    pub fn burn(&self, account: &AccountId, amount: Amount) -> Amount {
        let mut books = self.books.lock();
        let entry = books.balances.entry(account.clone()).or_insert(0);
        let burned = amount.min(*entry);
        *entry -= burned;
        burned
    }

    pub fn total_supply(&self) -> Amount {
        self.books.lock().balances.values().sum()
    }
}

impl AssetTransferPort for InMemoryAssetBank {
    fn balance_of(&self, account: &AccountId) -> Amount {
        self.books.lock().balance(account)
    }

    fn pull(&self, from: &AccountId, to: &AccountId, amount: Amount) -> Result<(), TransferError> {
        let mut books = self.books.lock();
        let key = (from.clone(), to.clone());
        let allowed = books.allowances.get(&key).copied().unwrap_or(0);
        if allowed < amount {
            return Err(TransferError::InsufficientAllowance {
                owner: from.clone(),
                spender: to.clone(),
                needed: amount,
                available: allowed,
            });
        }
        books.move_funds(from, to, amount)?;
        books.allowances.insert(key, allowed - amount);
        Ok(())
    }

    fn push(&self, from: &AccountId, to: &AccountId, amount: Amount) -> Result<(), TransferError> {
        self.books.lock().move_funds(from, to, amount)
    }

    fn approve(
        &self,
        owner: &AccountId,
        spender: &AccountId,
        amount: Amount,
    ) -> Result<(), TransferError> {
        let mut books = self.books.lock();
        let entry = books
            .allowances
            .entry((owner.clone(), spender.clone()))
            .or_insert(0);
        *entry = entry.saturating_add(amount);
        Ok(())
    }

    fn allowance(&self, owner: &AccountId, spender: &AccountId) -> Amount {
        self.books
            .lock()
            .allowances
            .get(&(owner.clone(), spender.clone()))
            .copied()
            .unwrap_or(0)
    }

    fn savepoint(&self) -> TransferSavepoint {
        TransferSavepoint::new(self.books.lock().clone())
    }

    fn restore(&self, savepoint: TransferSavepoint) {
        match savepoint.into_inner::<BankBooks>() {
            Some(books) => *self.books.lock() = books,
            None => warn!("savepoint was not taken by this bank; balances left as they are"),
        }
    }
}

// =============================================================================
// ROLES
// =============================================================================

/// Capability table. Granting and revoking is plumbing outside the ledgers.
#[derive(Debug, Default)]
pub struct RoleTable {
    grants: RwLock<HashMap<AccountId, BTreeSet<Capability>>>,
}

impl RoleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(&self, account: &AccountId, capability: Capability) {
        self.grants
            .write()
            .entry(account.clone())
            .or_default()
            .insert(capability);
    }

    pub fn revoke(&self, account: &AccountId, capability: Capability) {
        if let Some(caps) = self.grants.write().get_mut(account) {
            caps.remove(&capability);
        }
    }
}

impl CapabilityGate for RoleTable {
    fn has(&self, caller: &AccountId, capability: Capability) -> bool {
        self.grants
            .read()
            .get(caller)
            .map(|caps| caps.contains(&capability))
            .unwrap_or(false)
    }
}

// =============================================================================
// CLOCKS
// =============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: i64) -> i64 {
        self.now.fetch_add(seconds, Ordering::SeqCst) + seconds
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

#[derive(Debug, Default)]
pub struct StaticVaultRegistry {
    vaults: RwLock<Vec<AccountId>>,
}

impl StaticVaultRegistry {
    pub fn new(vaults: Vec<AccountId>) -> Self {
        Self {
            vaults: RwLock::new(vaults),
        }
    }

    /// Append a vault; duplicates are ignored so order stays stable.
    pub fn register(&self, vault: AccountId) {
        let mut vaults = self.vaults.write();
        if !vaults.contains(&vault) {
            vaults.push(vault);
        }
    }

    pub fn deregister(&self, vault: &AccountId) {
        self.vaults.write().retain(|v| v != vault);
    }
}

impl VaultRegistry for StaticVaultRegistry {
    fn list_active_vaults(&self) -> Vec<AccountId> {
        self.vaults.read().clone()
    }
}

// =============================================================================
// SIMULATED VENUE
// =============================================================================

/// Scripted result of the next trade at one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimulatedTrade {
    Gain(Amount),
    Loss(Amount),
    Fail(String),
}

/// Trade venue that replays queued outcomes per target by minting into or
/// burning from the vault's balance. A target with nothing queued is a no-op.
/// The balance effect is undone with the bank when the trade aborts, but the
/// queued outcome stays consumed.
pub struct SimulatedVenue {
    bank: Arc<InMemoryAssetBank>,
    queued: Mutex<BTreeMap<AccountId, VecDeque<SimulatedTrade>>>,
}

impl SimulatedVenue {
    pub fn new(bank: Arc<InMemoryAssetBank>) -> Self {
        Self {
            bank,
            queued: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn queue(&self, target: &AccountId, trade: SimulatedTrade) {
        self.queued
            .lock()
            .entry(target.clone())
            .or_default()
            .push_back(trade);
    }
}

impl TradeVenue for SimulatedVenue {
    fn execute(
        &self,
        vault: &AccountId,
        target: &AccountId,
        _payload: &[u8],
    ) -> Result<(), String> {
        let next = self
            .queued
            .lock()
            .get_mut(target)
            .and_then(|queue| queue.pop_front());
        match next {
            None => Ok(()),
            Some(SimulatedTrade::Gain(amount)) => {
                self.bank.mint(vault, amount);
                Ok(())
            }
            Some(SimulatedTrade::Loss(amount)) => {
                self.bank.burn(vault, amount);
                Ok(())
            }
            Some(SimulatedTrade::Fail(reason)) => Err(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> AccountId {
        AccountId::from(s)
    }

    #[test]
    fn test_pull_requires_allowance() {
        let bank = InMemoryAssetBank::new();
        bank.mint(&id("alice"), 100);

        let err = bank.pull(&id("alice"), &id("vault"), 50).unwrap_err();
        assert!(matches!(err, TransferError::InsufficientAllowance { .. }));

        bank.approve(&id("alice"), &id("vault"), 60).unwrap();
        bank.pull(&id("alice"), &id("vault"), 50).unwrap();
        assert_eq!(bank.balance_of(&id("alice")), 50);
        assert_eq!(bank.balance_of(&id("vault")), 50);
        assert_eq!(bank.allowance(&id("alice"), &id("vault")), 10);
    }

    #[test]
    fn test_push_is_all_or_nothing() {
        let bank = InMemoryAssetBank::new();
        bank.mint(&id("vault"), 10);
        assert!(bank.push(&id("vault"), &id("bob"), 11).is_err());
        assert_eq!(bank.balance_of(&id("vault")), 10);
        assert_eq!(bank.balance_of(&id("bob")), 0);
    }

    #[test]
    fn test_restore_undoes_transfers_and_mints() {
        let bank = InMemoryAssetBank::new();
        bank.mint(&id("alice"), 100);
        let savepoint = bank.savepoint();

        bank.approve(&id("alice"), &id("vault"), 40).unwrap();
        bank.pull(&id("alice"), &id("vault"), 30).unwrap();
        bank.mint(&id("vault"), 5);
        bank.restore(savepoint);

        assert_eq!(bank.balance_of(&id("alice")), 100);
        assert_eq!(bank.balance_of(&id("vault")), 0);
        assert_eq!(bank.allowance(&id("alice"), &id("vault")), 0);
        assert_eq!(bank.total_supply(), 100);
    }

    #[test]
    fn test_roles() {
        let roles = RoleTable::new();
        roles.grant(&id("ops"), Capability::Operator);
        assert!(roles.has(&id("ops"), Capability::Operator));
        assert!(!roles.has(&id("ops"), Capability::Admin));
        roles.revoke(&id("ops"), Capability::Operator);
        assert!(!roles.has(&id("ops"), Capability::Operator));
    }

    #[test]
    fn test_registry_keeps_order() {
        let registry = StaticVaultRegistry::new(vec![id("v1")]);
        registry.register(id("v2"));
        registry.register(id("v1"));
        assert_eq!(registry.list_active_vaults(), vec![id("v1"), id("v2")]);
        registry.deregister(&id("v1"));
        assert_eq!(registry.list_active_vaults(), vec![id("v2")]);
    }

    #[test]
    fn test_simulated_venue_replays_queue() {
        let bank = Arc::new(InMemoryAssetBank::new());
        let venue = SimulatedVenue::new(bank.clone());
        let dex = id("dex");
        venue.queue(&dex, SimulatedTrade::Gain(100));
        venue.queue(&dex, SimulatedTrade::Fail("slippage".into()));

        venue.execute(&id("vault"), &dex, b"").unwrap();
        assert_eq!(bank.balance_of(&id("vault")), 100);
        assert_eq!(
            venue.execute(&id("vault"), &dex, b"").unwrap_err(),
            "slippage"
        );
        // drained queue is a no-op
        venue.execute(&id("vault"), &dex, b"").unwrap();
        assert_eq!(bank.balance_of(&id("vault")), 100);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.advance(50), 1_050);
        assert_eq!(clock.now(), 1_050);
        clock.set(5);
        assert_eq!(clock.now(), 5);
    }
}
