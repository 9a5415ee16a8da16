//! Profit Claim Ledger
//!
//! Holds the realized-profit credits vaults hand out to their depositors.
//! Credits are pure accounting; payouts come out of this ledger's own
//! custody, topped up with [`ProfitClaimLedger::fund`].
//!
//! # Lockup
//!
//! Every credit from a vault resets that (vault, user) record's
//! `last_profit_at`, re-arming the lockup for the whole balance from that
//! vault. Claiming from a record strictly before
//! `last_profit_at + lockup_secs` costs `floor(amount * fee_bp / 10_000)`,
//! which goes to the revenue sink. At or after the boundary the fee is 0.
//!
//! # Routing
//!
//! - [`ClaimRouting::SingleVault`]: one bound source vault.
//! - [`ClaimRouting::Registry`]: any vault holding the vault capability may
//!   credit. A claim drains the caller's vault records greedily in registry
//!   order, then any records whose vault the registry no longer lists (in
//!   account order), so balances never strand. Each leg uses its own lockup
//!   clock and the per-leg fees are summed.
//!
//! A claim is all-or-nothing: either the full amount is paid with every leg's
//! fee applied, or nothing changes.
//!
//! # Reinvestment
//!
//! `reinvest` moves credit out of a (vault, user) record into a pending
//! amount owed to that vault and approves the vault to pull it. The vault
//! consumes the pending amount through [`ProfitSink::take_reinvestment`]
//! when it mints the user's shares.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ClaimSettings;
use crate::error::{LedgerError, LedgerResult};
use crate::events::{EventSink, LedgerEvent};
use crate::guard::{GuardedState, Journal, Txn};
use crate::math::{bp_of, checked_add, checked_sub, Amount};
use crate::ports::{
    require_capability, AccountId, AssetTransferPort, Capability, CapabilityGate, Clock,
    ProfitSink, RevenueSink, VaultRegistry,
};

/// Cap on the early-withdrawal fee.
pub const MAX_EARLY_WITHDRAWAL_FEE_BP: u32 = 1_000;

/// Which vaults may credit this ledger, and in what order claims drain them.
#[derive(Clone)]
pub enum ClaimRouting {
    SingleVault(AccountId),
    Registry(Arc<dyn VaultRegistry>),
}

impl std::fmt::Debug for ClaimRouting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SingleVault(vault) => f.debug_tuple("SingleVault").field(vault).finish(),
            Self::Registry(_) => f.write_str("Registry"),
        }
    }
}

// =============================================================================
// STATE
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultClaim {
    pub claimable: Amount,
    pub last_profit_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimState {
    /// user -> vault -> record
    pub records: BTreeMap<AccountId, BTreeMap<AccountId, VaultClaim>>,
    /// user -> sum of that user's records
    pub totals: BTreeMap<AccountId, Amount>,
    pub lockup_secs: i64,
    pub early_withdrawal_fee_bp: u32,
    pub total_credited: Amount,
    pub total_claimed: Amount,
    pub total_fees: Amount,
    pub total_funded: Amount,
    /// vault -> user -> credit set aside for the vault to pull
    pub pending_reinvest: BTreeMap<AccountId, BTreeMap<AccountId, Amount>>,
}

impl ClaimState {
    pub fn claimable(&self, user: &AccountId) -> Amount {
        self.totals.get(user).copied().unwrap_or(0)
    }

    pub fn record(&self, vault: &AccountId, user: &AccountId) -> Option<&VaultClaim> {
        self.records.get(user).and_then(|by_vault| by_vault.get(vault))
    }

    pub fn is_locked(&self, vault: &AccountId, user: &AccountId, now: i64) -> bool {
        self.record(vault, user)
            .map(|r| r.claimable > 0 && now < r.last_profit_at.saturating_add(self.lockup_secs))
            .unwrap_or(false)
    }

    fn credit(&mut self, vault: &AccountId, user: &AccountId, amount: Amount, now: i64) -> LedgerResult<()> {
        let total = checked_add(self.claimable(user), amount)?;
        let record = self
            .records
            .entry(user.clone())
            .or_default()
            .entry(vault.clone())
            .or_default();
        record.claimable = checked_add(record.claimable, amount)?;
        record.last_profit_at = now;
        self.totals.insert(user.clone(), total);
        self.total_credited = checked_add(self.total_credited, amount)?;
        Ok(())
    }

    pub fn pending_reinvestment(&self, vault: &AccountId, user: &AccountId) -> Amount {
        self.pending_reinvest
            .get(vault)
            .and_then(|by_user| by_user.get(user))
            .copied()
            .unwrap_or(0)
    }

    fn set_aside(&mut self, vault: &AccountId, user: &AccountId, amount: Amount) -> LedgerResult<()> {
        let pending = checked_add(self.pending_reinvestment(vault, user), amount)?;
        self.pending_reinvest
            .entry(vault.clone())
            .or_default()
            .insert(user.clone(), pending);
        Ok(())
    }

    fn take_set_aside(&mut self, vault: &AccountId, user: &AccountId, amount: Amount) -> LedgerResult<()> {
        let available = self.pending_reinvestment(vault, user);
        if amount > available {
            return Err(LedgerError::InsufficientReinvestment {
                requested: amount,
                available,
            });
        }
        if let Some(by_user) = self.pending_reinvest.get_mut(vault) {
            if available == amount {
                by_user.remove(user);
            } else {
                by_user.insert(user.clone(), available - amount);
            }
            if by_user.is_empty() {
                self.pending_reinvest.remove(vault);
            }
        }
        Ok(())
    }

    fn debit(&mut self, vault: &AccountId, user: &AccountId, amount: Amount) -> LedgerResult<()> {
        let available = self.record(vault, user).map(|r| r.claimable).unwrap_or(0);
        if amount > available {
            return Err(LedgerError::InsufficientClaimable {
                requested: amount,
                available,
            });
        }
        let total = checked_sub(self.claimable(user), amount)?;
        if let Some(by_vault) = self.records.get_mut(user) {
            if let Some(record) = by_vault.get_mut(vault) {
                record.claimable -= amount;
                if record.claimable == 0 {
                    by_vault.remove(vault);
                }
            }
            if by_vault.is_empty() {
                self.records.remove(user);
            }
        }
        if total == 0 {
            self.totals.remove(user);
        } else {
            self.totals.insert(user.clone(), total);
        }
        Ok(())
    }
}

/// One vault's part of a claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimLeg {
    pub vault: AccountId,
    pub amount: Amount,
    pub fee: Amount,
    pub locked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimQuote {
    pub amount: Amount,
    pub net: Amount,
    pub fee: Amount,
    pub legs: Vec<ClaimLeg>,
}

// =============================================================================
// LEDGER
// =============================================================================

#[derive(Clone)]
pub struct ClaimPorts {
    pub transfers: Arc<dyn AssetTransferPort>,
    pub gate: Arc<dyn CapabilityGate>,
    pub clock: Arc<dyn Clock>,
    pub revenue: Arc<dyn RevenueSink>,
    pub events: Arc<dyn EventSink>,
    pub journal: Arc<Journal>,
}

pub struct ProfitClaimLedger {
    account: AccountId,
    routing: ClaimRouting,
    ports: ClaimPorts,
    state: GuardedState<ClaimState>,
}

impl ProfitClaimLedger {
    pub fn new(
        account: AccountId,
        settings: ClaimSettings,
        routing: ClaimRouting,
        ports: ClaimPorts,
    ) -> LedgerResult<Self> {
        if !account.is_valid() {
            return Err(LedgerError::InvalidAccount(account.to_string()));
        }
        if let ClaimRouting::SingleVault(vault) = &routing {
            if !vault.is_valid() {
                return Err(LedgerError::InvalidAccount(vault.to_string()));
            }
        }
        validate_lockup(settings.lockup_secs)?;
        validate_early_fee(settings.early_withdrawal_fee_bp)?;

        let state = ClaimState {
            lockup_secs: settings.lockup_secs,
            early_withdrawal_fee_bp: settings.early_withdrawal_fee_bp,
            ..ClaimState::default()
        };
        Ok(Self {
            account,
            routing,
            state: GuardedState::new("profit claim ledger", state, ports.journal.clone()),
            ports,
        })
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    pub fn routing(&self) -> &ClaimRouting {
        &self.routing
    }

    // -------------------------------------------------------------------------
    // Vault entry points
    // -------------------------------------------------------------------------

    /// Credit `amount` of `caller`'s profit to `user`.
    pub fn distribute_profits(&self, caller: &AccountId, user: &AccountId, amount: Amount) -> LedgerResult<()> {
        self.distribute_profits_batch(caller, &[(user.clone(), amount)])
    }

    /// Credit several users in one transaction. Zero entries are skipped.
    pub fn distribute_profits_batch(
        &self,
        caller: &AccountId,
        credits: &[(AccountId, Amount)],
    ) -> LedgerResult<()> {
        self.authorize_source(caller)?;
        if credits.iter().all(|(_, amount)| *amount == 0) {
            return Err(LedgerError::ZeroAmount);
        }
        let mut tx = self.state.enter()?;
        let now = self.ports.clock.now();
        let mut total: Amount = 0;
        for (user, amount) in credits.iter().filter(|(_, amount)| *amount > 0) {
            if !user.is_valid() {
                return Err(LedgerError::InvalidAccount(user.to_string()));
            }
            tx.credit(caller, user, *amount, now)?;
            total = checked_add(total, *amount)?;
            tx.emit(LedgerEvent::ProfitDistributed {
                vault: caller.clone(),
                user: user.clone(),
                amount: *amount,
            });
        }
        self.commit(tx);
        info!(vault = %caller, users = credits.len(), total, "profits distributed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // User entry points
    // -------------------------------------------------------------------------

    /// Pay out `amount` of the caller's claimable profit, minus any
    /// early-withdrawal fee.
    pub fn claim(&self, caller: &AccountId, amount: Amount) -> LedgerResult<ClaimQuote> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let mut tx = self.state.enter()?;
        let now = self.ports.clock.now();
        let quote = self.plan_claim(&tx, caller, amount, now)?;

        for leg in &quote.legs {
            tx.debit(&leg.vault, caller, leg.amount)?;
        }
        tx.total_claimed = checked_add(tx.total_claimed, quote.net)?;
        tx.total_fees = checked_add(tx.total_fees, quote.fee)?;
        tx.emit(LedgerEvent::ProfitClaimed {
            user: caller.clone(),
            net: quote.net,
            fee: quote.fee,
        });
        tx.checkpoint();

        if quote.net > 0 {
            self.ports.transfers.push(&self.account, caller, quote.net)?;
        }
        if quote.fee > 0 {
            let revenue = self.ports.revenue.as_ref();
            self.ports
                .transfers
                .approve(&self.account, revenue.account(), quote.fee)?;
            revenue.receive_revenue(&self.account, quote.fee, "early_withdrawal_fee")?;
        }

        self.commit(tx);
        info!(
            user = %caller,
            amount,
            net = quote.net,
            fee = quote.fee,
            legs = quote.legs.len(),
            "profit claimed"
        );
        Ok(quote)
    }

    /// Set `amount` of the caller's credit from `vault` aside for that vault:
    /// the record is debited, the amount is held pending for the vault and the
    /// vault is granted an allowance to pull it. No value moves here; the
    /// vault's `deposit_reinvested` completes the move.
    pub fn reinvest(&self, caller: &AccountId, vault: &AccountId, amount: Amount) -> LedgerResult<()> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        if let ClaimRouting::SingleVault(bound) = &self.routing {
            if bound != vault {
                return Err(LedgerError::UnknownVault(vault.clone()));
            }
        }
        let mut tx = self.state.enter()?;
        tx.debit(vault, caller, amount)?;
        tx.set_aside(vault, caller, amount)?;
        tx.emit(LedgerEvent::ProfitReinvested {
            vault: vault.clone(),
            user: caller.clone(),
            amount,
        });
        tx.checkpoint();

        self.ports.transfers.approve(&self.account, vault, amount)?;

        self.commit(tx);
        info!(user = %caller, vault = %vault, amount, "profit reinvested");
        Ok(())
    }

    /// Top up payout custody from `caller`, who must have approved this
    /// ledger's account.
    pub fn fund(&self, caller: &AccountId, amount: Amount) -> LedgerResult<()> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let mut tx = self.state.enter()?;
        tx.total_funded = checked_add(tx.total_funded, amount)?;
        tx.emit(LedgerEvent::ClaimsFunded {
            funder: caller.clone(),
            amount,
        });
        tx.checkpoint();

        self.ports.transfers.pull(caller, &self.account, amount)?;

        self.commit(tx);
        info!(funder = %caller, amount, "claims funded");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Admin
    // -------------------------------------------------------------------------

    pub fn set_lockup_period(&self, caller: &AccountId, seconds: i64) -> LedgerResult<()> {
        require_capability(self.ports.gate.as_ref(), caller, Capability::Admin)?;
        validate_lockup(seconds)?;
        let mut tx = self.state.enter()?;
        tx.lockup_secs = seconds;
        tx.emit(LedgerEvent::LockupPeriodUpdated { seconds });
        self.commit(tx);
        info!(by = %caller, seconds, "lockup period updated");
        Ok(())
    }

    pub fn set_early_withdrawal_fee(&self, caller: &AccountId, bp: u32) -> LedgerResult<()> {
        require_capability(self.ports.gate.as_ref(), caller, Capability::Admin)?;
        validate_early_fee(bp)?;
        let mut tx = self.state.enter()?;
        tx.early_withdrawal_fee_bp = bp;
        tx.emit(LedgerEvent::EarlyWithdrawalFeeUpdated { bp });
        self.commit(tx);
        info!(by = %caller, bp, "early withdrawal fee updated");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Views
    // -------------------------------------------------------------------------

    pub fn snapshot(&self) -> Arc<ClaimState> {
        self.state.view()
    }

    /// Quote what `claim(user, amount)` would pay right now.
    pub fn preview_claim(&self, user: &AccountId, amount: Amount) -> LedgerResult<ClaimQuote> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let state = self.state.view();
        self.plan_claim(&state, user, amount, self.ports.clock.now())
    }

    pub fn claimable(&self, user: &AccountId) -> Amount {
        self.state.view().claimable(user)
    }

    pub fn claimable_from(&self, vault: &AccountId, user: &AccountId) -> Amount {
        self.state
            .view()
            .record(vault, user)
            .map(|r| r.claimable)
            .unwrap_or(0)
    }

    pub fn last_profit_at(&self, vault: &AccountId, user: &AccountId) -> Option<i64> {
        self.state.view().record(vault, user).map(|r| r.last_profit_at)
    }

    /// Credit set aside by `reinvest` that `vault` has not pulled yet.
    pub fn pending_reinvestment(&self, vault: &AccountId, user: &AccountId) -> Amount {
        self.state.view().pending_reinvestment(vault, user)
    }

    pub fn is_locked(&self, vault: &AccountId, user: &AccountId) -> bool {
        self.state
            .view()
            .is_locked(vault, user, self.ports.clock.now())
    }

    pub fn lockup_period(&self) -> i64 {
        self.state.view().lockup_secs
    }

    pub fn early_withdrawal_fee_bp(&self) -> u32 {
        self.state.view().early_withdrawal_fee_bp
    }

    /// Asset balance held for payouts.
    pub fn custody_balance(&self) -> Amount {
        self.ports.transfers.balance_of(&self.account)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn authorize_source(&self, vault: &AccountId) -> LedgerResult<()> {
        require_capability(self.ports.gate.as_ref(), vault, Capability::Vault)?;
        match &self.routing {
            ClaimRouting::SingleVault(bound) if bound != vault => {
                Err(LedgerError::UnknownVault(vault.clone()))
            }
            _ => Ok(()),
        }
    }

    /// Vaults to drain for `user`, in claim order.
    fn drain_order(&self, held: &BTreeMap<AccountId, VaultClaim>) -> Vec<AccountId> {
        let mut order = Vec::with_capacity(held.len());
        if let ClaimRouting::Registry(registry) = &self.routing {
            for vault in registry.list_active_vaults() {
                if held.contains_key(&vault) && !order.contains(&vault) {
                    order.push(vault);
                }
            }
        }
        for vault in held.keys() {
            if !order.contains(vault) {
                order.push(vault.clone());
            }
        }
        order
    }

    fn plan_claim(
        &self,
        state: &ClaimState,
        user: &AccountId,
        amount: Amount,
        now: i64,
    ) -> LedgerResult<ClaimQuote> {
        let available = state.claimable(user);
        if available == 0 {
            return Err(LedgerError::NothingToClaim);
        }
        if amount > available {
            return Err(LedgerError::InsufficientClaimable {
                requested: amount,
                available,
            });
        }

        let empty = BTreeMap::new();
        let held = state.records.get(user).unwrap_or(&empty);
        let mut remaining = amount;
        let mut fee: Amount = 0;
        let mut legs = Vec::new();
        for vault in self.drain_order(held) {
            if remaining == 0 {
                break;
            }
            let Some(record) = held.get(&vault) else {
                continue;
            };
            if record.claimable == 0 {
                continue;
            }
            let take = remaining.min(record.claimable);
            let locked = now < record.last_profit_at.saturating_add(state.lockup_secs);
            let leg_fee = if locked {
                bp_of(take, state.early_withdrawal_fee_bp)?
            } else {
                0
            };
            fee = checked_add(fee, leg_fee)?;
            remaining -= take;
            legs.push(ClaimLeg {
                vault,
                amount: take,
                fee: leg_fee,
                locked,
            });
        }
        if remaining > 0 {
            return Err(LedgerError::InsufficientClaimable {
                requested: amount,
                available: amount - remaining,
            });
        }

        Ok(ClaimQuote {
            amount,
            net: amount - fee,
            fee,
            legs,
        })
    }

    fn commit(&self, tx: Txn<'_, ClaimState>) {
        tx.commit(&self.ports.events, &self.account);
    }
}

impl ProfitSink for ProfitClaimLedger {
    fn account(&self) -> &AccountId {
        &self.account
    }

    fn ensure_source(&self, vault: &AccountId) -> LedgerResult<()> {
        self.authorize_source(vault)
    }

    fn take_reinvestment(&self, vault: &AccountId, user: &AccountId, amount: Amount) -> LedgerResult<()> {
        self.authorize_source(vault)?;
        let mut tx = self.state.enter()?;
        tx.take_set_aside(vault, user, amount)?;
        self.commit(tx);
        Ok(())
    }

    fn distribute_profits_batch(
        &self,
        vault: &AccountId,
        credits: &[(AccountId, Amount)],
    ) -> LedgerResult<()> {
        ProfitClaimLedger::distribute_profits_batch(self, vault, credits)
    }
}

fn validate_lockup(seconds: i64) -> LedgerResult<()> {
    if seconds < 0 {
        return Err(LedgerError::InvalidLockupPeriod(seconds));
    }
    Ok(())
}

fn validate_early_fee(bp: u32) -> LedgerResult<()> {
    if bp > MAX_EARLY_WITHDRAWAL_FEE_BP {
        return Err(LedgerError::FeeTooHigh {
            bp,
            max_bp: MAX_EARLY_WITHDRAWAL_FEE_BP,
        });
    }
    Ok(())
}
