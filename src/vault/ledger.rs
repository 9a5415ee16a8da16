//! Pooled Vault Share Ledger
//!
//! Depositors hold shares of one pooled balance that a trusted operator
//! trades. The ledger owns:
//!
//! - `total_shares` / `total_assets` and the per-user share map
//!   (sum of user shares == `total_shares` after every call)
//! - the operator's [`Strategy`] limits
//! - [`VaultMetrics`], including the high-water mark the drawdown guard reads
//! - one observational [`UserPosition`] per depositor
//!
//! # Share math
//!
//! ```text
//! mint   = amount                                  if total_shares == 0
//!        = floor(amount * total_shares / total_assets)
//! redeem = floor(shares * total_assets / total_shares)
//! ```
//!
//! Both round toward the pool, so existing holders are never diluted.
//!
//! # Trade settlement
//!
//! `execute_trade` reads the vault balance around one opaque venue call.
//! Positive delta is realized profit: [`PERFORMANCE_FEE_BP`] of it goes to the
//! revenue sink, the remainder is credited to current shareholders in the
//! profit sink pro-rata by shares, `total_assets` is reconciled to the
//! balance left after the fee and the high-water mark is raised to the
//! post-trade balance.
//!
//! Every mutating call runs inside one [`GuardedState`] transaction: books
//! are updated and published before any outbound call. If anything after
//! that fails, the books, the transfers, the venue's balance effect and any
//! nested revenue or profit-claim call are all put back.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::VaultSettings;
use crate::error::{LedgerError, LedgerResult};
use crate::events::{EventSink, LedgerEvent};
use crate::guard::{GuardedState, Journal, Txn};
use crate::math::{
    bp_of, checked_add, checked_sub, mul_div, Amount, BPS_DENOMINATOR, SECONDS_PER_YEAR,
};
use crate::ports::{
    require_capability, AccountId, AssetTransferPort, Capability, CapabilityGate, Clock,
    ProfitSink, RevenueSink, TradeVenue,
};

use super::position::UserPosition;
use super::strategy::Strategy;

/// Share of realized trade profit routed to the revenue sink.
pub const PERFORMANCE_FEE_BP: u32 = 2_000;

/// Cap on the emergency exit fee.
pub const MAX_EMERGENCY_FEE_BP: u32 = 1_000;

// =============================================================================
// STATE
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultMetrics {
    pub tvl: Amount,
    /// Annualised return of the last profitable trade.
    pub apy_bp: u64,
    pub user_count: u64,
    pub total_profits: Amount,
    pub total_fees: Amount,
    /// Peak balance. Moved with deposits and withdrawals so flows never
    /// register as drawdown; raised to the post-trade balance by profit.
    pub high_water_mark: Amount,
    /// 0 until the first trade.
    pub last_rebalance_time: i64,
    pub max_drawdown_seen_bp: u32,
    pub emergency: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultState {
    pub total_shares: Amount,
    pub total_assets: Amount,
    pub shares: BTreeMap<AccountId, Amount>,
    pub positions: BTreeMap<AccountId, UserPosition>,
    pub strategy: Strategy,
    pub metrics: VaultMetrics,
    pub paused: bool,
}

impl VaultState {
    pub fn shares_of(&self, user: &AccountId) -> Amount {
        self.shares.get(user).copied().unwrap_or(0)
    }

    /// Asset value of `shares` at the current ratio; 0 on an empty vault.
    pub fn asset_value_of(&self, shares: Amount) -> LedgerResult<Amount> {
        if self.total_shares == 0 {
            return Ok(0);
        }
        mul_div(shares, self.total_assets, self.total_shares)
    }

    fn burn_shares(&mut self, user: &AccountId, amount: Amount) -> LedgerResult<Amount> {
        let held = self.shares_of(user);
        let remaining = checked_sub(held, amount)?;
        self.total_shares = checked_sub(self.total_shares, amount)?;
        if remaining == 0 {
            self.shares.remove(user);
        } else {
            self.shares.insert(user.clone(), remaining);
        }
        Ok(remaining)
    }

    /// Position bookkeeping after a burn; deactivates the holder at zero.
    fn settle_position(
        &mut self,
        user: &AccountId,
        paid: Amount,
        remaining: Amount,
        now: i64,
    ) -> LedgerResult<()> {
        let remaining_value = self.asset_value_of(remaining)?;
        let mut deactivated = false;
        if let Some(position) = self.positions.get_mut(user) {
            position.record_withdrawal(paid, now);
            if remaining == 0 {
                deactivated = position.active;
                position.active = false;
            } else {
                position.refresh_high_water_mark(remaining_value);
            }
        }
        if deactivated {
            self.metrics.user_count = self.metrics.user_count.saturating_sub(1);
        }
        Ok(())
    }

    /// Mint shares for `amount` at the current ratio and record the
    /// position. Returns the shares minted.
    fn credit_deposit(&mut self, user: &AccountId, amount: Amount, now: i64) -> LedgerResult<Amount> {
        let minted = if self.total_shares == 0 {
            amount
        } else {
            mul_div(amount, self.total_shares, self.total_assets)?
        };
        if minted == 0 {
            return Err(LedgerError::ZeroShares);
        }

        let user_shares = checked_add(self.shares_of(user), minted)?;
        self.total_shares = checked_add(self.total_shares, minted)?;
        self.total_assets = checked_add(self.total_assets, amount)?;
        self.shares.insert(user.clone(), user_shares);
        self.metrics.high_water_mark = checked_add(self.metrics.high_water_mark, amount)?;
        self.metrics.tvl = self.total_assets;

        let value = self.asset_value_of(user_shares)?;
        let position = self.positions.entry(user.clone()).or_default();
        let newly_active = !position.active;
        position.record_deposit(amount, now);
        position.refresh_high_water_mark(value);
        if newly_active {
            self.metrics.user_count += 1;
        }
        Ok(minted)
    }

    fn remove_assets(&mut self, assets: Amount) -> LedgerResult<()> {
        self.total_assets = checked_sub(self.total_assets, assets)?;
        self.metrics.high_water_mark = self.metrics.high_water_mark.saturating_sub(assets);
        self.metrics.tvl = self.total_assets;
        Ok(())
    }
}

// =============================================================================
// RECEIPTS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepositReceipt {
    pub shares_minted: Amount,
    pub total_shares: Amount,
    pub total_assets: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WithdrawReceipt {
    pub assets: Amount,
    pub shares_burned: Amount,
    pub shares_remaining: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmergencyWithdrawReceipt {
    pub net: Amount,
    pub fee: Amount,
    pub shares_burned: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradeReceipt {
    pub pre_balance: Amount,
    pub post_balance: Amount,
    pub profit: Amount,
    pub fee: Amount,
    /// Sum credited to shareholders in the profit sink.
    pub distributed: Amount,
    /// Drawdown below the high-water mark at settlement, 0 if none.
    pub drawdown_bp: u32,
}

// =============================================================================
// LEDGER
// =============================================================================

/// Collaborators a vault talks to.
#[derive(Clone)]
pub struct VaultPorts {
    pub transfers: Arc<dyn AssetTransferPort>,
    pub gate: Arc<dyn CapabilityGate>,
    pub clock: Arc<dyn Clock>,
    pub venue: Arc<dyn TradeVenue>,
    pub revenue: Arc<dyn RevenueSink>,
    pub profits: Arc<dyn ProfitSink>,
    pub events: Arc<dyn EventSink>,
    pub journal: Arc<Journal>,
}

pub struct VaultLedger {
    account: AccountId,
    emergency_fee_bp: u32,
    ports: VaultPorts,
    state: GuardedState<VaultState>,
}

impl VaultLedger {
    pub fn new(account: AccountId, settings: VaultSettings, ports: VaultPorts) -> LedgerResult<Self> {
        if !account.is_valid() {
            return Err(LedgerError::InvalidAccount(account.to_string()));
        }
        if settings.emergency_fee_bp > MAX_EMERGENCY_FEE_BP {
            return Err(LedgerError::FeeTooHigh {
                bp: settings.emergency_fee_bp,
                max_bp: MAX_EMERGENCY_FEE_BP,
            });
        }
        settings.strategy.validate()?;

        let state = VaultState {
            strategy: settings.strategy,
            ..VaultState::default()
        };
        Ok(Self {
            account,
            emergency_fee_bp: settings.emergency_fee_bp,
            state: GuardedState::new("vault", state, ports.journal.clone()),
            ports,
        })
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    pub fn emergency_fee_bp(&self) -> u32 {
        self.emergency_fee_bp
    }

    // -------------------------------------------------------------------------
    // Depositor entry points
    // -------------------------------------------------------------------------

    /// Mint shares for `amount` and pull it from `caller`.
    ///
    /// The caller must have approved the vault account for `amount` first.
    pub fn deposit(&self, caller: &AccountId, amount: Amount) -> LedgerResult<DepositReceipt> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let mut tx = self.state.enter()?;
        if tx.paused {
            return Err(LedgerError::Paused);
        }

        let now = self.ports.clock.now();
        let minted = tx.credit_deposit(caller, amount, now)?;
        tx.emit(LedgerEvent::Deposit {
            user: caller.clone(),
            assets: amount,
            shares: minted,
        });
        tx.checkpoint();

        self.ports.transfers.pull(caller, &self.account, amount)?;

        let receipt = deposit_receipt(&tx, minted);
        self.commit(tx);
        info!(vault = %self.account, user = %caller, amount, shares = minted, "deposit");
        Ok(receipt)
    }

    /// Mint shares for `amount` of profit the caller set aside for this vault
    /// in the profit sink. The vault consumes the set-aside amount and pulls
    /// it from the profit sink's account.
    pub fn deposit_reinvested(&self, caller: &AccountId, amount: Amount) -> LedgerResult<DepositReceipt> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let mut tx = self.state.enter()?;
        if tx.paused {
            return Err(LedgerError::Paused);
        }

        let now = self.ports.clock.now();
        let minted = tx.credit_deposit(caller, amount, now)?;
        tx.emit(LedgerEvent::Deposit {
            user: caller.clone(),
            assets: amount,
            shares: minted,
        });
        tx.checkpoint();

        let profits = self.ports.profits.as_ref();
        profits.take_reinvestment(&self.account, caller, amount)?;
        self.ports
            .transfers
            .pull(profits.account(), &self.account, amount)?;

        let receipt = deposit_receipt(&tx, minted);
        self.commit(tx);
        info!(vault = %self.account, user = %caller, amount, shares = minted, "profit reinvested");
        Ok(receipt)
    }

    /// Burn `share_amount` of the caller's shares and pay out their value.
    pub fn withdraw(&self, caller: &AccountId, share_amount: Amount) -> LedgerResult<WithdrawReceipt> {
        if share_amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let mut tx = self.state.enter()?;
        if tx.paused {
            return Err(LedgerError::Paused);
        }
        let held = tx.shares_of(caller);
        if share_amount > held {
            return Err(LedgerError::InsufficientShares {
                requested: share_amount,
                available: held,
            });
        }

        let now = self.ports.clock.now();
        let assets = tx.asset_value_of(share_amount)?;
        let remaining = tx.burn_shares(caller, share_amount)?;
        tx.remove_assets(assets)?;
        tx.settle_position(caller, assets, remaining, now)?;

        tx.emit(LedgerEvent::Withdraw {
            user: caller.clone(),
            assets,
            shares: share_amount,
        });
        tx.checkpoint();

        if assets > 0 {
            self.ports.transfers.push(&self.account, caller, assets)?;
        }

        self.commit(tx);
        info!(vault = %self.account, user = %caller, assets, shares = share_amount, "withdraw");
        Ok(WithdrawReceipt {
            assets,
            shares_burned: share_amount,
            shares_remaining: remaining,
        })
    }

    /// Exit everything at once while the vault is paused in emergency mode.
    /// The emergency fee goes to the revenue sink.
    pub fn emergency_withdraw(&self, caller: &AccountId) -> LedgerResult<EmergencyWithdrawReceipt> {
        let mut tx = self.state.enter()?;
        if !tx.paused {
            return Err(LedgerError::NotPaused);
        }
        if !tx.metrics.emergency {
            return Err(LedgerError::EmergencyNotActive);
        }
        let held = tx.shares_of(caller);
        if held == 0 {
            return Err(LedgerError::NothingToWithdraw);
        }

        let now = self.ports.clock.now();
        let value = tx.asset_value_of(held)?;
        let fee = bp_of(value, self.emergency_fee_bp)?;
        let net = value - fee;

        tx.burn_shares(caller, held)?;
        tx.remove_assets(value)?;
        tx.settle_position(caller, net, 0, now)?;
        tx.metrics.total_fees = checked_add(tx.metrics.total_fees, fee)?;

        tx.emit(LedgerEvent::EmergencyWithdrawal {
            user: caller.clone(),
            net,
            fee,
        });
        tx.checkpoint();

        if net > 0 {
            self.ports.transfers.push(&self.account, caller, net)?;
        }
        if fee > 0 {
            self.pay_fee(fee, "emergency_withdrawal_fee")?;
        }

        self.commit(tx);
        info!(vault = %self.account, user = %caller, net, fee, "emergency withdrawal");
        Ok(EmergencyWithdrawReceipt {
            net,
            fee,
            shares_burned: held,
        })
    }

    // -------------------------------------------------------------------------
    // Operator
    // -------------------------------------------------------------------------

    /// Run one opaque call at `target` and settle the balance delta.
    pub fn execute_trade(
        &self,
        caller: &AccountId,
        target: &AccountId,
        payload: &[u8],
    ) -> LedgerResult<TradeReceipt> {
        require_capability(self.ports.gate.as_ref(), caller, Capability::Operator)?;
        let mut tx = self.state.enter()?;
        if tx.paused {
            return Err(LedgerError::Paused);
        }
        if !tx.strategy.active {
            return Err(LedgerError::StrategyInactive);
        }
        if !tx.strategy.allowed_targets.contains(target) {
            return Err(LedgerError::TargetNotAllowed(target.clone()));
        }

        let now = self.ports.clock.now();
        let last_rebalance = tx.metrics.last_rebalance_time;
        if last_rebalance > 0 {
            let next_allowed_at = last_rebalance.saturating_add(tx.strategy.rebalance_interval_secs);
            if now < next_allowed_at {
                return Err(LedgerError::RebalanceTooSoon { next_allowed_at });
            }
        }

        let pre = self.ports.transfers.balance_of(&self.account);
        self.ports
            .venue
            .execute(&self.account, target, payload)
            .map_err(LedgerError::TradeCallFailed)?;
        let post = self.ports.transfers.balance_of(&self.account);
        if post < pre {
            return Err(LedgerError::TradeLoss {
                pre_balance: pre,
                post_balance: post,
            });
        }

        let hwm = tx.metrics.high_water_mark;
        let mut drawdown_bp = 0;
        if post < hwm {
            drawdown_bp = u32::try_from(mul_div(hwm - post, Amount::from(BPS_DENOMINATOR), hwm)?)
                .unwrap_or(u32::MAX);
            if drawdown_bp > tx.strategy.max_drawdown_bp {
                return Err(LedgerError::DrawdownExceeded {
                    drawdown_bp,
                    max_bp: tx.strategy.max_drawdown_bp,
                });
            }
            tx.metrics.max_drawdown_seen_bp = tx.metrics.max_drawdown_seen_bp.max(drawdown_bp);
        }

        let profit = post - pre;
        let fee = bp_of(profit, PERFORMANCE_FEE_BP)?;
        let credits = split_pro_rata(&tx.shares, tx.total_shares, profit - fee)?;
        let distributed: Amount = credits.iter().map(|(_, amount)| *amount).sum();

        if profit > 0 {
            tx.metrics.total_profits = checked_add(tx.metrics.total_profits, profit)?;
            tx.metrics.total_fees = checked_add(tx.metrics.total_fees, fee)?;
            if last_rebalance > 0 && now > last_rebalance {
                tx.metrics.apy_bp = annualized_return_bp(profit, pre, now - last_rebalance);
            }
        }
        tx.total_assets = post - fee;
        tx.metrics.tvl = tx.total_assets;
        tx.metrics.high_water_mark = hwm.max(post);
        tx.metrics.last_rebalance_time = now;

        tx.emit(LedgerEvent::TradeExecuted {
            target: target.clone(),
            payload: hex::encode(payload),
        });
        if profit > 0 {
            tx.emit(LedgerEvent::ProfitRealized { profit, fee });
        }
        tx.checkpoint();

        if profit > 0 {
            self.ports.profits.ensure_source(&self.account)?;
            if fee > 0 {
                self.pay_fee(fee, "performance_fee")?;
            }
            if !credits.is_empty() {
                self.ports
                    .profits
                    .distribute_profits_batch(&self.account, &credits)?;
            }
        }

        self.commit(tx);
        info!(
            vault = %self.account,
            target = %target,
            pre,
            post,
            profit,
            fee,
            distributed,
            "trade settled"
        );
        Ok(TradeReceipt {
            pre_balance: pre,
            post_balance: post,
            profit,
            fee,
            distributed,
            drawdown_bp,
        })
    }

    // -------------------------------------------------------------------------
    // Admin / emergency
    // -------------------------------------------------------------------------

    pub fn update_strategy(&self, caller: &AccountId, strategy: Strategy) -> LedgerResult<()> {
        require_capability(self.ports.gate.as_ref(), caller, Capability::Admin)?;
        strategy.validate()?;
        let mut tx = self.state.enter()?;
        tx.emit(LedgerEvent::StrategyUpdated {
            max_drawdown_bp: strategy.max_drawdown_bp,
            target_return_bp: strategy.target_return_bp,
            rebalance_interval_secs: strategy.rebalance_interval_secs,
            allowed_targets: strategy.allowed_targets.iter().cloned().collect(),
            active: strategy.active,
        });
        tx.strategy = strategy;
        self.commit(tx);
        info!(vault = %self.account, by = %caller, "strategy updated");
        Ok(())
    }

    pub fn pause(&self, caller: &AccountId) -> LedgerResult<()> {
        require_capability(self.ports.gate.as_ref(), caller, Capability::Admin)?;
        let mut tx = self.state.enter()?;
        if tx.paused {
            return Err(LedgerError::Paused);
        }
        tx.paused = true;
        tx.emit(LedgerEvent::VaultPaused { by: caller.clone() });
        self.commit(tx);
        info!(vault = %self.account, by = %caller, "paused");
        Ok(())
    }

    /// Refused while emergency mode is active; resolve the emergency instead.
    pub fn unpause(&self, caller: &AccountId) -> LedgerResult<()> {
        require_capability(self.ports.gate.as_ref(), caller, Capability::Admin)?;
        let mut tx = self.state.enter()?;
        if !tx.paused {
            return Err(LedgerError::NotPaused);
        }
        if tx.metrics.emergency {
            return Err(LedgerError::EmergencyActive);
        }
        tx.paused = false;
        tx.emit(LedgerEvent::VaultUnpaused { by: caller.clone() });
        self.commit(tx);
        info!(vault = %self.account, by = %caller, "unpaused");
        Ok(())
    }

    /// Pause and raise the emergency flag together.
    pub fn trigger_emergency(&self, caller: &AccountId) -> LedgerResult<()> {
        require_capability(self.ports.gate.as_ref(), caller, Capability::Emergency)?;
        let mut tx = self.state.enter()?;
        if tx.metrics.emergency {
            return Err(LedgerError::EmergencyActive);
        }
        tx.paused = true;
        tx.metrics.emergency = true;
        tx.emit(LedgerEvent::EmergencyTriggered { by: caller.clone() });
        self.commit(tx);
        info!(vault = %self.account, by = %caller, "emergency triggered");
        Ok(())
    }

    /// Clear the emergency flag and unpause together.
    pub fn resolve_emergency(&self, caller: &AccountId) -> LedgerResult<()> {
        require_capability(self.ports.gate.as_ref(), caller, Capability::Emergency)?;
        let mut tx = self.state.enter()?;
        if !tx.metrics.emergency {
            return Err(LedgerError::EmergencyNotActive);
        }
        tx.metrics.emergency = false;
        tx.paused = false;
        tx.emit(LedgerEvent::EmergencyResolved { by: caller.clone() });
        self.commit(tx);
        info!(vault = %self.account, by = %caller, "emergency resolved");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Views
    // -------------------------------------------------------------------------

    pub fn snapshot(&self) -> Arc<VaultState> {
        self.state.view()
    }

    pub fn shares_of(&self, user: &AccountId) -> Amount {
        self.state.view().shares_of(user)
    }

    pub fn total_shares(&self) -> Amount {
        self.state.view().total_shares
    }

    pub fn total_assets(&self) -> Amount {
        self.state.view().total_assets
    }

    pub fn asset_value_of_shares(&self, shares: Amount) -> LedgerResult<Amount> {
        self.state.view().asset_value_of(shares)
    }

    pub fn is_protocol_allowed(&self, target: &AccountId) -> bool {
        self.state.view().strategy.allows(target)
    }

    pub fn is_paused(&self) -> bool {
        self.state.view().paused
    }

    pub fn position(&self, user: &AccountId) -> Option<UserPosition> {
        self.state.view().positions.get(user).cloned()
    }

    pub fn metrics(&self) -> VaultMetrics {
        self.state.view().metrics.clone()
    }

    pub fn strategy(&self) -> Strategy {
        self.state.view().strategy.clone()
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn pay_fee(&self, fee: Amount, source: &str) -> LedgerResult<()> {
        let revenue = self.ports.revenue.as_ref();
        self.ports
            .transfers
            .approve(&self.account, revenue.account(), fee)?;
        revenue.receive_revenue(&self.account, fee, source)
    }

    fn commit(&self, tx: Txn<'_, VaultState>) {
        tx.commit(&self.ports.events, &self.account);
    }
}

fn deposit_receipt(state: &VaultState, minted: Amount) -> DepositReceipt {
    DepositReceipt {
        shares_minted: minted,
        total_shares: state.total_shares,
        total_assets: state.total_assets,
    }
}

/// Split `amount` across holders by shares. Each holder gets the floor of
/// their exact share; leftover units go one each to the largest fractional
/// remainders (ties broken by account order), so the credits sum to `amount`.
pub fn split_pro_rata(
    shares: &BTreeMap<AccountId, Amount>,
    total_shares: Amount,
    amount: Amount,
) -> LedgerResult<Vec<(AccountId, Amount)>> {
    if amount == 0 || total_shares == 0 {
        return Ok(Vec::new());
    }

    let mut parts = Vec::with_capacity(shares.len());
    let mut assigned: Amount = 0;
    for (user, held) in shares {
        let exact = amount.checked_mul(*held).ok_or(LedgerError::AmountOverflow)?;
        let base = exact / total_shares;
        assigned = checked_add(assigned, base)?;
        parts.push((user.clone(), base, exact % total_shares));
    }

    let mut leftover = checked_sub(amount, assigned)?;
    if leftover > 0 {
        let mut order: Vec<usize> = (0..parts.len()).collect();
        // stable sort keeps account order among equal remainders
        order.sort_by(|a, b| parts[*b].2.cmp(&parts[*a].2));
        for idx in order {
            if leftover == 0 {
                break;
            }
            parts[idx].1 += 1;
            leftover -= 1;
        }
    }

    Ok(parts
        .into_iter()
        .filter(|(_, credit, _)| *credit > 0)
        .map(|(user, credit, _)| (user, credit))
        .collect())
}

/// `profit / base` annualised over `elapsed_secs`, in bp. Saturates.
fn annualized_return_bp(profit: Amount, base: Amount, elapsed_secs: i64) -> u64 {
    if base == 0 || elapsed_secs <= 0 {
        return 0;
    }
    let numerator = profit
        .checked_mul(Amount::from(BPS_DENOMINATOR))
        .and_then(|v| v.checked_mul(SECONDS_PER_YEAR as Amount));
    let denominator = base.checked_mul(elapsed_secs as Amount);
    match (numerator, denominator) {
        (Some(n), Some(d)) => u64::try_from(n / d).unwrap_or(u64::MAX),
        _ => u64::MAX,
    }
}
