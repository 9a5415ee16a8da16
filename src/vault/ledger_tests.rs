//! Vault ledger behaviour tests
//!
//! Share math, trade settlement, the rebalance and drawdown guards, the
//! emergency path, and all-or-nothing rollback.

use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use crate::config::ProtocolConfig;
use crate::deployment::Deployment;
use crate::error::{LedgerError, LedgerResult, TransferError};
use crate::events::{LedgerEvent, MemoryEventLog};
use crate::math::{Amount, SECONDS_PER_DAY};
use crate::ports::{
    AccountId, AssetTransferPort, Capability, InMemoryAssetBank, ProfitSink, RevenueSink,
    SimulatedTrade, TransferSavepoint,
};
use crate::vault::{Strategy, VaultLedger, VaultPorts};

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

const T0: i64 = 1_700_000_000;
const VAULT: &str = "vault-a";

fn id(s: &str) -> AccountId {
    AccountId::from(s)
}

fn trading_strategy() -> Strategy {
    Strategy {
        allowed_targets: [id("dex")].into_iter().collect(),
        active: true,
        ..Strategy::default()
    }
}

fn setup() -> (Deployment, Arc<MemoryEventLog>, Arc<VaultLedger>) {
    let mut config = ProtocolConfig::default();
    config.vault.strategy = trading_strategy();
    let (mut d, log) = Deployment::in_memory(config, T0).unwrap();
    let vault = d.add_vault(VAULT).unwrap();
    (d, log, vault)
}

fn fund_and_deposit(d: &Deployment, user: &str, amount: Amount) {
    d.bank.mint(&id(user), amount);
    d.deposit(VAULT, &id(user), amount).unwrap();
}

fn trade(d: &Deployment, vault: &VaultLedger) -> LedgerResult<crate::vault::TradeReceipt> {
    vault.execute_trade(&d.operator, &id("dex"), b"\x01\x02")
}

// =============================================================================
// DEPOSIT / WITHDRAW
// =============================================================================

#[test]
fn test_first_deposit_mints_one_to_one() {
    let (d, log, vault) = setup();
    d.bank.mint(&id("alice"), 1_000);
    let receipt = d.deposit(VAULT, &id("alice"), 1_000).unwrap();

    assert_eq!(receipt.shares_minted, 1_000);
    assert_eq!(vault.total_shares(), 1_000);
    assert_eq!(vault.total_assets(), 1_000);
    assert_eq!(d.bank.balance_of(vault.account()), 1_000);
    assert_eq!(vault.metrics().user_count, 1);
    assert_eq!(
        log.events(),
        vec![LedgerEvent::Deposit {
            user: id("alice"),
            assets: 1_000,
            shares: 1_000
        }]
    );
}

#[test]
fn test_second_deposit_at_parity() {
    let (d, _log, vault) = setup();
    fund_and_deposit(&d, "alice", 1_000);
    d.bank.mint(&id("bob"), 500);
    let receipt = d.deposit(VAULT, &id("bob"), 500).unwrap();

    assert_eq!(receipt.shares_minted, 500);
    assert_eq!(vault.shares_of(&id("bob")), 500);
    assert_eq!(vault.total_shares(), 1_500);
    assert_eq!(vault.metrics().user_count, 2);
}

#[test]
fn test_deposit_rejects_zero_and_dust() {
    let (d, _log, vault) = setup();
    assert!(matches!(
        vault.deposit(&id("alice"), 0),
        Err(LedgerError::ZeroAmount)
    ));

    fund_and_deposit(&d, "alice", 1_000);
    d.venue.queue(&id("dex"), SimulatedTrade::Gain(100));
    trade(&d, &vault).unwrap();
    // 1080 assets / 1000 shares: one unit buys 0 shares
    d.bank.mint(&id("bob"), 1);
    assert!(matches!(
        d.deposit(VAULT, &id("bob"), 1),
        Err(LedgerError::ZeroShares)
    ));
}

#[test]
fn test_deposit_without_allowance_changes_nothing() {
    let (d, log, vault) = setup();
    d.bank.mint(&id("alice"), 1_000);
    let before = vault.snapshot();

    let err = vault.deposit(&id("alice"), 1_000).unwrap_err();
    assert!(matches!(
        err,
        LedgerError::Transfer(TransferError::InsufficientAllowance { .. })
    ));
    assert_eq!(*vault.snapshot(), *before);
    assert!(vault.position(&id("alice")).is_none());
    assert!(log.is_empty());
}

#[test]
fn test_deposit_reinvested_consumes_set_aside_profit() {
    let (d, log, vault) = setup();
    fund_and_deposit(&d, "alice", 1_000);
    d.bank.mint(&d.admin, 100);
    d.fund_claims(&d.admin, 100).unwrap();
    d.claims
        .distribute_profits(vault.account(), &id("alice"), 100)
        .unwrap();
    d.claims
        .reinvest(&id("alice"), vault.account(), 60)
        .unwrap();
    let events_before = log.len();

    // more than was set aside
    assert_eq!(
        vault.deposit_reinvested(&id("alice"), 61).unwrap_err(),
        LedgerError::InsufficientReinvestment {
            requested: 61,
            available: 60
        }
    );
    assert_eq!(vault.shares_of(&id("alice")), 1_000);
    assert_eq!(d.bank.balance_of(d.claims.account()), 100);
    assert_eq!(log.len(), events_before);

    let receipt = vault.deposit_reinvested(&id("alice"), 60).unwrap();
    assert_eq!(receipt.shares_minted, 60);
    assert_eq!(receipt.total_assets, 1_060);
    assert_eq!(d.bank.balance_of(vault.account()), 1_060);
    assert_eq!(d.bank.balance_of(d.claims.account()), 40);
    assert_eq!(d.claims.claimable(&id("alice")), 40);
    assert_eq!(vault.position(&id("alice")).unwrap().total_deposited, 1_060);
    assert_eq!(vault.metrics().high_water_mark, 1_060);

    // nothing left set aside
    assert!(matches!(
        vault.deposit_reinvested(&id("alice"), 1),
        Err(LedgerError::InsufficientReinvestment { .. })
    ));
}

#[test]
fn test_withdraw_partial_then_full() {
    let (d, _log, vault) = setup();
    fund_and_deposit(&d, "alice", 1_000);
    fund_and_deposit(&d, "bob", 500);

    let receipt = vault.withdraw(&id("alice"), 400).unwrap();
    assert_eq!(receipt.assets, 400);
    assert_eq!(receipt.shares_remaining, 600);
    assert_eq!(d.bank.balance_of(&id("alice")), 400);
    assert_eq!(vault.metrics().user_count, 2);

    vault.withdraw(&id("alice"), 600).unwrap();
    let position = vault.position(&id("alice")).unwrap();
    assert!(!position.active);
    assert_eq!(position.total_withdrawn, 1_000);
    assert_eq!(position.realized_profit, 0);
    assert_eq!(vault.metrics().user_count, 1);
    assert_eq!(vault.total_shares(), 500);
    assert_eq!(vault.total_assets(), 500);
    assert_eq!(vault.metrics().high_water_mark, 500);
}

#[test]
fn test_withdraw_more_than_held() {
    let (d, _log, vault) = setup();
    fund_and_deposit(&d, "alice", 100);
    assert_eq!(
        vault.withdraw(&id("alice"), 101).unwrap_err(),
        LedgerError::InsufficientShares {
            requested: 101,
            available: 100
        }
    );
    assert!(matches!(
        vault.withdraw(&id("alice"), 0),
        Err(LedgerError::ZeroAmount)
    ));
}

#[test]
fn test_withdraw_after_profit_realizes_gain() {
    let (d, _log, vault) = setup();
    fund_and_deposit(&d, "alice", 1_000);
    d.venue.queue(&id("dex"), SimulatedTrade::Gain(100));
    trade(&d, &vault).unwrap();
    assert_eq!(vault.total_assets(), 1_080);

    let receipt = vault.withdraw(&id("alice"), 1_000).unwrap();
    assert_eq!(receipt.assets, 1_080);
    assert_eq!(vault.position(&id("alice")).unwrap().realized_profit, 80);
    assert_eq!(vault.total_shares(), 0);
    assert_eq!(vault.asset_value_of_shares(10).unwrap(), 0);
}

#[test]
fn test_share_sum_matches_total() {
    let (d, _log, vault) = setup();
    fund_and_deposit(&d, "alice", 1_000);
    fund_and_deposit(&d, "bob", 333);
    d.venue.queue(&id("dex"), SimulatedTrade::Gain(77));
    trade(&d, &vault).unwrap();
    fund_and_deposit(&d, "carol", 250);
    vault.withdraw(&id("bob"), 100).unwrap();

    let state = vault.snapshot();
    let sum: Amount = state.shares.values().sum();
    assert_eq!(sum, state.total_shares);
}

// =============================================================================
// PAUSE / EMERGENCY
// =============================================================================

#[test]
fn test_pause_blocks_flows() {
    let (d, _log, vault) = setup();
    fund_and_deposit(&d, "alice", 100);
    vault.pause(&d.admin).unwrap();
    assert!(vault.is_paused());

    assert!(matches!(
        vault.withdraw(&id("alice"), 10),
        Err(LedgerError::Paused)
    ));
    assert!(matches!(trade(&d, &vault), Err(LedgerError::Paused)));
    assert!(matches!(vault.pause(&d.admin), Err(LedgerError::Paused)));

    vault.unpause(&d.admin).unwrap();
    vault.withdraw(&id("alice"), 10).unwrap();
    assert!(matches!(vault.unpause(&d.admin), Err(LedgerError::NotPaused)));
}

#[test]
fn test_pause_is_admin_only() {
    let (d, _log, vault) = setup();
    assert!(matches!(
        vault.pause(&d.operator),
        Err(LedgerError::Unauthorized { .. })
    ));
    assert!(matches!(
        vault.trigger_emergency(&d.admin),
        Err(LedgerError::Unauthorized { .. })
    ));
}

#[test]
fn test_emergency_withdraw_flow() {
    let (d, log, vault) = setup();
    fund_and_deposit(&d, "alice", 1_000);
    fund_and_deposit(&d, "bob", 500);

    assert!(matches!(
        vault.emergency_withdraw(&id("alice")),
        Err(LedgerError::NotPaused)
    ));
    vault.trigger_emergency(&d.guardian).unwrap();
    assert!(vault.is_paused());
    assert!(matches!(
        vault.unpause(&d.admin),
        Err(LedgerError::EmergencyActive)
    ));

    let receipt = vault.emergency_withdraw(&id("alice")).unwrap();
    // 200 bp default emergency fee
    assert_eq!(receipt.fee, 20);
    assert_eq!(receipt.net, 980);
    assert_eq!(d.bank.balance_of(&id("alice")), 980);
    assert_eq!(d.distributor.total_revenue(), 20);
    assert_eq!(vault.shares_of(&id("alice")), 0);
    assert_eq!(vault.total_assets(), 500);
    assert_eq!(vault.metrics().user_count, 1);
    assert!(log.events().contains(&LedgerEvent::EmergencyWithdrawal {
        user: id("alice"),
        net: 980,
        fee: 20
    }));

    assert!(matches!(
        vault.emergency_withdraw(&id("alice")),
        Err(LedgerError::NothingToWithdraw)
    ));

    vault.resolve_emergency(&d.guardian).unwrap();
    assert!(!vault.is_paused());
    assert!(!vault.metrics().emergency);
}

#[test]
fn test_plain_pause_does_not_unlock_emergency_exit() {
    let (d, _log, vault) = setup();
    fund_and_deposit(&d, "alice", 100);
    vault.pause(&d.admin).unwrap();
    assert!(matches!(
        vault.emergency_withdraw(&id("alice")),
        Err(LedgerError::EmergencyNotActive)
    ));
    assert!(matches!(
        vault.resolve_emergency(&d.guardian),
        Err(LedgerError::EmergencyNotActive)
    ));
}

// =============================================================================
// TRADE SETTLEMENT
// =============================================================================

#[test]
fn test_trade_splits_profit() {
    let (d, log, vault) = setup();
    fund_and_deposit(&d, "alice", 1_000);
    fund_and_deposit(&d, "bob", 500);
    d.venue.queue(&id("dex"), SimulatedTrade::Gain(100));

    let receipt = trade(&d, &vault).unwrap();
    assert_eq!(receipt.profit, 100);
    assert_eq!(receipt.fee, 20);
    assert_eq!(receipt.distributed, 80);
    assert_eq!(vault.total_assets(), 1_580);
    assert_eq!(d.bank.balance_of(vault.account()), 1_580);
    assert_eq!(d.bank.balance_of(d.distributor.account()), 20);
    assert_eq!(d.claims.claimable(&id("alice")), 53);
    assert_eq!(d.claims.claimable(&id("bob")), 27);

    let metrics = vault.metrics();
    assert_eq!(metrics.total_profits, 100);
    assert_eq!(metrics.total_fees, 20);
    assert_eq!(metrics.high_water_mark, 1_600);
    assert_eq!(metrics.last_rebalance_time, T0);

    let events = log.events();
    assert!(events.contains(&LedgerEvent::TradeExecuted {
        target: id("dex"),
        payload: "0102".to_string()
    }));
    assert!(events.contains(&LedgerEvent::ProfitRealized { profit: 100, fee: 20 }));
    assert!(events.contains(&LedgerEvent::RevenueReceived {
        amount: 20,
        source: "performance_fee".to_string()
    }));
}

#[test]
fn test_trade_records_precede_fee_and_credit_records() {
    let (d, log, vault) = setup();
    fund_and_deposit(&d, "alice", 1_000);
    fund_and_deposit(&d, "bob", 500);
    let skip = log.len();
    d.venue.queue(&id("dex"), SimulatedTrade::Gain(100));
    trade(&d, &vault).unwrap();

    let settled: Vec<(String, &str)> = log.records()[skip..]
        .iter()
        .map(|r| (r.source.to_string(), r.event.kind()))
        .collect();
    assert_eq!(
        settled,
        vec![
            (VAULT.to_string(), "TradeExecuted"),
            (VAULT.to_string(), "ProfitRealized"),
            ("revenue-distributor".to_string(), "RevenueReceived"),
            ("profit-claims".to_string(), "ProfitDistributed"),
            ("profit-claims".to_string(), "ProfitDistributed"),
        ]
    );
    let seqs: Vec<u64> = log.records().iter().map(|r| r.seq).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_flat_trade_moves_only_the_clock() {
    let (d, log, vault) = setup();
    fund_and_deposit(&d, "alice", 1_000);
    let receipt = trade(&d, &vault).unwrap();
    assert_eq!(receipt.profit, 0);
    assert_eq!(vault.total_assets(), 1_000);
    assert_eq!(d.distributor.total_revenue(), 0);
    assert_eq!(log.events().last().map(|e| e.kind()), Some("TradeExecuted"));
}

#[test]
fn test_rebalance_interval_gate() {
    let (d, _log, vault) = setup();
    fund_and_deposit(&d, "alice", 1_000);
    trade(&d, &vault).unwrap();

    let err = trade(&d, &vault).unwrap_err();
    assert_eq!(
        err,
        LedgerError::RebalanceTooSoon {
            next_allowed_at: T0 + SECONDS_PER_DAY
        }
    );
    assert!(err.is_transient());

    d.clock.advance(SECONDS_PER_DAY - 1);
    assert!(trade(&d, &vault).is_err());
    d.clock.advance(1);
    trade(&d, &vault).unwrap();
}

#[test]
fn test_apy_uses_elapsed_time_before_refresh() {
    let (d, _log, vault) = setup();
    fund_and_deposit(&d, "alice", 1_000);
    trade(&d, &vault).unwrap();

    d.clock.advance(SECONDS_PER_DAY);
    d.venue.queue(&id("dex"), SimulatedTrade::Gain(10));
    trade(&d, &vault).unwrap();
    // 1% in one day
    assert_eq!(vault.metrics().apy_bp, 36_500);
}

#[test]
fn test_trade_guards() {
    let (d, _log, vault) = setup();
    fund_and_deposit(&d, "alice", 1_000);

    assert!(matches!(
        vault.execute_trade(&d.admin, &id("dex"), b""),
        Err(LedgerError::Unauthorized { .. })
    ));
    assert_eq!(
        vault
            .execute_trade(&d.operator, &id("elsewhere"), b"")
            .unwrap_err(),
        LedgerError::TargetNotAllowed(id("elsewhere"))
    );

    let mut inactive = trading_strategy();
    inactive.active = false;
    vault.update_strategy(&d.admin, inactive).unwrap();
    assert!(!vault.is_protocol_allowed(&id("dex")));
    assert!(matches!(trade(&d, &vault), Err(LedgerError::StrategyInactive)));
}

#[test]
fn test_trade_loss_and_failure_abort() {
    let (d, log, vault) = setup();
    fund_and_deposit(&d, "alice", 1_000);
    let events_before = log.len();

    d.venue.queue(&id("dex"), SimulatedTrade::Loss(10));
    assert_eq!(
        trade(&d, &vault).unwrap_err(),
        LedgerError::TradeLoss {
            pre_balance: 1_000,
            post_balance: 990
        }
    );

    d.venue
        .queue(&id("dex"), SimulatedTrade::Fail("slippage".into()));
    assert_eq!(
        trade(&d, &vault).unwrap_err(),
        LedgerError::TradeCallFailed("slippage".into())
    );

    assert_eq!(vault.metrics().last_rebalance_time, 0);
    assert_eq!(vault.total_assets(), 1_000);
    assert_eq!(d.bank.balance_of(vault.account()), 1_000);
    assert_eq!(log.len(), events_before);
}

#[test]
fn test_drawdown_guard() {
    let (d, _log, vault) = setup();
    fund_and_deposit(&d, "alice", 1_000);

    // balance leaks outside a trade: 10% under the mark
    d.bank.burn(vault.account(), 100);
    let receipt = trade(&d, &vault).unwrap();
    assert_eq!(receipt.drawdown_bp, 1_000);
    assert_eq!(vault.metrics().max_drawdown_seen_bp, 1_000);
    assert_eq!(vault.total_assets(), 900);

    // a further leak the trade only partly recovers: 35% under the 1000
    // mark, limit is 20%
    d.clock.advance(SECONDS_PER_DAY);
    d.bank.burn(vault.account(), 300);
    d.venue.queue(&id("dex"), SimulatedTrade::Gain(50));
    assert_eq!(
        trade(&d, &vault).unwrap_err(),
        LedgerError::DrawdownExceeded {
            drawdown_bp: 3_500,
            max_bp: 2_000
        }
    );
    assert_eq!(vault.metrics().max_drawdown_seen_bp, 1_000);
    assert_eq!(vault.total_assets(), 900);
    // the trade's gain went back with it
    assert_eq!(d.bank.balance_of(vault.account()), 600);
}

#[test]
fn test_profit_raises_mark_to_post_trade_balance() {
    let (d, _log, vault) = setup();
    fund_and_deposit(&d, "alice", 1_000);
    d.venue.queue(&id("dex"), SimulatedTrade::Gain(100));
    trade(&d, &vault).unwrap();
    assert_eq!(vault.metrics().high_water_mark, 1_100);

    // the fee left the vault, so the next flat trade reads 1080 under 1100
    d.clock.advance(SECONDS_PER_DAY);
    let receipt = trade(&d, &vault).unwrap();
    assert_eq!(receipt.drawdown_bp, 181);
    assert_eq!(vault.metrics().high_water_mark, 1_100);
}

#[test]
fn test_withdrawals_do_not_count_as_drawdown() {
    let (d, _log, vault) = setup();
    fund_and_deposit(&d, "alice", 1_000);
    fund_and_deposit(&d, "bob", 1_000);
    vault.withdraw(&id("bob"), 1_000).unwrap();
    let receipt = trade(&d, &vault).unwrap();
    assert_eq!(receipt.drawdown_bp, 0);
}

#[test]
fn test_update_strategy_validates() {
    let (d, log, vault) = setup();
    let mut bad = trading_strategy();
    bad.rebalance_interval_secs = 3_600;
    assert!(matches!(
        vault.update_strategy(&d.admin, bad),
        Err(LedgerError::RebalanceIntervalTooShort { .. })
    ));
    assert!(matches!(
        vault.update_strategy(&d.operator, trading_strategy()),
        Err(LedgerError::Unauthorized { .. })
    ));
    assert!(log.is_empty());

    let mut wider = trading_strategy();
    wider.allowed_targets.insert(id("amm"));
    vault.update_strategy(&d.admin, wider.clone()).unwrap();
    assert_eq!(vault.strategy(), wider);
    assert!(vault.is_protocol_allowed(&id("amm")));
}

// =============================================================================
// ROLLBACK & REENTRANCY
// =============================================================================

/// Profit sink that accepts every vault and then refuses the credit.
struct RejectingProfits {
    account: AccountId,
}

impl ProfitSink for RejectingProfits {
    fn account(&self) -> &AccountId {
        &self.account
    }

    fn ensure_source(&self, _vault: &AccountId) -> LedgerResult<()> {
        Ok(())
    }

    fn distribute_profits_batch(&self, vault: &AccountId, _: &[(AccountId, Amount)]) -> LedgerResult<()> {
        Err(LedgerError::UnknownVault(vault.clone()))
    }

    fn take_reinvestment(&self, _vault: &AccountId, _user: &AccountId, amount: Amount) -> LedgerResult<()> {
        Err(LedgerError::InsufficientReinvestment {
            requested: amount,
            available: 0,
        })
    }
}

/// Revenue sink that refuses every payment.
struct ClosedRevenue {
    account: AccountId,
}

impl RevenueSink for ClosedRevenue {
    fn account(&self) -> &AccountId {
        &self.account
    }

    fn receive_revenue(&self, _caller: &AccountId, _amount: Amount, _source: &str) -> LedgerResult<()> {
        Err(LedgerError::Transfer(TransferError::Rejected(
            "revenue intake closed".to_string(),
        )))
    }
}

fn closed_revenue() -> Arc<ClosedRevenue> {
    Arc::new(ClosedRevenue {
        account: id("revenue-distributor"),
    })
}

fn custom_vault(
    d: &Deployment,
    log: &Arc<MemoryEventLog>,
    transfers: Arc<dyn AssetTransferPort>,
    revenue: Arc<dyn RevenueSink>,
    profits: Arc<dyn ProfitSink>,
) -> VaultLedger {
    let mut settings = d.config.vault.clone();
    settings.strategy = trading_strategy();
    VaultLedger::new(
        id("vault-x"),
        settings,
        VaultPorts {
            transfers,
            gate: d.roles.clone(),
            clock: d.clock.clone(),
            venue: d.venue.clone(),
            revenue,
            profits,
            events: log.clone(),
            journal: d.journal.clone(),
        },
    )
    .unwrap()
}

fn deposit_into(d: &Deployment, vault: &VaultLedger, user: &str, amount: Amount) {
    d.bank.mint(&id(user), amount);
    d.bank.approve(&id(user), vault.account(), amount).unwrap();
    vault.deposit(&id(user), amount).unwrap();
}

#[test]
fn test_rejected_profit_credit_rolls_back_trade() {
    let (d, log, _vault) = setup();
    let profits = Arc::new(RejectingProfits {
        account: id("profit-claims"),
    });
    let vault = custom_vault(&d, &log, d.bank.clone(), d.distributor.clone(), profits);
    deposit_into(&d, &vault, "alice", 1_000);
    let before = vault.snapshot();
    let events_before = log.len();

    d.venue.queue(&id("dex"), SimulatedTrade::Gain(100));
    assert!(matches!(
        trade(&d, &vault),
        Err(LedgerError::UnknownVault(_))
    ));
    assert_eq!(*vault.snapshot(), *before);
    assert_eq!(log.len(), events_before);
    // the fee was paid before the credit failed; both are undone
    assert_eq!(d.distributor.total_revenue(), 0);
    assert_eq!(d.bank.balance_of(d.distributor.account()), 0);
    assert_eq!(d.bank.allowance(vault.account(), d.distributor.account()), 0);
    assert_eq!(d.bank.balance_of(vault.account()), 1_000);
    assert_eq!(d.journal.depth(), 0);
}

#[test]
fn test_refused_performance_fee_rolls_back_trade() {
    let (d, log, _vault) = setup();
    let vault = custom_vault(&d, &log, d.bank.clone(), closed_revenue(), d.claims.clone());
    d.roles.grant(vault.account(), Capability::Vault);
    deposit_into(&d, &vault, "alice", 1_000);
    let before = vault.snapshot();
    let events_before = log.len();

    d.venue.queue(&id("dex"), SimulatedTrade::Gain(100));
    assert!(matches!(
        trade(&d, &vault),
        Err(LedgerError::Transfer(TransferError::Rejected(_)))
    ));
    assert_eq!(*vault.snapshot(), *before);
    assert_eq!(d.bank.balance_of(vault.account()), 1_000);
    assert_eq!(d.claims.claimable(&id("alice")), 0);
    assert_eq!(log.len(), events_before);
}

#[test]
fn test_refused_emergency_fee_keeps_funds_in_vault() {
    let (d, log, _vault) = setup();
    let vault = custom_vault(&d, &log, d.bank.clone(), closed_revenue(), d.claims.clone());
    deposit_into(&d, &vault, "alice", 1_000);
    vault.trigger_emergency(&d.guardian).unwrap();
    let before = vault.snapshot();
    let events_before = log.len();

    for _ in 0..2 {
        assert!(matches!(
            vault.emergency_withdraw(&id("alice")),
            Err(LedgerError::Transfer(TransferError::Rejected(_)))
        ));
        assert_eq!(d.bank.balance_of(&id("alice")), 0);
        assert_eq!(d.bank.balance_of(vault.account()), 1_000);
        assert_eq!(vault.shares_of(&id("alice")), 1_000);
        assert_eq!(*vault.snapshot(), *before);
        assert_eq!(log.len(), events_before);
    }
}

/// Transfer port that calls back into the vault during `pull`.
struct ReentrantBank {
    bank: Arc<InMemoryAssetBank>,
    vault: OnceLock<Weak<VaultLedger>>,
    observed: Mutex<Vec<(Amount, LedgerError)>>,
}

impl AssetTransferPort for ReentrantBank {
    fn balance_of(&self, account: &AccountId) -> Amount {
        self.bank.balance_of(account)
    }

    fn pull(&self, from: &AccountId, to: &AccountId, amount: Amount) -> Result<(), TransferError> {
        if let Some(vault) = self.vault.get().and_then(Weak::upgrade) {
            let visible = vault.shares_of(from);
            if let Err(e) = vault.withdraw(from, 1) {
                self.observed.lock().push((visible, e));
            }
        }
        self.bank.pull(from, to, amount)
    }

    fn push(&self, from: &AccountId, to: &AccountId, amount: Amount) -> Result<(), TransferError> {
        self.bank.push(from, to, amount)
    }

    fn approve(&self, owner: &AccountId, spender: &AccountId, amount: Amount) -> Result<(), TransferError> {
        self.bank.approve(owner, spender, amount)
    }

    fn allowance(&self, owner: &AccountId, spender: &AccountId) -> Amount {
        self.bank.allowance(owner, spender)
    }

    fn savepoint(&self) -> TransferSavepoint {
        self.bank.savepoint()
    }

    fn restore(&self, savepoint: TransferSavepoint) {
        self.bank.restore(savepoint)
    }
}

#[test]
fn test_reentrant_call_fails_fast() {
    let (d, log, _vault) = setup();
    let port = Arc::new(ReentrantBank {
        bank: d.bank.clone(),
        vault: OnceLock::new(),
        observed: Mutex::new(Vec::new()),
    });
    let vault = Arc::new(custom_vault(
        &d,
        &log,
        port.clone(),
        d.distributor.clone(),
        d.claims.clone(),
    ));
    let _ = port.vault.set(Arc::downgrade(&vault));

    d.bank.mint(&id("alice"), 100);
    d.bank.approve(&id("alice"), vault.account(), 100).unwrap();
    vault.deposit(&id("alice"), 100).unwrap();

    let observed = port.observed.lock().clone();
    // the callback saw the already-minted shares and was turned away
    assert_eq!(
        observed,
        vec![(100, LedgerError::Reentrancy { ledger: "vault" })]
    );
    assert_eq!(vault.shares_of(&id("alice")), 100);
    assert_eq!(vault.total_shares(), 100);
}
