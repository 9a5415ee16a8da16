//! Stakeholder Revenue Distributor
//!
//! Collects protocol revenue (performance fees, emergency fees, early-claim
//! penalties) and lets each stakeholder pull their basis-point share of
//! everything ever received:
//!
//! ```text
//! entitlement = floor(total_revenue * shares_bp / 10_000)
//! pending     = entitlement - claimed
//! ```
//!
//! Entitlement is always measured against lifetime revenue, so `distribute`
//! gives the same result whether it runs after every deposit or once a year.
//! The sum of active allocations never exceeds 10_000 bp.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{LedgerError, LedgerResult};
use crate::events::{EventSink, LedgerEvent};
use crate::guard::{GuardedState, Journal, Txn};
use crate::math::{bp_of, checked_add, checked_sub, Amount, BPS_DENOMINATOR};
use crate::ports::{
    require_capability, AccountId, AssetTransferPort, Capability, CapabilityGate, RevenueSink,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stakeholder {
    pub id: String,
    pub payout_target: Option<AccountId>,
    pub shares_bp: u32,
    pub active: bool,
    /// Paid out so far; never decreases.
    pub claimed: Amount,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributorState {
    /// Insertion order.
    pub stakeholders: Vec<Stakeholder>,
    pub total_revenue: Amount,
    pub total_distributed: Amount,
}

impl DistributorState {
    fn index_of(&self, id: &str) -> Option<usize> {
        self.stakeholders.iter().position(|s| s.id == id)
    }

    fn get(&self, id: &str) -> LedgerResult<&Stakeholder> {
        self.stakeholders
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| LedgerError::StakeholderNotFound(id.to_string()))
    }

    /// Sum of active allocations.
    pub fn allocated_bp(&self) -> u32 {
        self.stakeholders
            .iter()
            .filter(|s| s.active)
            .map(|s| s.shares_bp)
            .sum()
    }

    pub fn entitlement(&self, shares_bp: u32) -> LedgerResult<Amount> {
        bp_of(self.total_revenue, shares_bp)
    }

    pub fn pending(&self, stakeholder: &Stakeholder) -> LedgerResult<Amount> {
        let entitlement = self.entitlement(stakeholder.shares_bp)?;
        Ok(entitlement.saturating_sub(stakeholder.claimed))
    }

    /// Fail if activating `requested_bp` alongside everything else active
    /// (minus `releasing_bp`) would break the 10_000 bp cap.
    fn check_allocation(&self, releasing_bp: u32, requested_bp: u32) -> LedgerResult<()> {
        let allocated_bp = self.allocated_bp() - releasing_bp;
        if allocated_bp + requested_bp > BPS_DENOMINATOR {
            return Err(LedgerError::AllocationExceeded {
                allocated_bp,
                requested_bp,
            });
        }
        Ok(())
    }
}

fn validate_shares_bp(shares_bp: u32) -> LedgerResult<()> {
    if shares_bp == 0 || shares_bp > BPS_DENOMINATOR {
        return Err(LedgerError::InvalidSharesBp(shares_bp));
    }
    Ok(())
}

fn normalize_id(raw: &str) -> LedgerResult<String> {
    let id = raw.trim();
    if id.is_empty() {
        return Err(LedgerError::StakeholderNotFound(raw.to_string()));
    }
    Ok(id.to_string())
}

#[derive(Clone)]
pub struct RevenuePorts {
    pub transfers: Arc<dyn AssetTransferPort>,
    pub gate: Arc<dyn CapabilityGate>,
    pub events: Arc<dyn EventSink>,
    pub journal: Arc<Journal>,
}

pub struct RevenueDistributor {
    account: AccountId,
    ports: RevenuePorts,
    state: GuardedState<DistributorState>,
}

impl RevenueDistributor {
    pub fn new(account: AccountId, ports: RevenuePorts) -> LedgerResult<Self> {
        if !account.is_valid() {
            return Err(LedgerError::InvalidAccount(account.to_string()));
        }
        let state = GuardedState::new(
            "revenue distributor",
            DistributorState::default(),
            ports.journal.clone(),
        );
        Ok(Self {
            account,
            ports,
            state,
        })
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    /// Pull `amount` from `caller`, who must have approved this account.
    pub fn receive_revenue(&self, caller: &AccountId, amount: Amount, source: &str) -> LedgerResult<()> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount);
        }
        let mut tx = self.state.enter()?;
        tx.total_revenue = checked_add(tx.total_revenue, amount)?;
        tx.emit(LedgerEvent::RevenueReceived {
            amount,
            source: source.to_string(),
        });
        tx.checkpoint();

        self.ports.transfers.pull(caller, &self.account, amount)?;

        self.commit(tx);
        info!(from = %caller, amount, source, "revenue received");
        Ok(())
    }

    /// Pay a stakeholder everything they are owed. Anyone may trigger it;
    /// funds only ever go to the registered payout target.
    pub fn distribute(&self, stakeholder_id: &str) -> LedgerResult<Amount> {
        let id = normalize_id(stakeholder_id)?;
        let mut tx = self.state.enter()?;
        let idx = tx
            .index_of(&id)
            .ok_or_else(|| LedgerError::StakeholderNotFound(id.clone()))?;
        let stakeholder = tx.stakeholders[idx].clone();
        if !stakeholder.active {
            return Err(LedgerError::StakeholderInactive(id));
        }
        let target = stakeholder
            .payout_target
            .clone()
            .ok_or_else(|| LedgerError::PayoutTargetMissing(id.clone()))?;
        let amount = tx.pending(&stakeholder)?;
        if amount == 0 {
            return Err(LedgerError::NothingToClaim);
        }

        tx.stakeholders[idx].claimed = checked_add(stakeholder.claimed, amount)?;
        tx.total_distributed = checked_add(tx.total_distributed, amount)?;
        tx.emit(LedgerEvent::RevenueDistributed {
            stakeholder_id: id.clone(),
            payout_target: target.clone(),
            amount,
        });
        tx.checkpoint();

        self.ports.transfers.push(&self.account, &target, amount)?;

        self.commit(tx);
        info!(stakeholder = %id, to = %target, amount, "revenue distributed");
        Ok(amount)
    }

    // -------------------------------------------------------------------------
    // Admin
    // -------------------------------------------------------------------------

    pub fn add_stakeholder(
        &self,
        caller: &AccountId,
        stakeholder_id: &str,
        payout_target: Option<AccountId>,
        shares_bp: u32,
    ) -> LedgerResult<()> {
        require_capability(self.ports.gate.as_ref(), caller, Capability::Admin)?;
        let id = normalize_id(stakeholder_id)?;
        validate_shares_bp(shares_bp)?;
        let mut tx = self.state.enter()?;
        if tx.index_of(&id).is_some() {
            return Err(LedgerError::StakeholderExists(id));
        }
        tx.check_allocation(0, shares_bp)?;

        tx.stakeholders.push(Stakeholder {
            id: id.clone(),
            payout_target: payout_target.clone(),
            shares_bp,
            active: true,
            claimed: 0,
        });
        tx.emit(LedgerEvent::StakeholderAdded {
            stakeholder_id: id.clone(),
            payout_target,
            shares_bp,
        });
        self.commit(tx);
        info!(stakeholder = %id, shares_bp, "stakeholder added");
        Ok(())
    }

    /// Replace target and allocation. A reduction that would push
    /// entitlement below what was already paid is refused.
    pub fn update_stakeholder(
        &self,
        caller: &AccountId,
        stakeholder_id: &str,
        payout_target: Option<AccountId>,
        shares_bp: u32,
    ) -> LedgerResult<()> {
        require_capability(self.ports.gate.as_ref(), caller, Capability::Admin)?;
        let id = normalize_id(stakeholder_id)?;
        validate_shares_bp(shares_bp)?;
        let mut tx = self.state.enter()?;
        let idx = tx
            .index_of(&id)
            .ok_or_else(|| LedgerError::StakeholderNotFound(id.clone()))?;
        let current = tx.stakeholders[idx].clone();
        if current.active {
            tx.check_allocation(current.shares_bp, shares_bp)?;
        }
        let entitlement = tx.entitlement(shares_bp)?;
        if entitlement < current.claimed {
            return Err(LedgerError::AllocationBelowClaimed {
                stakeholder: id,
                entitlement,
                claimed: current.claimed,
            });
        }

        let entry = &mut tx.stakeholders[idx];
        entry.payout_target = payout_target.clone();
        entry.shares_bp = shares_bp;
        tx.emit(LedgerEvent::StakeholderUpdated {
            stakeholder_id: id.clone(),
            payout_target,
            shares_bp,
        });
        self.commit(tx);
        info!(stakeholder = %id, shares_bp, "stakeholder updated");
        Ok(())
    }

    pub fn set_stakeholder_status(
        &self,
        caller: &AccountId,
        stakeholder_id: &str,
        active: bool,
    ) -> LedgerResult<()> {
        require_capability(self.ports.gate.as_ref(), caller, Capability::Admin)?;
        let id = normalize_id(stakeholder_id)?;
        let mut tx = self.state.enter()?;
        let idx = tx
            .index_of(&id)
            .ok_or_else(|| LedgerError::StakeholderNotFound(id.clone()))?;
        let current = tx.stakeholders[idx].clone();
        if active && !current.active {
            tx.check_allocation(0, current.shares_bp)?;
        }

        tx.stakeholders[idx].active = active;
        tx.emit(LedgerEvent::StakeholderStatusChanged {
            stakeholder_id: id.clone(),
            active,
        });
        self.commit(tx);
        info!(stakeholder = %id, active, "stakeholder status changed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Views
    // -------------------------------------------------------------------------

    pub fn snapshot(&self) -> Arc<DistributorState> {
        self.state.view()
    }

    /// What `distribute` would pay right now.
    pub fn pending(&self, stakeholder_id: &str) -> LedgerResult<Amount> {
        let state = self.state.view();
        let stakeholder = state.get(stakeholder_id.trim())?;
        state.pending(stakeholder)
    }

    pub fn stakeholder(&self, stakeholder_id: &str) -> Option<Stakeholder> {
        self.state.view().get(stakeholder_id.trim()).ok().cloned()
    }

    pub fn stakeholders(&self) -> Vec<Stakeholder> {
        self.state.view().stakeholders.clone()
    }

    pub fn allocated_bp(&self) -> u32 {
        self.state.view().allocated_bp()
    }

    pub fn total_revenue(&self) -> Amount {
        self.state.view().total_revenue
    }

    pub fn total_distributed(&self) -> Amount {
        self.state.view().total_distributed
    }

    /// Revenue received but not yet paid to anyone.
    pub fn undistributed(&self) -> LedgerResult<Amount> {
        let state = self.state.view();
        checked_sub(state.total_revenue, state.total_distributed)
    }

    fn commit(&self, tx: Txn<'_, DistributorState>) {
        tx.commit(&self.ports.events, &self.account);
    }
}

impl RevenueSink for RevenueDistributor {
    fn account(&self) -> &AccountId {
        &self.account
    }

    fn receive_revenue(&self, caller: &AccountId, amount: Amount, source: &str) -> LedgerResult<()> {
        RevenueDistributor::receive_revenue(self, caller, amount, source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventLog;
    use crate::ports::{InMemoryAssetBank, RoleTable};

    struct Harness {
        bank: Arc<InMemoryAssetBank>,
        log: Arc<MemoryEventLog>,
        distributor: RevenueDistributor,
        admin: AccountId,
    }

    fn harness() -> Harness {
        let bank = Arc::new(InMemoryAssetBank::new());
        let roles = Arc::new(RoleTable::new());
        let log = Arc::new(MemoryEventLog::new());
        let admin = AccountId::from("admin");
        roles.grant(&admin, Capability::Admin);
        let distributor = RevenueDistributor::new(
            AccountId::from("revenue"),
            RevenuePorts {
                transfers: bank.clone(),
                gate: roles,
                events: log.clone(),
                journal: Arc::new(Journal::new(bank.clone())),
            },
        )
        .unwrap();
        Harness {
            bank,
            log,
            distributor,
            admin,
        }
    }

    fn pay_in(h: &Harness, payer: &str, amount: Amount) {
        let payer = AccountId::from(payer);
        h.bank.mint(&payer, amount);
        h.bank
            .approve(&payer, h.distributor.account(), amount)
            .unwrap();
        h.distributor
            .receive_revenue(&payer, amount, "performance_fee")
            .unwrap();
    }

    #[test]
    fn test_distribute_pays_lifetime_share() {
        let h = harness();
        let treasury = AccountId::from("treasury");
        h.distributor
            .add_stakeholder(&h.admin, "treasury", Some(treasury.clone()), 6_000)
            .unwrap();
        h.distributor
            .add_stakeholder(&h.admin, "team", Some(AccountId::from("team")), 4_000)
            .unwrap();

        pay_in(&h, "vault", 100);
        assert_eq!(h.distributor.distribute("treasury").unwrap(), 60);
        assert!(matches!(
            h.distributor.distribute("treasury"),
            Err(LedgerError::NothingToClaim)
        ));

        pay_in(&h, "vault", 50);
        assert_eq!(h.distributor.pending("treasury").unwrap(), 30);
        assert_eq!(h.distributor.distribute("treasury").unwrap(), 30);
        assert_eq!(h.distributor.distribute("team").unwrap(), 60);

        assert_eq!(h.bank.balance_of(&treasury), 90);
        assert_eq!(h.distributor.total_distributed(), 150);
        assert_eq!(h.distributor.undistributed().unwrap(), 0);
    }

    #[test]
    fn test_allocation_cap() {
        let h = harness();
        h.distributor
            .add_stakeholder(&h.admin, "a", None, 7_000)
            .unwrap();
        let err = h
            .distributor
            .add_stakeholder(&h.admin, "b", None, 3_001)
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::AllocationExceeded {
                allocated_bp: 7_000,
                requested_bp: 3_001
            }
        );

        // deactivating frees room; reactivating must fit again
        h.distributor
            .set_stakeholder_status(&h.admin, "a", false)
            .unwrap();
        h.distributor
            .add_stakeholder(&h.admin, "b", None, 5_000)
            .unwrap();
        assert!(matches!(
            h.distributor.set_stakeholder_status(&h.admin, "a", true),
            Err(LedgerError::AllocationExceeded { .. })
        ));
        assert_eq!(h.distributor.allocated_bp(), 5_000);
    }

    #[test]
    fn test_update_rebases_allocation() {
        let h = harness();
        h.distributor
            .add_stakeholder(&h.admin, "a", None, 6_000)
            .unwrap();
        h.distributor
            .add_stakeholder(&h.admin, "b", None, 4_000)
            .unwrap();
        h.distributor
            .update_stakeholder(&h.admin, "a", None, 5_000)
            .unwrap();
        h.distributor
            .update_stakeholder(&h.admin, "b", None, 5_000)
            .unwrap();
        assert_eq!(h.distributor.allocated_bp(), 10_000);
        assert!(h
            .distributor
            .update_stakeholder(&h.admin, "b", None, 5_001)
            .is_err());
    }

    #[test]
    fn test_update_cannot_drop_entitlement_below_claimed() {
        let h = harness();
        h.distributor
            .add_stakeholder(&h.admin, "a", Some(AccountId::from("a")), 5_000)
            .unwrap();
        pay_in(&h, "vault", 100);
        h.distributor.distribute("a").unwrap();
        let err = h
            .distributor
            .update_stakeholder(&h.admin, "a", Some(AccountId::from("a")), 4_000)
            .unwrap_err();
        assert!(matches!(err, LedgerError::AllocationBelowClaimed { .. }));
    }

    #[test]
    fn test_distribute_preconditions() {
        let h = harness();
        h.distributor
            .add_stakeholder(&h.admin, "nobody", None, 1_000)
            .unwrap();
        pay_in(&h, "vault", 100);
        assert!(matches!(
            h.distributor.distribute("nobody"),
            Err(LedgerError::PayoutTargetMissing(_))
        ));
        assert!(matches!(
            h.distributor.distribute("ghost"),
            Err(LedgerError::StakeholderNotFound(_))
        ));
        h.distributor
            .set_stakeholder_status(&h.admin, "nobody", false)
            .unwrap();
        assert!(matches!(
            h.distributor.distribute("nobody"),
            Err(LedgerError::StakeholderInactive(_))
        ));
    }

    #[test]
    fn test_admin_only() {
        let h = harness();
        let err = h
            .distributor
            .add_stakeholder(&AccountId::from("mallory"), "m", None, 100)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Unauthorized { .. }));
        assert!(h.log.is_empty());
    }

    #[test]
    fn test_failed_pull_leaves_no_trace() {
        let h = harness();
        let payer = AccountId::from("vault");
        h.bank.mint(&payer, 10);
        // no approval
        let err = h
            .distributor
            .receive_revenue(&payer, 10, "performance_fee")
            .unwrap_err();
        assert!(matches!(err, LedgerError::Transfer(_)));
        assert_eq!(h.distributor.total_revenue(), 0);
        assert!(h.log.is_empty());
    }

    #[test]
    fn test_zero_revenue_rejected() {
        let h = harness();
        assert!(matches!(
            h.distributor
                .receive_revenue(&AccountId::from("vault"), 0, "x"),
            Err(LedgerError::ZeroAmount)
        ));
    }
}
