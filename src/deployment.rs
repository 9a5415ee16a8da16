//! In-process wiring of a full protocol instance
//!
//! One asset bank, one capability table, one manual clock, a revenue
//! distributor, a registry-routed profit claim ledger and any number of
//! vaults, all publishing to a single event sink and sharing one call
//! journal. The simulator binary and the integration tests build on this.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::claims::{ClaimPorts, ClaimRouting, ProfitClaimLedger};
use crate::config::ProtocolConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::events::{EventSink, MemoryEventLog, SqliteEventStore};
use crate::guard::Journal;
use crate::math::Amount;
use crate::ports::{
    AccountId, AssetTransferPort, Capability, InMemoryAssetBank, ManualClock, RoleTable,
    SimulatedVenue, StaticVaultRegistry,
};
use crate::revenue::{RevenueDistributor, RevenuePorts};
use crate::vault::{DepositReceipt, VaultLedger, VaultPorts};

pub const ADMIN: &str = "admin";
pub const OPERATOR: &str = "operator";
pub const GUARDIAN: &str = "guardian";
pub const REVENUE_ACCOUNT: &str = "revenue-distributor";
pub const CLAIMS_ACCOUNT: &str = "profit-claims";

pub struct Deployment {
    pub config: ProtocolConfig,
    pub bank: Arc<InMemoryAssetBank>,
    pub roles: Arc<RoleTable>,
    pub clock: Arc<ManualClock>,
    pub venue: Arc<SimulatedVenue>,
    pub registry: Arc<StaticVaultRegistry>,
    pub events: Arc<dyn EventSink>,
    pub journal: Arc<Journal>,
    pub distributor: Arc<RevenueDistributor>,
    pub claims: Arc<ProfitClaimLedger>,
    pub admin: AccountId,
    pub operator: AccountId,
    pub guardian: AccountId,
    vaults: BTreeMap<AccountId, Arc<VaultLedger>>,
}

impl Deployment {
    /// Build against an explicit sink.
    pub fn new(config: ProtocolConfig, start_time: i64, events: Arc<dyn EventSink>) -> LedgerResult<Self> {
        let bank = Arc::new(InMemoryAssetBank::new());
        let roles = Arc::new(RoleTable::new());
        let clock = Arc::new(ManualClock::new(start_time));
        let venue = Arc::new(SimulatedVenue::new(bank.clone()));
        let registry = Arc::new(StaticVaultRegistry::default());
        let journal = Arc::new(Journal::new(bank.clone()));

        let admin = AccountId::from(ADMIN);
        let operator = AccountId::from(OPERATOR);
        let guardian = AccountId::from(GUARDIAN);
        roles.grant(&admin, Capability::Admin);
        roles.grant(&operator, Capability::Operator);
        roles.grant(&guardian, Capability::Emergency);

        let distributor = Arc::new(RevenueDistributor::new(
            AccountId::from(REVENUE_ACCOUNT),
            RevenuePorts {
                transfers: bank.clone(),
                gate: roles.clone(),
                events: events.clone(),
                journal: journal.clone(),
            },
        )?);
        let claims = Arc::new(ProfitClaimLedger::new(
            AccountId::from(CLAIMS_ACCOUNT),
            config.claims.clone(),
            ClaimRouting::Registry(registry.clone()),
            ClaimPorts {
                transfers: bank.clone(),
                gate: roles.clone(),
                clock: clock.clone(),
                revenue: distributor.clone(),
                events: events.clone(),
                journal: journal.clone(),
            },
        )?);

        Ok(Self {
            config,
            bank,
            roles,
            clock,
            venue,
            registry,
            events,
            journal,
            distributor,
            claims,
            admin,
            operator,
            guardian,
            vaults: BTreeMap::new(),
        })
    }

    /// Build with an in-memory log and hand the log back for inspection.
    pub fn in_memory(config: ProtocolConfig, start_time: i64) -> LedgerResult<(Self, Arc<MemoryEventLog>)> {
        let log = Arc::new(MemoryEventLog::new());
        let deployment = Self::new(config, start_time, log.clone())?;
        Ok((deployment, log))
    }

    /// Build with the sink the config asks for.
    pub fn from_config(config: ProtocolConfig, start_time: i64) -> Result<Self> {
        config.validate()?;
        let events: Arc<dyn EventSink> = match &config.event_store.sqlite_path {
            Some(path) => {
                info!(path = %path, "persisting events to sqlite");
                Arc::new(SqliteEventStore::open(path)?)
            }
            None => Arc::new(MemoryEventLog::new()),
        };
        Self::new(config, start_time, events).context("build deployment")
    }

    /// Create a vault, grant it the vault capability and register it for
    /// claim routing. Registration order is claim drain order.
    pub fn add_vault(&mut self, id: &str) -> LedgerResult<Arc<VaultLedger>> {
        let account = AccountId::parse(id)?;
        if self.vaults.contains_key(&account) {
            return Err(LedgerError::InvalidAccount(id.to_string()));
        }
        let vault = Arc::new(VaultLedger::new(
            account.clone(),
            self.config.vault.clone(),
            VaultPorts {
                transfers: self.bank.clone(),
                gate: self.roles.clone(),
                clock: self.clock.clone(),
                venue: self.venue.clone(),
                revenue: self.distributor.clone(),
                profits: self.claims.clone(),
                events: self.events.clone(),
                journal: self.journal.clone(),
            },
        )?);
        self.roles.grant(&account, Capability::Vault);
        self.registry.register(account.clone());
        self.vaults.insert(account, vault.clone());
        info!(vault = %id, "vault deployed");
        Ok(vault)
    }

    pub fn vault(&self, id: &str) -> LedgerResult<Arc<VaultLedger>> {
        let account = AccountId::from(id);
        self.vaults
            .get(&account)
            .cloned()
            .ok_or(LedgerError::UnknownVault(account))
    }

    pub fn vaults(&self) -> impl Iterator<Item = &Arc<VaultLedger>> {
        self.vaults.values()
    }

    /// Approve the vault for `amount` on the user's behalf, then deposit.
    /// A failed deposit leaves no allowance behind.
    pub fn deposit(&self, vault: &str, user: &AccountId, amount: Amount) -> LedgerResult<DepositReceipt> {
        let vault = self.vault(vault)?;
        self.journal.atomic("deposit", || {
            self.bank.approve(user, vault.account(), amount)?;
            vault.deposit(user, amount)
        })
    }

    /// Approve the claim ledger and top up its payout custody.
    pub fn fund_claims(&self, funder: &AccountId, amount: Amount) -> LedgerResult<()> {
        self.journal.atomic("fund claims", || {
            self.bank.approve(funder, self.claims.account(), amount)?;
            self.claims.fund(funder, amount)
        })
    }

    /// Move `amount` of the user's profit credit from `vault` into new
    /// shares of that vault. Both halves land or neither does.
    pub fn reinvest(&self, vault: &str, user: &AccountId, amount: Amount) -> LedgerResult<DepositReceipt> {
        let vault = self.vault(vault)?;
        self.journal.atomic("reinvest", || {
            self.claims.reinvest(user, vault.account(), amount)?;
            vault.deposit_reinvested(user, amount)
        })
    }
}
