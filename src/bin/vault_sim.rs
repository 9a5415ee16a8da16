//! Vault Simulator
//!
//! Replays a TOML scenario against an in-process deployment and prints every
//! emitted event, then every step outcome, as JSON lines on stdout. Logs go
//! to stderr.
//!
//! Usage:
//!   vault-sim --scenario scenarios/basic.toml
//!   vault-sim --scenario s.toml --config protocol.toml --summary

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use dotenv::dotenv;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use profit_vault::ports::SimulatedTrade;
use profit_vault::{
    AccountId, Amount, Deployment, EventRecord, EventSink, LedgerError, LedgerEvent,
    MemoryEventLog, ProtocolConfig, SqliteEventStore, Strategy,
};

#[derive(Parser, Debug)]
#[command(name = "vault-sim")]
#[command(about = "Replay a vault accounting scenario")]
struct Args {
    /// Scenario file (TOML)
    #[arg(short, long)]
    scenario: PathBuf,

    /// Protocol config file (TOML); replaces the scenario's [config]
    #[arg(short, long, env = "VAULT_CONFIG")]
    config: Option<PathBuf>,

    /// Stop at the first failing step
    #[arg(long)]
    stop_on_error: bool,

    /// Print ledger snapshots after the last step
    #[arg(long)]
    summary: bool,
}

#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(default = "default_start_time")]
    start_time: i64,
    #[serde(default)]
    config: Option<ProtocolConfig>,
    #[serde(default)]
    vaults: Vec<String>,
    #[serde(default)]
    steps: Vec<Step>,
}

fn default_start_time() -> i64 {
    1_700_000_000
}

/// Amounts are `u64` because TOML integers are 64-bit.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Step {
    AddVault { id: String },
    Mint { account: String, amount: u64 },
    Advance { seconds: i64 },
    Deposit { vault: String, user: String, amount: u64 },
    Withdraw { vault: String, user: String, shares: u64 },
    EmergencyWithdraw { vault: String, user: String },
    QueueGain { target: String, amount: u64 },
    QueueLoss { target: String, amount: u64 },
    QueueFailure { target: String, reason: String },
    Trade {
        vault: String,
        target: String,
        #[serde(default)]
        payload_hex: String,
    },
    UpdateStrategy { vault: String, strategy: Strategy },
    Pause { vault: String },
    Unpause { vault: String },
    TriggerEmergency { vault: String },
    ResolveEmergency { vault: String },
    AddStakeholder {
        id: String,
        payout_target: Option<String>,
        shares_bp: u32,
    },
    UpdateStakeholder {
        id: String,
        payout_target: Option<String>,
        shares_bp: u32,
    },
    SetStakeholderStatus { id: String, active: bool },
    Distribute { id: String },
    FundClaims { funder: String, amount: u64 },
    Claim { user: String, amount: u64 },
    Reinvest { user: String, vault: String, amount: u64 },
    SetLockup { seconds: i64 },
    SetEarlyFee { bp: u32 },
}

/// Prints each record as a JSON line, then forwards to the backing sink.
struct JsonLinesSink {
    inner: Arc<dyn EventSink>,
    seq: AtomicU64,
}

impl EventSink for JsonLinesSink {
    fn publish(&self, source: &AccountId, events: Vec<LedgerEvent>) {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for event in &events {
            let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
            let record = EventRecord::new(seq, source, event.clone());
            match serde_json::to_string(&record) {
                Ok(line) => {
                    let _ = writeln!(out, "{}", line);
                }
                Err(e) => warn!(error = %e, "event encode failed"),
            }
        }
        self.inner.publish(source, events);
    }
}

fn id(raw: &str) -> AccountId {
    AccountId::from(raw)
}

fn run_step(d: &mut Deployment, step: &Step) -> Result<serde_json::Value, LedgerError> {
    let value = match step {
        Step::AddVault { id: vault } => {
            d.add_vault(vault)?;
            json!({ "vault": vault })
        }
        Step::Mint { account, amount } => {
            d.bank.mint(&id(account), Amount::from(*amount));
            json!({ "account": account, "amount": amount })
        }
        Step::Advance { seconds } => json!({ "now": d.clock.advance(*seconds) }),
        Step::Deposit {
            vault,
            user,
            amount,
        } => serde_json::to_value(d.deposit(vault, &id(user), Amount::from(*amount))?)
            .unwrap_or_default(),
        Step::Withdraw {
            vault,
            user,
            shares,
        } => serde_json::to_value(d.vault(vault)?.withdraw(&id(user), Amount::from(*shares))?)
            .unwrap_or_default(),
        Step::EmergencyWithdraw { vault, user } => {
            serde_json::to_value(d.vault(vault)?.emergency_withdraw(&id(user))?).unwrap_or_default()
        }
        Step::QueueGain { target, amount } => {
            d.venue
                .queue(&id(target), SimulatedTrade::Gain(Amount::from(*amount)));
            json!({ "queued": "gain" })
        }
        Step::QueueLoss { target, amount } => {
            d.venue
                .queue(&id(target), SimulatedTrade::Loss(Amount::from(*amount)));
            json!({ "queued": "loss" })
        }
        Step::QueueFailure { target, reason } => {
            d.venue
                .queue(&id(target), SimulatedTrade::Fail(reason.clone()));
            json!({ "queued": "failure" })
        }
        Step::Trade {
            vault,
            target,
            payload_hex,
        } => {
            let payload = hex::decode(payload_hex.trim())
                .map_err(|e| LedgerError::TradeCallFailed(format!("bad payload hex: {}", e)))?;
            let receipt = d
                .vault(vault)?
                .execute_trade(&d.operator, &id(target), &payload)?;
            serde_json::to_value(receipt).unwrap_or_default()
        }
        Step::UpdateStrategy { vault, strategy } => {
            d.vault(vault)?.update_strategy(&d.admin, strategy.clone())?;
            json!({ "vault": vault })
        }
        Step::Pause { vault } => {
            d.vault(vault)?.pause(&d.admin)?;
            json!({ "paused": true })
        }
        Step::Unpause { vault } => {
            d.vault(vault)?.unpause(&d.admin)?;
            json!({ "paused": false })
        }
        Step::TriggerEmergency { vault } => {
            d.vault(vault)?.trigger_emergency(&d.guardian)?;
            json!({ "emergency": true })
        }
        Step::ResolveEmergency { vault } => {
            d.vault(vault)?.resolve_emergency(&d.guardian)?;
            json!({ "emergency": false })
        }
        Step::AddStakeholder {
            id: stakeholder,
            payout_target,
            shares_bp,
        } => {
            d.distributor.add_stakeholder(
                &d.admin,
                stakeholder,
                payout_target.as_deref().map(id),
                *shares_bp,
            )?;
            json!({ "allocated_bp": d.distributor.allocated_bp() })
        }
        Step::UpdateStakeholder {
            id: stakeholder,
            payout_target,
            shares_bp,
        } => {
            d.distributor.update_stakeholder(
                &d.admin,
                stakeholder,
                payout_target.as_deref().map(id),
                *shares_bp,
            )?;
            json!({ "allocated_bp": d.distributor.allocated_bp() })
        }
        Step::SetStakeholderStatus {
            id: stakeholder,
            active,
        } => {
            d.distributor
                .set_stakeholder_status(&d.admin, stakeholder, *active)?;
            json!({ "allocated_bp": d.distributor.allocated_bp() })
        }
        Step::Distribute { id: stakeholder } => {
            json!({ "paid": d.distributor.distribute(stakeholder)? })
        }
        Step::FundClaims { funder, amount } => {
            d.fund_claims(&id(funder), Amount::from(*amount))?;
            json!({ "custody": d.claims.custody_balance() })
        }
        Step::Claim { user, amount } => {
            serde_json::to_value(d.claims.claim(&id(user), Amount::from(*amount))?)
                .unwrap_or_default()
        }
        Step::Reinvest {
            user,
            vault,
            amount,
        } => {
            let receipt = d.reinvest(vault, &id(user), Amount::from(*amount))?;
            json!({
                "shares_minted": receipt.shares_minted,
                "claimable": d.claims.claimable(&id(user)),
            })
        }
        Step::SetLockup { seconds } => {
            d.claims.set_lockup_period(&d.admin, *seconds)?;
            json!({ "lockup_secs": seconds })
        }
        Step::SetEarlyFee { bp } => {
            d.claims.set_early_withdrawal_fee(&d.admin, *bp)?;
            json!({ "early_withdrawal_fee_bp": bp })
        }
    };
    Ok(value)
}

fn main() -> Result<()> {
    let _ = dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "profit_vault=info,vault_sim=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let content = std::fs::read_to_string(&args.scenario)
        .with_context(|| format!("read scenario {}", args.scenario.display()))?;
    let scenario: Scenario = toml::from_str(&content).context("parse scenario")?;

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading config from {}", path.display());
            ProtocolConfig::load(path)?
        }
        None => scenario.config.clone().unwrap_or_default(),
    };
    config.apply_env_overrides()?;
    config.validate()?;

    let backing: Arc<dyn EventSink> = match &config.event_store.sqlite_path {
        Some(path) => Arc::new(SqliteEventStore::open(path)?),
        None => Arc::new(MemoryEventLog::new()),
    };
    let sink = Arc::new(JsonLinesSink {
        inner: backing,
        seq: AtomicU64::new(0),
    });
    let mut deployment = Deployment::new(config, scenario.start_time, sink)?;
    for vault in &scenario.vaults {
        deployment.add_vault(vault)?;
    }

    info!(steps = scenario.steps.len(), "replaying scenario");
    let mut failures = 0usize;
    for (index, step) in scenario.steps.iter().enumerate() {
        let line = match run_step(&mut deployment, step) {
            Ok(result) => json!({ "step": index, "ok": true, "result": result }),
            Err(e) => {
                failures += 1;
                warn!(step = index, error = %e, "step failed");
                json!({
                    "step": index,
                    "ok": false,
                    "kind": format!("{:?}", e.kind()),
                    "error": e.to_string(),
                })
            }
        };
        println!("{}", line);
        if failures > 0 && args.stop_on_error {
            bail!("step {} failed", index);
        }
    }

    if args.summary {
        for vault in deployment.vaults() {
            println!(
                "{}",
                json!({ "vault": vault.account(), "state": &*vault.snapshot() })
            );
        }
        println!(
            "{}",
            json!({ "revenue_distributor": &*deployment.distributor.snapshot() })
        );
        println!("{}", json!({ "profit_claims": &*deployment.claims.snapshot() }));
    }

    info!(failures, "scenario finished");
    Ok(())
}
