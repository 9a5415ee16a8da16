//! Pooled Trading Vault Accounting
//!
//! Three ledgers that move one pooled asset between depositors, an
//! operator-run trading balance, protocol stakeholders and per-user profit
//! claims:
//!
//! - [`vault::VaultLedger`]: shares, trade settlement, performance fee
//! - [`revenue::RevenueDistributor`]: basis-point split of lifetime revenue
//! - [`claims::ProfitClaimLedger`]: profit credits with lockup and early fee
//!
//! Collaborators are reached only through [`ports`]; every mutating call is
//! an all-or-nothing [`guard`] transaction whose events reach an
//! [`events::EventSink`] only after it succeeds.

pub mod claims;
pub mod config;
pub mod deployment;
pub mod error;
pub mod events;
pub mod guard;
pub mod math;
pub mod ports;
pub mod revenue;
pub mod vault;

pub use claims::{ClaimRouting, ProfitClaimLedger};
pub use config::ProtocolConfig;
pub use deployment::Deployment;
pub use error::{ErrorKind, LedgerError, LedgerResult, TransferError};
pub use events::{EventRecord, EventSink, LedgerEvent, MemoryEventLog, SqliteEventStore};
pub use math::Amount;
pub use ports::{AccountId, Capability};
pub use revenue::RevenueDistributor;
pub use vault::{Strategy, VaultLedger};
