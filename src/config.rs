//! Protocol Configuration
//!
//! Loaded from TOML; any section or field may be omitted. Environment
//! variables override the file:
//!
//! | variable                | field                               |
//! |-------------------------|-------------------------------------|
//! | `VAULT_EMERGENCY_FEE_BP`| `vault.emergency_fee_bp`            |
//! | `CLAIMS_LOCKUP_SECS`    | `claims.lockup_secs`                |
//! | `CLAIMS_EARLY_FEE_BP`   | `claims.early_withdrawal_fee_bp`    |
//! | `VAULT_EVENT_DB`        | `event_store.sqlite_path`           |

use std::env;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::claims::MAX_EARLY_WITHDRAWAL_FEE_BP;
use crate::math::SECONDS_PER_DAY;
use crate::vault::{Strategy, MAX_EMERGENCY_FEE_BP};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    pub vault: VaultSettings,
    pub claims: ClaimSettings,
    pub event_store: EventStoreSettings,
}

/// Per-vault construction parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultSettings {
    /// Fee on emergency exits, fixed for the vault's lifetime.
    pub emergency_fee_bp: u32,
    /// Strategy in force until the first `update_strategy`.
    pub strategy: Strategy,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            emergency_fee_bp: 200,
            strategy: Strategy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimSettings {
    pub lockup_secs: i64,
    pub early_withdrawal_fee_bp: u32,
}

impl Default for ClaimSettings {
    fn default() -> Self {
        Self {
            lockup_secs: 7 * SECONDS_PER_DAY,
            early_withdrawal_fee_bp: 500,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventStoreSettings {
    /// Persist events to SQLite at this path; in-memory log when unset.
    pub sqlite_path: Option<String>,
}

impl ProtocolConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("parse protocol config")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(raw) = lookup("VAULT_EMERGENCY_FEE_BP") {
            self.vault.emergency_fee_bp = raw
                .trim()
                .parse()
                .context("Invalid VAULT_EMERGENCY_FEE_BP")?;
        }
        if let Some(raw) = lookup("CLAIMS_LOCKUP_SECS") {
            self.claims.lockup_secs = raw.trim().parse().context("Invalid CLAIMS_LOCKUP_SECS")?;
        }
        if let Some(raw) = lookup("CLAIMS_EARLY_FEE_BP") {
            self.claims.early_withdrawal_fee_bp =
                raw.trim().parse().context("Invalid CLAIMS_EARLY_FEE_BP")?;
        }
        if let Some(raw) = lookup("VAULT_EVENT_DB") {
            let raw = raw.trim();
            self.event_store.sqlite_path = (!raw.is_empty()).then(|| raw.to_string());
        }
        Ok(())
    }

    /// Same caps the ledgers enforce at construction.
    pub fn validate(&self) -> Result<()> {
        if self.vault.emergency_fee_bp > MAX_EMERGENCY_FEE_BP {
            bail!(
                "vault.emergency_fee_bp {} exceeds {}",
                self.vault.emergency_fee_bp,
                MAX_EMERGENCY_FEE_BP
            );
        }
        self.vault
            .strategy
            .validate()
            .context("vault.strategy")?;
        if self.claims.lockup_secs < 0 {
            bail!("claims.lockup_secs must not be negative");
        }
        if self.claims.early_withdrawal_fee_bp > MAX_EARLY_WITHDRAWAL_FEE_BP {
            bail!(
                "claims.early_withdrawal_fee_bp {} exceeds {}",
                self.claims.early_withdrawal_fee_bp,
                MAX_EARLY_WITHDRAWAL_FEE_BP
            );
        }
        Ok(())
    }
}
