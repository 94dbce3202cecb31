//! ============================================================================
//! Gate Configuration - Credit amounts and grant cadence
//! ============================================================================

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Seconds in one grant window (24h). The daily-grant boundary is a plain
/// UTC epoch-seconds comparison, never calendar/local-time arithmetic.
pub const DEFAULT_GRANT_INTERVAL_SECS: i64 = 86_400;

/// Credit policy configuration.
///
/// Owned explicitly by the components that need it (ledger, spend gate);
/// never process-global. Env overrides via [`GateConfig::from_env`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Balance seeded on first registration.
    pub start_balance: u32,
    /// Credits added by each daily grant.
    pub daily_grant: u32,
    /// One-time credit to a referrer when a referred account registers.
    pub referral_bonus: u32,
    /// Default cost of a billable action.
    pub default_cost: u32,
    /// Minimum elapsed seconds between daily grants.
    pub grant_interval_secs: i64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            start_balance: 5,
            daily_grant: 5,
            referral_bonus: 10,
            default_cost: 1,
            grant_interval_secs: DEFAULT_GRANT_INTERVAL_SECS,
        }
    }
}

impl GateConfig {
    /// Build from defaults with `GATEKEEPER_*` env overrides.
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        if let Some(v) = env_u32("GATEKEEPER_START_BALANCE") {
            config.start_balance = v;
        }
        if let Some(v) = env_u32("GATEKEEPER_DAILY_GRANT") {
            config.daily_grant = v;
        }
        if let Some(v) = env_u32("GATEKEEPER_REFERRAL_BONUS") {
            config.referral_bonus = v;
        }
        if let Some(v) = env_u32("GATEKEEPER_DEFAULT_COST") {
            config.default_cost = v;
        }
        if let Ok(raw) = std::env::var("GATEKEEPER_GRANT_INTERVAL_SECS") {
            match raw.parse::<i64>() {
                Ok(v) if v > 0 => config.grant_interval_secs = v,
                _ => warn!("Ignoring invalid GATEKEEPER_GRANT_INTERVAL_SECS={}", raw),
            }
        }
        config
    }
}

fn env_u32(name: &str) -> Option<u32> {
    let raw = std::env::var(name).ok()?;
    match raw.parse::<u32>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring invalid {}={}", name, raw);
            None
        }
    }
}
