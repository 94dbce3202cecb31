//! ============================================================================
//! Membership Types - Oracle statuses and check reports
//! ============================================================================

use serde::{Deserialize, Serialize};

use crate::db::ChannelRequirement;

/// What the membership oracle reports for one (channel, user) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Member,
    Administrator,
    Owner,
    NotMember,
}

impl MembershipStatus {
    /// Members, administrators and owners all satisfy the requirement.
    pub fn is_satisfied(&self) -> bool {
        !matches!(self, MembershipStatus::NotMember)
    }
}

/// Result of checking a user against the full requirement set.
///
/// `missing` preserves the configured channel order so the caller can render
/// join links for exactly the channels still unmet. `failures` carries the
/// underlying error of every oracle query that did not complete (each such
/// channel is also in `missing` — fail-closed); callers forward these to the
/// operator error channel.
#[derive(Debug)]
pub struct MembershipReport {
    pub satisfied: bool,
    pub missing: Vec<ChannelRequirement>,
    pub failures: Vec<(String, anyhow::Error)>,
}

impl MembershipReport {
    pub fn satisfied() -> Self {
        Self {
            satisfied: true,
            missing: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn with_missing(missing: Vec<ChannelRequirement>) -> Self {
        Self::from_checks(missing, Vec::new())
    }

    pub fn from_checks(
        missing: Vec<ChannelRequirement>,
        failures: Vec<(String, anyhow::Error)>,
    ) -> Self {
        Self {
            satisfied: missing.is_empty(),
            missing,
            failures,
        }
    }
}
