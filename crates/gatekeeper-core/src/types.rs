//! ============================================================================
//! Core Types - Gate errors, contexts, and command outcomes
//! ============================================================================

use serde::{Deserialize, Serialize};

use crate::db::ChannelRequirement;

/// Conversation scope a command arrives from.
///
/// Group contexts are never metered per-individual: a spend check inside a
/// group always passes without touching any balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Private,
    Group,
}

impl ContextKind {
    pub fn is_private(&self) -> bool {
        matches!(self, ContextKind::Private)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKind::Private => "private",
            ContextKind::Group => "group",
        }
    }
}

/// Gate-level error taxonomy.
///
/// Everything the gate can refuse with is one of these; raw store or oracle
/// errors never cross the command surface. `user_message` renders the
/// non-leaking text shown to end users.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// One or more required channels unmet. Carries the full missing list so
    /// the caller can render join links for exactly those channels.
    #[error("membership unsatisfied: {} channel(s) missing", missing.len())]
    MembershipUnsatisfied { missing: Vec<ChannelRequirement> },

    /// Spend check failed; not a system error.
    #[error("insufficient balance: {balance} credit(s) remaining")]
    InsufficientBalance { balance: u32 },

    /// Account is suspended by an operator.
    #[error("account suspended")]
    Suspended { reason: Option<String> },

    /// A membership oracle query failed. The gate folds this into
    /// fail-closed missing channels for the user; the wrapped source is
    /// forwarded to the audit notifier.
    #[error("membership oracle unavailable")]
    OracleUnavailable(#[source] anyhow::Error),

    /// Ledger mutation could not be committed. The action must not execute.
    #[error("ledger write failed")]
    StoreWriteFailure(#[source] anyhow::Error),
}

impl GateError {
    /// Generic, non-leaking text for end users. No internal identifiers,
    /// no error chains.
    pub fn user_message(&self) -> String {
        match self {
            GateError::MembershipUnsatisfied { missing } => format!(
                "You must join {} more channel(s) before using this command.",
                missing.len()
            ),
            GateError::InsufficientBalance { .. } => {
                "Insufficient credits. Use the balance command to check yours.".to_string()
            }
            GateError::Suspended { reason } => match reason {
                Some(r) => format!("Your account is suspended: {}", r),
                None => "Your account is suspended.".to_string(),
            },
            GateError::OracleUnavailable(_) | GateError::StoreWriteFailure(_) => {
                "Something went wrong on our side. Please try again later.".to_string()
            }
        }
    }

    /// Whether this is a user-condition refusal rather than a system fault.
    pub fn is_user_refusal(&self) -> bool {
        matches!(
            self,
            GateError::MembershipUnsatisfied { .. }
                | GateError::InsufficientBalance { .. }
                | GateError::Suspended { .. }
        )
    }
}

/// Terminal outcome of one gated command invocation.
#[derive(Debug)]
pub enum GateOutcome {
    /// Gate refused before EXECUTE; no lookup ran, nothing was logged
    /// (and for membership/suspension refusals, nothing was debited).
    Blocked(GateError),
    /// Lookup ran after a successful (or unmetered) spend check.
    /// `result` is the collaborator's outcome; a collaborator failure does
    /// not refund the debit and usage is logged either way.
    Executed { result: anyhow::Result<String> },
}

impl GateOutcome {
    pub fn executed_ok(&self) -> bool {
        matches!(self, GateOutcome::Executed { result: Ok(_) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_kind() {
        assert!(ContextKind::Private.is_private());
        assert!(!ContextKind::Group.is_private());
        assert_eq!(ContextKind::Group.as_str(), "group");
    }

    #[test]
    fn test_user_messages_do_not_leak() {
        let err = GateError::StoreWriteFailure(anyhow::anyhow!("redb: page 0x7f corrupt"));
        let msg = err.user_message();
        assert!(!msg.contains("redb"));
        assert!(!msg.contains("0x7f"));
    }

    #[test]
    fn test_user_refusal_classification() {
        assert!(GateError::InsufficientBalance { balance: 0 }.is_user_refusal());
        assert!(GateError::MembershipUnsatisfied { missing: vec![] }.is_user_refusal());
        assert!(!GateError::StoreWriteFailure(anyhow::anyhow!("x")).is_user_refusal());
    }
}
