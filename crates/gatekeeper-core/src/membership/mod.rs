//! ============================================================================
//! Membership Module - Required-channel verification
//! ============================================================================
//! Enforces that the acting user belongs to every configured channel before a
//! gated command proceeds. The oracle (the chat platform's system of record)
//! is a trait seam; this module owns only the fail-closed gating logic.
//! ============================================================================

mod gate;
mod oracle;
mod types;

pub use gate::MembershipGate;
pub use oracle::MembershipOracle;
pub use types::{MembershipReport, MembershipStatus};
