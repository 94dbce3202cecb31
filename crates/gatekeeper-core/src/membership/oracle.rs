//! ============================================================================
//! Membership Oracle - External system-of-record seam
//! ============================================================================

use anyhow::Result;
use async_trait::async_trait;

use super::types::MembershipStatus;
use crate::db::ChannelRequirement;

/// External system of record for "is user X currently in channel Y".
///
/// Implementations wrap the chat platform's client; transport, retries and
/// timeouts are theirs. The gate treats every call as fallible and an error
/// as "not a member" — an unreachable oracle must never grant access.
#[async_trait]
pub trait MembershipOracle: Send + Sync {
    async fn is_member(
        &self,
        channel: &ChannelRequirement,
        user_id: i64,
    ) -> Result<MembershipStatus>;
}
