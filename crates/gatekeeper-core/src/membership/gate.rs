//! ============================================================================
//! Membership Gate - Fail-closed required-channel checking
//! ============================================================================
//! Owns the requirement list as explicit state with an administrative
//! `reload()`, replacing any notion of a process-global channel list.
//! ============================================================================

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::oracle::MembershipOracle;
use super::types::MembershipReport;
use crate::db::ChannelRequirement;

/// Membership gate over a pluggable oracle.
///
/// `check_all` has no side effects and is safe to call repeatedly; any
/// throttling belongs to the oracle implementation.
pub struct MembershipGate {
    oracle: Arc<dyn MembershipOracle>,
    channels: RwLock<Vec<ChannelRequirement>>,
}

impl MembershipGate {
    pub fn new(oracle: Arc<dyn MembershipOracle>, channels: Vec<ChannelRequirement>) -> Self {
        Self {
            oracle,
            channels: RwLock::new(channels),
        }
    }

    /// Swap the requirement set. Invoked by the admin surface after channel
    /// add/remove, typically with `LedgerDb::list_channels()`.
    pub async fn reload(&self, channels: Vec<ChannelRequirement>) {
        let count = channels.len();
        *self.channels.write().await = channels;
        info!("Reloaded {} channel requirement(s)", count);
    }

    /// Current requirement set, in configured order.
    pub async fn channels(&self) -> Vec<ChannelRequirement> {
        self.channels.read().await.clone()
    }

    /// Check the user against every required channel.
    ///
    /// Exempt users (operators) short-circuit with zero oracle queries.
    /// Channels are queried sequentially in configured order; one failing
    /// query never aborts the rest. An oracle error counts the channel as
    /// missing (fail-closed) and is returned in the report's `failures` so
    /// the caller can forward it to the operator error channel.
    pub async fn check_all(&self, user_id: i64, exempt: bool) -> MembershipReport {
        if exempt {
            debug!("Membership check skipped for exempt user {}", user_id);
            return MembershipReport::satisfied();
        }

        let channels = self.channels.read().await.clone();
        let mut missing = Vec::new();
        let mut failures = Vec::new();

        for channel in channels {
            match self.oracle.is_member(&channel, user_id).await {
                Ok(status) if status.is_satisfied() => {}
                Ok(_) => {
                    debug!("User {} not in @{}", user_id, channel.username);
                    missing.push(channel);
                }
                Err(e) => {
                    // Unreachable oracle must never silently grant access.
                    warn!(
                        "Membership query failed for @{} (user {}): {} - treating as not a member",
                        channel.username, user_id, e
                    );
                    failures.push((channel.username.clone(), e));
                    missing.push(channel);
                }
            }
        }

        MembershipReport::from_checks(missing, failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::MembershipStatus;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Scripted oracle: per-channel status or error, recording each query.
    struct ScriptedOracle {
        outcomes: Vec<(String, Result<MembershipStatus, ()>)>,
        queries: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MembershipOracle for ScriptedOracle {
        async fn is_member(
            &self,
            channel: &ChannelRequirement,
            _user_id: i64,
        ) -> Result<MembershipStatus> {
            self.queries.lock().unwrap().push(channel.username.clone());
            for (username, outcome) in &self.outcomes {
                if username == &channel.username {
                    return match outcome {
                        Ok(status) => Ok(*status),
                        Err(()) => Err(anyhow!("oracle unreachable for @{}", username)),
                    };
                }
            }
            Ok(MembershipStatus::NotMember)
        }
    }

    fn channel(username: &str) -> ChannelRequirement {
        ChannelRequirement {
            name: username.to_uppercase(),
            username: username.to_string(),
            invite_link: format!("https://example.org/{}", username),
            is_private: false,
            button_text: None,
        }
    }

    fn gate_with(
        outcomes: Vec<(String, Result<MembershipStatus, ()>)>,
        channels: Vec<ChannelRequirement>,
    ) -> (MembershipGate, Arc<ScriptedOracle>) {
        let oracle = Arc::new(ScriptedOracle {
            outcomes,
            queries: Mutex::new(Vec::new()),
        });
        (MembershipGate::new(oracle.clone(), channels), oracle)
    }

    #[tokio::test]
    async fn test_all_satisfied() {
        let (gate, _) = gate_with(
            vec![
                ("a".into(), Ok(MembershipStatus::Member)),
                ("b".into(), Ok(MembershipStatus::Administrator)),
            ],
            vec![channel("a"), channel("b")],
        );
        let report = gate.check_all(1, false).await;
        assert!(report.satisfied);
        assert!(report.missing.is_empty());
    }

    #[tokio::test]
    async fn test_missing_preserves_order() {
        let (gate, _) = gate_with(
            vec![
                ("a".into(), Ok(MembershipStatus::NotMember)),
                ("b".into(), Ok(MembershipStatus::Member)),
                ("c".into(), Ok(MembershipStatus::NotMember)),
            ],
            vec![channel("a"), channel("b"), channel("c")],
        );
        let report = gate.check_all(1, false).await;
        assert!(!report.satisfied);
        let names: Vec<_> = report.missing.iter().map(|c| c.username.as_str()).collect();
        assert_eq!(names, ["a", "c"]);
    }

    #[tokio::test]
    async fn test_oracle_error_is_fail_closed() {
        let (gate, oracle) = gate_with(
            vec![
                ("a".into(), Err(())),
                ("b".into(), Ok(MembershipStatus::Member)),
            ],
            vec![channel("a"), channel("b")],
        );
        let report = gate.check_all(1, false).await;
        assert!(!report.satisfied);
        assert_eq!(report.missing[0].username, "a");
        // The failing channel did not abort checking the rest
        assert_eq!(*oracle.queries.lock().unwrap(), vec!["a", "b"]);
        // The underlying error is surfaced for out-of-band reporting
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, "a");
        assert!(report.failures[0].1.to_string().contains("unreachable"));
    }

    #[tokio::test]
    async fn test_exempt_short_circuits_without_queries() {
        let (gate, oracle) = gate_with(
            vec![("a".into(), Err(()))],
            vec![channel("a")],
        );
        let report = gate.check_all(1, true).await;
        assert!(report.satisfied);
        assert!(oracle.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reload_swaps_requirements() {
        let (gate, _) = gate_with(
            vec![("a".into(), Ok(MembershipStatus::NotMember))],
            vec![channel("a")],
        );
        assert!(!gate.check_all(1, false).await.satisfied);

        gate.reload(Vec::new()).await;
        assert!(gate.check_all(1, false).await.satisfied);
        assert!(gate.channels().await.is_empty());
    }
}
