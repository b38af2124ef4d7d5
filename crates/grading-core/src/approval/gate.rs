//! Approval gate state machine.
//!
//! ```text
//! enter ──(no approval needed)──> NotRequired
//!   └───(approval needed)──────> AwaitingApproval ──confirmed──> Approved
//!                                        │        └──refused───> Rejected
//!                                        └──past expires_at───> Expired
//! ```
//!
//! The gate lives inside the persisted run, so resolving it after a restart
//! needs nothing but the stored record.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::summary::ApprovalSummary;
use crate::domain::{AggregationResult, ApprovalDecision, GradingError, GradingResult};

/// Gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    NotRequired,
    AwaitingApproval,
    Approved,
    Rejected,
    Expired,
}

impl GateState {
    /// Whether the run may proceed to feedback.
    pub fn allows_feedback(&self) -> bool {
        matches!(self, Self::NotRequired | Self::Approved | Self::Rejected)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::AwaitingApproval)
    }
}

/// Why [`ApprovalGate::resolve`] refused a decision.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GateError {
    #[error("gate is {0:?}, not awaiting approval")]
    NotAwaiting(GateState),

    #[error("gate already resolved with confirmed={confirmed}")]
    AlreadyResolved { confirmed: bool },

    #[error("gate expired at {expired_at}")]
    Expired { expired_at: DateTime<Utc> },
}

/// Result of applying a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The decision moved the gate to this state.
    Applied(GateState),
    /// The same decision was already recorded; nothing changed.
    Replayed(GateState),
}

/// Persisted approval checkpoint for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalGate {
    pub state: GateState,
    pub opened_at: DateTime<Utc>,
    /// Deadline for a decision, if one is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ApprovalSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<ApprovalDecision>,
}

impl ApprovalGate {
    /// Enter the gate for `aggregation`.
    ///
    /// `timeout_secs` only applies when the gate actually suspends. A
    /// timeout whose deadline cannot be represented is an
    /// [`GradingError::InvalidConfig`].
    pub fn enter(
        aggregation: &AggregationResult,
        timeout_secs: Option<u64>,
        now: DateTime<Utc>,
    ) -> GradingResult<Self> {
        if !aggregation.requires_approval {
            return Ok(Self {
                state: GateState::NotRequired,
                opened_at: now,
                expires_at: None,
                summary: None,
                decision: None,
            });
        }
        let expires_at = timeout_secs.map(|s| deadline(now, s)).transpose()?;
        Ok(Self {
            state: GateState::AwaitingApproval,
            opened_at: now,
            expires_at,
            summary: Some(ApprovalSummary::from_aggregation(aggregation)),
            decision: None,
        })
    }

    /// Whether a pending gate is past its deadline at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.state == GateState::AwaitingApproval && self.expires_at.is_some_and(|exp| now >= exp)
    }

    /// Move an overdue pending gate to [`GateState::Expired`].
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_expired_at(now) {
            self.state = GateState::Expired;
            true
        } else {
            false
        }
    }

    /// Apply a reviewer decision.
    ///
    /// Errors leave the gate untouched. Re-applying the decision already
    /// recorded is accepted and reported as [`Resolution::Replayed`].
    pub fn resolve(
        &mut self,
        decision: ApprovalDecision,
        now: DateTime<Utc>,
    ) -> Result<Resolution, GateError> {
        match self.state {
            GateState::AwaitingApproval => {
                if let Some(expired_at) = self.expires_at.filter(|exp| now >= *exp) {
                    return Err(GateError::Expired { expired_at });
                }
                let next = if decision.confirmed {
                    GateState::Approved
                } else {
                    GateState::Rejected
                };
                self.state = next;
                self.decision = Some(decision);
                Ok(Resolution::Applied(next))
            }
            GateState::Approved | GateState::Rejected => {
                let recorded = self
                    .decision
                    .as_ref()
                    .map(|d| d.confirmed)
                    .unwrap_or(self.state == GateState::Approved);
                if recorded == decision.confirmed {
                    Ok(Resolution::Replayed(self.state))
                } else {
                    Err(GateError::AlreadyResolved {
                        confirmed: recorded,
                    })
                }
            }
            GateState::Expired => Err(GateError::Expired {
                expired_at: self.expires_at.unwrap_or(self.opened_at),
            }),
            GateState::NotRequired => Err(GateError::NotAwaiting(self.state)),
        }
    }
}

/// `now + timeout_secs`, without wrapping or panicking.
fn deadline(now: DateTime<Utc>, timeout_secs: u64) -> GradingResult<DateTime<Utc>> {
    i64::try_from(timeout_secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| {
            GradingError::InvalidConfig(format!(
                "approval timeout of {timeout_secs}s puts the deadline out of range"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LetterGrade;

    fn aggregation(percentage: f64, requires_approval: bool) -> AggregationResult {
        AggregationResult {
            total_score: percentage,
            max_possible: 100.0,
            percentage,
            letter_grade: LetterGrade::from_percentage(percentage),
            details: vec![],
            requires_approval,
            approval_reason: requires_approval.then(|| "check".to_string()),
        }
    }

    #[test]
    fn test_enter_without_approval_is_pass_through() {
        let gate = ApprovalGate::enter(&aggregation(75.0, false), Some(60), Utc::now()).unwrap();
        assert_eq!(gate.state, GateState::NotRequired);
        assert!(gate.state.allows_feedback());
        assert!(gate.expires_at.is_none());
        assert!(gate.summary.is_none());
    }

    #[test]
    fn test_enter_with_approval_suspends() {
        let now = Utc::now();
        let gate = ApprovalGate::enter(&aggregation(93.0, true), Some(60), now).unwrap();
        assert_eq!(gate.state, GateState::AwaitingApproval);
        assert!(!gate.state.allows_feedback());
        assert_eq!(gate.expires_at, Some(now + chrono::Duration::seconds(60)));
        assert!(gate.summary.is_some());
    }

    #[test]
    fn test_unrepresentable_timeout_is_a_config_error() {
        let now = Utc::now();
        for ttl in [10_000_000_000_000_000, i64::MAX as u64 + 1, u64::MAX] {
            assert!(matches!(
                ApprovalGate::enter(&aggregation(93.0, true), Some(ttl), now),
                Err(GradingError::InvalidConfig(_))
            ));
        }
        // Pass-through gates never compute a deadline.
        let gate = ApprovalGate::enter(&aggregation(75.0, false), Some(u64::MAX), now).unwrap();
        assert_eq!(gate.state, GateState::NotRequired);
    }

    #[test]
    fn test_confirm_and_reject() {
        let now = Utc::now();
        let mut gate = ApprovalGate::enter(&aggregation(93.0, true), None, now).unwrap();
        assert_eq!(
            gate.resolve(ApprovalDecision::approve("Ms. Rivera"), now),
            Ok(Resolution::Applied(GateState::Approved))
        );

        let mut gate = ApprovalGate::enter(&aggregation(20.0, true), None, now).unwrap();
        assert_eq!(
            gate.resolve(ApprovalDecision::reject("Ms. Rivera"), now),
            Ok(Resolution::Applied(GateState::Rejected))
        );
        assert!(gate.state.allows_feedback());
    }

    #[test]
    fn test_repeat_decision_is_replayed_opposite_is_refused() {
        let now = Utc::now();
        let mut gate = ApprovalGate::enter(&aggregation(93.0, true), None, now).unwrap();
        gate.resolve(ApprovalDecision::approve("Ms. Rivera"), now).unwrap();
        let recorded = gate.decision.clone();

        assert_eq!(
            gate.resolve(ApprovalDecision::approve("Ms. Rivera"), now),
            Ok(Resolution::Replayed(GateState::Approved))
        );
        assert_eq!(
            gate.resolve(ApprovalDecision::reject("someone else"), now),
            Err(GateError::AlreadyResolved { confirmed: true })
        );
        assert_eq!(gate.decision, recorded);
    }

    #[test]
    fn test_not_required_gate_refuses_decisions() {
        let now = Utc::now();
        let mut gate = ApprovalGate::enter(&aggregation(75.0, false), None, now).unwrap();
        assert_eq!(
            gate.resolve(ApprovalDecision::approve("Ms. Rivera"), now),
            Err(GateError::NotAwaiting(GateState::NotRequired))
        );
        assert!(gate.decision.is_none());
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let mut gate = ApprovalGate::enter(&aggregation(93.0, true), Some(30), now).unwrap();
        let later = now + chrono::Duration::seconds(31);

        assert!(!gate.is_expired_at(now));
        assert!(gate.is_expired_at(later));
        assert!(matches!(
            gate.resolve(ApprovalDecision::approve("Ms. Rivera"), later),
            Err(GateError::Expired { .. })
        ));
        assert_eq!(gate.state, GateState::AwaitingApproval);

        assert!(gate.expire_if_due(later));
        assert_eq!(gate.state, GateState::Expired);
        assert!(gate.state.is_terminal());
        assert!(!gate.expire_if_due(later));
    }
}
