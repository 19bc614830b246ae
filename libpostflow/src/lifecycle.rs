//! Post lifecycle state machine
//!
//! ```text
//! draft --submit--> pending_review
//! pending_review --approve--> approved
//! pending_review --reject--> rejected                 (terminal)
//! approved --schedule--> scheduled
//! scheduled --claim--> dispatching
//! partially_failed --redispatch--> dispatching
//! dispatching --finish--> posted | partially_failed | failed
//! ```
//!
//! [`step`] is a pure function over the current state. The store applies its
//! answer with a compare-and-set, so this table is the single serialization
//! point for every post.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PostflowError, Result};
use crate::types::{PlatformStatus, PostState};

/// Aggregate result of one dispatch round
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Posted,
    PartiallyFailed,
    Failed,
}

impl DispatchOutcome {
    pub fn state(self) -> PostState {
        match self {
            DispatchOutcome::Posted => PostState::Posted,
            DispatchOutcome::PartiallyFailed => PostState::PartiallyFailed,
            DispatchOutcome::Failed => PostState::Failed,
        }
    }

    /// Aggregate per-platform statuses. Returns `None` while any platform is
    /// still pending or when there is nothing to aggregate.
    pub fn aggregate<'a, I>(statuses: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a PlatformStatus>,
    {
        let mut successes = 0usize;
        let mut failures = 0usize;
        for status in statuses {
            match status {
                PlatformStatus::Pending => return None,
                PlatformStatus::Success => successes += 1,
                PlatformStatus::Failure => failures += 1,
            }
        }

        match (successes, failures) {
            (0, 0) => None,
            (_, 0) => Some(DispatchOutcome::Posted),
            (0, _) => Some(DispatchOutcome::Failed),
            _ => Some(DispatchOutcome::PartiallyFailed),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Submit,
    Approve,
    Reject,
    Schedule,
    Claim,
    Redispatch,
    Finish(DispatchOutcome),
}

impl Transition {
    /// Claims grant exclusive dispatch rights and are never idempotent.
    pub fn is_claim(&self) -> bool {
        matches!(self, Transition::Claim | Transition::Redispatch)
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Submit => f.write_str("submit"),
            Transition::Approve => f.write_str("approve"),
            Transition::Reject => f.write_str("reject"),
            Transition::Schedule => f.write_str("schedule"),
            Transition::Claim => f.write_str("claim"),
            Transition::Redispatch => f.write_str("redispatch"),
            Transition::Finish(outcome) => write!(f, "finish as {}", outcome.state()),
        }
    }
}

/// Answer of the state machine for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Move to the given state
    Advance(PostState),
    /// Duplicate request whose target is already reached; no-op success
    AlreadyThere,
}

/// Decide what `transition` means for a post currently in `state`.
pub fn step(post_id: &str, state: PostState, transition: Transition) -> Result<Step> {
    use DispatchOutcome as O;
    use PostState::*;
    use Transition as T;

    let next = match (state, transition) {
        (Draft, T::Submit) => Step::Advance(PendingReview),
        (PendingReview, T::Approve) => Step::Advance(Approved),
        (PendingReview, T::Reject) => Step::Advance(Rejected),
        (Approved, T::Schedule) => Step::Advance(Scheduled),
        (Scheduled, T::Claim) => Step::Advance(Dispatching),
        (PartiallyFailed, T::Redispatch) => Step::Advance(Dispatching),
        (Dispatching, T::Finish(outcome)) => Step::Advance(outcome.state()),

        // Duplicates of a request that already took effect
        (PendingReview, T::Submit) => Step::AlreadyThere,
        (Approved | Scheduled, T::Approve) => Step::AlreadyThere,
        (Scheduled, T::Schedule) => Step::AlreadyThere,
        (Posted, T::Finish(O::Posted))
        | (Failed, T::Finish(O::Failed))
        | (PartiallyFailed, T::Finish(O::PartiallyFailed)) => Step::AlreadyThere,

        (Dispatching, T::Claim | T::Redispatch) => {
            return Err(PostflowError::ClaimConflict {
                post_id: post_id.to_string(),
                state,
            })
        }

        // Duplicates that disagree with the outcome already recorded
        (Approved | Scheduled, T::Reject) | (Posted | Failed | PartiallyFailed, T::Finish(_)) => {
            return Err(PostflowError::ConflictingTransition {
                post_id: post_id.to_string(),
                state,
                transition,
            })
        }

        _ => {
            return Err(PostflowError::InvalidTransition {
                post_id: post_id.to_string(),
                state,
                transition,
            })
        }
    };

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use PostState::*;

    const ALL_TRANSITIONS: [Transition; 9] = [
        Transition::Submit,
        Transition::Approve,
        Transition::Reject,
        Transition::Schedule,
        Transition::Claim,
        Transition::Redispatch,
        Transition::Finish(DispatchOutcome::Posted),
        Transition::Finish(DispatchOutcome::PartiallyFailed),
        Transition::Finish(DispatchOutcome::Failed),
    ];

    #[test]
    fn test_forward_edges() {
        let cases = [
            (Draft, Transition::Submit, PendingReview),
            (PendingReview, Transition::Approve, Approved),
            (PendingReview, Transition::Reject, Rejected),
            (Approved, Transition::Schedule, Scheduled),
            (Scheduled, Transition::Claim, Dispatching),
            (PartiallyFailed, Transition::Redispatch, Dispatching),
            (Dispatching, Transition::Finish(DispatchOutcome::Posted), Posted),
            (Dispatching, Transition::Finish(DispatchOutcome::Failed), Failed),
            (
                Dispatching,
                Transition::Finish(DispatchOutcome::PartiallyFailed),
                PartiallyFailed,
            ),
        ];

        for (from, transition, to) in cases {
            assert_eq!(
                step("p", from, transition).unwrap(),
                Step::Advance(to),
                "{} --{}-->",
                from,
                transition
            );
        }
    }

    #[test]
    fn test_rejected_accepts_nothing() {
        for transition in ALL_TRANSITIONS {
            let err = step("p", Rejected, transition).unwrap_err();
            assert!(
                matches!(err, PostflowError::InvalidTransition { .. }),
                "{} on rejected gave {:?}",
                transition,
                err
            );
        }
    }

    #[test]
    fn test_every_edge_outside_graph_is_an_error() {
        for state in PostState::ALL {
            for transition in ALL_TRANSITIONS {
                if let Ok(Step::Advance(to)) = step("p", state, transition) {
                    // Only the documented edges may advance
                    let documented = matches!(
                        (state, to),
                        (Draft, PendingReview)
                            | (PendingReview, Approved)
                            | (PendingReview, Rejected)
                            | (Approved, Scheduled)
                            | (Scheduled, Dispatching)
                            | (PartiallyFailed, Dispatching)
                            | (Dispatching, Posted)
                            | (Dispatching, PartiallyFailed)
                            | (Dispatching, Failed)
                    );
                    assert!(documented, "undocumented edge {} -> {}", state, to);
                }
            }
        }
    }

    #[test]
    fn test_duplicate_requests_are_noops() {
        assert_eq!(
            step("p", PendingReview, Transition::Submit).unwrap(),
            Step::AlreadyThere
        );
        assert_eq!(step("p", Approved, Transition::Approve).unwrap(), Step::AlreadyThere);
        assert_eq!(step("p", Scheduled, Transition::Approve).unwrap(), Step::AlreadyThere);
        assert_eq!(
            step("p", Posted, Transition::Finish(DispatchOutcome::Posted)).unwrap(),
            Step::AlreadyThere
        );
    }

    #[test]
    fn test_duplicates_with_different_outcome_conflict() {
        let err = step("p", Approved, Transition::Reject).unwrap_err();
        assert!(matches!(err, PostflowError::ConflictingTransition { .. }));

        let err = step("p", Posted, Transition::Finish(DispatchOutcome::Failed)).unwrap_err();
        assert!(matches!(err, PostflowError::ConflictingTransition { .. }));
    }

    #[test]
    fn test_claim_on_dispatching_is_claim_conflict() {
        let err = step("p", Dispatching, Transition::Claim).unwrap_err();
        assert!(matches!(err, PostflowError::ClaimConflict { .. }));

        let err = step("p", Dispatching, Transition::Redispatch).unwrap_err();
        assert!(matches!(err, PostflowError::ClaimConflict { .. }));
    }

    #[test]
    fn test_redispatch_only_from_partially_failed() {
        for state in [Posted, Failed, Scheduled, Approved] {
            let err = step("p", state, Transition::Redispatch).unwrap_err();
            assert!(matches!(err, PostflowError::InvalidTransition { .. }));
        }
    }

    #[test]
    fn test_aggregate() {
        use PlatformStatus::*;

        assert_eq!(
            DispatchOutcome::aggregate(&[Success, Success]),
            Some(DispatchOutcome::Posted)
        );
        assert_eq!(
            DispatchOutcome::aggregate(&[Failure, Failure]),
            Some(DispatchOutcome::Failed)
        );
        assert_eq!(
            DispatchOutcome::aggregate(&[Success, Failure]),
            Some(DispatchOutcome::PartiallyFailed)
        );
        assert_eq!(DispatchOutcome::aggregate(&[Success, Pending]), None);
        assert_eq!(DispatchOutcome::aggregate(&[] as &[PlatformStatus]), None);
    }
}
