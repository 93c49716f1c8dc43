use serde::{Deserialize, Serialize};

/// Task status (spec §3, §4.3). A total enumeration; legal transitions are
/// given by [`TaskStatus::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum TaskStatus {
    Initial,
    PendingClarification,
    Clarified,
    PendingRegistration,
    PendingMatch,
    Matching,
    ProcessorAssigned,
    WorkflowAssigned,
    PendingConfirmation,
    Confirmed,
    Executing,
    Completed,
    Failed,
    Cancelled,
    NoMatchFound,
    MatchingFailed,
    ClarificationFailed,
    RegistrationFailed,
    Rejected,
}

impl TaskStatus {
    /// `true` if `self -> next` is a legal transition under the graph in
    /// spec §4.3 (including the idempotent retry edges).
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Initial, PendingClarification)
                | (PendingClarification, Clarified)
                | (PendingClarification, ClarificationFailed)
                | (PendingClarification, Cancelled)
                | (Clarified, PendingRegistration)
                | (PendingRegistration, PendingMatch)
                | (PendingRegistration, RegistrationFailed)
                | (PendingMatch, Matching)
                | (Matching, PendingConfirmation)
                | (Matching, NoMatchFound)
                | (Matching, MatchingFailed)
                | (MatchingFailed, Matching)
                | (NoMatchFound, Matching)
                | (PendingConfirmation, Confirmed)
                | (PendingConfirmation, Rejected)
                | (Confirmed, Executing)
                | (Executing, Completed)
                | (Executing, Failed)
                // Matching may also assign a processor/workflow before
                // reaching PendingConfirmation when a caller wants the
                // intermediate states observable (spec §3 data model lists
                // ProcessorAssigned/WorkflowAssigned as part of the status
                // enumeration even though §4.3's graph elides them).
                | (Matching, ProcessorAssigned)
                | (Matching, WorkflowAssigned)
                | (ProcessorAssigned, PendingConfirmation)
                | (WorkflowAssigned, PendingConfirmation)
        )
    }

    pub fn is_terminal_success(self) -> bool {
        matches!(self, TaskStatus::Completed)
    }

    pub fn is_terminal_failure(self) -> bool {
        matches!(
            self,
            TaskStatus::Failed
                | TaskStatus::Cancelled
                | TaskStatus::Rejected
                | TaskStatus::NoMatchFound
        )
    }

    /// States from which a matching run is considered already in flight or
    /// finished — spec §4.8 idempotent-skip table.
    pub fn is_matching_already_settled_or_running(self) -> bool {
        matches!(
            self,
            TaskStatus::Matching
                | TaskStatus::PendingConfirmation
                | TaskStatus::Confirmed
                | TaskStatus::Executing
                | TaskStatus::Completed
        )
    }

    /// States from which a matching run may legally start (spec §4.8:
    /// PendingMatch, MatchingFailed, NoMatchFound).
    pub fn is_matching_eligible(self) -> bool {
        matches!(
            self,
            TaskStatus::PendingMatch | TaskStatus::MatchingFailed | TaskStatus::NoMatchFound
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[TaskStatus] = &[
        TaskStatus::Initial,
        TaskStatus::PendingClarification,
        TaskStatus::Clarified,
        TaskStatus::PendingRegistration,
        TaskStatus::PendingMatch,
        TaskStatus::Matching,
        TaskStatus::ProcessorAssigned,
        TaskStatus::WorkflowAssigned,
        TaskStatus::PendingConfirmation,
        TaskStatus::Confirmed,
        TaskStatus::Executing,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
        TaskStatus::NoMatchFound,
        TaskStatus::MatchingFailed,
        TaskStatus::ClarificationFailed,
        TaskStatus::RegistrationFailed,
        TaskStatus::Rejected,
    ];

    #[test]
    fn happy_path_is_reachable() {
        use TaskStatus::*;
        let path = [
            Initial,
            PendingClarification,
            Clarified,
            PendingRegistration,
            PendingMatch,
            Matching,
            PendingConfirmation,
            Confirmed,
            Executing,
            Completed,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition_to(pair[1]),
                "{:?} -> {:?} should be legal",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn matching_retry_is_idempotent() {
        assert!(TaskStatus::MatchingFailed.can_transition_to(TaskStatus::Matching));
        assert!(TaskStatus::NoMatchFound.can_transition_to(TaskStatus::Matching));
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges_except_documented_retries() {
        for &state in ALL {
            if state.is_terminal_failure() && state != TaskStatus::NoMatchFound {
                for &next in ALL {
                    assert!(
                        !state.can_transition_to(next),
                        "{:?} should not transition to {:?}",
                        state,
                        next
                    );
                }
            }
        }
    }

    #[test]
    fn completed_is_a_true_sink() {
        for &next in ALL {
            assert!(!TaskStatus::Completed.can_transition_to(next));
        }
    }
}
