use std::collections::HashMap;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

/// The feature lifecycle. Any state may transition to `Failed`; `Complete`
/// and `Failed` are terminal (no outgoing transitions); `ReviewBlocked` is
/// the unique resumable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureStatus {
    Pending,
    GeneratingSpecs,
    ReviewingSpecs,
    UpdatingSpecs,
    ReviewBlocked,
    ValidatingSpecs,
    GeneratingTasks,
    SpecsCommitted,
    InProgress,
    UnitsComplete,
    PrOpen,
    Complete,
    Failed,
}

impl FeatureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureStatus::Pending => "pending",
            FeatureStatus::GeneratingSpecs => "generating_specs",
            FeatureStatus::ReviewingSpecs => "reviewing_specs",
            FeatureStatus::UpdatingSpecs => "updating_specs",
            FeatureStatus::ReviewBlocked => "review_blocked",
            FeatureStatus::ValidatingSpecs => "validating_specs",
            FeatureStatus::GeneratingTasks => "generating_tasks",
            FeatureStatus::SpecsCommitted => "specs_committed",
            FeatureStatus::InProgress => "in_progress",
            FeatureStatus::UnitsComplete => "units_complete",
            FeatureStatus::PrOpen => "pr_open",
            FeatureStatus::Complete => "complete",
            FeatureStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for FeatureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The transition relation is data, not code: a mapping from state to the
/// set of states it may transition to. `can_transition`/`is_terminal`
/// derive from it; a state with an empty outgoing set is terminal by
/// definition. Adding a state is one table edit.
fn transition_table() -> &'static HashMap<FeatureStatus, Vec<FeatureStatus>> {
    static TABLE: OnceLock<HashMap<FeatureStatus, Vec<FeatureStatus>>> = OnceLock::new();
    TABLE.get_or_init(|| {
        use FeatureStatus::*;
        let mut table = HashMap::new();
        table.insert(Pending, vec![GeneratingSpecs]);
        table.insert(GeneratingSpecs, vec![ReviewingSpecs]);
        table.insert(ReviewingSpecs, vec![UpdatingSpecs, ValidatingSpecs, ReviewBlocked]);
        table.insert(UpdatingSpecs, vec![ReviewingSpecs]);
        table.insert(ReviewBlocked, vec![ReviewingSpecs, ValidatingSpecs]);
        table.insert(ValidatingSpecs, vec![GeneratingTasks]);
        table.insert(GeneratingTasks, vec![SpecsCommitted]);
        table.insert(SpecsCommitted, vec![InProgress]);
        table.insert(InProgress, vec![UnitsComplete]);
        table.insert(UnitsComplete, vec![PrOpen]);
        table.insert(PrOpen, vec![Complete]);
        table.insert(Complete, vec![]);
        table.insert(Failed, vec![]);

        // Any non-terminal state may also transition to `Failed`.
        for (state, targets) in table.iter_mut() {
            if !matches!(state, Complete | Failed) {
                targets.push(Failed);
            }
        }
        table
    })
}

pub fn can_transition(from: FeatureStatus, to: FeatureStatus) -> bool {
    transition_table()
        .get(&from)
        .map(|targets| targets.contains(&to))
        .unwrap_or(false)
}

pub fn is_terminal(state: FeatureStatus) -> bool {
    transition_table().get(&state).map(|t| t.is_empty()).unwrap_or(true)
}

pub fn outgoing(state: FeatureStatus) -> &'static [FeatureStatus] {
    transition_table().get(&state).map(|v| v.as_slice()).unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use FeatureStatus::*;

    #[test]
    fn every_state_with_an_outgoing_entry_agrees_with_can_transition() {
        for (&from, targets) in transition_table() {
            for &to in targets {
                assert!(can_transition(from, to), "{from} -> {to} should be allowed");
            }
            for candidate in ALL_STATES {
                if !targets.contains(candidate) {
                    assert!(!can_transition(from, *candidate), "{from} -> {candidate} should be rejected");
                }
            }
        }
    }

    const ALL_STATES: &[FeatureStatus] = &[
        Pending,
        GeneratingSpecs,
        ReviewingSpecs,
        UpdatingSpecs,
        ReviewBlocked,
        ValidatingSpecs,
        GeneratingTasks,
        SpecsCommitted,
        InProgress,
        UnitsComplete,
        PrOpen,
        Complete,
        Failed,
    ];

    #[test]
    fn complete_and_failed_are_terminal() {
        assert!(is_terminal(Complete));
        assert!(is_terminal(Failed));
        assert!(outgoing(Complete).is_empty());
    }

    #[test]
    fn review_blocked_can_resume_to_reviewing_or_validating() {
        assert!(can_transition(ReviewBlocked, ReviewingSpecs));
        assert!(can_transition(ReviewBlocked, ValidatingSpecs));
        assert!(!can_transition(ReviewBlocked, Complete));
    }

    #[test]
    fn every_non_terminal_state_can_reach_failed() {
        for &state in ALL_STATES {
            if !is_terminal(state) {
                assert!(can_transition(state, Failed), "{state} should transition to failed");
            }
        }
    }

    #[test]
    fn display_matches_snake_case_strings() {
        assert_eq!(InProgress.to_string(), "in_progress");
        assert_eq!(PrOpen.to_string(), "pr_open");
    }
}
