use serde::{Deserialize, Serialize};

/// Where a session's current (or last) workflow stands.
///
/// ```text
/// Idle -> Navigating -> (Authenticating | Interacting) -> WaitingForContent -> Extracting -> Done | Failed
/// ```
///
/// Multi-page workflows loop from `Extracting` back to `Navigating`;
/// interactive ones return from `Extracting` to `Interacting` between
/// extraction points. A finished workflow may be followed by the next one on
/// the same session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    #[default]
    Idle,
    Navigating,
    Authenticating,
    Interacting,
    WaitingForContent,
    Extracting,
    Done,
    Failed,
}

impl WorkflowState {
    /// A workflow is currently running on the navigator.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Navigating
                | Self::Authenticating
                | Self::Interacting
                | Self::WaitingForContent
                | Self::Extracting
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn can_transition_to(self, next: WorkflowState) -> bool {
        use WorkflowState::*;

        matches!(
            (self, next),
            (Idle | Done | Failed, Navigating)
                | (Navigating, Authenticating | Interacting | WaitingForContent)
                | (Authenticating, Done)
                | (Interacting, Navigating | WaitingForContent | Done)
                | (WaitingForContent, Extracting)
                | (Extracting, Done | Navigating | Interacting)
                | (
                    Idle | Navigating | Authenticating | Interacting | WaitingForContent
                        | Extracting | Done,
                    Failed
                )
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Navigating => "navigating",
            Self::Authenticating => "authenticating",
            Self::Interacting => "interacting",
            Self::WaitingForContent => "waiting_for_content",
            Self::Extracting => "extracting",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_path_is_legal() {
        let path = [
            WorkflowState::Idle,
            WorkflowState::Navigating,
            WorkflowState::WaitingForContent,
            WorkflowState::Extracting,
            WorkflowState::Done,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn test_auth_then_extract_is_legal() {
        assert!(WorkflowState::Navigating.can_transition_to(WorkflowState::Authenticating));
        assert!(WorkflowState::Authenticating.can_transition_to(WorkflowState::Done));
        assert!(WorkflowState::Done.can_transition_to(WorkflowState::Navigating));
    }

    #[test]
    fn test_interactive_path_is_legal() {
        let path = [
            WorkflowState::Navigating,
            WorkflowState::Interacting,
            WorkflowState::WaitingForContent,
            WorkflowState::Extracting,
            WorkflowState::Interacting,
            WorkflowState::Navigating,
            WorkflowState::Interacting,
            WorkflowState::Done,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
        assert!(!WorkflowState::Idle.can_transition_to(WorkflowState::Interacting));
    }

    #[test]
    fn test_skips_are_rejected() {
        assert!(!WorkflowState::Idle.can_transition_to(WorkflowState::Extracting));
        assert!(!WorkflowState::Navigating.can_transition_to(WorkflowState::Done));
        assert!(!WorkflowState::Idle.can_transition_to(WorkflowState::Done));
    }

    #[test]
    fn test_any_state_can_fail() {
        for state in [
            WorkflowState::Idle,
            WorkflowState::Navigating,
            WorkflowState::Authenticating,
            WorkflowState::Extracting,
        ] {
            assert!(state.can_transition_to(WorkflowState::Failed));
        }
        assert!(!WorkflowState::Failed.can_transition_to(WorkflowState::Failed));
    }

    #[test]
    fn test_activity() {
        assert!(WorkflowState::Extracting.is_active());
        assert!(!WorkflowState::Idle.is_active());
        assert!(WorkflowState::Failed.is_terminal());
        assert_eq!(
            serde_json::to_value(WorkflowState::WaitingForContent).unwrap(),
            "waiting_for_content"
        );
    }
}
