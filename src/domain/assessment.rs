use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AssessmentStatus {
    Pending,
    Active,
    Paused,
    Failed,
    Passed,
    Abandoned,
}

impl AssessmentStatus {
    /// Terminal states never transition again (spec.md §3, invariant I3).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AssessmentStatus::Failed | AssessmentStatus::Passed | AssessmentStatus::Abandoned
        )
    }

    /// Whether `self -> next` is one of the transitions spec.md §3 draws.
    pub fn can_transition_to(self, next: AssessmentStatus) -> bool {
        use AssessmentStatus::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (Pending, Active)
                | (Active, Paused)
                | (Paused, Active)
                | (Active, Failed)
                | (Active, Passed)
                | (Active, Abandoned)
                | (Paused, Abandoned)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Assessment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub tier_id: Uuid,
    pub purchase_id: Uuid,
    pub status: AssessmentStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Set on the abandon transition; soft-delete horizon = `abandoned_at + 90d`.
    pub soft_delete_at: Option<DateTime<Utc>>,
}

impl Assessment {
    pub const ABANDON_RETENTION_DAYS: i64 = 90;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_to_active_allowed() {
        assert!(AssessmentStatus::Pending.can_transition_to(AssessmentStatus::Active));
    }

    #[test]
    fn terminal_states_never_transition() {
        for terminal in [
            AssessmentStatus::Failed,
            AssessmentStatus::Passed,
            AssessmentStatus::Abandoned,
        ] {
            for next in [AssessmentStatus::Active, AssessmentStatus::Paused] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn paused_round_trips_to_active() {
        assert!(AssessmentStatus::Active.can_transition_to(AssessmentStatus::Paused));
        assert!(AssessmentStatus::Paused.can_transition_to(AssessmentStatus::Active));
    }
}
