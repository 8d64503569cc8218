use crate::domain::models::{CoachId, MenteeId, Session, SessionId, SessionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

impl SessionStatus {
    /// Valid transitions:
    /// - Pending -> Confirmed | Cancelled
    /// - Confirmed -> Cancelled
    pub fn can_transition_to(&self, target: &SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, target),
            (Pending, Confirmed) | (Pending, Cancelled) | (Confirmed, Cancelled)
        )
    }

    pub fn valid_transitions(&self) -> Vec<SessionStatus> {
        match self {
            SessionStatus::Pending => vec![SessionStatus::Confirmed, SessionStatus::Cancelled],
            SessionStatus::Confirmed => vec![SessionStatus::Cancelled],
            SessionStatus::Cancelled => Vec::new(),
        }
    }

    pub fn transition_to(&self, target: SessionStatus) -> Result<SessionStatus, String> {
        if self.can_transition_to(&target) {
            Ok(target)
        } else {
            Err(format!("cannot transition session from {self} to {target}"))
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleEventKind {
    #[serde(rename = "session.booked")]
    Booked,
    #[serde(rename = "session.confirmed")]
    Confirmed,
    #[serde(rename = "session.cancelled")]
    Cancelled,
    #[serde(rename = "session.rescheduled")]
    Rescheduled,
}

impl LifecycleEventKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Booked => "session.booked",
            Self::Confirmed => "session.confirmed",
            Self::Cancelled => "session.cancelled",
            Self::Rescheduled => "session.rescheduled",
        }
    }
}

impl fmt::Display for LifecycleEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub kind: LifecycleEventKind,
    pub session_id: SessionId,
    pub coach_id: CoachId,
    pub mentee_id: MenteeId,
    pub scheduled_start: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn for_session(
        kind: LifecycleEventKind,
        session: &Session,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            session_id: session.id.clone(),
            coach_id: session.coach_id.clone(),
            mentee_id: session.mentee_id.clone(),
            scheduled_start: session.scheduled_start,
            occurred_at,
        }
    }
}
