use crate::domain::models::{BusyInterval, CalendarProvider, CoachId, ExternalRef, Session};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One external calendar provider, seen through the capabilities scheduling needs.
#[async_trait]
pub trait ExternalCalendarAdapter: Send + Sync {
    fn provider(&self) -> CalendarProvider;

    async fn is_connected(&self, coach_id: &CoachId) -> Result<bool, InfraError>;

    async fn get_busy_intervals(
        &self,
        coach_id: &CoachId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, InfraError>;

    async fn create_event(&self, coach_id: &CoachId, session: &Session) -> Result<ExternalRef, InfraError>;

    async fn update_event(
        &self,
        coach_id: &CoachId,
        external_ref: &ExternalRef,
        session: &Session,
    ) -> Result<(), InfraError>;

    async fn delete_event(&self, coach_id: &CoachId, external_ref: &ExternalRef) -> Result<(), InfraError>;
}

/// Supplies a usable bearer token for a coach, refreshing it when needed.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// `None` when the coach never connected or has to authorize again.
    async fn access_token(&self, coach_id: &CoachId) -> Result<Option<String>, InfraError>;
}

pub(crate) fn ensure_ref_provider(
    expected: CalendarProvider,
    external_ref: &ExternalRef,
) -> Result<(), InfraError> {
    if external_ref.provider != expected {
        return Err(InfraError::InvalidConfig(format!(
            "{expected} adapter cannot handle external ref {external_ref}"
        )));
    }
    Ok(())
}
