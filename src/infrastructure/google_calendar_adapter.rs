use crate::domain::models::{BusyInterval, CalendarProvider, CoachId, ExternalRef, Session};
use crate::infrastructure::calendar_adapter::{
    AccessTokenProvider, ExternalCalendarAdapter, ensure_ref_provider,
};
use crate::infrastructure::config::GoogleCalendarsConfig;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::encode_session_event;
use crate::infrastructure::google_calendar_client::GoogleCalendarClient;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub struct GoogleCalendarAdapter<T, C>
where
    T: AccessTokenProvider,
    C: GoogleCalendarClient,
{
    tokens: Arc<T>,
    client: Arc<C>,
    calendars: GoogleCalendarsConfig,
}

impl<T, C> GoogleCalendarAdapter<T, C>
where
    T: AccessTokenProvider,
    C: GoogleCalendarClient,
{
    pub fn new(tokens: Arc<T>, client: Arc<C>, calendars: GoogleCalendarsConfig) -> Self {
        Self {
            tokens,
            client,
            calendars,
        }
    }

    async fn require_token(&self, coach_id: &CoachId) -> Result<String, InfraError> {
        self.tokens
            .access_token(coach_id)
            .await?
            .ok_or_else(|| InfraError::NotConnected(coach_id.to_string()))
    }
}

#[async_trait]
impl<T, C> ExternalCalendarAdapter for GoogleCalendarAdapter<T, C>
where
    T: AccessTokenProvider,
    C: GoogleCalendarClient,
{
    fn provider(&self) -> CalendarProvider {
        CalendarProvider::Google
    }

    async fn is_connected(&self, coach_id: &CoachId) -> Result<bool, InfraError> {
        Ok(self.tokens.access_token(coach_id).await?.is_some())
    }

    async fn get_busy_intervals(
        &self,
        coach_id: &CoachId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, InfraError> {
        if end <= start {
            return Ok(Vec::new());
        }
        let Some(access_token) = self.tokens.access_token(coach_id).await? else {
            return Ok(Vec::new());
        };
        let calendar_id = self.calendars.calendar_id_for(coach_id);
        self.client
            .free_busy(&access_token, calendar_id, start, end)
            .await
    }

    async fn create_event(&self, coach_id: &CoachId, session: &Session) -> Result<ExternalRef, InfraError> {
        let access_token = self.require_token(coach_id).await?;
        let calendar_id = self.calendars.calendar_id_for(coach_id);
        let event = encode_session_event(session, None);
        let event_id = self
            .client
            .create_event(&access_token, calendar_id, &event)
            .await?;
        Ok(ExternalRef::new(CalendarProvider::Google, event_id))
    }

    async fn update_event(
        &self,
        coach_id: &CoachId,
        external_ref: &ExternalRef,
        session: &Session,
    ) -> Result<(), InfraError> {
        ensure_ref_provider(CalendarProvider::Google, external_ref)?;
        let access_token = self.require_token(coach_id).await?;
        let calendar_id = self.calendars.calendar_id_for(coach_id);
        let event = encode_session_event(session, None);
        self.client
            .update_event(&access_token, calendar_id, &external_ref.id, &event)
            .await
    }

    async fn delete_event(&self, coach_id: &CoachId, external_ref: &ExternalRef) -> Result<(), InfraError> {
        ensure_ref_provider(CalendarProvider::Google, external_ref)?;
        let access_token = self.require_token(coach_id).await?;
        let calendar_id = self.calendars.calendar_id_for(coach_id);
        self.client
            .delete_event(&access_token, calendar_id, &external_ref.id)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{MenteeId, SessionId, SessionStatus};
    use crate::infrastructure::event_mapper::{GoogleCalendarEvent, decode_session_id};
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeTokens {
        tokens: HashMap<String, String>,
    }

    #[async_trait]
    impl AccessTokenProvider for FakeTokens {
        async fn access_token(&self, coach_id: &CoachId) -> Result<Option<String>, InfraError> {
            Ok(self.tokens.get(coach_id.as_str()).cloned())
        }
    }

    #[derive(Default)]
    struct FakeGoogleClient {
        calls: Mutex<Vec<String>>,
        created: Mutex<Vec<GoogleCalendarEvent>>,
    }

    #[async_trait]
    impl GoogleCalendarClient for FakeGoogleClient {
        async fn free_busy(
            &self,
            access_token: &str,
            calendar_id: &str,
            time_min: DateTime<Utc>,
            time_max: DateTime<Utc>,
        ) -> Result<Vec<BusyInterval>, InfraError> {
            self.calls
                .lock()
                .expect("calls lock")
                .push(format!("free_busy:{access_token}:{calendar_id}"));
            Ok(BusyInterval::new(time_min, time_max).into_iter().collect())
        }

        async fn create_event(
            &self,
            access_token: &str,
            calendar_id: &str,
            event: &GoogleCalendarEvent,
        ) -> Result<String, InfraError> {
            self.calls
                .lock()
                .expect("calls lock")
                .push(format!("create:{access_token}:{calendar_id}"));
            self.created.lock().expect("created lock").push(event.clone());
            Ok("evt-1".to_string())
        }

        async fn update_event(
            &self,
            _access_token: &str,
            calendar_id: &str,
            event_id: &str,
            _event: &GoogleCalendarEvent,
        ) -> Result<(), InfraError> {
            self.calls
                .lock()
                .expect("calls lock")
                .push(format!("update:{calendar_id}:{event_id}"));
            Ok(())
        }

        async fn delete_event(
            &self,
            _access_token: &str,
            calendar_id: &str,
            event_id: &str,
        ) -> Result<(), InfraError> {
            self.calls
                .lock()
                .expect("calls lock")
                .push(format!("delete:{calendar_id}:{event_id}"));
            Ok(())
        }
    }

    fn utc(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn session() -> Session {
        Session {
            id: SessionId::from("ses-1"),
            coach_id: CoachId::from("coach-1"),
            mentee_id: MenteeId::from("mentee-1"),
            session_type: "career".to_string(),
            scheduled_start: utc("2026-02-16T10:00:00Z"),
            duration_minutes: 60,
            status: SessionStatus::Confirmed,
            external_booking_ref: None,
            notes: None,
            created_at: utc("2026-02-10T00:00:00Z"),
            updated_at: utc("2026-02-10T00:00:00Z"),
            cancelled_at: None,
            rescheduled_from: None,
            rescheduled_to: None,
        }
    }

    fn adapter() -> (
        GoogleCalendarAdapter<FakeTokens, FakeGoogleClient>,
        Arc<FakeGoogleClient>,
    ) {
        let tokens = FakeTokens {
            tokens: HashMap::from([("coach-1".to_string(), "token-1".to_string())]),
        };
        let client = Arc::new(FakeGoogleClient::default());
        let mut calendars = GoogleCalendarsConfig::default();
        calendars
            .calendar_ids
            .insert("coach-1".to_string(), "coach-one@group".to_string());
        (
            GoogleCalendarAdapter::new(Arc::new(tokens), Arc::clone(&client), calendars),
            client,
        )
    }

    #[tokio::test]
    async fn connected_coach_uses_own_calendar() {
        let (adapter, client) = adapter();
        let coach = CoachId::from("coach-1");
        assert!(adapter.is_connected(&coach).await.expect("connected"));

        let busy = adapter
            .get_busy_intervals(&coach, utc("2026-02-16T09:00:00Z"), utc("2026-02-16T17:00:00Z"))
            .await
            .expect("busy");
        assert_eq!(busy.len(), 1);

        let external_ref = adapter.create_event(&coach, &session()).await.expect("create");
        assert_eq!(external_ref, ExternalRef::new(CalendarProvider::Google, "evt-1"));
        adapter.delete_event(&coach, &external_ref).await.expect("delete");

        let calls = client.calls.lock().expect("calls lock").clone();
        assert_eq!(
            calls,
            vec![
                "free_busy:token-1:coach-one@group".to_string(),
                "create:token-1:coach-one@group".to_string(),
                "delete:coach-one@group:evt-1".to_string(),
            ]
        );
        let created = client.created.lock().expect("created lock");
        assert_eq!(decode_session_id(&created[0]), Some(SessionId::from("ses-1")));
    }

    #[tokio::test]
    async fn unconnected_coach_has_no_busy_time_and_cannot_create() {
        let (adapter, client) = adapter();
        let coach = CoachId::from("coach-2");
        assert!(!adapter.is_connected(&coach).await.expect("connected"));
        let busy = adapter
            .get_busy_intervals(&coach, utc("2026-02-16T09:00:00Z"), utc("2026-02-16T17:00:00Z"))
            .await
            .expect("busy");
        assert!(busy.is_empty());
        assert!(matches!(
            adapter.create_event(&coach, &session()).await,
            Err(InfraError::NotConnected(_))
        ));
        assert!(client.calls.lock().expect("calls lock").is_empty());
    }

    #[tokio::test]
    async fn foreign_refs_are_rejected() {
        let (adapter, _client) = adapter();
        let foreign = ExternalRef::new(CalendarProvider::Calcom, "123");
        assert!(adapter
            .delete_event(&CoachId::from("coach-1"), &foreign)
            .await
            .is_err());
        assert!(adapter
            .update_event(&CoachId::from("coach-1"), &foreign, &session())
            .await
            .is_err());
    }
}
