use crate::application::NowProvider;
use crate::application::availability_resolver::AvailabilityResolver;
use crate::application::error::SchedulingError;
use crate::application::retry::RetryPolicy;
use crate::application::session_lifecycle::{
    BookingRequest, PendingSyncSummary, RescheduleOutcome, SessionLifecycle, TransitionOutcome,
};
use crate::domain::availability::{SlotQuery, local_instant};
use crate::domain::models::{
    AvailabilityTemplate, CoachId, ConflictPolicy, Session, SessionId, SlotStart, parse_timezone,
};
use crate::infrastructure::availability_repository::AvailabilityRepository;
use crate::infrastructure::calendar_adapter::ExternalCalendarAdapter;
use crate::infrastructure::config::ConfigBundle;
use crate::infrastructure::notification::NotificationDispatcher;
use crate::infrastructure::pending_sync_repository::PendingSyncRepository;
use crate::infrastructure::session_repository::SessionRepository;
use chrono::{NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulingSettings {
    /// Used for coaches without a template.
    pub default_timezone: String,
    pub slot_granularity_minutes: u32,
    pub default_session_minutes: u32,
    pub conflict_policy: ConflictPolicy,
    pub retry_policy: RetryPolicy,
    pub adapter_timeout_ms: u64,
}

impl Default for SchedulingSettings {
    fn default() -> Self {
        Self {
            default_timezone: "UTC".to_string(),
            slot_granularity_minutes: 60,
            default_session_minutes: 60,
            conflict_policy: ConflictPolicy::InternalOnly,
            retry_policy: RetryPolicy::default(),
            adapter_timeout_ms: 5_000,
        }
    }
}

impl From<&ConfigBundle> for SchedulingSettings {
    fn from(bundle: &ConfigBundle) -> Self {
        Self {
            default_timezone: bundle.app.timezone.clone(),
            slot_granularity_minutes: bundle.app.slot_granularity_minutes,
            default_session_minutes: bundle.app.default_session_minutes,
            conflict_policy: bundle.app.conflict_policy,
            retry_policy: RetryPolicy::from(bundle.scheduling.retry),
            adapter_timeout_ms: bundle.scheduling.adapter_timeout_ms,
        }
    }
}

/// Entry point for callers: slot lookup, booking and the session lifecycle.
pub struct SchedulingService<A, S, P>
where
    A: AvailabilityRepository,
    S: SessionRepository,
    P: PendingSyncRepository,
{
    availability: Arc<A>,
    sessions: Arc<S>,
    resolver: Arc<AvailabilityResolver<A, S>>,
    lifecycle: SessionLifecycle<A, S, P>,
    settings: SchedulingSettings,
    now_provider: NowProvider,
}

impl<A, S, P> SchedulingService<A, S, P>
where
    A: AvailabilityRepository,
    S: SessionRepository,
    P: PendingSyncRepository,
{
    pub fn new(
        availability: Arc<A>,
        sessions: Arc<S>,
        outbox: Arc<P>,
        adapters: Vec<Arc<dyn ExternalCalendarAdapter>>,
        notifier: Arc<dyn NotificationDispatcher>,
        settings: SchedulingSettings,
    ) -> Self {
        Self::with_clock(
            availability,
            sessions,
            outbox,
            adapters,
            notifier,
            settings,
            Arc::new(Utc::now),
        )
    }

    pub fn with_clock(
        availability: Arc<A>,
        sessions: Arc<S>,
        outbox: Arc<P>,
        adapters: Vec<Arc<dyn ExternalCalendarAdapter>>,
        notifier: Arc<dyn NotificationDispatcher>,
        settings: SchedulingSettings,
        now_provider: NowProvider,
    ) -> Self {
        let resolver = Arc::new(
            AvailabilityResolver::new(Arc::clone(&availability), Arc::clone(&sessions), adapters)
                .with_adapter_timeout_ms(settings.adapter_timeout_ms)
                .with_now_provider(Arc::clone(&now_provider)),
        );
        let lifecycle = SessionLifecycle::new(
            Arc::clone(&resolver),
            Arc::clone(&sessions),
            outbox,
            notifier,
        )
        .with_retry_policy(settings.retry_policy)
        .with_conflict_policy(settings.conflict_policy)
        .with_now_provider(Arc::clone(&now_provider));

        Self {
            availability,
            sessions,
            resolver,
            lifecycle,
            settings,
            now_provider,
        }
    }

    pub fn settings(&self) -> &SchedulingSettings {
        &self.settings
    }

    /// Bookable starts for the configured granularity and default session length.
    pub async fn get_bookable_slots(
        &self,
        coach_id: &CoachId,
        date: NaiveDate,
    ) -> Result<Vec<NaiveTime>, SchedulingError> {
        let query = SlotQuery::new(
            self.settings.slot_granularity_minutes,
            self.settings.default_session_minutes,
        );
        self.resolver.resolve_slots(coach_id, date, query).await
    }

    pub async fn book_session(&self, request: BookingRequest) -> Result<Session, SchedulingError> {
        self.lifecycle.create(request).await
    }

    pub async fn confirm_session(&self, session_id: &SessionId) -> Result<TransitionOutcome, SchedulingError> {
        self.lifecycle.confirm(session_id).await
    }

    pub async fn cancel_session(&self, session_id: &SessionId) -> Result<TransitionOutcome, SchedulingError> {
        self.lifecycle.cancel(session_id).await
    }

    pub async fn reschedule_session(
        &self,
        session_id: &SessionId,
        new_slot: SlotStart,
    ) -> Result<RescheduleOutcome, SchedulingError> {
        self.lifecycle.reschedule(session_id, new_slot).await
    }

    pub async fn retry_pending_syncs(&self) -> Result<PendingSyncSummary, SchedulingError> {
        self.lifecycle.retry_pending_syncs().await
    }

    pub fn get_session(&self, session_id: &SessionId) -> Result<Session, SchedulingError> {
        self.sessions
            .get(session_id)?
            .ok_or_else(|| SchedulingError::NotFound(session_id.clone()))
    }

    /// Every session touching `date` in the coach's timezone, cancelled ones included.
    pub fn list_sessions(&self, coach_id: &CoachId, date: NaiveDate) -> Result<Vec<Session>, SchedulingError> {
        let timezone = self.coach_timezone(coach_id)?;
        let next_day = date.succ_opt().ok_or_else(|| {
            SchedulingError::Validation(format!("date {date} is out of range"))
        })?;
        let (Some(start), Some(end)) = (
            local_instant(timezone, date, NaiveTime::MIN),
            local_instant(timezone, next_day, NaiveTime::MIN),
        ) else {
            return Err(SchedulingError::Validation(format!(
                "midnight does not exist on {date} in {timezone}"
            )));
        };
        Ok(self.sessions.list_for_coach(coach_id, start, end)?)
    }

    pub fn save_availability(&self, template: &AvailabilityTemplate) -> Result<(), SchedulingError> {
        template.validate().map_err(SchedulingError::Validation)?;
        self.availability.save_template(template)?;
        tracing::info!(coach_id = %template.coach_id, timezone = %template.timezone, "availability saved");
        Ok(())
    }

    /// Returns whether the date was newly blocked.
    pub fn block_date(&self, coach_id: &CoachId, date: NaiveDate) -> Result<bool, SchedulingError> {
        let mut blocked = self.availability.load_blocked_dates(coach_id)?;
        let inserted = blocked.insert(date);
        if inserted {
            self.availability.save_blocked_dates(&blocked)?;
        }
        Ok(inserted)
    }

    pub fn unblock_date(&self, coach_id: &CoachId, date: NaiveDate) -> Result<bool, SchedulingError> {
        let mut blocked = self.availability.load_blocked_dates(coach_id)?;
        let removed = blocked.remove(date);
        if removed {
            self.availability.save_blocked_dates(&blocked)?;
        }
        Ok(removed)
    }

    /// Drops blocked dates before today in the coach's timezone.
    pub fn prune_blocked_dates(&self, coach_id: &CoachId) -> Result<usize, SchedulingError> {
        let today = (self.now_provider)()
            .with_timezone(&self.coach_timezone(coach_id)?)
            .date_naive();
        let mut blocked = self.availability.load_blocked_dates(coach_id)?;
        let pruned = blocked.prune_before(today);
        if pruned > 0 {
            self.availability.save_blocked_dates(&blocked)?;
            tracing::debug!(coach_id = %coach_id, pruned, "pruned past blocked dates");
        }
        Ok(pruned)
    }

    fn coach_timezone(&self, coach_id: &CoachId) -> Result<Tz, SchedulingError> {
        let configured = match self.availability.load_template(coach_id)? {
            Some(template) => template.timezone,
            None => self.settings.default_timezone.clone(),
        };
        parse_timezone(&configured).map_err(SchedulingError::Validation)
    }
}
