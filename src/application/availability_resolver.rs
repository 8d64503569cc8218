use crate::application::NowProvider;
use crate::application::error::SchedulingError;
use crate::application::retry::with_timeout;
use crate::domain::availability::{DayPlan, SlotQuery, remove_overlapping};
use crate::domain::models::{BusyInterval, CoachId, Session};
use crate::infrastructure::availability_repository::AvailabilityRepository;
use crate::infrastructure::calendar_adapter::ExternalCalendarAdapter;
use crate::infrastructure::session_repository::SessionRepository;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::sync::Arc;
use tokio::task::JoinSet;

pub const DEFAULT_ADAPTER_TIMEOUT_MS: u64 = 5_000;

/// Turns a coach's template, blocked dates, ledger and external calendars into
/// bookable start times. Resolution never writes.
pub struct AvailabilityResolver<A, S>
where
    A: AvailabilityRepository,
    S: SessionRepository,
{
    availability: Arc<A>,
    sessions: Arc<S>,
    adapters: Vec<Arc<dyn ExternalCalendarAdapter>>,
    adapter_timeout_ms: u64,
    now_provider: NowProvider,
}

impl<A, S> AvailabilityResolver<A, S>
where
    A: AvailabilityRepository,
    S: SessionRepository,
{
    pub fn new(
        availability: Arc<A>,
        sessions: Arc<S>,
        adapters: Vec<Arc<dyn ExternalCalendarAdapter>>,
    ) -> Self {
        Self {
            availability,
            sessions,
            adapters,
            adapter_timeout_ms: DEFAULT_ADAPTER_TIMEOUT_MS,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_adapter_timeout_ms(mut self, adapter_timeout_ms: u64) -> Self {
        self.adapter_timeout_ms = adapter_timeout_ms.max(1);
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn adapters(&self) -> &[Arc<dyn ExternalCalendarAdapter>] {
        &self.adapters
    }

    pub fn adapter_timeout_ms(&self) -> u64 {
        self.adapter_timeout_ms
    }

    /// Open window of `date` for the coach, or `None` when nothing can be booked
    /// that day. A coach without a template is `CoachNotFound`.
    pub fn day_plan(
        &self,
        coach_id: &CoachId,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Option<DayPlan>, SchedulingError> {
        let Some(template) = self.availability.load_template(coach_id)? else {
            tracing::debug!(coach_id = %coach_id, "coach has no availability template");
            return Err(SchedulingError::CoachNotFound(coach_id.clone()));
        };
        let blocked = self.availability.load_blocked_dates(coach_id)?;
        DayPlan::for_date(&template, &blocked, date, now).map_err(SchedulingError::Validation)
    }

    pub async fn resolve_slots(
        &self,
        coach_id: &CoachId,
        date: NaiveDate,
        query: SlotQuery,
    ) -> Result<Vec<NaiveTime>, SchedulingError> {
        query.validate().map_err(SchedulingError::Validation)?;
        let now = (self.now_provider)();
        let Some(plan) = self.day_plan(coach_id, date, now)? else {
            return Ok(Vec::new());
        };

        let mut candidates = plan.candidates(query);
        candidates.retain(|candidate| candidate.start > now);
        let Some((day_start, day_end)) = plan.bounds_utc() else {
            return Ok(Vec::new());
        };
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let booked: Vec<BusyInterval> = self
            .sessions
            .list_for_coach(coach_id, day_start, day_end)?
            .iter()
            .filter(|session| session.is_active())
            .map(Session::span)
            .collect();
        candidates = remove_overlapping(candidates, &booked);
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let busy = self.collect_busy_intervals(coach_id, day_start, day_end).await;
        candidates = remove_overlapping(candidates, &busy);

        let mut slots: Vec<NaiveTime> = candidates
            .into_iter()
            .map(|candidate| candidate.local_start)
            .collect();
        slots.sort_unstable();
        Ok(slots)
    }

    /// Asks every adapter concurrently. Unconnected adapters contribute
    /// nothing; failures and timeouts are logged and contribute nothing.
    pub async fn collect_busy_intervals(
        &self,
        coach_id: &CoachId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<BusyInterval> {
        let mut lookups: JoinSet<Vec<BusyInterval>> = JoinSet::new();
        for adapter in &self.adapters {
            let adapter = Arc::clone(adapter);
            let coach_id = coach_id.clone();
            let timeout_ms = self.adapter_timeout_ms;
            lookups.spawn(async move { busy_from_adapter(adapter, coach_id, start, end, timeout_ms).await });
        }

        let mut busy = Vec::new();
        while let Some(joined) = lookups.join_next().await {
            match joined {
                Ok(intervals) => busy.extend(intervals),
                Err(error) => tracing::error!(coach_id = %coach_id, error = %error, "busy interval lookup panicked"),
            }
        }
        busy
    }
}

async fn busy_from_adapter(
    adapter: Arc<dyn ExternalCalendarAdapter>,
    coach_id: CoachId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    timeout_ms: u64,
) -> Vec<BusyInterval> {
    let provider = adapter.provider();
    match with_timeout(timeout_ms, adapter.is_connected(&coach_id)).await {
        Ok(true) => {}
        Ok(false) => return Vec::new(),
        Err(error) => {
            tracing::warn!(coach_id = %coach_id, provider = %provider, error = %error, "connection check failed; ignoring calendar");
            return Vec::new();
        }
    }
    match with_timeout(timeout_ms, adapter.get_busy_intervals(&coach_id, start, end)).await {
        Ok(intervals) => intervals,
        Err(error) => {
            tracing::warn!(coach_id = %coach_id, provider = %provider, error = %error, "busy interval lookup failed; ignoring calendar");
            Vec::new()
        }
    }
}
