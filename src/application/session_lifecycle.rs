use crate::application::availability_resolver::AvailabilityResolver;
use crate::application::error::SchedulingError;
use crate::application::retry::{Attempted, RetryPolicy, retry_with_backoff, with_timeout};
use crate::application::{NowProvider, next_id};
use crate::domain::availability::{MAX_SLOT_MINUTES, local_instant};
use crate::domain::lifecycle::{LifecycleEvent, LifecycleEventKind};
use crate::domain::models::{
    CalendarProvider, CoachId, ConflictPolicy, ExternalRef, MenteeId, Session, SessionId,
    SessionStatus, SlotStart,
};
use crate::infrastructure::availability_repository::AvailabilityRepository;
use crate::infrastructure::calendar_adapter::ExternalCalendarAdapter;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::notification::NotificationDispatcher;
use crate::infrastructure::pending_sync_repository::{
    PendingSync, PendingSyncRepository, SyncOperation,
};
use crate::infrastructure::session_repository::SessionRepository;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub coach_id: CoachId,
    pub mentee_id: MenteeId,
    pub session_type: String,
    pub slot: SlotStart,
    pub duration_minutes: u32,
    pub notes: Option<String>,
}

/// An external side effect that did not happen. The local transition stands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSyncFailure {
    pub provider: CalendarProvider,
    pub operation: SyncOperation,
    pub message: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionOutcome {
    pub session: Session,
    pub sync_failure: Option<ExternalSyncFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleOutcome {
    pub cancelled: Session,
    pub session: Session,
    pub sync_failure: Option<ExternalSyncFailure>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSyncSummary {
    pub replayed: usize,
    pub dropped: usize,
    pub still_pending: usize,
}

enum ReplayResult {
    Replayed,
    Dropped,
    Failed { message: String, attempts: u32 },
}

pub struct SessionLifecycle<A, S, P>
where
    A: AvailabilityRepository,
    S: SessionRepository,
    P: PendingSyncRepository,
{
    resolver: Arc<AvailabilityResolver<A, S>>,
    sessions: Arc<S>,
    outbox: Arc<P>,
    notifier: Arc<dyn NotificationDispatcher>,
    retry_policy: RetryPolicy,
    conflict_policy: ConflictPolicy,
    now_provider: NowProvider,
}

impl<A, S, P> SessionLifecycle<A, S, P>
where
    A: AvailabilityRepository,
    S: SessionRepository,
    P: PendingSyncRepository,
{
    pub fn new(
        resolver: Arc<AvailabilityResolver<A, S>>,
        sessions: Arc<S>,
        outbox: Arc<P>,
        notifier: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            resolver,
            sessions,
            outbox,
            notifier,
            retry_policy: RetryPolicy::default(),
            conflict_policy: ConflictPolicy::default(),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_conflict_policy(mut self, conflict_policy: ConflictPolicy) -> Self {
        self.conflict_policy = conflict_policy;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub async fn create(&self, request: BookingRequest) -> Result<Session, SchedulingError> {
        let now = (self.now_provider)();
        let session = self.prepare(request, None, now)?;
        let session = self.commit_new(session).await?;
        self.notify(LifecycleEventKind::Booked, &session, now).await;
        Ok(session)
    }

    pub async fn confirm(&self, session_id: &SessionId) -> Result<TransitionOutcome, SchedulingError> {
        let now = (self.now_provider)();
        let mut session = self.transition(session_id, SessionStatus::Confirmed, now)?;
        let sync_failure = self.push_event(&mut session, now).await;
        self.notify(LifecycleEventKind::Confirmed, &session, now).await;
        Ok(TransitionOutcome {
            session,
            sync_failure,
        })
    }

    pub async fn cancel(&self, session_id: &SessionId) -> Result<TransitionOutcome, SchedulingError> {
        let now = (self.now_provider)();
        let outcome = self.cancel_without_notice(session_id, now).await?;
        self.notify(LifecycleEventKind::Cancelled, &outcome.session, now)
            .await;
        Ok(outcome)
    }

    /// Cancels the session, then books `slot` for the same mentee. A failure
    /// after the cancellation is reported as a partial failure.
    pub async fn reschedule(
        &self,
        session_id: &SessionId,
        slot: SlotStart,
    ) -> Result<RescheduleOutcome, SchedulingError> {
        let now = (self.now_provider)();
        let current = self.load(session_id)?;
        if !current.is_active() {
            return Err(SchedulingError::InvalidTransition {
                id: current.id,
                from: current.status,
                to: SessionStatus::Cancelled,
            });
        }
        let replacement = self.prepare(
            BookingRequest {
                coach_id: current.coach_id.clone(),
                mentee_id: current.mentee_id.clone(),
                session_type: current.session_type.clone(),
                slot,
                duration_minutes: current.duration_minutes,
                notes: current.notes.clone(),
            },
            Some(current.id.clone()),
            now,
        )?;

        let cancelled = self.cancel_without_notice(session_id, now).await?;
        let replacement = match self.commit_new(replacement).await {
            Ok(session) => session,
            Err(cause) => {
                tracing::error!(
                    session_id = %session_id,
                    error = %cause,
                    "reschedule left the original session cancelled"
                );
                self.notify(LifecycleEventKind::Cancelled, &cancelled.session, now)
                    .await;
                return Err(SchedulingError::PartialRescheduleFailure {
                    cancelled: Box::new(cancelled.session),
                    cause: Box::new(cause),
                });
            }
        };

        let mut linked = cancelled.session;
        linked.rescheduled_to = Some(replacement.id.clone());
        linked.updated_at = now;
        if !self
            .sessions
            .update_if_status(&linked, SessionStatus::Cancelled)?
        {
            tracing::warn!(session_id = %linked.id, "cancelled session changed before it could be linked");
        }

        tracing::info!(
            from_session_id = %linked.id,
            to_session_id = %replacement.id,
            "session rescheduled"
        );
        self.notify(LifecycleEventKind::Rescheduled, &replacement, now)
            .await;
        Ok(RescheduleOutcome {
            cancelled: linked,
            session: replacement,
            sync_failure: cancelled.sync_failure,
        })
    }

    /// Replays every outbox entry once. Entries that succeed, or no longer
    /// apply, are removed.
    pub async fn retry_pending_syncs(&self) -> Result<PendingSyncSummary, SchedulingError> {
        let now = (self.now_provider)();
        let mut summary = PendingSyncSummary::default();
        for entry in self.outbox.list()? {
            let result = match entry.operation {
                SyncOperation::CreateEvent => self.replay_create(&entry, now).await?,
                SyncOperation::DeleteEvent => self.replay_delete(&entry).await,
            };
            match result {
                ReplayResult::Replayed => {
                    self.outbox.remove(&entry.id)?;
                    summary.replayed += 1;
                }
                ReplayResult::Dropped => {
                    self.outbox.remove(&entry.id)?;
                    summary.dropped += 1;
                }
                ReplayResult::Failed { message, attempts } => {
                    let mut updated = entry.clone();
                    updated.attempts = entry.attempts.saturating_add(attempts);
                    updated.last_error = message;
                    updated.updated_at = now;
                    self.outbox.record(&updated)?;
                    summary.still_pending += 1;
                }
            }
        }
        tracing::info!(
            replayed = summary.replayed,
            dropped = summary.dropped,
            still_pending = summary.still_pending,
            "pending calendar syncs replayed"
        );
        Ok(summary)
    }

    fn load(&self, session_id: &SessionId) -> Result<Session, SchedulingError> {
        self.sessions
            .get(session_id)?
            .ok_or_else(|| SchedulingError::NotFound(session_id.clone()))
    }

    /// Validates a booking against the coach's template and the clock without
    /// touching the ledger.
    fn prepare(
        &self,
        request: BookingRequest,
        rescheduled_from: Option<SessionId>,
        now: DateTime<Utc>,
    ) -> Result<Session, SchedulingError> {
        if request.duration_minutes == 0 {
            return Err(SchedulingError::Validation(
                "duration_minutes must be > 0".to_string(),
            ));
        }
        if request.duration_minutes > MAX_SLOT_MINUTES {
            return Err(SchedulingError::Validation(format!(
                "duration_minutes must be <= {MAX_SLOT_MINUTES}"
            )));
        }
        let slot = request.slot;
        let plan = self
            .resolver
            .day_plan(&request.coach_id, slot.date, now)?
            .ok_or_else(|| {
                SchedulingError::Validation(format!(
                    "coach {} has no bookable hours on {}",
                    request.coach_id, slot.date
                ))
            })?;
        if !plan.contains_start(slot.time, request.duration_minutes) {
            return Err(SchedulingError::Validation(format!(
                "{slot} for {} minutes is outside the coach's hours",
                request.duration_minutes
            )));
        }
        let scheduled_start = local_instant(plan.timezone, slot.date, slot.time).ok_or_else(|| {
            SchedulingError::Validation(format!("{slot} does not exist in {}", plan.timezone))
        })?;
        if scheduled_start <= now {
            return Err(SchedulingError::Validation(format!("{slot} is in the past")));
        }

        let session = Session {
            id: SessionId::new(next_id("ses")),
            coach_id: request.coach_id,
            mentee_id: request.mentee_id,
            session_type: request.session_type,
            scheduled_start,
            duration_minutes: request.duration_minutes,
            status: SessionStatus::Pending,
            external_booking_ref: None,
            notes: request.notes,
            created_at: now,
            updated_at: now,
            cancelled_at: None,
            rescheduled_from,
            rescheduled_to: None,
        };
        session.validate().map_err(SchedulingError::Validation)?;
        Ok(session)
    }

    async fn commit_new(&self, session: Session) -> Result<Session, SchedulingError> {
        if self.conflict_policy == ConflictPolicy::AllAdapters {
            let busy = self
                .resolver
                .collect_busy_intervals(
                    &session.coach_id,
                    session.scheduled_start,
                    session.scheduled_end(),
                )
                .await;
            if busy
                .iter()
                .any(|interval| interval.overlaps(session.scheduled_start, session.scheduled_end()))
            {
                tracing::info!(coach_id = %session.coach_id, "slot is busy in an external calendar");
                return Err(SchedulingError::SlotNoLongerAvailable);
            }
        }
        if !self.sessions.insert_if_no_overlap(&session)? {
            return Err(SchedulingError::SlotNoLongerAvailable);
        }
        tracing::info!(
            session_id = %session.id,
            coach_id = %session.coach_id,
            scheduled_start = %session.scheduled_start,
            "session booked"
        );
        Ok(session)
    }

    fn transition(
        &self,
        session_id: &SessionId,
        target: SessionStatus,
        now: DateTime<Utc>,
    ) -> Result<Session, SchedulingError> {
        let mut session = self.load(session_id)?;
        let previous = session.status;
        session.status =
            previous
                .transition_to(target)
                .map_err(|_| SchedulingError::InvalidTransition {
                    id: session.id.clone(),
                    from: previous,
                    to: target,
                })?;
        session.updated_at = now;
        if target == SessionStatus::Cancelled {
            session.cancelled_at = Some(now);
        }
        if !self.sessions.update_if_status(&session, previous)? {
            let current = self.load(session_id)?;
            return Err(SchedulingError::InvalidTransition {
                id: current.id,
                from: current.status,
                to: target,
            });
        }
        tracing::info!(session_id = %session.id, from = %previous, to = %target, "session transitioned");
        Ok(session)
    }

    async fn cancel_without_notice(
        &self,
        session_id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, SchedulingError> {
        let session = self.transition(session_id, SessionStatus::Cancelled, now)?;
        let sync_failure = match session.external_booking_ref.clone() {
            Some(external_ref) => self.remove_event(&session, &external_ref, now).await,
            None => None,
        };
        Ok(TransitionOutcome {
            session,
            sync_failure,
        })
    }

    /// First connected adapter, in configured order.
    async fn connected_adapter(&self, coach_id: &CoachId) -> Option<Arc<dyn ExternalCalendarAdapter>> {
        for adapter in self.resolver.adapters() {
            match with_timeout(
                self.resolver.adapter_timeout_ms(),
                adapter.is_connected(coach_id),
            )
            .await
            {
                Ok(true) => return Some(Arc::clone(adapter)),
                Ok(false) => {}
                Err(error) => tracing::warn!(
                    coach_id = %coach_id,
                    provider = %adapter.provider(),
                    error = %error,
                    "connection check failed"
                ),
            }
        }
        None
    }

    fn adapter_for(&self, provider: CalendarProvider) -> Option<Arc<dyn ExternalCalendarAdapter>> {
        self.resolver
            .adapters()
            .iter()
            .find(|adapter| adapter.provider() == provider)
            .cloned()
    }

    /// Mirrors a confirmed session into the coach's calendar. Failures land in the outbox.
    async fn push_event(&self, session: &mut Session, now: DateTime<Utc>) -> Option<ExternalSyncFailure> {
        let adapter = self.connected_adapter(&session.coach_id).await?;
        let provider = adapter.provider();
        let timeout_ms = self.resolver.adapter_timeout_ms();

        let snapshot = session.clone();
        let attempted = retry_with_backoff(&self.retry_policy, timeout_ms, || {
            adapter.create_event(&snapshot.coach_id, &snapshot)
        })
        .await;
        match attempted.result {
            Ok(external_ref) => {
                session.external_booking_ref = Some(external_ref);
                if let Err(error) = self.store_external_ref(session) {
                    tracing::error!(session_id = %session.id, error = %error, "failed to store calendar event reference");
                }
                None
            }
            Err(error) => {
                tracing::warn!(
                    session_id = %session.id,
                    provider = %provider,
                    attempts = attempted.attempts,
                    error = %error,
                    "calendar event creation failed; queued for retry"
                );
                let failure = ExternalSyncFailure {
                    provider,
                    operation: SyncOperation::CreateEvent,
                    message: error.to_string(),
                    attempts: attempted.attempts,
                };
                self.queue(session, None, &failure, now);
                Some(failure)
            }
        }
    }

    /// One bounded delete attempt; a failure is queued for `retry_pending_syncs`.
    async fn remove_event(
        &self,
        session: &Session,
        external_ref: &ExternalRef,
        now: DateTime<Utc>,
    ) -> Option<ExternalSyncFailure> {
        let single_attempt = RetryPolicy {
            max_attempts: 1,
            ..self.retry_policy
        };
        let attempted = self
            .delete_remote(&single_attempt, &session.coach_id, external_ref)
            .await;
        let error = match attempted.result {
            Ok(()) => return None,
            Err(error) => error,
        };
        tracing::warn!(
            session_id = %session.id,
            external_ref = %external_ref,
            error = %error,
            "calendar event deletion failed; queued for retry"
        );
        let failure = ExternalSyncFailure {
            provider: external_ref.provider,
            operation: SyncOperation::DeleteEvent,
            message: error.to_string(),
            attempts: attempted.attempts,
        };
        self.queue(session, Some(external_ref.clone()), &failure, now);
        Some(failure)
    }

    async fn delete_remote(
        &self,
        policy: &RetryPolicy,
        coach_id: &CoachId,
        external_ref: &ExternalRef,
    ) -> Attempted<()> {
        let Some(adapter) = self.adapter_for(external_ref.provider) else {
            return Attempted {
                result: Err(InfraError::NotConnected(format!(
                    "no {} adapter is configured",
                    external_ref.provider
                ))),
                attempts: 0,
            };
        };
        retry_with_backoff(policy, self.resolver.adapter_timeout_ms(), || {
            adapter.delete_event(coach_id, external_ref)
        })
        .await
    }

    fn store_external_ref(&self, session: &Session) -> Result<(), InfraError> {
        if !self
            .sessions
            .update_if_status(session, SessionStatus::Confirmed)?
        {
            tracing::warn!(session_id = %session.id, "session left confirmed before its calendar event was stored");
        }
        Ok(())
    }

    fn queue(
        &self,
        session: &Session,
        external_ref: Option<ExternalRef>,
        failure: &ExternalSyncFailure,
        now: DateTime<Utc>,
    ) {
        let entry = PendingSync {
            id: next_id("sync"),
            session_id: session.id.clone(),
            coach_id: session.coach_id.clone(),
            operation: failure.operation,
            external_ref,
            attempts: failure.attempts,
            last_error: failure.message.clone(),
            created_at: now,
            updated_at: now,
        };
        if let Err(error) = self.outbox.record(&entry) {
            tracing::error!(session_id = %session.id, error = %error, "failed to record pending calendar sync");
        }
    }

    async fn replay_create(
        &self,
        entry: &PendingSync,
        now: DateTime<Utc>,
    ) -> Result<ReplayResult, SchedulingError> {
        let Some(mut session) = self.sessions.get(&entry.session_id)? else {
            return Ok(ReplayResult::Dropped);
        };
        if session.status != SessionStatus::Confirmed || session.external_booking_ref.is_some() {
            return Ok(ReplayResult::Dropped);
        }
        let Some(adapter) = self.connected_adapter(&session.coach_id).await else {
            return Ok(ReplayResult::Failed {
                message: "no connected calendar".to_string(),
                attempts: 0,
            });
        };
        let snapshot = session.clone();
        let attempted = retry_with_backoff(
            &self.retry_policy,
            self.resolver.adapter_timeout_ms(),
            || adapter.create_event(&snapshot.coach_id, &snapshot),
        )
        .await;
        match attempted.result {
            Ok(external_ref) => {
                session.external_booking_ref = Some(external_ref);
                session.updated_at = now;
                self.store_external_ref(&session)?;
                Ok(ReplayResult::Replayed)
            }
            Err(error) => Ok(ReplayResult::Failed {
                message: error.to_string(),
                attempts: attempted.attempts,
            }),
        }
    }

    async fn replay_delete(&self, entry: &PendingSync) -> ReplayResult {
        let Some(external_ref) = entry.external_ref.as_ref() else {
            return ReplayResult::Dropped;
        };
        let attempted = self
            .delete_remote(&self.retry_policy, &entry.coach_id, external_ref)
            .await;
        match attempted.result {
            Ok(()) => ReplayResult::Replayed,
            Err(error) => ReplayResult::Failed {
                message: error.to_string(),
                attempts: attempted.attempts,
            },
        }
    }

    async fn notify(&self, kind: LifecycleEventKind, session: &Session, now: DateTime<Utc>) {
        let event = LifecycleEvent::for_session(kind, session, now);
        if let Err(error) = self.notifier.dispatch(event).await {
            tracing::warn!(session_id = %session.id, event = %kind, error = %error, "lifecycle notification failed");
        }
    }
}
