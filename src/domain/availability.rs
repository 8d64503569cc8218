use crate::domain::models::{AvailabilityTemplate, BlockedDateSet, BusyInterval};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

/// Upper bound for a session length or slot step: one day.
pub const MAX_SLOT_MINUTES: u32 = 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotQuery {
    pub granularity_minutes: u32,
    pub duration_minutes: u32,
}

impl SlotQuery {
    pub fn new(granularity_minutes: u32, duration_minutes: u32) -> Self {
        Self {
            granularity_minutes,
            duration_minutes,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.granularity_minutes == 0 {
            return Err("slot granularity must be > 0 minutes".to_string());
        }
        if self.duration_minutes == 0 {
            return Err("slot duration must be > 0 minutes".to_string());
        }
        if self.granularity_minutes > MAX_SLOT_MINUTES {
            return Err(format!("slot granularity must be <= {MAX_SLOT_MINUTES} minutes"));
        }
        if self.duration_minutes > MAX_SLOT_MINUTES {
            return Err(format!("slot duration must be <= {MAX_SLOT_MINUTES} minutes"));
        }
        Ok(())
    }
}

/// A grid slot with its resolved UTC range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub local_start: NaiveTime,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// The open part of one calendar day for one coach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayPlan {
    pub date: NaiveDate,
    pub timezone: Tz,
    pub window_start: NaiveTime,
    pub window_end: NaiveTime,
}

impl DayPlan {
    /// `Ok(None)` when the day is blocked, in the past, or closed in the template.
    pub fn for_date(
        template: &AvailabilityTemplate,
        blocked: &BlockedDateSet,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>, String> {
        let timezone = template.tz()?;
        let today = now.with_timezone(&timezone).date_naive();
        if date < today || blocked.contains(date) {
            return Ok(None);
        }
        let Some((window_start, window_end)) = template.window_for(date) else {
            return Ok(None);
        };
        Ok(Some(Self {
            date,
            timezone,
            window_start,
            window_end,
        }))
    }

    /// UTC bounds of the open window, used when asking calendars for busy time.
    pub fn bounds_utc(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = local_instant(self.timezone, self.date, self.window_start)
            .or_else(|| local_instant(self.timezone, self.date, NaiveTime::MIN))?;
        let end = local_instant(self.timezone, self.date, self.window_end)
            .or_else(|| local_instant(self.timezone, self.date.succ_opt()?, NaiveTime::MIN))?;
        (end > start).then_some((start, end))
    }

    pub fn contains_start(&self, local_start: NaiveTime, duration_minutes: u32) -> bool {
        let start = minutes_of_day(local_start);
        let end = minutes_of_day(self.window_end);
        start >= minutes_of_day(self.window_start)
            && local_start.second() == 0
            && start
                .checked_add(duration_minutes)
                .is_some_and(|slot_end| slot_end <= end)
    }

    pub fn candidates(&self, query: SlotQuery) -> Vec<Candidate> {
        slot_grid(
            self.window_start,
            self.window_end,
            query.granularity_minutes,
            query.duration_minutes,
        )
        .into_iter()
        .filter_map(|local_start| {
            let start = local_instant(self.timezone, self.date, local_start)?;
            Some(Candidate {
                local_start,
                start,
                end: start + Duration::minutes(i64::from(query.duration_minutes)),
            })
        })
        .collect()
    }
}

/// Start times every `granularity` minutes from `window_start` such that
/// `start + duration <= window_end`.
pub fn slot_grid(
    window_start: NaiveTime,
    window_end: NaiveTime,
    granularity_minutes: u32,
    duration_minutes: u32,
) -> Vec<NaiveTime> {
    if granularity_minutes == 0 || duration_minutes == 0 {
        return Vec::new();
    }
    let end = minutes_of_day(window_end);
    let mut cursor = minutes_of_day(window_start);
    let mut slots = Vec::new();
    while cursor
        .checked_add(duration_minutes)
        .is_some_and(|slot_end| slot_end <= end)
    {
        if let Some(time) = NaiveTime::from_hms_opt(cursor / 60, cursor % 60, 0) {
            slots.push(time);
        }
        let Some(next) = cursor.checked_add(granularity_minutes) else {
            break;
        };
        cursor = next;
    }
    slots
}

/// Maps a wall-clock time to UTC. Times in a DST gap yield `None`; ambiguous
/// times resolve to the earlier instant.
pub fn local_instant(timezone: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    timezone
        .from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|value| value.with_timezone(&Utc))
}

pub fn remove_overlapping(candidates: Vec<Candidate>, occupied: &[BusyInterval]) -> Vec<Candidate> {
    if occupied.is_empty() {
        return candidates;
    }
    let occupied = merge_intervals(occupied.to_vec());
    candidates
        .into_iter()
        .filter(|candidate| {
            !occupied
                .iter()
                .any(|interval| interval.overlaps(candidate.start, candidate.end))
        })
        .collect()
}

pub fn merge_intervals(mut intervals: Vec<BusyInterval>) -> Vec<BusyInterval> {
    intervals.sort_unstable_by(|left, right| left.start.cmp(&right.start));
    let mut merged: Vec<BusyInterval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        match merged.last_mut() {
            Some(last) if interval.start <= last.end => {
                if interval.end > last.end {
                    last.end = interval.end;
                }
            }
            _ => merged.push(interval),
        }
    }
    merged
}

pub fn clip_interval(
    interval: BusyInterval,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> Option<BusyInterval> {
    if interval.end <= window_start || interval.start >= window_end {
        return None;
    }
    BusyInterval::new(interval.start.max(window_start), interval.end.min(window_end))
}

fn minutes_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::CoachId;
    use chrono::Weekday;
    use proptest::prelude::*;

    fn hm(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time")
    }

    fn utc(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn template(timezone: &str) -> AvailabilityTemplate {
        AvailabilityTemplate::weekly(
            CoachId::from("coach-1"),
            timezone,
            &[Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri],
            "09:00",
            "17:00",
        )
    }

    #[test]
    fn grid_stops_before_window_end() {
        let slots = slot_grid(hm(9, 0), hm(17, 0), 60, 60);
        assert_eq!(slots.len(), 8);
        assert_eq!(slots.first(), Some(&hm(9, 0)));
        assert_eq!(slots.last(), Some(&hm(16, 0)));
        assert!(!slots.contains(&hm(17, 0)));
    }

    #[test]
    fn grid_drops_trailing_partial_slot() {
        let slots = slot_grid(hm(9, 0), hm(10, 30), 60, 60);
        assert_eq!(slots, vec![hm(9, 0)]);
        let finer = slot_grid(hm(9, 0), hm(10, 30), 30, 60);
        assert_eq!(finer, vec![hm(9, 0), hm(9, 30)]);
    }

    #[test]
    fn day_plan_rejects_blocked_closed_and_past_dates() {
        let template = template("UTC");
        let mut blocked = BlockedDateSet::empty(CoachId::from("coach-1"));
        let now = utc("2026-02-16T08:00:00Z");
        let monday = NaiveDate::from_ymd_opt(2026, 2, 16).expect("valid date");
        let tuesday = NaiveDate::from_ymd_opt(2026, 2, 17).expect("valid date");
        let saturday = NaiveDate::from_ymd_opt(2026, 2, 21).expect("valid date");
        let last_friday = NaiveDate::from_ymd_opt(2026, 2, 13).expect("valid date");
        blocked.insert(tuesday);

        assert!(DayPlan::for_date(&template, &blocked, monday, now).expect("plan").is_some());
        assert!(DayPlan::for_date(&template, &blocked, tuesday, now).expect("plan").is_none());
        assert!(DayPlan::for_date(&template, &blocked, saturday, now).expect("plan").is_none());
        assert!(DayPlan::for_date(&template, &blocked, last_friday, now).expect("plan").is_none());
    }

    #[test]
    fn today_is_judged_in_coach_timezone() {
        // 23:30 UTC on Sunday is already Monday in Tokyo.
        let template = template("Asia/Tokyo");
        let blocked = BlockedDateSet::empty(CoachId::from("coach-1"));
        let now = utc("2026-02-15T23:30:00Z");
        let sunday = NaiveDate::from_ymd_opt(2026, 2, 15).expect("valid date");
        let monday = NaiveDate::from_ymd_opt(2026, 2, 16).expect("valid date");
        assert!(DayPlan::for_date(&template, &blocked, sunday, now).expect("plan").is_none());
        assert!(DayPlan::for_date(&template, &blocked, monday, now).expect("plan").is_some());
    }

    #[test]
    fn candidates_resolve_in_coach_timezone() {
        let template = template("Europe/Berlin");
        let blocked = BlockedDateSet::empty(CoachId::from("coach-1"));
        let monday = NaiveDate::from_ymd_opt(2026, 2, 16).expect("valid date");
        let plan = DayPlan::for_date(&template, &blocked, monday, utc("2026-02-01T00:00:00Z"))
            .expect("plan")
            .expect("open day");
        let candidates = plan.candidates(SlotQuery::new(60, 60));
        assert_eq!(candidates[0].start, utc("2026-02-16T08:00:00Z"));
        assert_eq!(candidates[0].end, utc("2026-02-16T09:00:00Z"));
        assert_eq!(
            plan.bounds_utc(),
            Some((utc("2026-02-16T08:00:00Z"), utc("2026-02-16T16:00:00Z")))
        );
    }

    #[test]
    fn dst_gap_start_is_skipped() {
        // Europe/Berlin jumps from 02:00 to 03:00 on 2026-03-29 (a Sunday).
        let mut template = template("Europe/Berlin");
        template.days[0] = crate::domain::models::DayAvailability::open(Weekday::Sun, "01:00", "04:00");
        let blocked = BlockedDateSet::empty(CoachId::from("coach-1"));
        let date = NaiveDate::from_ymd_opt(2026, 3, 29).expect("valid date");
        let plan = DayPlan::for_date(&template, &blocked, date, utc("2026-03-01T00:00:00Z"))
            .expect("plan")
            .expect("open day");
        let starts: Vec<NaiveTime> = plan
            .candidates(SlotQuery::new(60, 60))
            .into_iter()
            .map(|candidate| candidate.local_start)
            .collect();
        assert_eq!(starts, vec![hm(1, 0), hm(3, 0)]);
    }

    #[test]
    fn remove_overlapping_respects_half_open_ranges() {
        let candidates = vec![
            Candidate {
                local_start: hm(9, 0),
                start: utc("2026-02-16T09:00:00Z"),
                end: utc("2026-02-16T10:00:00Z"),
            },
            Candidate {
                local_start: hm(10, 0),
                start: utc("2026-02-16T10:00:00Z"),
                end: utc("2026-02-16T11:00:00Z"),
            },
            Candidate {
                local_start: hm(11, 0),
                start: utc("2026-02-16T11:00:00Z"),
                end: utc("2026-02-16T12:00:00Z"),
            },
        ];
        let busy = [BusyInterval::new(utc("2026-02-16T10:00:00Z"), utc("2026-02-16T11:00:00Z"))
            .expect("non-empty")];
        let remaining: Vec<NaiveTime> = remove_overlapping(candidates, &busy)
            .into_iter()
            .map(|candidate| candidate.local_start)
            .collect();
        assert_eq!(remaining, vec![hm(9, 0), hm(11, 0)]);
    }

    #[test]
    fn merge_and_clip_intervals() {
        let merged = merge_intervals(vec![
            BusyInterval::new(utc("2026-02-16T11:00:00Z"), utc("2026-02-16T12:00:00Z"))
                .expect("non-empty"),
            BusyInterval::new(utc("2026-02-16T09:00:00Z"), utc("2026-02-16T10:00:00Z"))
                .expect("non-empty"),
            BusyInterval::new(utc("2026-02-16T09:30:00Z"), utc("2026-02-16T11:00:00Z"))
                .expect("non-empty"),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].start, utc("2026-02-16T09:00:00Z"));
        assert_eq!(merged[0].end, utc("2026-02-16T12:00:00Z"));

        let clipped = clip_interval(
            merged[0],
            utc("2026-02-16T10:00:00Z"),
            utc("2026-02-16T10:30:00Z"),
        )
        .expect("overlaps window");
        assert_eq!(clipped.start, utc("2026-02-16T10:00:00Z"));
        assert_eq!(clipped.end, utc("2026-02-16T10:30:00Z"));
        assert!(clip_interval(
            merged[0],
            utc("2026-02-16T12:00:00Z"),
            utc("2026-02-16T13:00:00Z")
        )
        .is_none());
    }

    #[test]
    fn slot_query_rejects_zero_values() {
        assert!(SlotQuery::new(0, 60).validate().is_err());
        assert!(SlotQuery::new(30, 0).validate().is_err());
        assert!(SlotQuery::new(30, 45).validate().is_ok());
        assert!(SlotQuery::new(30, MAX_SLOT_MINUTES + 1).validate().is_err());
        assert!(SlotQuery::new(u32::MAX, 60).validate().is_err());
        assert!(SlotQuery::new(MAX_SLOT_MINUTES, MAX_SLOT_MINUTES).validate().is_ok());
    }

    #[test]
    fn huge_lengths_neither_fit_nor_overflow() {
        let plan = DayPlan {
            date: NaiveDate::from_ymd_opt(2026, 2, 16).expect("valid date"),
            timezone: Tz::UTC,
            window_start: hm(9, 0),
            window_end: hm(17, 0),
        };
        assert!(!plan.contains_start(hm(10, 0), u32::MAX));
        assert!(plan.contains_start(hm(10, 0), 60));
        assert!(slot_grid(hm(9, 0), hm(17, 0), 60, u32::MAX).is_empty());
        assert_eq!(slot_grid(hm(9, 0), hm(17, 0), u32::MAX, 60), vec![hm(9, 0)]);
    }

    proptest! {
        #[test]
        fn every_grid_slot_fits_the_window(
            start_minute in 0u32..1_380,
            window_len in 0u32..600,
            granularity in 1u32..120,
            duration in 1u32..240
        ) {
            let end_minute = (start_minute + window_len).min(23 * 60 + 59);
            let start = hm(start_minute / 60, start_minute % 60);
            let end = hm(end_minute / 60, end_minute % 60);
            let slots = slot_grid(start, end, granularity, duration);
            for slot in &slots {
                prop_assert!(minutes_of_day(*slot) >= start_minute);
                prop_assert!(minutes_of_day(*slot) + duration <= end_minute);
            }
            prop_assert!(slots.windows(2).all(|pair| pair[0] < pair[1]));
        }
    }
}
