use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(CoachId);
string_id!(MenteeId);
string_id!(SessionId);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DayAvailability {
    /// 0 = Sunday .. 6 = Saturday.
    pub day_of_week: u8,
    pub is_available: bool,
    pub start_time: String,
    pub end_time: String,
}

impl DayAvailability {
    pub fn open(weekday: Weekday, start_time: &str, end_time: &str) -> Self {
        Self {
            day_of_week: weekday_index(weekday),
            is_available: true,
            start_time: start_time.to_string(),
            end_time: end_time.to_string(),
        }
    }

    pub fn closed(weekday: Weekday) -> Self {
        Self {
            day_of_week: weekday_index(weekday),
            is_available: false,
            start_time: "00:00".to_string(),
            end_time: "00:00".to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.day_of_week > 6 {
            return Err("availability.day_of_week must be 0-6".to_string());
        }
        validate_hhmm(&self.start_time, "availability.start_time")?;
        validate_hhmm(&self.end_time, "availability.end_time")?;
        if self.is_available && self.window().is_none() {
            return Err(format!(
                "availability.start_time must be before end_time (day {})",
                self.day_of_week
            ));
        }
        Ok(())
    }

    /// Open window for the day, `None` when closed or malformed.
    pub fn window(&self) -> Option<(NaiveTime, NaiveTime)> {
        if !self.is_available {
            return None;
        }
        let start = parse_hhmm(&self.start_time)?;
        let end = parse_hhmm(&self.end_time)?;
        (start < end).then_some((start, end))
    }
}

/// A coach's recurring weekly schedule, resolved in a single timezone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityTemplate {
    pub coach_id: CoachId,
    pub timezone: String,
    pub days: Vec<DayAvailability>,
}

impl AvailabilityTemplate {
    /// Template open on `open_days` between `start_time` and `end_time`, closed otherwise.
    pub fn weekly(
        coach_id: CoachId,
        timezone: &str,
        open_days: &[Weekday],
        start_time: &str,
        end_time: &str,
    ) -> Self {
        let days = ALL_WEEKDAYS
            .iter()
            .map(|weekday| {
                if open_days.contains(weekday) {
                    DayAvailability::open(*weekday, start_time, end_time)
                } else {
                    DayAvailability::closed(*weekday)
                }
            })
            .collect();
        Self {
            coach_id,
            timezone: timezone.to_string(),
            days,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(self.coach_id.as_str(), "template.coach_id")?;
        self.tz()?;
        if self.days.len() > 7 {
            return Err("template.days must hold at most 7 entries".to_string());
        }
        let mut seen = BTreeSet::new();
        for day in &self.days {
            day.validate()?;
            if !seen.insert(day.day_of_week) {
                return Err(format!(
                    "template.days has duplicate day_of_week {}",
                    day.day_of_week
                ));
            }
        }
        Ok(())
    }

    pub fn tz(&self) -> Result<Tz, String> {
        parse_timezone(&self.timezone)
    }

    pub fn day(&self, weekday: Weekday) -> Option<&DayAvailability> {
        let index = weekday_index(weekday);
        self.days.iter().find(|day| day.day_of_week == index)
    }

    /// Local open window for `date`; missing days count as closed.
    pub fn window_for(&self, date: NaiveDate) -> Option<(NaiveTime, NaiveTime)> {
        self.day(date.weekday()).and_then(DayAvailability::window)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockedDateSet {
    pub coach_id: CoachId,
    pub dates: BTreeSet<NaiveDate>,
}

impl BlockedDateSet {
    pub fn empty(coach_id: CoachId) -> Self {
        Self {
            coach_id,
            dates: BTreeSet::new(),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.dates.contains(&date)
    }

    /// Returns false when the date was already blocked.
    pub fn insert(&mut self, date: NaiveDate) -> bool {
        self.dates.insert(date)
    }

    pub fn remove(&mut self, date: NaiveDate) -> bool {
        self.dates.remove(&date)
    }

    /// Drops every date strictly before `today`, returning how many were removed.
    pub fn prune_before(&mut self, today: NaiveDate) -> usize {
        let before = self.dates.len();
        self.dates = self.dates.split_off(&today);
        before - self.dates.len()
    }
}

/// Half-open `[start, end)` range during which a coach is occupied.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BusyInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (end > start).then_some(Self { start, end })
    }

    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.start < end && start < self.end
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Confirmed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Pending and Confirmed sessions hold a reservation in the ledger.
    pub fn is_active(self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(format!("unsupported session status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CalendarProvider {
    Google,
    Calcom,
}

impl CalendarProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Calcom => "calcom",
        }
    }
}

impl fmt::Display for CalendarProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CalendarProvider {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "google" | "google_calendar" => Ok(Self::Google),
            "calcom" | "cal.com" | "cal_com" => Ok(Self::Calcom),
            other => Err(format!("unsupported calendar provider: {other}")),
        }
    }
}

/// Opaque id of the remote event, tagged with the provider that created it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ExternalRef {
    pub provider: CalendarProvider,
    pub id: String,
}

impl ExternalRef {
    pub fn new(provider: CalendarProvider, id: impl Into<String>) -> Self {
        Self {
            provider,
            id: id.into(),
        }
    }
}

impl fmt::Display for ExternalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.id)
    }
}

impl FromStr for ExternalRef {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (provider, id) = value
            .split_once(':')
            .ok_or_else(|| format!("external ref must be provider:id, got '{value}'"))?;
        let id = id.trim();
        if id.is_empty() {
            return Err("external ref id must not be empty".to_string());
        }
        Ok(Self {
            provider: provider.parse()?,
            id: id.to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub coach_id: CoachId,
    pub mentee_id: MenteeId,
    pub session_type: String,
    pub scheduled_start: DateTime<Utc>,
    pub duration_minutes: u32,
    pub status: SessionStatus,
    pub external_booking_ref: Option<ExternalRef>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub rescheduled_from: Option<SessionId>,
    pub rescheduled_to: Option<SessionId>,
}

impl Session {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(self.id.as_str(), "session.id")?;
        validate_non_empty(self.coach_id.as_str(), "session.coach_id")?;
        validate_non_empty(self.mentee_id.as_str(), "session.mentee_id")?;
        validate_non_empty(&self.session_type, "session.session_type")?;
        if self.duration_minutes == 0 {
            return Err("session.duration_minutes must be > 0".to_string());
        }
        if self.status == SessionStatus::Cancelled && self.cancelled_at.is_none() {
            return Err("cancelled session must carry cancelled_at".to_string());
        }
        Ok(())
    }

    pub fn scheduled_end(&self) -> DateTime<Utc> {
        self.scheduled_start + Duration::minutes(i64::from(self.duration_minutes))
    }

    pub fn span(&self) -> BusyInterval {
        BusyInterval {
            start: self.scheduled_start,
            end: self.scheduled_end(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Active sessions whose `[start, start+duration)` intersects the given range.
    pub fn conflicts_with(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.is_active() && self.span().overlaps(start, end)
    }
}

/// A requested start: calendar date plus wall-clock time in the coach's timezone.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlotStart {
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl SlotStart {
    pub fn new(date: NaiveDate, time: NaiveTime) -> Self {
        Self { date, time }
    }

    pub fn parse(date: &str, time: &str) -> Result<Self, String> {
        let parsed_date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
            .map_err(|_| format!("slot date must be YYYY-MM-DD, got '{date}'"))?;
        let parsed_time =
            parse_hhmm(time.trim()).ok_or_else(|| format!("slot time must be HH:MM, got '{time}'"))?;
        Ok(Self::new(parsed_date, parsed_time))
    }
}

impl fmt::Display for SlotStart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.date, format_hhmm(self.time))
    }
}

/// Which busy sources a booking must be checked against before it is stored.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Only the internal ledger decides; external calendars shape slot lists but not bookings.
    #[default]
    InternalOnly,
    /// Connected calendars are consulted again right before the ledger insert.
    AllAdapters,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
    pub scope: Option<String>,
}

impl OAuthToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>, leeway_seconds: i64) -> bool {
        self.expires_at > now + Duration::seconds(leeway_seconds)
            && !self.access_token.trim().is_empty()
    }
}

pub const ALL_WEEKDAYS: [Weekday; 7] = [
    Weekday::Sun,
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
];

pub fn weekday_index(weekday: Weekday) -> u8 {
    weekday.num_days_from_sunday() as u8
}

pub fn parse_timezone(value: &str) -> Result<Tz, String> {
    value
        .trim()
        .parse::<Tz>()
        .map_err(|_| format!("unknown timezone: {value}"))
}

pub fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

pub fn validate_hhmm(value: &str, field_name: &str) -> Result<(), String> {
    let mut split = value.split(':');
    let Some(hour_str) = split.next() else {
        return Err(format!("{field_name} must be HH:MM"));
    };
    let Some(minute_str) = split.next() else {
        return Err(format!("{field_name} must be HH:MM"));
    };
    if split.next().is_some() {
        return Err(format!("{field_name} must be HH:MM"));
    }

    let hour = hour_str
        .parse::<u8>()
        .map_err(|_| format!("{field_name} must be HH:MM"))?;
    let minute = minute_str
        .parse::<u8>()
        .map_err(|_| format!("{field_name} must be HH:MM"))?;
    if hour > 23 || minute > 59 {
        return Err(format!("{field_name} must be HH:MM"));
    }
    Ok(())
}

pub fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M").ok()
}

pub fn format_hhmm(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}
