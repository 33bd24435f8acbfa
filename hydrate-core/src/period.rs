//! Period ranges for aggregate queries.
//!
//! A [`PeriodRange`] is both the query parameter sent to the backend and the
//! cache key for the snapshot that comes back, so it is normalized before
//! either use.

use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;

/// Named period presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    /// Rolling last 7 days.
    Week,
    /// Rolling last 30 days.
    Month,
    AllTime,
    /// Explicit start/end.
    Custom,
}

/// Accepted spellings for every preset. The first entry of each group is the
/// canonical wire name.
const PERIOD_ALIASES: [(Period, &[&str]); 4] = [
    (Period::Week, &["week", "last-7-days", "last_7_days", "7d", "weekly"]),
    (Period::Month, &["month", "last-30-days", "last_30_days", "30d", "monthly"]),
    (Period::AllTime, &["all", "all-time", "all_time", "alltime", "lifetime"]),
    (Period::Custom, &["custom", "range"]),
];

impl Period {
    /// Unrecognized aliases all land in this single bucket.
    pub const DEFAULT: Period = Period::Week;

    pub fn as_str(&self) -> &'static str {
        PERIOD_ALIASES
            .iter()
            .find(|(p, _)| p == self)
            .and_then(|(_, names)| names.first().copied())
            .unwrap_or("week")
    }

    pub fn from_name(name: &str) -> Period {
        let name = name.trim().to_ascii_lowercase();
        PERIOD_ALIASES
            .iter()
            .find(|(_, names)| names.contains(&name.as_str()))
            .map(|(p, _)| *p)
            .unwrap_or(Period::DEFAULT)
    }

    /// Length of a rolling preset.
    pub fn span(&self) -> Option<Duration> {
        match self {
            Period::Week => Some(Duration::days(7)),
            Period::Month => Some(Duration::days(30)),
            Period::AllTime | Period::Custom => None,
        }
    }
}

/// A named or explicit (start, end, time zone) window.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeriodRange {
    pub period: Period,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// IANA time zone id.
    pub time_zone: String,
}

impl PeriodRange {
    pub fn preset(period: Period, time_zone: &str) -> Self {
        PeriodRange {
            period,
            start: None,
            end: None,
            time_zone: time_zone.to_string(),
        }
        .normalized()
    }

    pub fn custom(start: DateTime<Utc>, end: DateTime<Utc>, time_zone: &str) -> Self {
        PeriodRange {
            period: Period::Custom,
            start: Some(start),
            end: Some(end),
            time_zone: time_zone.to_string(),
        }
        .normalized()
    }

    /// Build a range from CLI-style arguments.
    /// - `period`: any preset alias; ignored when `from`/`to` are given
    /// - `from`/`to`: YYYY-MM-DD, interpreted as day boundaries in `time_zone`
    pub fn from_args(
        period: Option<&str>,
        from: Option<&str>,
        to: Option<&str>,
        time_zone: &str,
    ) -> Result<Self, String> {
        let tz = parse_tz(time_zone);

        if from.is_none() && to.is_none() {
            let period = period.map(Period::from_name).unwrap_or(Period::DEFAULT);
            return Ok(Self::preset(period, time_zone));
        }

        let start = from.map(|s| parse_day_start(s, tz)).transpose()?;
        let end = to.map(|s| parse_day_end(s, tz)).transpose()?;

        Ok(PeriodRange {
            period: Period::Custom,
            start,
            end,
            time_zone: time_zone.to_string(),
        }
        .normalized())
    }

    /// Canonical form used for both the request and the cache key.
    ///
    /// Presets carry no explicit bounds, custom bounds are ordered and
    /// truncated to whole seconds, and unknown time zones become UTC.
    pub fn normalized(&self) -> Self {
        let time_zone = parse_tz(&self.time_zone).name().to_string();

        match self.period {
            Period::Custom => {
                let (mut start, mut end) = (self.start.map(trunc_secs), self.end.map(trunc_secs));
                if start.is_none() && end.is_none() {
                    return PeriodRange {
                        period: Period::AllTime,
                        start: None,
                        end: None,
                        time_zone,
                    };
                }
                if let (Some(s), Some(e)) = (start, end)
                    && s > e
                {
                    (start, end) = (Some(e), Some(s));
                }
                PeriodRange {
                    period: Period::Custom,
                    start,
                    end,
                    time_zone,
                }
            }
            period => PeriodRange {
                period,
                start: None,
                end: None,
                time_zone,
            },
        }
    }

    pub fn label(&self) -> &'static str {
        self.period.as_str()
    }

    pub fn start_string(&self) -> Option<String> {
        self.start.map(|d| d.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn end_string(&self) -> Option<String> {
        self.end.map(|d| d.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn tz(&self) -> Tz {
        parse_tz(&self.time_zone)
    }

    /// Stable, length-bounded cache key.
    ///
    /// Two different ranges hashing to the same key would share a cache
    /// entry; with 128 bits of blake3 output that risk is accepted.
    pub fn cache_key(&self) -> String {
        let n = self.normalized();
        let material = format!(
            "{}|{}|{}|{}",
            n.label(),
            n.start_string().unwrap_or_default(),
            n.end_string().unwrap_or_default(),
            n.time_zone
        );
        let hash = blake3::hash(material.as_bytes()).to_hex();
        format!("{}-{}", n.label(), &hash.as_str()[..32])
    }

    /// Concrete bounds of the window as of `now`. `None` start means unbounded.
    pub fn window(&self, now: DateTime<Utc>) -> (Option<DateTime<Utc>>, DateTime<Utc>) {
        match self.period.span() {
            Some(span) => (Some(now - span), now),
            None => (self.start, self.end.unwrap_or(now)),
        }
    }

    pub fn contains(&self, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let (start, end) = self.window(now);
        start.is_none_or(|s| timestamp >= s) && timestamp <= end
    }

    /// The window immediately before this one, for cache prewarming.
    /// Only rolling presets have a well-defined predecessor.
    pub fn previous(&self, now: DateTime<Utc>) -> Option<PeriodRange> {
        let span = self.period.span()?;
        let tz = self.tz();
        let today = now.with_timezone(&tz).date_naive();
        let end = day_start(today, tz) - Duration::days(span.num_days() - 1);
        let start = end - span;
        Some(PeriodRange::custom(start, end, &self.time_zone))
    }
}

fn parse_tz(name: &str) -> Tz {
    name.parse::<Tz>().unwrap_or(Tz::UTC)
}

fn trunc_secs(d: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(d.timestamp(), 0).unwrap_or(d)
}

fn day_start(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let naive = date.and_hms_opt(0, 0, 0).unwrap_or_default();
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|| naive.and_utc())
}

/// Parse YYYY-MM-DD as start of day in `tz`
fn parse_day_start(s: &str, tz: Tz) -> Result<DateTime<Utc>, String> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| format!("Invalid date format '{}'. Expected YYYY-MM-DD", s))?;
    Ok(day_start(date, tz))
}

/// Parse YYYY-MM-DD as end of day in `tz`
fn parse_day_end(s: &str, tz: Tz) -> Result<DateTime<Utc>, String> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| format!("Invalid date format '{}'. Expected YYYY-MM-DD", s))?;
    let next = date.succ_opt().ok_or_else(|| format!("Date out of range: {s}"))?;
    Ok(day_start(next, tz) - Duration::seconds(1))
}
