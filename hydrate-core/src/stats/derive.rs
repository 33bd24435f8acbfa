//! Local derivation of section payloads from raw events.
//!
//! All bucketing (days, hours, weeks) happens in the range's time zone.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;

use super::{
    HourlyHistogram, Insight, Insights, Overview, QualityCount, QualityDistribution,
    QualityTrend, TrendPoint, WeekSummary, WeeklyRollup,
};
use crate::event::{Event, Quality};
use crate::period::PeriodRange;

fn in_range<'a>(events: &'a [Event], range: &PeriodRange, now: DateTime<Utc>) -> Vec<&'a Event> {
    events
        .iter()
        .filter(|e| range.contains(e.timestamp, now))
        .collect()
}

fn local_date(event: &Event, tz: Tz) -> NaiveDate {
    event.timestamp.with_timezone(&tz).date_naive()
}

fn mean_quality<'a>(events: impl IntoIterator<Item = &'a Event>) -> f64 {
    let (sum, count) = events
        .into_iter()
        .fold((0.0, 0u32), |(sum, n), e| (sum + e.quality.score(), n + 1));
    if count == 0 { 0.0 } else { round2(sum / count as f64) }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Lengths of (current, longest) runs of consecutive logged days.
/// The current run may end today or yesterday.
fn streaks(days: &BTreeSet<NaiveDate>, today: NaiveDate) -> (u32, u32) {
    let mut longest = 0;
    let mut run = 0;
    let mut prev: Option<NaiveDate> = None;

    for day in days {
        run = match prev {
            Some(p) if p.succ_opt() == Some(*day) => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        prev = Some(*day);
    }

    let mut current = 0;
    let mut cursor = if days.contains(&today) {
        Some(today)
    } else {
        today.pred_opt().filter(|d| days.contains(d))
    };
    while let Some(day) = cursor.filter(|d| days.contains(d)) {
        current += 1;
        cursor = day.pred_opt();
    }

    (current, longest)
}

pub(super) fn overview(events: &[Event], range: &PeriodRange, now: DateTime<Utc>) -> Overview {
    let tz = range.tz();
    let selected = in_range(events, range, now);
    let days: BTreeSet<NaiveDate> = selected.iter().map(|e| local_date(e, tz)).collect();

    let (start, end) = range.window(now);
    let first = start.or_else(|| selected.iter().map(|e| e.timestamp).min());
    let window_days = first
        .map(|s| ((end - s).num_seconds() as f64 / 86_400.0).ceil().max(1.0))
        .unwrap_or(1.0);

    let today = now.with_timezone(&tz).date_naive();
    let (current_streak, longest_streak) = streaks(&days, today);

    Overview {
        total_events: selected.len() as u32,
        days_logged: days.len() as u32,
        daily_average: round2(selected.len() as f64 / window_days),
        current_streak,
        longest_streak,
        average_quality: mean_quality(selected.iter().copied()),
    }
}

pub(super) fn quality_trend(
    events: &[Event],
    range: &PeriodRange,
    now: DateTime<Utc>,
) -> QualityTrend {
    let tz = range.tz();
    let mut by_day: BTreeMap<NaiveDate, Vec<&Event>> = BTreeMap::new();
    for event in in_range(events, range, now) {
        by_day.entry(local_date(event, tz)).or_default().push(event);
    }

    let points = by_day
        .into_iter()
        .map(|(date, day_events)| TrendPoint {
            date,
            count: day_events.len() as u32,
            average_quality: mean_quality(day_events),
        })
        .collect();

    QualityTrend { points }
}

pub(super) fn hourly(events: &[Event], range: &PeriodRange, now: DateTime<Utc>) -> HourlyHistogram {
    let tz = range.tz();
    let mut buckets = vec![0u32; 24];
    for event in in_range(events, range, now) {
        let hour = event.timestamp.with_timezone(&tz).hour() as usize;
        buckets[hour] += 1;
    }
    HourlyHistogram { buckets }
}

pub(super) fn distribution(
    events: &[Event],
    range: &PeriodRange,
    now: DateTime<Utc>,
) -> QualityDistribution {
    let selected = in_range(events, range, now);
    let counts = Quality::all()
        .map(|quality| QualityCount {
            quality,
            count: selected.iter().filter(|e| e.quality == quality).count() as u32,
        })
        .collect();
    QualityDistribution { counts }
}

pub(super) fn weekly(events: &[Event], range: &PeriodRange, now: DateTime<Utc>) -> WeeklyRollup {
    let tz = range.tz();
    let mut by_week: BTreeMap<NaiveDate, Vec<&Event>> = BTreeMap::new();
    for event in in_range(events, range, now) {
        let date = local_date(event, tz);
        let monday = date - Duration::days(date.weekday().num_days_from_monday() as i64);
        by_week.entry(monday).or_default().push(event);
    }

    let weeks = by_week
        .into_iter()
        .map(|(week_start, week_events)| {
            let days: BTreeSet<NaiveDate> = week_events.iter().map(|e| local_date(e, tz)).collect();
            WeekSummary {
                week_start,
                total: week_events.len() as u32,
                days_logged: days.len() as u32,
                average_quality: mean_quality(week_events),
            }
        })
        .collect();

    WeeklyRollup { weeks }
}

pub(super) fn insights(events: &[Event], range: &PeriodRange, now: DateTime<Utc>) -> Insights {
    let selected = in_range(events, range, now);
    if selected.is_empty() {
        return Insights {
            items: vec![Insight {
                kind: "no_data".into(),
                message: "Log a few drinks to unlock insights.".into(),
            }],
        };
    }

    let mut items = Vec::new();

    let histogram = hourly(events, range, now);
    if let Some((hour, _)) = histogram
        .buckets
        .iter()
        .enumerate()
        .max_by_key(|(hour, count)| (**count, std::cmp::Reverse(*hour)))
    {
        items.push(Insight {
            kind: "peak_hour".into(),
            message: format!("You drink most often around {hour:02}:00."),
        });
    }

    let summary = overview(events, range, now);
    if summary.current_streak >= 2 {
        items.push(Insight {
            kind: "streak".into(),
            message: format!("You're on a {}-day streak.", summary.current_streak),
        });
    }

    let mut ordered = selected;
    ordered.sort_by_key(|e| e.timestamp);
    if ordered.len() >= 4 {
        let (first, second) = ordered.split_at(ordered.len() / 2);
        let before = mean_quality(first.iter().copied());
        let after = mean_quality(second.iter().copied());
        let (kind, message) = if after > before {
            ("quality_up", "Your hydration quality is improving.")
        } else if after < before {
            ("quality_down", "Your hydration quality has dipped lately.")
        } else {
            ("quality_steady", "Your hydration quality is steady.")
        };
        items.push(Insight {
            kind: kind.into(),
            message: message.into(),
        });
    }

    Insights { items }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::Period;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 20, 18, 0, 0).unwrap()
    }

    fn event_at(day: u32, hour: u32, quality: Quality) -> Event {
        Event::new(Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap(), quality)
    }

    fn sample() -> Vec<Event> {
        vec![
            event_at(18, 9, Quality::Poor),
            event_at(19, 9, Quality::Fair),
            event_at(20, 9, Quality::Good),
            event_at(20, 14, Quality::Great),
            // outside the week window
            event_at(1, 9, Quality::Great),
        ]
    }

    #[test]
    fn test_overview_week() {
        let range = PeriodRange::preset(Period::Week, "UTC");
        let o = overview(&sample(), &range, now());

        assert_eq!(o.total_events, 4);
        assert_eq!(o.days_logged, 3);
        assert_eq!(o.current_streak, 3);
        assert_eq!(o.longest_streak, 3);
        assert_eq!(o.daily_average, 0.57);
        assert_eq!(o.average_quality, 2.5);
    }

    #[test]
    fn test_overview_empty() {
        let range = PeriodRange::preset(Period::AllTime, "UTC");
        let o = overview(&[], &range, now());
        assert_eq!(o.total_events, 0);
        assert_eq!(o.average_quality, 0.0);
        assert_eq!(o.current_streak, 0);
    }

    #[test]
    fn test_streak_can_end_yesterday() {
        let days: BTreeSet<NaiveDate> = [17, 18, 19]
            .iter()
            .map(|d| NaiveDate::from_ymd_opt(2025, 3, *d).unwrap())
            .collect();
        let today = NaiveDate::from_ymd_opt(2025, 3, 20).unwrap();
        assert_eq!(streaks(&days, today), (3, 3));

        let two_days_later = NaiveDate::from_ymd_opt(2025, 3, 21).unwrap();
        assert_eq!(streaks(&days, two_days_later), (0, 3));
    }

    #[test]
    fn test_hourly_uses_range_time_zone() {
        let range = PeriodRange::preset(Period::Week, "Asia/Tokyo");
        let h = hourly(&sample(), &range, now());
        // 09:00 UTC is 18:00 in Tokyo
        assert_eq!(h.buckets[18], 3);
        assert_eq!(h.buckets[23], 1);
        assert_eq!(h.buckets.len(), 24);
    }

    #[test]
    fn test_distribution_includes_zero_counts() {
        let range = PeriodRange::preset(Period::Week, "UTC");
        let d = distribution(&sample()[..2], &range, now());
        let counts: Vec<u32> = d.counts.iter().map(|c| c.count).collect();
        assert_eq!(counts, vec![1, 1, 0, 0]);
    }

    #[test]
    fn test_weekly_groups_by_monday() {
        let range = PeriodRange::preset(Period::AllTime, "UTC");
        let w = weekly(&sample(), &range, now());
        assert_eq!(w.weeks.len(), 2);
        assert_eq!(w.weeks[1].week_start, NaiveDate::from_ymd_opt(2025, 3, 17).unwrap());
        assert_eq!(w.weeks[1].total, 4);
        assert_eq!(w.weeks[1].days_logged, 3);
    }

    #[test]
    fn test_insights() {
        let range = PeriodRange::preset(Period::Week, "UTC");
        let kinds: Vec<String> = insights(&sample(), &range, now())
            .items
            .into_iter()
            .map(|i| i.kind)
            .collect();
        assert_eq!(kinds, vec!["peak_hour", "streak", "quality_up"]);

        let empty = insights(&[], &range, now());
        assert_eq!(empty.items[0].kind, "no_data");
    }
}
