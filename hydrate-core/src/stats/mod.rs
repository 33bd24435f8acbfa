//! Aggregate payloads for the six dashboard sections.
//!
//! Each payload decodes from the backend's section-specific JSON and can also
//! be derived from raw local events when neither the backend nor the cache
//! can answer.

mod derive;

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::event::{Event, Quality};
use crate::period::PeriodRange;
use crate::section::Section;

/// A typed section payload.
pub trait SectionData: Serialize + DeserializeOwned + Send + Sync + 'static {
    const SECTION: Section;

    /// Compute the payload from locally stored events.
    fn derive(events: &[Event], range: &PeriodRange, now: DateTime<Utc>) -> Self;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub total_events: u32,
    pub days_logged: u32,
    pub daily_average: f64,
    pub current_streak: u32,
    pub longest_streak: u32,
    /// Mean quality score, 1.0 (poor) to 4.0 (great). 0.0 with no events.
    pub average_quality: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub average_quality: f64,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityTrend {
    pub points: Vec<TrendPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyHistogram {
    /// 24 buckets, index = local hour of day.
    pub buckets: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityCount {
    pub quality: Quality,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityDistribution {
    pub counts: Vec<QualityCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekSummary {
    /// Monday of the week, local date.
    pub week_start: NaiveDate,
    pub total: u32,
    pub days_logged: u32,
    pub average_quality: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyRollup {
    pub weeks: Vec<WeekSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insights {
    pub items: Vec<Insight>,
}

impl SectionData for Overview {
    const SECTION: Section = Section::Overview;

    fn derive(events: &[Event], range: &PeriodRange, now: DateTime<Utc>) -> Self {
        derive::overview(events, range, now)
    }
}

impl SectionData for QualityTrend {
    const SECTION: Section = Section::QualityTrend;

    fn derive(events: &[Event], range: &PeriodRange, now: DateTime<Utc>) -> Self {
        derive::quality_trend(events, range, now)
    }
}

impl SectionData for HourlyHistogram {
    const SECTION: Section = Section::HourlyHistogram;

    fn derive(events: &[Event], range: &PeriodRange, now: DateTime<Utc>) -> Self {
        derive::hourly(events, range, now)
    }
}

impl SectionData for QualityDistribution {
    const SECTION: Section = Section::QualityDistribution;

    fn derive(events: &[Event], range: &PeriodRange, now: DateTime<Utc>) -> Self {
        derive::distribution(events, range, now)
    }
}

impl SectionData for WeeklyRollup {
    const SECTION: Section = Section::WeeklyRollup;

    fn derive(events: &[Event], range: &PeriodRange, now: DateTime<Utc>) -> Self {
        derive::weekly(events, range, now)
    }
}

impl SectionData for Insights {
    const SECTION: Section = Section::Insights;

    fn derive(events: &[Event], range: &PeriodRange, now: DateTime<Utc>) -> Self {
        derive::insights(events, range, now)
    }
}
