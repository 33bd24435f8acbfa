//! The six aggregate sections of the stats dashboard.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Section {
    Overview,
    QualityTrend,
    HourlyHistogram,
    QualityDistribution,
    WeeklyRollup,
    Insights,
}

/// Wire name (also the cache directory and endpoint segment) plus accepted aliases.
const SECTION_NAMES: [(Section, &[&str]); 6] = [
    (Section::Overview, &["overview", "summary"]),
    (Section::QualityTrend, &["quality-trend", "trend", "quality_trend"]),
    (Section::HourlyHistogram, &["hourly", "hourly-histogram", "hours"]),
    (Section::QualityDistribution, &["distribution", "quality-distribution"]),
    (Section::WeeklyRollup, &["weekly", "weekly-rollup", "weeks"]),
    (Section::Insights, &["insights"]),
];

impl Section {
    pub const DEFAULT: Section = Section::Overview;

    pub const ALL: [Section; 6] = [
        Section::Overview,
        Section::QualityTrend,
        Section::HourlyHistogram,
        Section::QualityDistribution,
        Section::WeeklyRollup,
        Section::Insights,
    ];

    pub fn as_str(&self) -> &'static str {
        SECTION_NAMES
            .iter()
            .find(|(s, _)| s == self)
            .and_then(|(_, names)| names.first().copied())
            .unwrap_or("overview")
    }

    pub fn from_name(name: &str) -> Section {
        let name = name.trim().to_ascii_lowercase();
        SECTION_NAMES
            .iter()
            .find(|(_, names)| names.contains(&name.as_str()))
            .map(|(s, _)| *s)
            .unwrap_or(Section::DEFAULT)
    }

    /// Path of the aggregate endpoint, relative to the backend base url.
    pub fn endpoint(&self) -> String {
        format!("/stats/{}", self.as_str())
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
