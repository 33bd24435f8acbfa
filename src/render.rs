//! TUI rendering for hydrate types.
//!
//! Extension traits that add colored terminal output to hydrate-core types
//! using owo_colors.

use hydrate_core::event::{Event, Quality};
use hydrate_core::identity::AuthState;
use hydrate_core::sourced::{Source, Sourced};
use hydrate_core::stats::{
    HourlyHistogram, Insights, Overview, QualityDistribution, QualityTrend, WeeklyRollup,
};
use owo_colors::OwoColorize;

pub trait Render {
    fn render(&self) -> String;
}

impl Render for Quality {
    fn render(&self) -> String {
        match self {
            Quality::Poor => self.as_str().red().to_string(),
            Quality::Fair => self.as_str().yellow().to_string(),
            Quality::Good => self.as_str().green().to_string(),
            Quality::Great => self.as_str().cyan().to_string(),
        }
    }
}

impl Render for Event {
    fn render(&self) -> String {
        let when = self.timestamp.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M");
        let mut line = format!("{} {}", when, self.quality.render());
        if let Some(note) = &self.note {
            line.push_str(&format!(" {}", note.italic()));
        }
        if let Some(place) = &self.place_name {
            line.push_str(&format!(" @ {place}"));
        }
        format!("{line} {}", short_id(self).dimmed())
    }
}

fn short_id(event: &Event) -> String {
    event.id.to_string()[..8].to_string()
}

impl Render for AuthState {
    fn render(&self) -> String {
        match self {
            AuthState::Unauthenticated => "not signed in".dimmed().to_string(),
            AuthState::Authenticating => "waiting for account link".yellow().to_string(),
            AuthState::Authenticated(user) => format!("signed in as {}", user.green()),
            AuthState::Guest(_) => "guest (local only)".yellow().to_string(),
            AuthState::Error(reason) => format!("{} {}", "error:".red(), reason),
        }
    }
}

impl Render for Source {
    fn render(&self) -> String {
        let tag = format!("[{self}]");
        match self {
            Source::Remote => tag.green().to_string(),
            Source::Cache => tag.yellow().to_string(),
            Source::LocalDerived => tag.blue().to_string(),
        }
    }
}

/// Body of one stats section, without its heading.
pub trait SectionRender {
    fn title(&self) -> &'static str;
    fn body(&self) -> Vec<String>;
}

impl<T: SectionRender> Render for Sourced<T> {
    fn render(&self) -> String {
        let mut lines = vec![format!("{} {}", self.data.title().bold(), self.source.render())];
        lines.extend(self.data.body().into_iter().map(|l| format!("   {l}")));
        lines.join("\n")
    }
}

impl SectionRender for Overview {
    fn title(&self) -> &'static str {
        "Overview"
    }

    fn body(&self) -> Vec<String> {
        vec![
            format!("{} glasses over {} days", self.total_events, self.days_logged),
            format!(
                "{:.1} per day, average quality {:.1}/4",
                self.daily_average, self.average_quality
            ),
            format!(
                "streak {} days (longest {})",
                self.current_streak, self.longest_streak
            ),
        ]
    }
}

impl SectionRender for QualityTrend {
    fn title(&self) -> &'static str {
        "Quality trend"
    }

    fn body(&self) -> Vec<String> {
        if self.points.is_empty() {
            return vec!["No data".dimmed().to_string()];
        }
        self.points
            .iter()
            .map(|p| format!("{} {:.1} ({})", p.date, p.average_quality, p.count))
            .collect()
    }
}

const BAR: &str = "#";

impl SectionRender for HourlyHistogram {
    fn title(&self) -> &'static str {
        "By hour"
    }

    fn body(&self) -> Vec<String> {
        let max = self.buckets.iter().copied().max().unwrap_or(0);
        if max == 0 {
            return vec!["No data".dimmed().to_string()];
        }
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, count)| **count > 0)
            .map(|(hour, count)| {
                let width = (*count as usize * 20).div_ceil(max as usize);
                format!("{hour:02}h {} {count}", BAR.repeat(width).blue())
            })
            .collect()
    }
}

impl SectionRender for QualityDistribution {
    fn title(&self) -> &'static str {
        "Quality"
    }

    fn body(&self) -> Vec<String> {
        self.counts
            .iter()
            .map(|c| format!("{:<6} {}", c.quality.render(), c.count))
            .collect()
    }
}

impl SectionRender for WeeklyRollup {
    fn title(&self) -> &'static str {
        "Weekly"
    }

    fn body(&self) -> Vec<String> {
        if self.weeks.is_empty() {
            return vec!["No data".dimmed().to_string()];
        }
        self.weeks
            .iter()
            .map(|w| {
                format!(
                    "week of {}: {} glasses, {} days, quality {:.1}",
                    w.week_start, w.total, w.days_logged, w.average_quality
                )
            })
            .collect()
    }
}

impl SectionRender for Insights {
    fn title(&self) -> &'static str {
        "Insights"
    }

    fn body(&self) -> Vec<String> {
        self.items.iter().map(|i| format!("* {}", i.message)).collect()
    }
}
