use anyhow::Result;
use hydrate_core::fetcher::Dashboard;
use hydrate_core::stats::{
    HourlyHistogram, Insights, Overview, QualityDistribution, QualityTrend, SectionData,
    WeeklyRollup,
};
use hydrate_core::{Hydrate, HydrateResult, PeriodRange, Section, Sourced};
use owo_colors::OwoColorize;

use crate::render::{Render, SectionRender};
use crate::utils::tui::create_spinner;

pub async fn run(
    app: &Hydrate,
    period: Option<&str>,
    from: Option<&str>,
    to: Option<&str>,
    section: Option<&str>,
) -> Result<()> {
    let range = PeriodRange::from_args(period, from, to, &app.time_zone())
        .map_err(|e| anyhow::anyhow!(e))?;
    let ns = app.namespace();

    println!("{} {}", "Stats".bold(), describe(&range).dimmed());

    let spinner = create_spinner("Loading stats...");
    let lines = match section.map(Section::from_name) {
        Some(section) => vec![fetch_one(app, section, &range).await],
        None => {
            let dashboard = app.fetcher.fetch_dashboard(&ns, &range).await;
            render_dashboard(dashboard)
        }
    };
    spinner.finish_and_clear();

    for block in lines {
        println!();
        println!("{block}");
    }

    if !app.reachability.is_online() {
        println!();
        println!("{}", "Offline: showing cached or locally computed stats".yellow());
    }
    Ok(())
}

async fn fetch_one(app: &Hydrate, section: Section, range: &PeriodRange) -> String {
    let ns = app.namespace();
    let fetcher = &app.fetcher;
    match section {
        Section::Overview => render_section(fetcher.fetch_or_derive::<Overview>(&ns, range).await),
        Section::QualityTrend => {
            render_section(fetcher.fetch_or_derive::<QualityTrend>(&ns, range).await)
        }
        Section::HourlyHistogram => {
            render_section(fetcher.fetch_or_derive::<HourlyHistogram>(&ns, range).await)
        }
        Section::QualityDistribution => {
            render_section(fetcher.fetch_or_derive::<QualityDistribution>(&ns, range).await)
        }
        Section::WeeklyRollup => {
            render_section(fetcher.fetch_or_derive::<WeeklyRollup>(&ns, range).await)
        }
        Section::Insights => render_section(fetcher.fetch_or_derive::<Insights>(&ns, range).await),
    }
}

fn render_dashboard(dashboard: Dashboard) -> Vec<String> {
    vec![
        render_section(dashboard.overview),
        render_section(dashboard.quality_trend),
        render_section(dashboard.hourly),
        render_section(dashboard.distribution),
        render_section(dashboard.weekly),
        render_section(dashboard.insights),
    ]
}

/// One failed section never hides the others.
fn render_section<T: SectionData + SectionRender>(result: HydrateResult<Sourced<T>>) -> String {
    match result {
        Ok(sourced) => sourced.render(),
        Err(e) => format!(
            "{} {}",
            T::SECTION.to_string().bold(),
            format!("unavailable: {e}").red()
        ),
    }
}

fn describe(range: &PeriodRange) -> String {
    match (range.start_string(), range.end_string()) {
        (None, None) => format!("({}, {})", range.label(), range.time_zone),
        (start, end) => format!(
            "({} to {}, {})",
            start.as_deref().unwrap_or("beginning"),
            end.as_deref().unwrap_or("now"),
            range.time_zone
        ),
    }
}
