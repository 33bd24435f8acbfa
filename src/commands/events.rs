use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use hydrate_core::{Event, Hydrate, Quality};
use owo_colors::OwoColorize;
use uuid::Uuid;

use crate::render::Render;

pub async fn log(
    app: &Hydrate,
    quality: &str,
    note: Option<String>,
    at: Option<&str>,
) -> Result<()> {
    let timestamp = match at {
        Some(s) => parse_timestamp(s)?,
        None => Utc::now(),
    };
    let mut event = Event::new(timestamp, Quality::from_name(quality));
    event.note = note;

    let user = app.identity.current_user();
    let push = app.sync.add_event(user.as_ref(), event.clone()).await?;
    println!("{} {}", "+".green(), event.render());

    // The push is best effort; give it a chance before the process exits.
    if !push.is_local_only() {
        push.wait().await;
    }
    Ok(())
}

pub async fn list(app: &Hydrate, limit: usize, json: bool) -> Result<()> {
    let events = visible_events(app).await?;
    if json {
        for event in events.iter().rev().take(limit) {
            println!("{}", serde_json::to_string(event)?);
        }
        return Ok(());
    }
    if events.is_empty() {
        println!("{}", "No events yet. Log one with `hydrate log`.".dimmed());
        return Ok(());
    }

    for event in events.iter().rev().take(limit) {
        println!("{}", event.render());
    }
    if events.len() > limit {
        println!("{}", format!("... and {} older", events.len() - limit).dimmed());
    }
    Ok(())
}

pub async fn delete(app: &Hydrate, id: &str) -> Result<()> {
    let event = find_event(app, id).await?;

    let user = app.identity.current_user();
    let push = app.sync.delete_event(user.as_ref(), event.id).await?;
    println!("{} {}", "-".red(), event.render());

    if !push.is_local_only() {
        push.wait().await;
    }
    Ok(())
}

async fn visible_events(app: &Hydrate) -> Result<Vec<Event>> {
    let owner = app.identity.current_user().map(|u| u.id);
    let events = app
        .store
        .events(move |e| owner.is_none_or(|id| e.is_visible_to(id)))
        .await?;
    Ok(events)
}

async fn find_event(app: &Hydrate, id: &str) -> Result<Event> {
    if let Ok(uuid) = Uuid::parse_str(id) {
        return app
            .store
            .event(uuid)
            .await?
            .with_context(|| format!("No event with id {id}"));
    }

    let mut matches: Vec<Event> = visible_events(app)
        .await?
        .into_iter()
        .filter(|e| e.id.to_string().starts_with(id))
        .collect();
    match matches.len() {
        0 => anyhow::bail!("No event with id {id}"),
        1 => Ok(matches.remove(0)),
        n => anyhow::bail!("Id prefix '{id}' matches {n} events, use more characters"),
    }
}

/// RFC 3339, or "YYYY-MM-DDTHH:MM" in local time.
fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M")
        .with_context(|| format!("Invalid time '{s}'. Expected YYYY-MM-DDTHH:MM"))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("'{s}' does not exist in the local time zone"))
}
